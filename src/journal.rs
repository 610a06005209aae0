//! Journal collaborator — append/replay/read-highest/delete.
//!
//! The journal transport and its storage engine are external collaborators;
//! this module only defines the message contract the core exchanges with
//! one, plus an in-memory implementation used by tests and `demos/` so the
//! runtime is exercisable without a real external journal.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::id::{InstanceId, PersistenceId, SequenceNr};
use crate::protocol::PersistentRepr;

#[derive(Error, Debug, Clone)]
pub enum JournalError {
    #[error("journal write rejected: {0}")]
    WriteRejected(String),

    #[error("journal replay failed: {0}")]
    ReplayFailed(String),

    #[error("highest sequence lookup failed: {0}")]
    HighestSequenceLookupFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),
}

/// Per-envelope write outcome, paired with the instance id the write was
/// stamped with.
pub enum WriteOutcome<E, Sdr> {
    Success(PersistentRepr<E, Sdr>, InstanceId),
    Failure(PersistentRepr<E, Sdr>, String, InstanceId),
}

/// Outcome of one `WriteMessages` round-trip: per-envelope outcomes plus
/// the batch-level flow-control signal.
pub struct WriteMessagesOutcome<E, Sdr> {
    pub per_envelope: Vec<WriteOutcome<E, Sdr>>,
    pub batch_failed: Option<String>,
}

/// The journal, addressed by [`PersistenceId`]. The core holds only an
/// addressable reference to it, never its storage internals.
#[async_trait]
pub trait Journal<E, Sdr>: Send + Sync
where
    E: Send + Sync + 'static,
    Sdr: Send + Sync + 'static,
{
    /// Atomic write of a batch, stamped with the writer's current instance id.
    async fn write_messages(
        &self,
        batch: Vec<PersistentRepr<E, Sdr>>,
        instance_id: InstanceId,
    ) -> WriteMessagesOutcome<E, Sdr>;

    /// Replay events in `[from, to]`, capped at `max` entries.
    async fn replay_messages(
        &self,
        persistence_id: &PersistenceId,
        from: SequenceNr,
        to: SequenceNr,
        max: u64,
    ) -> Result<Vec<PersistentRepr<E, Sdr>>, JournalError>;

    /// Report the current highest stored sequence.
    async fn read_highest_sequence_nr(
        &self,
        persistence_id: &PersistenceId,
        from: SequenceNr,
    ) -> Result<SequenceNr, JournalError>;

    /// Delete (logical or physical) up to `to`.
    async fn delete_messages_to(
        &self,
        persistence_id: &PersistenceId,
        to: SequenceNr,
        permanent: bool,
    ) -> Result<(), JournalError>;
}

/// In-memory journal keyed by [`PersistenceId`], for tests and `demos/`.
///
/// Not a production journal: no durability, no checksums, no rotation —
/// those are transport concerns for a real collaborator to own.
#[derive(Default)]
pub struct InMemoryJournal<E, Sdr> {
    entries: Mutex<BTreeMap<String, Vec<PersistentRepr<E, Sdr>>>>,
}

impl<E, Sdr> InMemoryJournal<E, Sdr> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl<E, Sdr> Journal<E, Sdr> for InMemoryJournal<E, Sdr>
where
    E: Clone + Send + Sync + 'static,
    Sdr: Clone + Send + Sync + 'static,
{
    async fn write_messages(
        &self,
        batch: Vec<PersistentRepr<E, Sdr>>,
        instance_id: InstanceId,
    ) -> WriteMessagesOutcome<E, Sdr> {
        let mut entries = self.entries.lock().await;
        let mut outcomes = Vec::with_capacity(batch.len());
        for repr in batch {
            let log = entries.entry(repr.persistence_id.as_str().to_string()).or_default();
            log.push(repr.clone());
            outcomes.push(WriteOutcome::Success(repr, instance_id));
        }
        WriteMessagesOutcome {
            per_envelope: outcomes,
            batch_failed: None,
        }
    }

    async fn replay_messages(
        &self,
        persistence_id: &PersistenceId,
        from: SequenceNr,
        to: SequenceNr,
        max: u64,
    ) -> Result<Vec<PersistentRepr<E, Sdr>>, JournalError> {
        let entries = self.entries.lock().await;
        let log = entries.get(persistence_id.as_str());
        let replayed = log
            .map(|log| {
                log.iter()
                    .filter(|e| e.sequence_nr >= from && e.sequence_nr <= to)
                    .take(max as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(replayed)
    }

    async fn read_highest_sequence_nr(
        &self,
        persistence_id: &PersistenceId,
        _from: SequenceNr,
    ) -> Result<SequenceNr, JournalError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(persistence_id.as_str())
            .and_then(|log| log.last())
            .map(|e| e.sequence_nr)
            .unwrap_or(0))
    }

    async fn delete_messages_to(
        &self,
        persistence_id: &PersistenceId,
        to: SequenceNr,
        _permanent: bool,
    ) -> Result<(), JournalError> {
        let mut entries = self.entries.lock().await;
        if let Some(log) = entries.get_mut(persistence_id.as_str()) {
            log.retain(|e| e.sequence_nr > to);
        }
        Ok(())
    }
}
