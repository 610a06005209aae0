//! Snapshot store collaborator — load/save by persistence id.
//!
//! Like the journal, the snapshot store's own storage engine is an external
//! collaborator; this module defines only the message contract plus an
//! in-memory implementation for tests and `demos/`.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::id::{PersistenceId, SequenceNr};
use crate::protocol::{SelectedSnapshot, SnapshotMetadata};

#[derive(Error, Debug, Clone)]
pub enum SnapshotStoreError {
    #[error("snapshot load failed: {0}")]
    LoadFailed(String),

    #[error("snapshot save failed: {0}")]
    SaveFailed(String),
}

#[async_trait]
pub trait SnapshotStore<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Request the latest snapshot in `[from, to]`.
    async fn load_snapshot(
        &self,
        persistence_id: &PersistenceId,
        from: SequenceNr,
        to: SequenceNr,
    ) -> Result<Option<SelectedSnapshot<S>>, SnapshotStoreError>;

    /// Persist a new snapshot, the save-side counterpart to compaction via
    /// `delete_messages`.
    async fn save_snapshot(
        &self,
        persistence_id: &PersistenceId,
        metadata: SnapshotMetadata,
        snapshot: S,
    ) -> Result<(), SnapshotStoreError>;
}

/// In-memory snapshot store keyed by [`PersistenceId`], for tests and `demos/`.
#[derive(Default)]
pub struct InMemorySnapshotStore<S> {
    snapshots: Mutex<HashMap<String, SelectedSnapshot<S>>>,
}

impl<S> InMemorySnapshotStore<S> {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<S> SnapshotStore<S> for InMemorySnapshotStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn load_snapshot(
        &self,
        persistence_id: &PersistenceId,
        from: SequenceNr,
        to: SequenceNr,
    ) -> Result<Option<SelectedSnapshot<S>>, SnapshotStoreError> {
        let snapshots = self.snapshots.lock().await;
        Ok(snapshots.get(persistence_id.as_str()).and_then(|selected| {
            let seq = selected.metadata.sequence_nr;
            if seq >= from && seq <= to {
                Some(selected.clone())
            } else {
                None
            }
        }))
    }

    async fn save_snapshot(
        &self,
        persistence_id: &PersistenceId,
        metadata: SnapshotMetadata,
        snapshot: S,
    ) -> Result<(), SnapshotStoreError> {
        let mut snapshots = self.snapshots.lock().await;
        snapshots.insert(
            persistence_id.as_str().to_string(),
            SelectedSnapshot { metadata, snapshot },
        );
        Ok(())
    }
}
