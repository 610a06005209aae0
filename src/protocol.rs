//! Wire-level messages exchanged with the journal and snapshot store.
//!
//! These are the only messages the core exchanges with its external
//! collaborators; the collaborators' own storage format is their business.

use crate::id::{InstanceId, PersistenceId, SequenceNr};

/// An event queued for durable persistence. `sender` carries the command's
/// originating sender, stamped at the moment the command handler called
/// `persist`/`persist_async`, so a later callback can address a reply.
#[derive(Debug, Clone)]
pub struct PersistentRepr<E, Sdr> {
    pub payload: E,
    pub sequence_nr: SequenceNr,
    pub persistence_id: PersistenceId,
    pub sender: Option<Sdr>,
}

/// An event queued only for in-order callback delivery, never written to
/// the journal — the payload behind a `defer` call.
#[derive(Debug, Clone)]
pub struct NonPersistentRepr<E, Sdr> {
    pub payload: E,
    pub sender: Option<Sdr>,
}

/// One entry of an event batch produced by a single command.
#[derive(Debug, Clone)]
pub enum Envelope<E, Sdr> {
    Persistent(PersistentRepr<E, Sdr>),
    NonPersistent(NonPersistentRepr<E, Sdr>),
}

/// Identifies a snapshot offered back to the recover-handler.
#[derive(Debug, Clone)]
pub struct SnapshotMetadata {
    pub persistence_id: PersistenceId,
    pub sequence_nr: SequenceNr,
}

#[derive(Debug, Clone)]
pub struct SelectedSnapshot<S> {
    pub metadata: SnapshotMetadata,
    pub snapshot: S,
}

/// Replies delivered from the journal back into the entity's mailbox.
#[derive(Debug, Clone)]
pub enum FromJournal<E, Sdr> {
    ReplayedMessage(PersistentRepr<E, Sdr>),
    ReplayMessagesSuccess,
    ReplayMessagesFailure(String),
    ReadHighestSequenceNrSuccess(SequenceNr),
    ReadHighestSequenceNrFailure(String),
    WriteMessageSuccess(PersistentRepr<E, Sdr>, InstanceId),
    WriteMessageFailure(PersistentRepr<E, Sdr>, String, InstanceId),
    LoopMessageSuccess(NonPersistentRepr<E, Sdr>, InstanceId),
    WriteMessagesSuccessful,
    WriteMessagesFailed(String),
    /// Observable outcome of a `DeleteMessagesTo` request.
    DeleteMessagesSuccess(SequenceNr),
    DeleteMessagesFailure(String),
}

/// Replies delivered from the snapshot store.
#[derive(Debug, Clone)]
pub enum FromSnapshotStore<S> {
    LoadSnapshotResult(Option<SelectedSnapshot<S>>, SequenceNr),
}
