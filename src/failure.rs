//! Failure routing: recovery and persistence failures, and the default
//! kill policy when a handler doesn't explicitly absorb one.

use crate::id::{PersistenceId, SequenceNr};
use thiserror::Error;

/// Cause of a recovery-side failure.
#[derive(Error, Debug, Clone)]
pub enum RecoveryFailureCause {
    #[error("replay failed: {0}")]
    Replay(String),

    #[error("highest sequence lookup failed: {0}")]
    HighestSequenceLookup(String),

    #[error("recover handler panicked: {0}")]
    HandlerPanic(String),
}

/// Cause of a persistence-side failure.
#[derive(Error, Debug, Clone)]
pub enum PersistenceFailureCause {
    #[error("journal rejected write at sequence {sequence}: {reason}")]
    WriteRejected { sequence: SequenceNr, reason: String },
}

/// The fatal, default-kill outcome of an unhandled failure signal.
#[derive(Error, Debug, Clone)]
pub enum EntityError {
    #[error("entity '{persistence_id}' killed: unhandled recovery failure: {cause}")]
    KilledOnRecoveryFailure {
        persistence_id: PersistenceId,
        cause: RecoveryFailureCause,
    },

    #[error("entity '{persistence_id}' killed: unhandled persistence failure: {cause}")]
    KilledOnPersistenceFailure {
        persistence_id: PersistenceId,
        cause: PersistenceFailureCause,
    },

    /// A replay-time handler panic, rethrown as a restart once the
    /// offending message has been safely accounted for.
    #[error("entity '{persistence_id}' restarting: replay handler failed: {cause}")]
    ReplayHandlerFailed {
        persistence_id: PersistenceId,
        cause: String,
    },

    #[error("invalid persistence id: {0}")]
    InvalidId(#[from] crate::id::IdError),
}
