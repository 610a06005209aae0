//! Lifecycle state machine.

use crate::id::SequenceNr;

/// Why the entity is restarting, carried from `ReplayFailed` into
/// `PrepareRestart`.
#[derive(Debug, Clone)]
pub struct RestartCause(pub String);

/// States and transitions of one entity incarnation, from recovery through
/// steady-state command processing.
///
/// There is no terminal state at the machine level: the entity's task
/// simply returns when [`EntityError`](crate::failure::EntityError)
/// propagates out of the mailbox loop, or when the mailbox closes.
#[derive(Debug, Clone)]
pub enum LifecycleState {
    RecoveryPending,
    RecoveryStarted { max: u64 },
    ReplayStarted,
    Initializing,
    ProcessingCommands,
    PersistingEvents,
    /// Absorbs remaining replay traffic without dispatching it, until the
    /// terminal replay signal arrives.
    ReplayFailed { cause: RestartCause },
    /// Waiting for the re-received replayed message so the cause can be
    /// rethrown at a safe point.
    PrepareRestart { cause: RestartCause },
}

impl LifecycleState {
    /// Whether an incoming message not matched by this state's explicit
    /// handlers should be stashed rather than dropped or delivered to the
    /// user.
    ///
    /// `ProcessingCommands` never stashes (everything not explicitly
    /// handled by the core is delivered straight to `receive_command`);
    /// every other state stashes by default.
    pub fn stashes_unmatched(&self) -> bool {
        !matches!(self, LifecycleState::ProcessingCommands)
    }

    pub fn is_recovering(&self) -> bool {
        matches!(
            self,
            LifecycleState::RecoveryPending
                | LifecycleState::RecoveryStarted { .. }
                | LifecycleState::ReplayStarted
                | LifecycleState::Initializing
        )
    }

    pub fn is_processing_commands(&self) -> bool {
        matches!(self, LifecycleState::ProcessingCommands)
    }
}

/// Outcome of recovering from a snapshot offer, used when deciding the
/// journal replay window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayWindow {
    pub from: SequenceNr,
    pub to: SequenceNr,
    pub max: u64,
}
