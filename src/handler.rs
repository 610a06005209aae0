//! User-facing surface: the recover/command handlers, and the
//! persist/persist-async/defer contract exposed during command processing.
//!
//! Commands and recovered events are tagged enum variants dispatched
//! explicitly, rather than partial-function handlers keyed by dynamic
//! payload type.

use crate::failure::{PersistenceFailureCause, RecoveryFailureCause};
use crate::id::{PersistenceId, SequenceNr};
use crate::ledger::{InvocationKind, PendingInvocation, PersistenceLedger};
use crate::protocol::{Envelope, NonPersistentRepr, PersistentRepr, SnapshotMetadata};
use crate::stash::UserStash;

/// Whether a handler explicitly processed a failure signal. Returning `No`
/// for `RecoveryFailure`/`PersistenceFailure` invokes the default-kill
/// policy; it has no effect for any other variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Yes,
    No,
}

/// Outcome of a `delete_messages` request.
#[derive(Debug, Clone)]
pub enum DeletionOutcome {
    Success(SequenceNr),
    Failure(String),
}

/// The recover-handler's input: either a replayed event, a snapshot offer,
/// or one of the two recovery-terminal signals.
pub enum Recovery<E, S> {
    Event(E),
    SnapshotOffer(SnapshotMetadata, S),
    RecoveryCompleted,
    RecoveryFailure(RecoveryFailureCause),
}

/// The command-handler's input: a user command, or one of the signals
/// fed back from the journal collaborator.
pub enum Command<C, E> {
    User(C),
    PersistenceFailure {
        payload: E,
        sequence_nr: SequenceNr,
        cause: PersistenceFailureCause,
    },
    DeletionOutcome(DeletionOutcome),
}

pub trait ReceiveRecover: Send {
    /// `Sync` is required alongside `Send` because events flow through
    /// `Arc<dyn Journal<Self::Event, Self::Sender>>`, a trait object shared
    /// across the background write tasks spawned per batch.
    type Event: Clone + Send + Sync + 'static;
    type State: Clone + Send + Sync + 'static;

    fn persistence_id(&self) -> &PersistenceId;

    fn receive_recover(&mut self, recovery: Recovery<Self::Event, Self::State>) -> Handled;
}

pub trait ReceiveCommand: ReceiveRecover {
    type Command: Send + 'static;

    /// Carries the sender of the command currently being processed, so a
    /// `persist`/`persist_async`/`defer` callback can address a reply. `()`
    /// when a handler has no reply-addressing concept.
    type Sender: Clone + Send + Sync + 'static;

    fn receive_command(
        &mut self,
        ctx: &mut PersistCtx<'_, Self::Command, Self::Event, Self::Sender>,
        command: Command<Self::Command, Self::Event>,
    ) -> Handled;
}

/// Handle passed by `&mut` reference into `receive_command` for the
/// duration of one dispatch. Sound as plain borrowed state, not a
/// `Rc<RefCell<_>>` capture, because exactly one task ever owns an entity.
pub struct PersistCtx<'a, C, E, Sdr> {
    ledger: &'a mut PersistenceLedger<E>,
    event_batch: &'a mut Vec<Envelope<E, Sdr>>,
    persistence_id: &'a PersistenceId,
    last_sequence_nr: SequenceNr,
    user_stash: &'a mut UserStash<C>,
    unstashed: &'a mut Vec<C>,
    current_sender: Option<Sdr>,
}

impl<'a, C, E, Sdr> PersistCtx<'a, C, E, Sdr>
where
    E: Clone + Send + 'static,
    Sdr: Clone + Send + 'static,
{
    pub(crate) fn new(
        ledger: &'a mut PersistenceLedger<E>,
        event_batch: &'a mut Vec<Envelope<E, Sdr>>,
        persistence_id: &'a PersistenceId,
        last_sequence_nr: SequenceNr,
        user_stash: &'a mut UserStash<C>,
        unstashed: &'a mut Vec<C>,
        current_sender: Option<Sdr>,
    ) -> Self {
        Self {
            ledger,
            event_batch,
            persistence_id,
            last_sequence_nr,
            user_stash,
            unstashed,
            current_sender,
        }
    }

    /// Defer `command` for redelivery on a later `unstash_all` call, without
    /// involving the core's own recovery/persisting deferral queue.
    pub fn stash(&mut self, command: C) {
        self.user_stash.push(command);
    }

    /// Requeue everything stashed via [`Self::stash`] ahead of whatever the
    /// mailbox delivers next, preserving the order it was stashed in.
    pub fn unstash_all(&mut self) {
        self.unstashed.extend(self.user_stash.take_all());
    }

    pub fn last_sequence_nr(&self) -> SequenceNr {
        self.last_sequence_nr
    }

    /// The sender of the command currently being processed, if any.
    pub fn sender(&self) -> Option<&Sdr> {
        self.current_sender.as_ref()
    }

    /// Persist one event, suspending command delivery until `handler` fires.
    pub fn persist(&mut self, event: E, handler: impl FnOnce(&E) + Send + 'static) {
        self.push_persistent(event, handler, InvocationKind::Stashing);
    }

    /// Persist a sequence of events atomically under `handler`, run once
    /// per event as each is durably written.
    pub fn persist_batch(&mut self, events: Vec<E>, handler: impl FnMut(&E) + Send + 'static)
    where
        E: 'static,
    {
        let shared = std::sync::Arc::new(std::sync::Mutex::new(handler));
        for event in events {
            let shared = shared.clone();
            self.push_persistent(
                event,
                move |e: &E| (shared.lock().unwrap())(e),
                InvocationKind::Stashing,
            );
        }
    }

    /// Persist one event without suspending command delivery.
    pub fn persist_async(&mut self, event: E, handler: impl FnOnce(&E) + Send + 'static) {
        self.push_persistent(event, handler, InvocationKind::NonStashing);
    }

    /// Schedule a non-persistent callback in ledger order: runs
    /// synchronously if the ledger is empty, else queues behind pending
    /// persist callbacks.
    pub fn defer(&mut self, event: E, handler: impl FnOnce(&E) + Send + 'static) {
        if self.ledger.is_empty() {
            handler(&event);
            return;
        }
        self.ledger.push(PendingInvocation {
            event: event.clone(),
            handler: Box::new(handler),
            kind: InvocationKind::NonStashing,
        });
        self.event_batch.push(Envelope::NonPersistent(NonPersistentRepr {
            payload: event,
            sender: self.current_sender.clone(),
        }));
    }

    fn push_persistent(
        &mut self,
        event: E,
        handler: impl FnOnce(&E) + Send + 'static,
        kind: InvocationKind,
    ) {
        self.ledger.push(PendingInvocation {
            event: event.clone(),
            handler: Box::new(handler),
            kind,
        });
        // sequence_nr is a placeholder: the journal batcher re-stamps it at
        // dispatch time, not invocation time.
        self.event_batch.push(Envelope::Persistent(PersistentRepr {
            payload: event,
            sequence_nr: 0,
            persistence_id: self.persistence_id.clone(),
            sender: self.current_sender.clone(),
        }));
    }
}
