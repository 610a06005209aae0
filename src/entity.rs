//! The entity runtime: a single-task-per-entity mailbox loop driving the
//! lifecycle state machine, the journal batcher, the persistence ledger and
//! the dual stash over one user-supplied handler.
//!
//! One entity owns exactly one `tokio` task. Its mailbox is the only way in;
//! there is no shared mutable state, so every field below can be plain,
//! unsynchronized data even though journal/snapshot round-trips happen on
//! background tasks (replies come back through the same mailbox).

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{JournalBatcher, DEFAULT_MAX_MESSAGE_BATCH_SIZE};
use crate::failure::{EntityError, PersistenceFailureCause, RecoveryFailureCause};
use crate::handler::{Command, DeletionOutcome, Handled, PersistCtx, Recovery, ReceiveCommand};
use crate::id::{next_instance_id, PersistenceId, SequenceNr};
use crate::journal::{Journal, WriteOutcome};
use crate::ledger::PersistenceLedger;
use crate::lifecycle::{LifecycleState, RestartCause};
use crate::protocol::{Envelope, FromJournal, FromSnapshotStore, NonPersistentRepr};
use crate::sequence::{Incarnation, SequenceTracker};
use crate::snapshot::SnapshotStore;
use crate::stash::{InternalStash, UserStash};

/// How much to replay on recovery, and the mailbox capacity for a spawned
/// entity. Exposed so a caller can tune it per deployment; defaults match
/// the journal batcher's own default batch size for no particular reason
/// beyond having one knob to reach for.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub max_replay: u64,
    pub max_message_batch_size: usize,
    pub mailbox_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_replay: u64::MAX,
            max_message_batch_size: DEFAULT_MAX_MESSAGE_BATCH_SIZE,
            mailbox_capacity: 256,
        }
    }
}

/// Everything that can arrive in an entity's mailbox: user commands (each
/// tagged with its originating sender, if any), a delete-messages request,
/// the core's own recovery kick, and replies from the two collaborators.
pub enum EntityMessage<C, E, S, Sdr> {
    Command(C, Option<Sdr>),
    DeleteMessages(DeleteMessagesTo),
    Recover,
    FromJournal(FromJournal<E, Sdr>),
    FromSnapshotStore(FromSnapshotStore<S>),
}

/// Request to delete persisted messages up to and including `to`. A
/// first-class mailbox variant (not routed through the user's own command
/// type) so the core can intercept it and actually call the journal.
pub struct DeleteMessagesTo {
    pub to: SequenceNr,
    pub permanent: bool,
}

type Mailbox<H> = EntityMessage<
    <H as ReceiveCommand>::Command,
    <H as ReceiveCommand>::Event,
    <H as ReceiveCommand>::State,
    <H as ReceiveCommand>::Sender,
>;

/// Handle to a running entity: send commands, and await the task for its
/// terminal error (or `Ok(())` if the mailbox was simply dropped).
pub struct EntityHandle<H: ReceiveCommand> {
    sender: mpsc::Sender<Mailbox<H>>,
    join: JoinHandle<Result<(), EntityError>>,
}

impl<H: ReceiveCommand> EntityHandle<H> {
    /// Send a command with no reply-addressing sender attached.
    /// `Err` means the entity's task has already exited.
    pub async fn send_command(&self, command: H::Command) -> Result<(), H::Command> {
        self.send_command_from(command, None).await
    }

    /// Send a command stamped with `sender`, so any `persist`/`persist_async`
    /// callback the handler schedules can address a reply through
    /// [`PersistCtx::sender`].
    pub async fn send_command_as(&self, command: H::Command, sender: H::Sender) -> Result<(), H::Command> {
        self.send_command_from(command, Some(sender)).await
    }

    async fn send_command_from(&self, command: H::Command, sender: Option<H::Sender>) -> Result<(), H::Command> {
        self.sender
            .send(EntityMessage::Command(command, sender))
            .await
            .map_err(|e| match e.0 {
                EntityMessage::Command(c, _) => c,
                _ => unreachable!("only Command variants are ever sent through this handle"),
            })
    }

    /// Request deletion of persisted messages up to and including `request.to`.
    /// The outcome is observable: it comes back through the handler as
    /// `Command::DeletionOutcome`, not a fire-and-forget call.
    pub async fn delete_messages(&self, request: DeleteMessagesTo) {
        let _ = self.sender.send(EntityMessage::DeleteMessages(request)).await;
    }

    /// Wait for the entity's task to exit. An entity only ever exits on an
    /// unhandled recovery or persistence failure (or a replay-handler
    /// panic) — there is no graceful idle-mailbox shutdown, so this only
    /// resolves once that happens.
    pub async fn join(self) -> Result<(), EntityError> {
        self.join.await.expect("entity task panicked")
    }
}

/// Spawn `handler` as a running entity task and return a handle to it.
pub fn spawn<H>(
    handler: H,
    journal: Arc<dyn Journal<H::Event, H::Sender>>,
    snapshot_store: Arc<dyn SnapshotStore<H::State>>,
    config: RuntimeConfig,
) -> EntityHandle<H>
where
    H: ReceiveCommand + 'static,
{
    let (tx, rx) = mpsc::channel(config.mailbox_capacity);
    let instance_id = next_instance_id();
    let entity = Entity {
        persistence_id: handler.persistence_id().clone(),
        handler,
        state: LifecycleState::RecoveryPending,
        ledger: PersistenceLedger::new(),
        batcher: JournalBatcher::new(config.max_message_batch_size),
        internal_stash: InternalStash::new(),
        user_stash: UserStash::new(),
        sequence: SequenceTracker::new(),
        incarnation: Incarnation::new(instance_id),
        journal,
        snapshot_store,
        config,
        self_sender: tx.clone(),
        mailbox: rx,
    };
    let join = tokio::spawn(entity.run());
    EntityHandle { sender: tx, join }
}

struct Entity<H: ReceiveCommand> {
    persistence_id: PersistenceId,
    handler: H,
    state: LifecycleState,
    ledger: PersistenceLedger<H::Event>,
    batcher: JournalBatcher<Envelope<H::Event, H::Sender>>,
    internal_stash: InternalStash<Mailbox<H>>,
    user_stash: UserStash<H::Command>,
    sequence: SequenceTracker,
    incarnation: Incarnation,
    journal: Arc<dyn Journal<H::Event, H::Sender>>,
    snapshot_store: Arc<dyn SnapshotStore<H::State>>,
    config: RuntimeConfig,
    self_sender: mpsc::Sender<Mailbox<H>>,
    mailbox: mpsc::Receiver<Mailbox<H>>,
}

impl<H> Entity<H>
where
    H: ReceiveCommand + 'static,
{
    async fn run(mut self) -> Result<(), EntityError> {
        let _ = self.self_sender.send(EntityMessage::Recover).await;
        while let Some(msg) = self.mailbox.recv().await {
            self.dispatch(msg).await?;
        }
        Ok(())
    }

    /// Boxed because this forms a cycle with `start_recovery` /
    /// `drain_internal_stash` (draining re-enters dispatch for each stashed
    /// message) — an `async fn` can't recurse through itself unboxed.
    fn dispatch<'a>(
        &'a mut self,
        msg: Mailbox<H>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), EntityError>> + Send + 'a>> {
        Box::pin(async move {
            match &self.state {
                LifecycleState::RecoveryPending => match msg {
                    EntityMessage::Recover => self.start_recovery().await?,
                    other => self.internal_stash.push(other),
                },
                LifecycleState::ProcessingCommands => self.dispatch_processing(msg).await?,
                LifecycleState::PersistingEvents => match msg {
                    EntityMessage::FromJournal(fj) => self.handle_from_journal(fj).await?,
                    other => self.internal_stash.push(other),
                },
                LifecycleState::RecoveryStarted { .. }
                | LifecycleState::ReplayStarted
                | LifecycleState::Initializing
                | LifecycleState::ReplayFailed { .. }
                | LifecycleState::PrepareRestart { .. } => self.internal_stash.push(msg),
            }
            Ok(())
        })
    }

    async fn dispatch_processing(&mut self, msg: Mailbox<H>) -> Result<(), EntityError> {
        match msg {
            EntityMessage::Command(c, sender) => self.process_command(Command::User(c), sender).await?,
            EntityMessage::DeleteMessages(req) => self.spawn_delete(req),
            EntityMessage::FromJournal(fj) => self.handle_from_journal(fj).await?,
            EntityMessage::Recover => {
                // explicit re-recovery request (Open Question resolution, see DESIGN.md):
                // re-entering recovery from a live entity simply restarts the
                // state machine; nothing about it is special-cased on top.
                self.state = LifecycleState::RecoveryPending;
                self.start_recovery().await?;
            }
            EntityMessage::FromSnapshotStore(_) => {
                debug!(persistence_id = %self.persistence_id, "ignoring stray snapshot reply outside recovery");
            }
        }
        Ok(())
    }

    // -- recovery --------------------------------------------------------

    async fn start_recovery(&mut self) -> Result<(), EntityError> {
        self.state = LifecycleState::RecoveryStarted {
            max: self.config.max_replay,
        };
        info!(persistence_id = %self.persistence_id, "recovery started");

        let loaded = self
            .snapshot_store
            .load_snapshot(&self.persistence_id, 0, SequenceNr::MAX)
            .await;

        let from = match loaded {
            Ok(Some(selected)) => {
                self.sequence.observe_snapshot(selected.metadata.sequence_nr);
                let from = selected.metadata.sequence_nr + 1;
                let handled = self.handler.receive_recover(Recovery::SnapshotOffer(
                    selected.metadata,
                    selected.snapshot,
                ));
                if handled == Handled::No {
                    warn!(persistence_id = %self.persistence_id, "snapshot offer unhandled, continuing with empty state");
                }
                from
            }
            Ok(None) => 0,
            Err(e) => {
                return self.fail_recovery(RecoveryFailureCause::HighestSequenceLookup(e.to_string()))
                    .await;
            }
        };

        self.state = LifecycleState::ReplayStarted;
        let replayed = self
            .journal
            .replay_messages(&self.persistence_id, from, SequenceNr::MAX, self.config.max_replay)
            .await;

        let replayed = match replayed {
            Ok(events) => events,
            Err(e) => return self.fail_recovery(RecoveryFailureCause::Replay(e.to_string())).await,
        };

        for repr in replayed {
            self.sequence.observe_replayed(repr.sequence_nr);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.handler.receive_recover(Recovery::Event(repr.payload))
            }));
            match outcome {
                Ok(_) => {}
                Err(panic) => {
                    let cause = panic_message(panic);
                    return self.enter_replay_failed(cause).await;
                }
            }
        }

        self.state = LifecycleState::Initializing;
        let highest = self
            .journal
            .read_highest_sequence_nr(&self.persistence_id, 0)
            .await;
        let highest = match highest {
            Ok(seq) => seq,
            Err(e) => {
                return self
                    .fail_recovery(RecoveryFailureCause::HighestSequenceLookup(e.to_string()))
                    .await
            }
        };
        self.sequence.initialize_next(highest.max(self.sequence.last_sequence_nr()));

        self.handler.receive_recover(Recovery::RecoveryCompleted);
        self.state = LifecycleState::ProcessingCommands;
        self.drain_internal_stash().await
    }

    async fn fail_recovery(&mut self, cause: RecoveryFailureCause) -> Result<(), EntityError> {
        let handled = self
            .handler
            .receive_recover(Recovery::RecoveryFailure(cause.clone()));
        if handled == Handled::No {
            return Err(EntityError::KilledOnRecoveryFailure {
                persistence_id: self.persistence_id.clone(),
                cause,
            });
        }
        // Handled: the user chose to carry on despite the recovery failure
        // (Open Question resolution, see DESIGN.md). We still need the
        // machine somewhere sane to keep accepting commands.
        self.state = LifecycleState::ProcessingCommands;
        self.drain_internal_stash().await
    }

    async fn enter_replay_failed(&mut self, cause: String) -> Result<(), EntityError> {
        self.state = LifecycleState::ReplayFailed {
            cause: RestartCause(cause.clone()),
        };
        self.sequence.poison_for_full_replay();
        self.state = LifecycleState::PrepareRestart {
            cause: RestartCause(cause.clone()),
        };
        Err(EntityError::ReplayHandlerFailed {
            persistence_id: self.persistence_id.clone(),
            cause,
        })
    }

    // -- command processing -----------------------------------------------

    async fn process_command(
        &mut self,
        command: Command<H::Command, H::Event>,
        sender: Option<H::Sender>,
    ) -> Result<(), EntityError> {
        let mut event_batch: Vec<Envelope<H::Event, H::Sender>> = Vec::new();
        let mut unstashed: Vec<H::Command> = Vec::new();
        let pending_before = self.ledger.pending_stashing();
        let last_sequence_nr = self.sequence.last_sequence_nr();

        let failure_cause = match &command {
            Command::PersistenceFailure { cause, .. } => Some(cause.clone()),
            _ => None,
        };

        let outcome = {
            let mut ctx = PersistCtx::new(
                &mut self.ledger,
                &mut event_batch,
                &self.persistence_id,
                last_sequence_nr,
                &mut self.user_stash,
                &mut unstashed,
                sender,
            );
            self.handler.receive_command(&mut ctx, command)
        };

        if outcome == Handled::No {
            if let Some(cause) = failure_cause {
                return Err(EntityError::KilledOnPersistenceFailure {
                    persistence_id: self.persistence_id.clone(),
                    cause,
                });
            }
        }

        if !unstashed.is_empty() {
            let prepend: VecDeque<Mailbox<H>> = unstashed
                .into_iter()
                .map(|c| EntityMessage::Command(c, None))
                .collect();
            self.internal_stash.prepend(prepend);
        }

        let produced_stashing = self.ledger.pending_stashing() > pending_before;
        if produced_stashing && !self.batcher.is_empty() {
            self.flush_batch();
        }

        for envelope in event_batch {
            let envelope = self.stamp_sequence(envelope);
            self.batcher.push(envelope);
        }
        if self.batcher.should_flush() {
            self.flush_batch();
        }

        if self.ledger.pending_stashing() > 0 {
            self.state = LifecycleState::PersistingEvents;
        }
        Ok(())
    }

    fn stamp_sequence(&mut self, envelope: Envelope<H::Event, H::Sender>) -> Envelope<H::Event, H::Sender> {
        match envelope {
            Envelope::Persistent(mut repr) => {
                repr.sequence_nr = self.sequence.assign_next();
                Envelope::Persistent(repr)
            }
            non_persistent => non_persistent,
        }
    }

    fn flush_batch(&mut self) {
        let batch = self.batcher.take_for_flush();
        self.spawn_write(batch);
    }

    fn spawn_write(&self, batch: Vec<Envelope<H::Event, H::Sender>>) {
        let journal = self.journal.clone();
        let sender = self.self_sender.clone();
        let instance_id = self.incarnation.instance_id();
        tokio::spawn(async move {
            let persistent = batch
                .iter()
                .filter_map(|e| match e {
                    Envelope::Persistent(p) => Some(p.clone()),
                    Envelope::NonPersistent(_) => None,
                })
                .collect();
            let outcome = journal.write_messages(persistent, instance_id).await;
            let mut per_envelope = outcome.per_envelope.into_iter();
            for envelope in &batch {
                let msg = match envelope {
                    Envelope::Persistent(_) => match per_envelope.next() {
                        Some(WriteOutcome::Success(p, id)) => FromJournal::WriteMessageSuccess(p, id),
                        Some(WriteOutcome::Failure(p, cause, id)) => {
                            FromJournal::WriteMessageFailure(p, cause, id)
                        }
                        None => continue,
                    },
                    Envelope::NonPersistent(repr) => FromJournal::LoopMessageSuccess(
                        NonPersistentRepr {
                            payload: repr.payload.clone(),
                            sender: repr.sender.clone(),
                        },
                        instance_id,
                    ),
                };
                if sender.send(EntityMessage::FromJournal(msg)).await.is_err() {
                    return;
                }
            }
            let terminal = match outcome.batch_failed {
                Some(reason) => FromJournal::WriteMessagesFailed(reason),
                None => FromJournal::WriteMessagesSuccessful,
            };
            let _ = sender.send(EntityMessage::FromJournal(terminal)).await;
        });
    }

    fn spawn_delete(&self, request: DeleteMessagesTo) {
        let journal = self.journal.clone();
        let persistence_id = self.persistence_id.clone();
        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            let msg = match journal
                .delete_messages_to(&persistence_id, request.to, request.permanent)
                .await
            {
                Ok(()) => FromJournal::DeleteMessagesSuccess(request.to),
                Err(e) => FromJournal::DeleteMessagesFailure(e.to_string()),
            };
            let _ = sender.send(EntityMessage::FromJournal(msg)).await;
        });
    }

    // -- journal replies ---------------------------------------------------

    async fn handle_from_journal(&mut self, reply: FromJournal<H::Event, H::Sender>) -> Result<(), EntityError> {
        match reply {
            FromJournal::WriteMessageSuccess(repr, instance_id) => {
                if !self.incarnation.is_current(instance_id) {
                    return Ok(());
                }
                self.sequence.observe_write_success(repr.sequence_nr);
                self.ledger.run_head();
                self.maybe_resume_processing().await?;
            }
            FromJournal::WriteMessageFailure(repr, reason, instance_id) => {
                if !self.incarnation.is_current(instance_id) {
                    return Ok(());
                }
                let cause = PersistenceFailureCause::WriteRejected {
                    sequence: repr.sequence_nr,
                    reason,
                };
                self.process_command(
                    Command::PersistenceFailure {
                        payload: repr.payload,
                        sequence_nr: repr.sequence_nr,
                        cause,
                    },
                    None,
                )
                .await?;
                // The write never happened — popping via `run_head` would
                // wrongly fire the success callback for data that was never
                // durably persisted.
                self.ledger.discard_head();
                self.maybe_resume_processing().await?;
            }
            FromJournal::LoopMessageSuccess(_, instance_id) => {
                if !self.incarnation.is_current(instance_id) {
                    return Ok(());
                }
                self.ledger.run_head();
                self.maybe_resume_processing().await?;
            }
            FromJournal::WriteMessagesSuccessful | FromJournal::WriteMessagesFailed(_) => {
                if let Some(next) = self.batcher.on_batch_complete() {
                    self.spawn_write(next);
                }
            }
            FromJournal::DeleteMessagesSuccess(to) => {
                self.process_command(Command::DeletionOutcome(DeletionOutcome::Success(to)), None)
                    .await?;
            }
            FromJournal::DeleteMessagesFailure(reason) => {
                self.process_command(Command::DeletionOutcome(DeletionOutcome::Failure(reason)), None)
                    .await?;
            }
            FromJournal::ReplayedMessage(_)
            | FromJournal::ReplayMessagesSuccess
            | FromJournal::ReplayMessagesFailure(_)
            | FromJournal::ReadHighestSequenceNrSuccess(_)
            | FromJournal::ReadHighestSequenceNrFailure(_) => {
                // recovery-phase replies; recovery is driven inline by
                // `start_recovery` rather than through the mailbox, so these
                // never arrive here in practice.
            }
        }
        Ok(())
    }

    /// Once the ledger drains back to zero stashing invocations, resume
    /// command delivery and flush whatever queued up in `internal_stash`
    /// while `PersistingEvents` was stashing everything unconditionally.
    async fn maybe_resume_processing(&mut self) -> Result<(), EntityError> {
        if matches!(self.state, LifecycleState::PersistingEvents) && self.ledger.pending_stashing() == 0 {
            self.state = LifecycleState::ProcessingCommands;
            self.drain_internal_stash().await?;
        }
        Ok(())
    }

    async fn drain_internal_stash(&mut self) -> Result<(), EntityError> {
        let drained: VecDeque<Mailbox<H>> = self.internal_stash.drain().into();
        for msg in drained {
            self.dispatch(msg).await?;
        }
        Ok(())
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "recover handler panicked with a non-string payload".to_string()
    }
}
