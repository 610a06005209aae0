//! A minimal counter entity exercising recovery, persist, persist_async and
//! defer against the in-memory journal and snapshot store.

use std::sync::Arc;

use persistent_entity::{
    spawn, Command, DeleteMessagesTo, Handled, InMemoryJournal, InMemorySnapshotStore,
    PersistCtx, PersistenceId, Recovery, ReceiveCommand, ReceiveRecover, RuntimeConfig,
};

#[derive(Debug, Clone)]
enum CounterEvent {
    Incremented(u64),
    Reset,
}

#[derive(Debug, Clone)]
enum CounterCommand {
    Increment(u64),
    Reset,
}

struct Counter {
    persistence_id: PersistenceId,
    value: u64,
}

impl ReceiveRecover for Counter {
    type Event = CounterEvent;
    type State = u64;

    fn persistence_id(&self) -> &PersistenceId {
        &self.persistence_id
    }

    fn receive_recover(&mut self, recovery: Recovery<Self::Event, Self::State>) -> Handled {
        match recovery {
            Recovery::SnapshotOffer(_, snapshot) => self.value = snapshot,
            Recovery::Event(CounterEvent::Incremented(n)) => self.value += n,
            Recovery::Event(CounterEvent::Reset) => self.value = 0,
            Recovery::RecoveryCompleted => {
                tracing::info!(value = self.value, "counter recovered");
            }
            Recovery::RecoveryFailure(cause) => {
                tracing::error!(%cause, "counter recovery failed");
                return Handled::No;
            }
        }
        Handled::Yes
    }
}

impl ReceiveCommand for Counter {
    type Command = CounterCommand;
    type Sender = ();

    fn receive_command(
        &mut self,
        ctx: &mut PersistCtx<'_, Self::Command, Self::Event, Self::Sender>,
        command: Command<Self::Command, Self::Event>,
    ) -> Handled {
        match command {
            Command::User(CounterCommand::Increment(n)) => {
                ctx.persist(CounterEvent::Incremented(n), move |event| {
                    if let CounterEvent::Incremented(n) = event {
                        tracing::debug!(n, "increment persisted");
                    }
                });
                self.value += n;
            }
            Command::User(CounterCommand::Reset) => {
                ctx.persist_async(CounterEvent::Reset, |_| {
                    tracing::debug!("reset persisted");
                });
                self.value = 0;
            }
            Command::PersistenceFailure { cause, .. } => {
                tracing::error!(%cause, "counter failed to persist");
                return Handled::No;
            }
            Command::DeletionOutcome(outcome) => {
                tracing::info!(?outcome, "delete_messages completed");
            }
        }
        Handled::Yes
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    tracing::info!("starting counter demo");

    let journal = Arc::new(InMemoryJournal::<CounterEvent, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<u64>::new());

    let counter = Counter {
        persistence_id: PersistenceId::new("counter-1").unwrap(),
        value: 0,
    };

    let handle = spawn(counter, journal, snapshots, RuntimeConfig::default());

    for n in [1u64, 2, 3] {
        let _ = handle.send_command(CounterCommand::Increment(n)).await;
    }
    let _ = handle.send_command(CounterCommand::Reset).await;

    handle.delete_messages(DeleteMessagesTo { to: 1, permanent: true }).await;

    // Give the background journal writes a moment to land before exiting;
    // the entity itself keeps running until an unhandled failure (see
    // `EntityHandle::join`), so we don't wait on it here.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    tracing::info!("counter demo finished");
}
