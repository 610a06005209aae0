//! End-to-end scenarios driving a real spawned entity against the
//! in-memory journal and snapshot store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use persistent_entity::{
    spawn, Command, DeleteMessagesTo, Handled, InMemoryJournal, InMemorySnapshotStore, PersistCtx,
    PersistenceId, Recovery, ReceiveCommand, ReceiveRecover, RuntimeConfig,
};

#[derive(Debug, Clone, PartialEq)]
enum Ev {
    Added(i64),
}

#[derive(Debug, Clone)]
enum Cmd {
    Add(i64),
    AddAsync(i64),
    Defer(i64),
}

struct Tally {
    persistence_id: PersistenceId,
    total: i64,
    recovered_events: usize,
    recovery_completed: bool,
    persisted_log: Arc<Mutex<Vec<i64>>>,
    failed: Arc<Mutex<bool>>,
}

impl Tally {
    fn new(id: &str, persisted_log: Arc<Mutex<Vec<i64>>>, failed: Arc<Mutex<bool>>) -> Self {
        Self {
            persistence_id: PersistenceId::new(id).unwrap(),
            total: 0,
            recovered_events: 0,
            recovery_completed: false,
            persisted_log,
            failed,
        }
    }
}

impl ReceiveRecover for Tally {
    type Event = Ev;
    type State = i64;

    fn persistence_id(&self) -> &PersistenceId {
        &self.persistence_id
    }

    fn receive_recover(&mut self, recovery: Recovery<Self::Event, Self::State>) -> Handled {
        match recovery {
            Recovery::SnapshotOffer(_, snapshot) => self.total = snapshot,
            Recovery::Event(Ev::Added(n)) => {
                self.total += n;
                self.recovered_events += 1;
            }
            Recovery::RecoveryCompleted => self.recovery_completed = true,
            Recovery::RecoveryFailure(_) => return Handled::No,
        }
        Handled::Yes
    }
}

impl ReceiveCommand for Tally {
    type Command = Cmd;
    type Sender = ();

    fn receive_command(
        &mut self,
        ctx: &mut PersistCtx<'_, Self::Command, Self::Event, Self::Sender>,
        command: Command<Self::Command, Self::Event>,
    ) -> Handled {
        match command {
            Command::User(Cmd::Add(n)) => {
                let log = self.persisted_log.clone();
                ctx.persist(Ev::Added(n), move |ev: &Ev| {
                    let Ev::Added(n) = ev;
                    log.lock().unwrap().push(*n);
                });
                self.total += n;
            }
            Command::User(Cmd::AddAsync(n)) => {
                let log = self.persisted_log.clone();
                ctx.persist_async(Ev::Added(n), move |ev: &Ev| {
                    let Ev::Added(n) = ev;
                    log.lock().unwrap().push(*n);
                });
                self.total += n;
            }
            Command::User(Cmd::Defer(n)) => {
                let log = self.persisted_log.clone();
                ctx.defer(Ev::Added(n), move |ev: &Ev| {
                    let Ev::Added(n) = ev;
                    log.lock().unwrap().push(*n);
                });
            }
            Command::PersistenceFailure { .. } => {
                *self.failed.lock().unwrap() = true;
                return Handled::Yes;
            }
            Command::DeletionOutcome(_) => {}
        }
        Handled::Yes
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn empty_recovery_then_commands_accumulate() {
    let journal = Arc::new(InMemoryJournal::<Ev, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));

    let handler = Tally::new("acct-1", log.clone(), failed.clone());
    let handle = spawn(handler, journal.clone(), snapshots, RuntimeConfig::default());

    handle.send_command(Cmd::Add(1)).await.unwrap();
    handle.send_command(Cmd::Add(2)).await.unwrap();
    settle().await;

    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    let pid = PersistenceId::new("acct-1").unwrap();
    assert_eq!(
        journal.read_highest_sequence_nr(&pid, 0).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn snapshot_plus_replay_reconstructs_state_before_any_command_runs() {
    let journal = Arc::new(InMemoryJournal::<Ev, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let pid = PersistenceId::new("acct-2").unwrap();

    snapshots
        .save_snapshot(
            &pid,
            persistent_entity::protocol::SnapshotMetadata {
                persistence_id: pid.clone(),
                sequence_nr: 3,
            },
            100,
        )
        .await
        .unwrap();
    journal
        .write_messages(
            vec![
                persistent_entity::protocol::PersistentRepr {
                    payload: Ev::Added(4),
                    sequence_nr: 4,
                    persistence_id: pid.clone(),
                    sender: None,
                },
                persistent_entity::protocol::PersistentRepr {
                    payload: Ev::Added(5),
                    sequence_nr: 5,
                    persistence_id: pid.clone(),
                    sender: None,
                },
            ],
            0,
        )
        .await;

    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));
    let handler = Tally::new("acct-2", log.clone(), failed.clone());
    let handle = spawn(handler, journal.clone(), snapshots, RuntimeConfig::default());

    handle.send_command(Cmd::Add(1)).await.unwrap();
    settle().await;

    // replay never touches persisted_log; only the post-recovery command does.
    assert_eq!(*log.lock().unwrap(), vec![1]);
    assert_eq!(
        journal.read_highest_sequence_nr(&pid, 0).await.unwrap(),
        6
    );
}

#[tokio::test]
async fn persist_suspends_until_write_acknowledged_in_order() {
    let journal = Arc::new(InMemoryJournal::<Ev, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));
    let handler = Tally::new("acct-3", log.clone(), failed.clone());
    let handle = spawn(handler, journal, snapshots, RuntimeConfig::default());

    for n in 1..=5 {
        handle.send_command(Cmd::Add(n)).await.unwrap();
    }
    settle().await;
    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn persist_async_does_not_block_subsequent_commands() {
    let journal = Arc::new(InMemoryJournal::<Ev, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));
    let handler = Tally::new("acct-4", log.clone(), failed.clone());
    let handle = spawn(handler, journal, snapshots, RuntimeConfig::default());

    handle.send_command(Cmd::AddAsync(1)).await.unwrap();
    handle.send_command(Cmd::AddAsync(2)).await.unwrap();
    handle.send_command(Cmd::AddAsync(3)).await.unwrap();
    settle().await;

    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn defer_after_persist_async_runs_in_ledger_order() {
    let journal = Arc::new(InMemoryJournal::<Ev, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));
    let handler = Tally::new("acct-5", log.clone(), failed.clone());
    let handle = spawn(handler, journal, snapshots, RuntimeConfig::default());

    handle.send_command(Cmd::AddAsync(1)).await.unwrap();
    handle.send_command(Cmd::Defer(2)).await.unwrap();
    settle().await;

    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
}

struct RejectingJournal {
    inner: InMemoryJournal<Ev, ()>,
}

#[async_trait::async_trait]
impl persistent_entity::Journal<Ev, ()> for RejectingJournal {
    async fn write_messages(
        &self,
        batch: Vec<persistent_entity::protocol::PersistentRepr<Ev, ()>>,
        instance_id: persistent_entity::id::InstanceId,
    ) -> persistent_entity::journal::WriteMessagesOutcome<Ev, ()> {
        let mut per_envelope = Vec::with_capacity(batch.len());
        for repr in batch {
            per_envelope.push(persistent_entity::journal::WriteOutcome::Failure(
                repr,
                "disk full".to_string(),
                instance_id,
            ));
        }
        persistent_entity::journal::WriteMessagesOutcome {
            per_envelope,
            batch_failed: Some("disk full".to_string()),
        }
    }

    async fn replay_messages(
        &self,
        persistence_id: &PersistenceId,
        from: persistent_entity::id::SequenceNr,
        to: persistent_entity::id::SequenceNr,
        max: u64,
    ) -> Result<Vec<persistent_entity::protocol::PersistentRepr<Ev, ()>>, persistent_entity::journal::JournalError>
    {
        self.inner.replay_messages(persistence_id, from, to, max).await
    }

    async fn read_highest_sequence_nr(
        &self,
        persistence_id: &PersistenceId,
        from: persistent_entity::id::SequenceNr,
    ) -> Result<persistent_entity::id::SequenceNr, persistent_entity::journal::JournalError> {
        self.inner.read_highest_sequence_nr(persistence_id, from).await
    }

    async fn delete_messages_to(
        &self,
        persistence_id: &PersistenceId,
        to: persistent_entity::id::SequenceNr,
        permanent: bool,
    ) -> Result<(), persistent_entity::journal::JournalError> {
        self.inner.delete_messages_to(persistence_id, to, permanent).await
    }
}

#[tokio::test]
async fn persistence_failure_is_routed_to_the_command_handler() {
    let journal = Arc::new(RejectingJournal {
        inner: InMemoryJournal::new(),
    });
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));
    let handler = Tally::new("acct-6", log.clone(), failed.clone());
    let handle = spawn(handler, journal, snapshots, RuntimeConfig::default());

    handle.send_command(Cmd::Add(1)).await.unwrap();
    settle().await;

    assert!(*failed.lock().unwrap());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stale_incarnation_replies_never_surface_to_user_code() {
    // Two commands in flight at once exercise the batcher's flush-in-flight
    // path without producing any duplicate or out-of-order callback.
    let journal = Arc::new(InMemoryJournal::<Ev, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));
    let handler = Tally::new("acct-7", log.clone(), failed.clone());
    let handle = spawn(handler, journal, snapshots, RuntimeConfig::default());

    for n in 0..20 {
        handle.send_command(Cmd::Add(n)).await.unwrap();
    }
    settle().await;

    let expected: Vec<i64> = (0..20).collect();
    assert_eq!(*log.lock().unwrap(), expected);
}

#[tokio::test]
async fn delete_messages_truncates_the_journal_and_reports_success() {
    let journal = Arc::new(InMemoryJournal::<Ev, ()>::new());
    let snapshots = Arc::new(InMemorySnapshotStore::<i64>::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(false));
    let pid = PersistenceId::new("acct-8").unwrap();
    let handler = Tally::new("acct-8", log.clone(), failed.clone());
    let handle = spawn(handler, journal.clone(), snapshots, RuntimeConfig::default());

    for n in 1..=3 {
        handle.send_command(Cmd::Add(n)).await.unwrap();
    }
    settle().await;

    handle
        .delete_messages(DeleteMessagesTo { to: 2, permanent: true })
        .await;
    settle().await;

    let remaining = journal.replay_messages(&pid, 0, u64::MAX, 100).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].sequence_nr, 3);
}
