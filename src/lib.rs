//! Per-entity event-sourced actor runtime.
//!
//! Each entity runs as one `tokio` task with its own mailbox. Commands are
//! dispatched to a user-supplied handler, which may persist events durably
//! (suspending further command delivery until the write is acknowledged),
//! persist them without suspending, or defer a purely in-memory callback.
//! Recovery replays the event log (optionally seeded from a snapshot)
//! before any command is accepted.
//!
//! Entry points: [`entity::spawn`] to start an entity, [`handler::ReceiveCommand`]
//! / [`handler::ReceiveRecover`] to implement one, and [`journal::Journal`] /
//! [`snapshot::SnapshotStore`] to plug in a durable backend (in-memory
//! implementations are provided for tests).

pub mod batch;
pub mod entity;
pub mod failure;
pub mod handler;
pub mod id;
pub mod journal;
pub mod ledger;
pub mod lifecycle;
pub mod protocol;
pub mod sequence;
pub mod snapshot;
pub mod stash;

pub use entity::{spawn, DeleteMessagesTo, EntityHandle, EntityMessage, RuntimeConfig};
pub use failure::EntityError;
pub use handler::{Command, DeletionOutcome, Handled, PersistCtx, Recovery, ReceiveCommand, ReceiveRecover};
pub use id::{PersistenceId, SequenceNr};
pub use journal::{InMemoryJournal, Journal};
pub use snapshot::{InMemorySnapshotStore, SnapshotStore};
