//! Entity identity and per-incarnation instance tagging.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// 64-bit monotonic counter, entity-local.
pub type SequenceNr = u64;

/// Per-incarnation tag stamped on outgoing journal writes, used to discard
/// replies from a restarted entity's previous incarnation.
pub type InstanceId = u32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("persistence id must not be empty")]
    Empty,
}

/// Opaque, non-empty, stable identity for one logical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistenceId(String);

impl PersistenceId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersistenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-global source of instance ids, incremented once per entity
/// incarnation.
static NEXT_INSTANCE_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate the next instance id. Wraparound within one journal round-trip
/// is assumed impossible.
pub fn next_instance_id() -> InstanceId {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_persistence_id() {
        assert_eq!(PersistenceId::new(""), Err(IdError::Empty));
    }

    #[test]
    fn accepts_non_empty_persistence_id() {
        let id = PersistenceId::new("order-42").unwrap();
        assert_eq!(id.as_str(), "order-42");
        assert_eq!(id.to_string(), "order-42");
    }

    #[test]
    fn instance_ids_strictly_increase() {
        let a = next_instance_id();
        let b = next_instance_id();
        assert!(b > a);
    }
}
