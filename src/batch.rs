//! Journal batcher: accumulates envelopes into bounded writes with flow
//! control against the journal.
//!
//! Generic directly over the envelope type rather than reaching into
//! `protocol::Envelope`'s own generics — the batcher doesn't care what an
//! envelope carries, only how many are queued and whether a write is
//! outstanding.

/// Default cap on one outstanding write batch, tunable via
/// [`JournalBatcher::new`].
pub const DEFAULT_MAX_MESSAGE_BATCH_SIZE: usize = 50;

/// Accumulates envelopes into a bounded write batch and tracks whether a
/// write is currently outstanding.
pub struct JournalBatcher<Env> {
    batch: Vec<Env>,
    write_in_progress: bool,
    max_message_batch_size: usize,
}

impl<Env> JournalBatcher<Env> {
    pub fn new(max_message_batch_size: usize) -> Self {
        Self {
            batch: Vec::new(),
            write_in_progress: false,
            max_message_batch_size,
        }
    }

    pub fn write_in_progress(&self) -> bool {
        self.write_in_progress
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn push(&mut self, envelope: Env) {
        self.batch.push(envelope);
    }

    /// Whether the accumulated batch should flush now: no write is
    /// currently outstanding, or the batch has reached capacity.
    pub fn should_flush(&self) -> bool {
        !self.batch.is_empty() && (!self.write_in_progress || self.batch.len() >= self.max_message_batch_size)
    }

    /// Take the accumulated batch and mark a write as outstanding.
    pub fn take_for_flush(&mut self) -> Vec<Env> {
        self.write_in_progress = true;
        std::mem::take(&mut self.batch)
    }

    /// On a batch-level reply: flush again immediately if more has
    /// accumulated, otherwise clear the in-flight flag.
    pub fn on_batch_complete(&mut self) -> Option<Vec<Env>> {
        if self.batch.is_empty() {
            self.write_in_progress = false;
            None
        } else {
            Some(self.take_for_flush())
        }
    }
}
