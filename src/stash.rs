//! Dual stash: the core's own internal deferral queue, plus a user-facing
//! one exposed through [`crate::handler::PersistCtx`].

use std::collections::VecDeque;

/// Core-owned deferral queue used during non-command lifecycle states.
#[derive(Default)]
pub struct InternalStash<M> {
    queue: VecDeque<M>,
}

impl<M> InternalStash<M> {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    pub fn push(&mut self, msg: M) {
        self.queue.push_back(msg);
    }

    pub fn pop_front(&mut self) -> Option<M> {
        self.queue.pop_front()
    }

    /// Place `items` ahead of whatever is already queued, preserving their
    /// relative order.
    pub fn prepend(&mut self, items: VecDeque<M>) {
        let mut combined = items;
        combined.append(&mut self.queue);
        self.queue = combined;
    }

    pub fn drain(&mut self) -> Vec<M> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// User-facing deferral surface, exposed to command-handler code for its
/// own deferral patterns independent of the core's internal stash.
#[derive(Default)]
pub struct UserStash<M> {
    queue: VecDeque<M>,
}

impl<M> UserStash<M> {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    pub fn push(&mut self, msg: M) {
        self.queue.push_back(msg);
    }

    /// Hand the entire user stash to the caller for rerouting through the
    /// internal stash, clearing this one. The core, not the user stash
    /// itself, owns the prepend step so in-flight core scheduling is never
    /// bypassed.
    pub fn take_all(&mut self) -> VecDeque<M> {
        std::mem::take(&mut self.queue)
    }

    /// Drain while dropping entries the predicate rejects — used on
    /// pre-restart/post-stop to exclude journal-internal replies from
    /// redelivery.
    pub fn drain_filtered(&mut self, mut keep: impl FnMut(&M) -> bool) -> Vec<M> {
        self.queue.drain(..).filter(|m| keep(m)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
