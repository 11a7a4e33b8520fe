//! Outbound queue of encoded envelopes, shared between producers and the poll step.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// FIFO of encoded envelopes. Only the head is ever looked at.
#[derive(Debug, Default)]
pub struct SendQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, envelope: Vec<u8>) {
        self.inner.lock().push_back(envelope);
    }

    /// Offer the head to `send` exactly once, under the lock. The head is removed only
    /// when `send` returns `Ok(true)`. Returns whether the head was sent; an empty queue
    /// is `Ok(false)` and `send` is not called.
    pub fn pop_if_head_sent<E, F>(&self, send: F) -> Result<bool, E>
    where
        F: FnOnce(&[u8]) -> Result<bool, E>,
    {
        let mut queue = self.inner.lock();
        let Some(head) = queue.front() else {
            return Ok(false);
        };
        if send(head)? {
            queue.pop_front();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Discard everything still queued. Returns how many envelopes were dropped.
    pub fn drain(&self) -> usize {
        let mut queue = self.inner.lock();
        let n = queue.len();
        queue.clear();
        n
    }
}
