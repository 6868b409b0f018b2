//! Bounded FIFO of pending commands plus the separate mark-buffer payload
//! queue released in lock-step with it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use stagewire_core::command::{CommandKind, MarkPayload};
use stagewire_core::error::{ComponentError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueuedCommand {
    pub(crate) seq: u64,
    pub(crate) kind: CommandKind,
}

pub(crate) struct CommandQueue {
    inner: Mutex<VecDeque<QueuedCommand>>,
    capacity: usize,
    next_seq: AtomicU64,
}

impl CommandQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Pushes a record, returning its sequence number for exact-match
    /// rollback on trigger failure.
    pub(crate) fn push(&self, kind: CommandKind) -> CoreResult<u64> {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            return Err(ComponentError::InsufficientResources);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        queue.push_back(QueuedCommand { seq, kind });
        Ok(seq)
    }

    pub(crate) fn pop(&self) -> Option<QueuedCommand> {
        self.inner.lock().pop_front()
    }

    /// Scans for the exact record pushed under `seq` and removes it.
    pub(crate) fn remove(&self, seq: u64) -> bool {
        let mut queue = self.inner.lock();
        match queue.iter().position(|record| record.seq == seq) {
            Some(index) => {
                queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Owned mark-buffer payloads, pushed at `send_command` time and popped
/// when the matching notification completes.
pub(crate) struct PayloadQueue {
    inner: Mutex<VecDeque<MarkPayload>>,
    cond: Condvar,
    capacity: usize,
}

impl PayloadQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
            capacity,
        }
    }

    pub(crate) fn push(&self, payload: MarkPayload) -> CoreResult<()> {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            return Err(ComponentError::InsufficientResources);
        }
        queue.push_back(payload);
        self.cond.notify_all();
        Ok(())
    }

    /// Bounded pop used by the event-processing routine.
    pub(crate) fn pop_timeout(&self, limit: Duration) -> Option<MarkPayload> {
        let mut queue = self.inner.lock();
        loop {
            if let Some(payload) = queue.pop_front() {
                return Some(payload);
            }
            if self.cond.wait_for(&mut queue, limit).timed_out() {
                return queue.pop_front();
            }
        }
    }

    /// Rollback of the most recent push after a queue-trigger failure.
    pub(crate) fn pop_back(&self) -> Option<MarkPayload> {
        self.inner.lock().pop_back()
    }

    pub(crate) fn pop_front(&self) -> Option<MarkPayload> {
        self.inner.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
