//! Bounded FIFO of buffer headers with front insertion.
//!
//! `cancel` and the codec-config pushback need front insertion, which
//! rules out a channel; this is a deque under a lock with a condvar for
//! the blocking pop and capacity waits.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use stagewire_core::buffer::BufferHeader;
use stagewire_core::error::{ComponentError, CoreResult};
use stagewire_core::port::FifoTimeout;

pub(crate) struct Fifo {
    inner: Mutex<VecDeque<BufferHeader>>,
    cond: Condvar,
    capacity: usize,
}

impl Fifo {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
            capacity,
        }
    }

    /// Appends, waiting for capacity per the port policy.
    pub(crate) fn push_back(&self, header: BufferHeader, timeout: FifoTimeout) -> CoreResult<()> {
        let mut queue = self.inner.lock();
        loop {
            if queue.len() < self.capacity {
                queue.push_back(header);
                self.cond.notify_all();
                return Ok(());
            }
            match timeout.as_duration() {
                Some(Duration::ZERO) => return Err(ComponentError::InsufficientResources),
                Some(limit) => {
                    if self.cond.wait_for(&mut queue, limit).timed_out()
                        && queue.len() >= self.capacity
                    {
                        return Err(ComponentError::InsufficientResources);
                    }
                }
                None => self.cond.wait(&mut queue),
            }
        }
    }

    /// Front insertion, never blocking. A front-pushed header re-occupies
    /// the slot its pop released, so capacity cannot be exceeded by a
    /// well-formed caller.
    pub(crate) fn push_front(&self, header: BufferHeader) {
        let mut queue = self.inner.lock();
        queue.push_front(header);
        self.cond.notify_all();
    }

    /// Pops the oldest entry per the port policy; `None` on expiry or an
    /// empty non-blocking pop.
    pub(crate) fn pop_front(&self, timeout: FifoTimeout) -> Option<BufferHeader> {
        let mut queue = self.inner.lock();
        loop {
            if let Some(header) = queue.pop_front() {
                self.cond.notify_all();
                return Some(header);
            }
            match timeout.as_duration() {
                Some(Duration::ZERO) => return None,
                Some(limit) => {
                    if self.cond.wait_for(&mut queue, limit).timed_out() && queue.is_empty() {
                        return None;
                    }
                }
                None => self.cond.wait(&mut queue),
            }
        }
    }

    pub(crate) fn drain(&self) -> Vec<BufferHeader> {
        let mut queue = self.inner.lock();
        let drained = queue.drain(..).collect();
        self.cond.notify_all();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
