//! OR-consumable multi-bit event word.
//!
//! A waiter names the bit mask it cares about and blocks until any of those
//! bits is set; the matched bits are consumed by the wake-up. Unrelated
//! bits are left for their own waiters.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::ComponentError;

#[derive(Default)]
pub struct EventFlag {
    bits: Mutex<u32>,
    cond: Condvar,
}

impl EventFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// ORs `bits` into the word and wakes all waiters.
    pub fn set(&self, bits: u32) {
        let mut word = self.bits.lock();
        *word |= bits;
        self.cond.notify_all();
    }

    /// Blocks until any bit of `mask` is set, consuming the matched bits.
    ///
    /// `timeout == None` waits unbounded. A bounded wait that expires
    /// returns [`ComponentError::Timeout`].
    pub fn wait_any(&self, mask: u32, timeout: Option<Duration>) -> Result<u32, ComponentError> {
        let mut word = self.bits.lock();
        loop {
            let matched = *word & mask;
            if matched != 0 {
                *word &= !matched;
                return Ok(matched);
            }
            match timeout {
                None => self.cond.wait(&mut word),
                Some(limit) => {
                    if self.cond.wait_for(&mut word, limit).timed_out() {
                        let matched = *word & mask;
                        if matched != 0 {
                            *word &= !matched;
                            return Ok(matched);
                        }
                        return Err(ComponentError::Timeout);
                    }
                }
            }
        }
    }

    /// Returns the current word without consuming anything.
    pub fn peek(&self) -> u32 {
        *self.bits.lock()
    }

    /// Clears the given bits without waking anyone.
    pub fn clear(&self, bits: u32) {
        *self.bits.lock() &= !bits;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::EventFlag;
    use crate::error::ComponentError;

    #[test]
    fn set_before_wait_is_consumed() {
        let flag = EventFlag::new();
        flag.set(0b101);
        assert_eq!(flag.wait_any(0b001, None), Ok(0b001));
        assert_eq!(flag.peek(), 0b100);
    }

    #[test]
    fn bounded_wait_times_out() {
        let flag = EventFlag::new();
        assert_eq!(
            flag.wait_any(0b1, Some(Duration::from_millis(10))),
            Err(ComponentError::Timeout)
        );
    }

    #[test]
    fn cross_thread_wake() {
        let flag = Arc::new(EventFlag::new());
        let waiter = Arc::clone(&flag);
        let join = std::thread::spawn(move || waiter.wait_any(0b10, None));
        std::thread::sleep(Duration::from_millis(20));
        flag.set(0b10);
        assert_eq!(join.join().unwrap(), Ok(0b10));
    }

    #[test]
    fn unrelated_bits_survive_a_wait() {
        let flag = EventFlag::new();
        flag.set(0b11);
        assert_eq!(flag.wait_any(0b10, None), Ok(0b10));
        assert_eq!(flag.wait_any(0b01, None), Ok(0b01));
    }
}
