//! Construction-time tuning for a component.

use std::time::Duration;

/// How the event-processing routine is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// No worker; entry points run the routine inline.
    Passive,
    /// A dedicated worker parks on the wake-flag word; entry points only
    /// enqueue and set a bit.
    Active,
}

#[derive(Debug, Clone)]
pub struct ComponentConfig {
    pub name: String,
    pub trigger: TriggerMode,
    /// Capacity of the bounded command queue.
    pub command_queue_capacity: usize,
    /// Bounded wait for a single port's enable/disable handshake. The
    /// Loaded<->Idle handshake and "all ports" requests wait unbounded.
    pub port_transition_wait: Duration,
    /// Bounded pop of the mark-buffer payload queue.
    pub payload_wait: Duration,
    /// Bounded waits used throughout teardown so a hung component stays
    /// destructible.
    pub teardown_wait: Duration,
}

impl ComponentConfig {
    pub fn new(name: impl Into<String>, trigger: TriggerMode) -> Self {
        Self {
            name: name.into(),
            trigger,
            command_queue_capacity: 16,
            port_transition_wait: Duration::from_secs(3),
            payload_wait: Duration::from_secs(1),
            teardown_wait: Duration::from_secs(2),
        }
    }
}
