//! Port definitions and the knobs a host may persist for them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// Which side of a port/tunnel owns physical buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierSetting {
    #[default]
    Unspecified,
    Input,
    Output,
}

/// Blocking behavior of a port's DIO FIFO pops and capacity waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FifoTimeout {
    NonBlocking,
    Bounded { millis: u64 },
    Unbounded,
}

impl FifoTimeout {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            FifoTimeout::NonBlocking => Some(Duration::ZERO),
            FifoTimeout::Bounded { millis } => Some(Duration::from_millis(millis)),
            FifoTimeout::Unbounded => None,
        }
    }
}

/// Host-visible definition of one directional buffer endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub index: u32,
    pub direction: PortDirection,
    /// Number of buffers the Loaded<->Idle handshake must populate.
    pub buffer_count_target: usize,
    /// Minimum acceptable buffer size.
    pub buffer_size_min: usize,
    /// Required size granularity for host-supplied regions.
    pub buffer_alignment: usize,
    /// Whether buffer pointers are fixed at allocation time (true) or
    /// supplied later by the producer (false).
    pub pre_announcement: bool,
    /// Blocking behavior for this port's DIO FIFO.
    pub fifo_timeout: FifoTimeout,
    /// Metadata item kinds this port carries out of band.
    pub extra_items: Vec<crate::buffer::ExtraDataKind>,
    /// Dup count at which the DIO fires a refcount-changed notification.
    pub refcount_watermark: Option<u32>,
}

impl PortDefinition {
    pub fn new(index: u32, direction: PortDirection) -> Self {
        Self {
            index,
            direction,
            buffer_count_target: 4,
            buffer_size_min: 4096,
            buffer_alignment: 1,
            pre_announcement: true,
            fifo_timeout: FifoTimeout::NonBlocking,
            extra_items: Vec::new(),
            refcount_watermark: None,
        }
    }
}
