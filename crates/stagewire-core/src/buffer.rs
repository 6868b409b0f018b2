//! Buffer headers and the metadata carried alongside media payloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::port::PortDirection;

/// Shared byte region backing a buffer header.
///
/// Headers that alias the same physical buffer (the original and its dup
/// shadows) clone the same region handle.
pub type BufferRegion = Arc<Mutex<Vec<u8>>>;

pub fn new_region(size: usize) -> BufferRegion {
    Arc::new(Mutex::new(vec![0u8; size]))
}

/// Stable identity of a buffer for the lifetime of its port's pool.
///
/// Dup shadows share the id of their original so `send`/`cancel` can find
/// the canonical slot again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Bit-word of per-buffer flags exchanged with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const EOS: BufferFlags = BufferFlags(1 << 0);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(1 << 1);
    pub const READ_ONLY: BufferFlags = BufferFlags(1 << 2);
    pub const EXTRA_DATA_DETACHED: BufferFlags = BufferFlags(1 << 3);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BufferFlags) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// Metadata item kinds a port can be configured to carry out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraDataKind {
    FrameInfo,
    InterlaceFormat,
    FrameQp,
    FrameBitsInfo,
    FrameDimension,
    StreamUserData,
}

/// One located metadata item attached to a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraDataItem {
    pub kind: ExtraDataKind,
    pub payload: Vec<u8>,
}

/// Platform-private extension of a buffer header.
#[derive(Debug, Clone, Default)]
pub struct PlatformExtension {
    /// Auxiliary payload region (e.g. a secondary plane), if any.
    pub aux: Option<BufferRegion>,
    /// Out-of-band metadata items attached to this buffer.
    pub metadata: Vec<ExtraDataItem>,
    /// Bitfield of which configured metadata items were located; on output
    /// ports the producer sets it to request space reservation.
    pub extra_found: u32,
}

/// A unit of media data plus bookkeeping, exchanged between the host and a
/// component or between tunneled peers.
///
/// Ownership is exactly one of {host, component, DIO queue} at a time and
/// transfers only through the explicit queue/dequeue/send/cancel/dup calls.
#[derive(Debug, Clone)]
pub struct BufferHeader {
    pub id: BufferId,
    pub data: BufferRegion,
    pub alloc_len: usize,
    pub filled_len: usize,
    pub offset: usize,
    pub flags: BufferFlags,
    pub timestamp: i64,
    /// Index of the owning port.
    pub port_index: u32,
    /// Direction of the owning port; fixes which done-callback returns it.
    pub direction: PortDirection,
    /// Opaque host tag carried untouched through the pipeline.
    pub app_tag: u64,
    pub extension: PlatformExtension,
}

impl BufferHeader {
    pub fn new(port_index: u32, direction: PortDirection, data: BufferRegion) -> Self {
        let alloc_len = data.lock().len();
        Self {
            id: BufferId::next(),
            data,
            alloc_len,
            filled_len: 0,
            offset: 0,
            flags: BufferFlags::empty(),
            timestamp: 0,
            port_index,
            direction,
            app_tag: 0,
            extension: PlatformExtension::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferFlags, BufferHeader, BufferId};
    use crate::buffer::new_region;
    use crate::port::PortDirection;

    #[test]
    fn flags_word_round_trips() {
        let mut flags = BufferFlags::empty();
        flags.insert(BufferFlags::EOS);
        flags.insert(BufferFlags::CODEC_CONFIG);
        assert!(flags.contains(BufferFlags::EOS));
        flags.remove(BufferFlags::EOS);
        assert!(!flags.contains(BufferFlags::EOS));
        assert!(flags.contains(BufferFlags::CODEC_CONFIG));
    }

    #[test]
    fn buffer_ids_are_unique() {
        assert_ne!(BufferId::next(), BufferId::next());
    }

    #[test]
    fn header_records_region_length() {
        let header = BufferHeader::new(0, PortDirection::Input, new_region(4096));
        assert_eq!(header.alloc_len, 4096);
        assert_eq!(header.filled_len, 0);
    }
}
