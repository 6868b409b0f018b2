//! Collaborator contracts implemented by codec adapters and platform
//! layers. The runtime drives these; it never implements them.

use std::sync::Arc;

use crate::buffer::BufferRegion;
use crate::command::{MarkPayload, PortSelector};
use crate::error::CoreResult;
use crate::event_flag::EventFlag;
use crate::state::ComponentState;

/// Completion-event bits, one per notification kind, on the adapter's
/// single OR-consumable [`EventFlag`].
pub mod completion {
    pub const STATE_SET: u32 = 1 << 0;
    pub const PORT_ENABLE: u32 = 1 << 1;
    pub const PORT_DISABLE: u32 = 1 << 2;
    pub const FLUSH: u32 = 1 << 3;
    pub const MARK_BUFFER: u32 = 1 << 4;
}

/// Notification handed to the codec adapter by the event-processing
/// routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateSet(ComponentState),
    PortEnable(PortSelector),
    PortDisable(PortSelector),
    Flush(PortSelector),
    MarkBuffer(MarkPayload),
    /// New data is available on some port; no completion rendezvous.
    Data,
}

impl Notification {
    /// Completion bit the runtime blocks on after delivering this
    /// notification, if any.
    pub fn completion_bit(&self) -> Option<u32> {
        match self {
            Notification::StateSet(_) => Some(completion::STATE_SET),
            Notification::PortEnable(_) => Some(completion::PORT_ENABLE),
            Notification::PortDisable(_) => Some(completion::PORT_DISABLE),
            Notification::Flush(_) => Some(completion::FLUSH),
            Notification::MarkBuffer(_) => Some(completion::MARK_BUFFER),
            Notification::Data => None,
        }
    }
}

/// The codec-specific half of a component.
///
/// `notify` must eventually signal the matching [`completion`] bit on
/// [`CodecAdapter::completion`]; a synchronous `Err` aborts the transition
/// and resets the pending target.
pub trait CodecAdapter: Send + Sync {
    fn notify(&self, note: Notification) -> CoreResult<()>;
    fn completion(&self) -> &EventFlag;
}

/// Memory-type hint passed to the allocator collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryHint {
    #[default]
    Default,
    Contiguous,
    Secure,
}

/// A physical buffer leased from the allocator.
pub struct PhysicalBuffer {
    pub region: BufferRegion,
    /// Allocator-private handle, returned verbatim on free.
    pub token: u64,
}

/// Allocates and frees physical buffers for supplying ports.
pub trait BufferAllocator: Send + Sync {
    fn allocate(&self, size: usize, alignment: usize, hint: MemoryHint)
        -> CoreResult<PhysicalBuffer>;
    fn free(&self, buffer: PhysicalBuffer);
}

/// Transport capability classes a tunnel endpoint can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelCapability {
    Local,
    Remote,
}

/// The far side of a tunnel as seen during negotiation.
pub trait TunnelPeer: Send + Sync {
    /// Cross-component buffer-supplier call: the input side proposes a
    /// supplier role and the peer answers with the agreed one.
    fn negotiate_supplier(
        &self,
        peer_port: u32,
        proposed: crate::port::SupplierSetting,
    ) -> CoreResult<crate::port::SupplierSetting>;

    /// Capability class declared by the peer's port.
    fn capability(&self, peer_port: u32) -> TunnelCapability;
}

/// Establishes and tears down a concrete transport between two
/// (component, port) endpoints; chosen by capability match.
pub trait TunnelTransport: Send + Sync {
    fn capability(&self) -> TunnelCapability;

    fn establish(
        &self,
        local_port: u32,
        peer: &Arc<dyn TunnelPeer>,
        peer_port: u32,
        supplier: crate::port::SupplierSetting,
    ) -> CoreResult<()>;

    fn teardown(&self, local_port: u32) -> CoreResult<()>;
}
