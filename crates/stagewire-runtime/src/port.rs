//! Runtime state of one port: enable sub-state, buffer bookkeeping, DIO
//! binding, and the alloc/free/fail event the handshakes block on.
//!
//! Port fields are single-writer (the event-processing routine) except the
//! buffer count and populated flag, which the allocation protocol itself
//! serializes under the port lock.

use std::sync::Arc;

use stagewire_core::adapter::TunnelPeer;
use stagewire_core::buffer::BufferId;
use stagewire_core::dio::{DataIo, SupplierRole};
use stagewire_core::event_flag::EventFlag;
use stagewire_core::port::{PortDefinition, SupplierSetting};

/// Bits of a port's alloc/free/fail event word.
pub(crate) mod port_event {
    pub(crate) const ALLOC: u32 = 1 << 0;
    pub(crate) const FREE: u32 = 1 << 1;
    pub(crate) const FAIL: u32 = 1 << 2;
}

/// In-flight enable/disable sub-state. Mutually exclusive with the
/// component sitting in Loaded/WaitForResources, where the flag flips
/// without a buffer handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortTransition {
    Enabling,
    Disabling,
}

pub(crate) struct TunnelLink {
    pub(crate) peer: Arc<dyn TunnelPeer>,
    pub(crate) peer_port: u32,
    pub(crate) established: bool,
}

pub(crate) struct PortRuntime {
    pub(crate) definition: PortDefinition,
    pub(crate) enabled: bool,
    pub(crate) populated: bool,
    /// Slot-indexed lease table; `Some` entries are live buffers.
    pub(crate) buffers: Vec<Option<BufferId>>,
    pub(crate) supplier_setting: SupplierSetting,
    /// Recorded at first DIO open; never overwritten later.
    pub(crate) supplier_role: Option<SupplierRole>,
    pub(crate) dio: Option<Arc<dyn DataIo>>,
    pub(crate) transition: Option<PortTransition>,
    pub(crate) eos_received: bool,
    pub(crate) tunnel: Option<TunnelLink>,
}

impl PortRuntime {
    pub(crate) fn new(definition: PortDefinition) -> Self {
        let slots = definition.buffer_count_target;
        Self {
            definition,
            enabled: true,
            populated: false,
            buffers: vec![None; slots],
            supplier_setting: SupplierSetting::Unspecified,
            supplier_role: None,
            dio: None,
            transition: None,
            eos_received: false,
            tunnel: None,
        }
    }

    pub(crate) fn buffer_count(&self) -> usize {
        self.buffers.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn first_free_slot(&self) -> Option<usize> {
        self.buffers.iter().position(|slot| slot.is_none())
    }

    pub(crate) fn slot_of(&self, id: BufferId) -> Option<usize> {
        self.buffers.iter().position(|slot| *slot == Some(id))
    }

    pub(crate) fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }

    /// Drops all buffer bookkeeping and the DIO binding, e.g. after a
    /// failed handshake or at teardown.
    pub(crate) fn reset_buffers(&mut self) -> Option<Arc<dyn DataIo>> {
        for slot in self.buffers.iter_mut() {
            *slot = None;
        }
        self.populated = false;
        self.supplier_role = None;
        self.dio.take()
    }
}

/// One port's lock plus its event word, which waiters touch without
/// holding the lock.
pub(crate) struct PortSlot {
    pub(crate) state: parking_lot::Mutex<PortRuntime>,
    pub(crate) events: Arc<EventFlag>,
}

impl PortSlot {
    pub(crate) fn new(definition: PortDefinition) -> Self {
        Self {
            state: parking_lot::Mutex::new(PortRuntime::new(definition)),
            events: Arc::new(EventFlag::new()),
        }
    }
}
