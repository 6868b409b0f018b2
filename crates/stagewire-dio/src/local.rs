//! Non-tunneled DIO strategy: a bounded FIFO between the host-facing
//! queue side and the codec adapter's dequeue/send side, plus the dup
//! reference-count protocol for output buffers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use stagewire_core::adapter::{BufferAllocator, MemoryHint, PhysicalBuffer};
use stagewire_core::buffer::{BufferFlags, BufferHeader, BufferId, BufferRegion, ExtraDataKind};
use stagewire_core::dio::{
    ControlOutcome, CountReport, DataIo, DataTrigger, DequeueOutcome, DioControl, DioUtil,
    SupplierRole, UtilOutcome,
};
use stagewire_core::error::{Advisory, ComponentError, CoreResult};
use stagewire_core::event::{ComponentEvent, HostCallbacks};
use stagewire_core::port::{FifoTimeout, PortDirection};

use crate::extra;
use crate::fifo::Fifo;

/// Tuning for one non-tunneled strategy instance.
#[derive(Debug, Clone)]
pub struct DioConfig {
    pub port_index: u32,
    pub direction: PortDirection,
    /// Number of buffer slots; also the FIFO capacity.
    pub slot_count: usize,
    pub buffer_size: usize,
    pub alignment: usize,
    pub memory_hint: MemoryHint,
    pub timeout: FifoTimeout,
    /// Metadata item kinds this port carries out of band.
    pub extra_items: Vec<ExtraDataKind>,
    /// Dup count at which a refcount-changed notification fires.
    pub refcount_watermark: Option<u32>,
}

struct Slot {
    physical: Option<PhysicalBuffer>,
    region: Option<BufferRegion>,
    leased_id: Option<BufferId>,
}

struct DupState {
    count: u32,
    /// `send` arrived while dups were outstanding; deliver on decay to 0.
    pending_return: bool,
}

struct SharedBuffer {
    original: BufferHeader,
    dup: Arc<Mutex<DupState>>,
}

/// One open non-tunneled strategy instance. Internally synchronized:
/// queue/dequeue/send/cancel on different buffers may run concurrently.
pub struct LocalDataIo {
    config: DioConfig,
    role: SupplierRole,
    allocator: Arc<dyn BufferAllocator>,
    callbacks: Arc<dyn HostCallbacks>,
    trigger: DataTrigger,
    fifo: Fifo,
    slots: Mutex<Vec<Slot>>,
    shared: Mutex<HashMap<BufferId, SharedBuffer>>,
    eos_received: AtomicBool,
    closed: AtomicBool,
}

impl LocalDataIo {
    /// Opens the strategy. The supplying side allocates one physical
    /// buffer per configured slot through the allocator; the non-supplying
    /// side allocates headers only.
    pub fn open(
        config: DioConfig,
        role: SupplierRole,
        allocator: Arc<dyn BufferAllocator>,
        callbacks: Arc<dyn HostCallbacks>,
        trigger: DataTrigger,
    ) -> CoreResult<Self> {
        if config.slot_count == 0 || config.buffer_size == 0 {
            return Err(ComponentError::BadParameter);
        }
        let mut slots = Vec::with_capacity(config.slot_count);
        for _ in 0..config.slot_count {
            let physical = match role {
                SupplierRole::Supplier => {
                    let physical = match allocator.allocate(
                        config.buffer_size,
                        config.alignment,
                        config.memory_hint,
                    ) {
                        Ok(physical) => physical,
                        Err(error) => {
                            for slot in slots.drain(..) {
                                if let Slot { physical: Some(buffer), .. } = slot {
                                    allocator.free(buffer);
                                }
                            }
                            return Err(error);
                        }
                    };
                    Some(physical)
                }
                SupplierRole::NonSupplier => None,
            };
            slots.push(Slot { physical, region: None, leased_id: None });
        }
        debug!(
            port = config.port_index,
            slots = config.slot_count,
            ?role,
            "opened local dio"
        );
        Ok(Self {
            fifo: Fifo::new(config.slot_count),
            config,
            role,
            allocator,
            callbacks,
            trigger,
            slots: Mutex::new(slots),
            shared: Mutex::new(HashMap::new()),
            eos_received: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn role(&self) -> SupplierRole {
        self.role
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ComponentError::IncorrectStateOperation)
        } else {
            Ok(())
        }
    }

    fn deliver(&self, header: BufferHeader) {
        match self.config.direction {
            PortDirection::Input => self.callbacks.empty_buffer_done(header),
            PortDirection::Output => self.callbacks.fill_buffer_done(header),
        }
    }

    fn dup_state(&self, id: BufferId) -> CoreResult<Arc<Mutex<DupState>>> {
        self.shared
            .lock()
            .get(&id)
            .map(|shared| Arc::clone(&shared.dup))
            .ok_or(ComponentError::BadParameter)
    }

    /// Copies the caller-visible bookkeeping of `header` onto the shared
    /// original and returns a fresh snapshot of the original.
    ///
    /// While a withheld `send` is outstanding the original already carries
    /// that send's state (READ_ONLY included); a dup shadow arriving through
    /// `queue`/`cancel` must not overwrite it.
    fn mirror_into_original(&self, header: &BufferHeader) -> CoreResult<BufferHeader> {
        let mut shared = self.shared.lock();
        let entry = shared.get_mut(&header.id).ok_or(ComponentError::BadParameter)?;
        if entry.dup.lock().pending_return {
            return Ok(entry.original.clone());
        }
        let original = &mut entry.original;
        original.filled_len = header.filled_len;
        original.offset = header.offset;
        original.flags = header.flags;
        original.timestamp = header.timestamp;
        original.app_tag = header.app_tag;
        original.extension.extra_found = header.extension.extra_found;
        if self.config.direction == PortDirection::Input {
            original.extension.metadata = header.extension.metadata.clone();
        }
        Ok(original.clone())
    }

    fn original_snapshot(&self, id: BufferId) -> CoreResult<BufferHeader> {
        self.shared
            .lock()
            .get(&id)
            .map(|shared| shared.original.clone())
            .ok_or(ComponentError::BadParameter)
    }

    fn set_original_flags(&self, id: BufferId, insert: BufferFlags, remove: BufferFlags) {
        if let Some(shared) = self.shared.lock().get_mut(&id) {
            shared.original.flags.insert(insert);
            shared.original.flags.remove(remove);
        }
    }

    fn maybe_notify_watermark(&self, id: BufferId, count: u32) {
        if self.config.refcount_watermark == Some(count) {
            self.callbacks.event(ComponentEvent::RefcountChanged {
                port: self.config.port_index,
                buffer: id,
                count,
            });
        }
    }

    fn track_eos(&self, header: &BufferHeader) {
        if self.config.direction != PortDirection::Input {
            return;
        }
        self.eos_received
            .store(header.flags.contains(BufferFlags::EOS), Ordering::Release);
    }

    /// Shared dup-decrement logic for `queue` and `cancel` on output
    /// buffers. Returns the header to enqueue, if the decay released one.
    fn decay_dup(&self, header: &BufferHeader) -> CoreResult<Option<BufferHeader>> {
        let dup = self.dup_state(header.id)?;
        let mut state = dup.lock();
        if state.count == 0 {
            return Ok(Some(header.clone()));
        }
        state.count -= 1;
        let count = state.count;
        let pending = state.pending_return && count == 0;
        if pending {
            state.pending_return = false;
        }
        drop(state);
        self.maybe_notify_watermark(header.id, count);
        if count > 0 {
            return Ok(None);
        }
        if pending {
            // The withheld `send` completes now; nothing re-enters the FIFO.
            let original = self.original_snapshot(header.id)?;
            self.deliver(original);
            return Ok(None);
        }
        Ok(Some(self.original_snapshot(header.id)?))
    }

    fn drain_and_return(&self, reset_filled: bool) {
        for mut header in self.fifo.drain() {
            if reset_filled && self.config.direction == PortDirection::Output {
                header.filled_len = 0;
                if let Some(shared) = self.shared.lock().get_mut(&header.id) {
                    shared.original.filled_len = 0;
                }
            }
            self.deliver(header);
        }
    }

    fn acquire_header(&self, slot_index: usize, region: Option<BufferRegion>) -> CoreResult<BufferHeader> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(slot_index).ok_or(ComponentError::BadParameter)?;
        if slot.leased_id.is_some() {
            return Err(ComponentError::IncorrectStateOperation);
        }
        let region = match (&slot.physical, region) {
            (Some(physical), None) => Arc::clone(&physical.region),
            (None, Some(region)) => {
                slot.region = Some(Arc::clone(&region));
                region
            }
            _ => return Err(ComponentError::IncorrectStateOperation),
        };
        let header = BufferHeader::new(self.config.port_index, self.config.direction, region);
        slot.leased_id = Some(header.id);
        drop(slots);
        self.shared.lock().insert(
            header.id,
            SharedBuffer {
                original: header.clone(),
                dup: Arc::new(Mutex::new(DupState { count: 0, pending_return: false })),
            },
        );
        Ok(header)
    }

    fn release_header(&self, slot_index: usize) -> CoreResult<()> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(slot_index).ok_or(ComponentError::BadParameter)?;
        let id = slot.leased_id.take().ok_or(ComponentError::BadParameter)?;
        slot.region = None;
        drop(slots);
        self.shared.lock().remove(&id);
        Ok(())
    }
}

impl DataIo for LocalDataIo {
    fn queue(&self, header: BufferHeader) -> CoreResult<()> {
        self.ensure_open()?;
        if header.offset + header.filled_len > header.alloc_len {
            return Err(ComponentError::BadParameter);
        }
        self.track_eos(&header);
        let mirrored = self.mirror_into_original(&header)?;
        let to_enqueue = match self.config.direction {
            PortDirection::Input => Some(mirrored),
            PortDirection::Output => self.decay_dup(&header)?,
        };
        if let Some(entry) = to_enqueue {
            self.fifo.push_back(entry, self.config.timeout)?;
        }
        Ok(())
    }

    fn dequeue(&self) -> CoreResult<DequeueOutcome> {
        self.ensure_open()?;
        let mut header = self
            .fifo
            .pop_front(self.config.timeout)
            .ok_or(ComponentError::Timeout)?;
        if header.flags.contains(BufferFlags::CODEC_CONFIG) {
            match self.config.direction {
                PortDirection::Input => {
                    self.fifo.push_front(header);
                    return Ok(DequeueOutcome::AttributePending);
                }
                PortDirection::Output => {
                    header.flags.remove(BufferFlags::CODEC_CONFIG);
                    self.set_original_flags(header.id, BufferFlags::empty(), BufferFlags::CODEC_CONFIG);
                }
            }
        }
        match self.config.direction {
            PortDirection::Input => extra::unpack_for_input(&mut header, &self.config.extra_items),
            PortDirection::Output => extra::reserve_for_output(&mut header, &self.config.extra_items),
        }
        Ok(DequeueOutcome::Delivered(header))
    }

    fn send(&self, header: BufferHeader) -> CoreResult<()> {
        self.ensure_open()?;
        let mut original = self.mirror_into_original(&header)?;
        if self.config.direction == PortDirection::Output {
            {
                let mut shared = self.shared.lock();
                let entry = shared.get_mut(&header.id).ok_or(ComponentError::BadParameter)?;
                extra::pack_for_output(&header, &mut entry.original, &self.config.extra_items);
                original = entry.original.clone();
            }
            let dup = self.dup_state(header.id)?;
            let mut state = dup.lock();
            if state.count > 0 {
                state.count -= 1;
                let count = state.count;
                if count > 0 {
                    state.pending_return = true;
                    drop(state);
                    self.set_original_flags(header.id, BufferFlags::READ_ONLY, BufferFlags::empty());
                    self.maybe_notify_watermark(header.id, count);
                    return Ok(());
                }
                drop(state);
                self.maybe_notify_watermark(header.id, count);
            }
        }
        self.deliver(original);
        Ok(())
    }

    fn cancel(&self, header: BufferHeader) -> CoreResult<()> {
        self.ensure_open()?;
        self.mirror_into_original(&header)?;
        let to_enqueue = match self.config.direction {
            PortDirection::Input => Some(header),
            PortDirection::Output => self.decay_dup(&header)?,
        };
        if let Some(entry) = to_enqueue {
            self.fifo.push_front(entry);
            (self.trigger)();
        }
        Ok(())
    }

    fn dup(&self, header: &BufferHeader) -> CoreResult<BufferHeader> {
        self.ensure_open()?;
        if self.config.direction != PortDirection::Output {
            return Err(ComponentError::IncorrectStateOperation);
        }
        let dup = self.dup_state(header.id)?;
        let mut state = dup.lock();
        state.count = if state.count == 0 { 2 } else { state.count + 1 };
        let count = state.count;
        drop(state);
        self.maybe_notify_watermark(header.id, count);
        Ok(header.clone())
    }

    fn control(&self, op: DioControl) -> CoreResult<ControlOutcome> {
        self.ensure_open()?;
        match op {
            DioControl::Start => {
                if !self.fifo.is_empty() {
                    (self.trigger)();
                }
                Ok(ControlOutcome::Done)
            }
            DioControl::Stop => {
                // Flow is gated by the runtime; stopping only returns the
                // queued buffers to their owners.
                self.drain_and_return(true);
                Ok(ControlOutcome::Done)
            }
            DioControl::Flush => {
                self.drain_and_return(true);
                Ok(ControlOutcome::Done)
            }
            DioControl::SetCtrlAttribute(blob) => {
                let mut header = self
                    .fifo
                    .pop_front(FifoTimeout::NonBlocking)
                    .ok_or(ComponentError::InsufficientResources)?;
                if blob.len() > header.alloc_len {
                    self.fifo.push_front(header);
                    return Err(ComponentError::BadParameter);
                }
                {
                    let mut bytes = header.data.lock();
                    bytes[..blob.len()].copy_from_slice(&blob);
                }
                header.offset = 0;
                header.filled_len = blob.len();
                header.flags.insert(BufferFlags::CODEC_CONFIG);
                let original = self.mirror_into_original(&header)?;
                self.deliver(original);
                Ok(ControlOutcome::Done)
            }
            DioControl::GetCtrlAttribute => {
                let Some(mut header) = self.fifo.pop_front(FifoTimeout::NonBlocking) else {
                    return Ok(ControlOutcome::Pending);
                };
                if !header.flags.contains(BufferFlags::CODEC_CONFIG) {
                    self.fifo.push_front(header);
                    return Ok(ControlOutcome::Pending);
                }
                let blob = {
                    let bytes = header.data.lock();
                    let end = (header.offset + header.filled_len).min(bytes.len());
                    let start = header.offset.min(end);
                    bytes[start..end].to_vec()
                };
                header.flags.remove(BufferFlags::CODEC_CONFIG);
                let original = self.mirror_into_original(&header)?;
                self.deliver(original);
                Ok(ControlOutcome::Attribute(blob))
            }
        }
    }

    fn util(&self, op: DioUtil) -> CoreResult<UtilOutcome> {
        self.ensure_open()?;
        match op {
            DioUtil::AcquireHeader { slot } => {
                if self.role != SupplierRole::Supplier {
                    return Err(ComponentError::IncorrectStateOperation);
                }
                self.acquire_header(slot, None).map(UtilOutcome::Header)
            }
            DioUtil::AdoptRegion { slot, region } => {
                if self.role != SupplierRole::NonSupplier {
                    return Err(ComponentError::IncorrectStateOperation);
                }
                self.acquire_header(slot, Some(region)).map(UtilOutcome::Header)
            }
            DioUtil::ReleaseHeader { slot } => {
                self.release_header(slot)?;
                Ok(UtilOutcome::Released)
            }
        }
    }

    fn get_count(&self) -> CoreResult<CountReport> {
        self.ensure_open()?;
        let frames = self.fifo.len();
        let advisory = if self.config.direction == PortDirection::Input
            && frames == 0
            && self.eos_received.load(Ordering::Acquire)
        {
            Some(Advisory::EndOfStreamReceived)
        } else {
            None
        };
        Ok(CountReport { frames, advisory })
    }

    fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let leftover = self.fifo.drain();
        if !leftover.is_empty() {
            warn!(
                port = self.config.port_index,
                count = leftover.len(),
                "closing dio with undrained buffers"
            );
        }
        self.shared.lock().clear();
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            slot.leased_id = None;
            slot.region = None;
            if let Some(physical) = slot.physical.take() {
                // Only the supplying side ever holds physical buffers.
                self.allocator.free(physical);
            }
        }
        Ok(())
    }
}

impl Drop for LocalDataIo {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
