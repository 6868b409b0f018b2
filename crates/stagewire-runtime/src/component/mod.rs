//! The component object: construction, the host-facing surface, and the
//! adapter-facing data path. The event-processing routine itself lives in
//! [`process`]; the active-mode worker in [`worker`].

mod process;
mod worker;

#[cfg(test)]
mod integration_tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use stagewire_core::adapter::{BufferAllocator, CodecAdapter, TunnelPeer, TunnelTransport};
use stagewire_core::buffer::{BufferFlags, BufferHeader, BufferRegion};
use stagewire_core::command::{CommandKind, MarkPayload, PortSelector};
use stagewire_core::dio::{
    CountReport, DataIo, DequeueOutcome, DioControl, DioUtil, SupplierRole, UtilOutcome,
};
use stagewire_core::error::{Advisory, ComponentError, CoreResult};
use stagewire_core::event::{ComponentEvent, HostCallbacks};
use stagewire_core::event_flag::EventFlag;
use stagewire_core::port::{PortDefinition, PortDirection, SupplierSetting};
use stagewire_core::state::ComponentState;
use stagewire_dio::{DioConfig, LocalDataIo};

use crate::command_queue::{CommandQueue, PayloadQueue};
use crate::config::{ComponentConfig, TriggerMode};
use crate::params::{ConfigIndex, Parameter, ParameterIndex};
use crate::port::{port_event, PortSlot, PortTransition};
use crate::tunnel;

/// Bits of the component's wake-flag word, parked on by the active worker.
pub(crate) mod wake {
    pub(crate) const CMD: u32 = 1 << 0;
    pub(crate) const DATA: u32 = 1 << 1;
    pub(crate) const EXIT: u32 = 1 << 2;
}

pub(crate) struct WorkerHandle {
    pub(crate) join: std::thread::JoinHandle<()>,
    pub(crate) done_rx: crossbeam_channel::Receiver<()>,
}

pub(crate) struct ComponentInner {
    pub(crate) config: ComponentConfig,
    pub(crate) state: Mutex<ComponentState>,
    /// Single in-flight target state. Never held together with the queue
    /// locks.
    pub(crate) pending: Mutex<Option<ComponentState>>,
    pub(crate) ports: Vec<PortSlot>,
    pub(crate) callbacks: Mutex<Option<Arc<dyn HostCallbacks>>>,
    pub(crate) adapter: Arc<dyn CodecAdapter>,
    pub(crate) allocator: Arc<dyn BufferAllocator>,
    pub(crate) transports: Vec<Arc<dyn TunnelTransport>>,
    pub(crate) commands: CommandQueue,
    pub(crate) payloads: PayloadQueue,
    pub(crate) wake: EventFlag,
    /// Serializes the event-processing routine across passive callers.
    pub(crate) routine: Mutex<()>,
    pub(crate) data_ready: AtomicBool,
    /// Guarantees the adapter learns about pending data right after a
    /// command drains, even without a new buffer arrival.
    pub(crate) force_notify: AtomicBool,
    /// Serializes `send_command` staging so two overlapping port commands
    /// cannot both pass the mid-transition check.
    pub(crate) staging: Mutex<()>,
    pub(crate) worker: Mutex<Option<WorkerHandle>>,
}

impl ComponentInner {
    pub(crate) fn current_state(&self) -> ComponentState {
        *self.state.lock()
    }

    pub(crate) fn port(&self, index: u32) -> CoreResult<&PortSlot> {
        self.ports
            .get(index as usize)
            .ok_or(ComponentError::BadPortIndex { port: index })
    }

    pub(crate) fn emit(&self, event: ComponentEvent) {
        let callbacks = self.callbacks.lock().clone();
        match callbacks {
            Some(callbacks) => callbacks.event(event),
            None => debug!(name = %self.config.name, ?event, "dropped event, no callbacks set"),
        }
    }

    pub(crate) fn signal_data(self: &Arc<Self>) {
        self.data_ready.store(true, Ordering::Release);
        match self.config.trigger {
            TriggerMode::Active => self.wake.set(wake::DATA),
            TriggerMode::Passive => {
                // Only run inline if the routine is free; a busy routine
                // re-checks the data flag before returning.
                process::try_process_events(self);
            }
        }
    }

    fn worker_alive(&self) -> bool {
        matches!(
            self.worker.lock().as_ref(),
            Some(handle) if !handle.join.is_finished()
        )
    }

    /// Opens the non-tunneled strategy for one port, binding the done
    /// callbacks and the re-trigger hook back to this component.
    pub(crate) fn open_local_dio(
        self: &Arc<Self>,
        definition: &PortDefinition,
        role: SupplierRole,
        buffer_size: usize,
    ) -> CoreResult<Arc<dyn DataIo>> {
        let weak = Arc::downgrade(self);
        let trigger_weak = Arc::downgrade(self);
        let dio = LocalDataIo::open(
            DioConfig {
                port_index: definition.index,
                direction: definition.direction,
                slot_count: definition.buffer_count_target,
                buffer_size: buffer_size.max(definition.buffer_size_min),
                alignment: definition.buffer_alignment,
                memory_hint: stagewire_core::adapter::MemoryHint::Default,
                timeout: definition.fifo_timeout,
                extra_items: definition.extra_items.clone(),
                refcount_watermark: definition.refcount_watermark,
            },
            role,
            Arc::clone(&self.allocator),
            Arc::new(CallbackProxy { inner: weak }),
            Arc::new(move || {
                if let Some(inner) = trigger_weak.upgrade() {
                    inner.signal_data();
                }
            }),
        )?;
        Ok(Arc::new(dio))
    }

    fn port_dio(&self, index: u32) -> CoreResult<Arc<dyn DataIo>> {
        let slot = self.port(index)?;
        let port = slot.state.lock();
        port.dio
            .as_ref()
            .map(Arc::clone)
            .ok_or(ComponentError::IncorrectStateOperation)
    }
}

/// Forwards DIO-originated callbacks to whatever the host registered.
struct CallbackProxy {
    inner: Weak<ComponentInner>,
}

impl HostCallbacks for CallbackProxy {
    fn event(&self, event: ComponentEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit(event);
        }
    }

    fn empty_buffer_done(&self, header: BufferHeader) {
        if let Some(inner) = self.inner.upgrade() {
            let callbacks = inner.callbacks.lock().clone();
            if let Some(callbacks) = callbacks {
                callbacks.empty_buffer_done(header);
            }
        }
    }

    fn fill_buffer_done(&self, header: BufferHeader) {
        if let Some(inner) = self.inner.upgrade() {
            let callbacks = inner.callbacks.lock().clone();
            if let Some(callbacks) = callbacks {
                callbacks.fill_buffer_done(header);
            }
        }
    }
}

/// A tunnel request naming the peer endpoint.
pub struct TunnelRequest {
    pub peer: Arc<dyn TunnelPeer>,
    pub peer_port: u32,
}

/// Sub-state staged by `send_command` validation that must be rolled back
/// if the queue push or the trigger fails.
enum Staged {
    None,
    StateSet,
    Ports(Vec<usize>, PortTransition),
    Payload,
}

/// One media-processing component exposing the standardized host surface.
pub struct Component {
    inner: Arc<ComponentInner>,
}

impl Component {
    /// Builds a component in `Loaded`, spawning the worker thread when the
    /// trigger mode is [`TriggerMode::Active`].
    pub fn new(
        config: ComponentConfig,
        ports: Vec<PortDefinition>,
        adapter: Arc<dyn CodecAdapter>,
        allocator: Arc<dyn BufferAllocator>,
        transports: Vec<Arc<dyn TunnelTransport>>,
    ) -> CoreResult<Self> {
        for (position, definition) in ports.iter().enumerate() {
            if definition.index as usize != position || definition.buffer_count_target == 0 {
                return Err(ComponentError::BadParameter);
            }
        }
        let capacity = config.command_queue_capacity;
        let inner = Arc::new(ComponentInner {
            state: Mutex::new(ComponentState::Loaded),
            pending: Mutex::new(None),
            ports: ports.into_iter().map(PortSlot::new).collect(),
            callbacks: Mutex::new(None),
            adapter,
            allocator,
            transports,
            commands: CommandQueue::new(capacity),
            payloads: PayloadQueue::new(capacity),
            wake: EventFlag::new(),
            routine: Mutex::new(()),
            data_ready: AtomicBool::new(false),
            force_notify: AtomicBool::new(false),
            staging: Mutex::new(()),
            worker: Mutex::new(None),
            config,
        });
        if inner.config.trigger == TriggerMode::Active {
            let handle = worker::spawn(Arc::clone(&inner))?;
            *inner.worker.lock() = Some(handle);
        }
        info!(name = %inner.config.name, ports = inner.ports.len(), "component constructed");
        Ok(Self { inner })
    }

    pub fn get_state(&self) -> ComponentState {
        self.inner.current_state()
    }

    /// Registers host callbacks. Legal only while `Loaded`.
    pub fn set_callbacks(&self, callbacks: Arc<dyn HostCallbacks>) -> CoreResult<()> {
        if self.inner.current_state() != ComponentState::Loaded {
            return Err(ComponentError::IncorrectStateOperation);
        }
        *self.inner.callbacks.lock() = Some(callbacks);
        Ok(())
    }

    /// Queues a state-changing operation. `payload` is required for
    /// `MarkBuffer` and deep-copied, so the caller may free its own copy.
    ///
    /// Returns `Ok(Some(_))` for the soft already-enabled/disabled
    /// outcomes, which queue nothing. In passive mode the command runs
    /// inline and its failure code comes back from this call as well as
    /// through the event mirror; in active mode failures arrive only as
    /// asynchronous `Error` events.
    pub fn send_command(
        &self,
        kind: CommandKind,
        payload: Option<&MarkPayload>,
    ) -> CoreResult<Option<Advisory>> {
        let inner = &self.inner;
        if inner.current_state() == ComponentState::Invalid {
            return Err(ComponentError::InvalidState);
        }
        let staged = match kind {
            CommandKind::StateSet(target) => {
                let mut pending = inner.pending.lock();
                if pending.is_some() {
                    return Err(ComponentError::IncorrectStateTransition);
                }
                inner.current_state().check_transition(target)?;
                *pending = Some(target);
                Staged::StateSet
            }
            CommandKind::PortEnable(selector) => {
                match self.stage_port_transition(selector, PortTransition::Enabling)? {
                    Some(advisory) => return Ok(Some(advisory)),
                    None => Staged::Ports(
                        self.staged_indices(selector, PortTransition::Enabling),
                        PortTransition::Enabling,
                    ),
                }
            }
            CommandKind::PortDisable(selector) => {
                match self.stage_port_transition(selector, PortTransition::Disabling)? {
                    Some(advisory) => return Ok(Some(advisory)),
                    None => Staged::Ports(
                        self.staged_indices(selector, PortTransition::Disabling),
                        PortTransition::Disabling,
                    ),
                }
            }
            CommandKind::Flush(selector) => {
                self.validate_selector(selector)?;
                Staged::None
            }
            CommandKind::MarkBuffer(port) => {
                inner.port(port)?;
                let payload = payload.ok_or(ComponentError::BadParameter)?;
                inner.payloads.push(payload.clone())?;
                Staged::Payload
            }
        };
        let seq = match inner.commands.push(kind) {
            Ok(seq) => seq,
            Err(error) => {
                self.rollback_stage(&staged);
                return Err(error);
            }
        };
        match inner.config.trigger {
            TriggerMode::Passive => {
                process::process_events_watching(inner, seq)?;
                Ok(None)
            }
            TriggerMode::Active => {
                if inner.worker_alive() {
                    inner.wake.set(wake::CMD);
                    Ok(None)
                } else {
                    // Scan out the exact record we just pushed; if it is
                    // already gone the routine drained it anyway.
                    if inner.commands.remove(seq) {
                        self.rollback_stage(&staged);
                    }
                    Err(ComponentError::InsufficientResources)
                }
            }
        }
    }

    fn validate_selector(&self, selector: PortSelector) -> CoreResult<Vec<u32>> {
        if let PortSelector::Index(index) = selector {
            self.inner.port(index)?;
        }
        Ok(selector.resolve(self.inner.ports.len()))
    }

    /// Marks the affected ports as mid-transition, or reports the soft
    /// redundancy advisory when nothing is affected. A port already
    /// mid-transition rejects the overlapping request outright. The
    /// staging guard keeps the check and the set atomic against a
    /// concurrent `send_command`.
    fn stage_port_transition(
        &self,
        selector: PortSelector,
        transition: PortTransition,
    ) -> CoreResult<Option<Advisory>> {
        let _stage = self.inner.staging.lock();
        let indices = self.validate_selector(selector)?;
        let want_enabled = transition == PortTransition::Disabling;
        let mut affected = Vec::new();
        for index in &indices {
            let port = self.inner.ports[*index as usize].state.lock();
            if port.transition.is_some() {
                return Err(ComponentError::IncorrectStateTransition);
            }
            if port.enabled == want_enabled {
                affected.push(*index);
            }
        }
        if affected.is_empty() {
            return Ok(Some(match transition {
                PortTransition::Enabling => Advisory::AlreadyEnabled,
                PortTransition::Disabling => Advisory::AlreadyDisabled,
            }));
        }
        for index in affected {
            self.inner.ports[index as usize].state.lock().transition = Some(transition);
        }
        Ok(None)
    }

    fn staged_indices(&self, selector: PortSelector, transition: PortTransition) -> Vec<usize> {
        selector
            .resolve(self.inner.ports.len())
            .into_iter()
            .map(|index| index as usize)
            .filter(|index| {
                self.inner.ports[*index].state.lock().transition == Some(transition)
            })
            .collect()
    }

    fn rollback_stage(&self, staged: &Staged) {
        match staged {
            Staged::None => {}
            Staged::StateSet => *self.inner.pending.lock() = None,
            Staged::Ports(indices, transition) => {
                for index in indices {
                    let mut port = self.inner.ports[*index].state.lock();
                    if port.transition == Some(*transition) {
                        port.transition = None;
                    }
                }
            }
            Staged::Payload => {
                self.inner.payloads.pop_back();
            }
        }
    }

    pub fn get_parameter(&self, index: ParameterIndex) -> CoreResult<Parameter> {
        match index {
            ParameterIndex::PortDefinition(port) => {
                let slot = self.inner.port(port)?;
                Ok(Parameter::PortDefinition(slot.state.lock().definition.clone()))
            }
            ParameterIndex::SupplierSetting(port) => {
                let slot = self.inner.port(port)?;
                Ok(Parameter::SupplierSetting {
                    port,
                    setting: slot.state.lock().supplier_setting,
                })
            }
        }
    }

    /// Writes a parameter. Legal while `Loaded` or on a disabled port.
    pub fn set_parameter(&self, parameter: Parameter) -> CoreResult<()> {
        let current = self.inner.current_state();
        match parameter {
            Parameter::PortDefinition(definition) => {
                let slot = self.inner.port(definition.index)?;
                let mut port = slot.state.lock();
                if current != ComponentState::Loaded && port.enabled {
                    return Err(ComponentError::IncorrectStateOperation);
                }
                if definition.direction != port.definition.direction
                    || definition.buffer_count_target == 0
                {
                    return Err(ComponentError::BadParameter);
                }
                if port.buffer_count() != 0 {
                    return Err(ComponentError::IncorrectStateOperation);
                }
                port.buffers = vec![None; definition.buffer_count_target];
                port.definition = definition;
                Ok(())
            }
            Parameter::SupplierSetting { port, setting } => {
                let slot = self.inner.port(port)?;
                let mut state = slot.state.lock();
                if current != ComponentState::Loaded && state.enabled {
                    return Err(ComponentError::IncorrectStateOperation);
                }
                state.supplier_setting = setting;
                Ok(())
            }
        }
    }

    /// Fetches the pending codec-config blob via the port's DIO, or `None`
    /// while it is still pending.
    pub fn get_config(&self, index: ConfigIndex) -> CoreResult<Option<Vec<u8>>> {
        let ConfigIndex::CtrlAttribute(port) = index;
        let dio = self.inner.port_dio(port)?;
        match dio.control(DioControl::GetCtrlAttribute)? {
            stagewire_core::dio::ControlOutcome::Attribute(blob) => Ok(Some(blob)),
            _ => Ok(None),
        }
    }

    pub fn set_config(&self, index: ConfigIndex, blob: Vec<u8>) -> CoreResult<()> {
        let ConfigIndex::CtrlAttribute(port) = index;
        let dio = self.inner.port_dio(port)?;
        dio.control(DioControl::SetCtrlAttribute(blob))?;
        Ok(())
    }

    /// Allocates a component-owned buffer on `port`. Requires
    /// pre-announcement and a non-tunneled port; legal only inside the
    /// population windows.
    pub fn allocate_buffer(&self, port: u32, size: usize, app_tag: u64) -> CoreResult<BufferHeader> {
        self.admit_new_buffer(port, size, None, app_tag)
    }

    /// Wraps a host-supplied region as a buffer on `port`.
    pub fn use_buffer(
        &self,
        port: u32,
        region: BufferRegion,
        app_tag: u64,
    ) -> CoreResult<BufferHeader> {
        let size = region.lock().len();
        self.admit_new_buffer(port, size, Some(region), app_tag)
    }

    fn admit_new_buffer(
        &self,
        port_index: u32,
        size: usize,
        region: Option<BufferRegion>,
        app_tag: u64,
    ) -> CoreResult<BufferHeader> {
        let inner = &self.inner;
        if inner.current_state() == ComponentState::Invalid {
            return Err(ComponentError::InvalidState);
        }
        let slot = inner.port(port_index)?;
        let mut port = slot.state.lock();
        if size < port.definition.buffer_size_min {
            return Err(ComponentError::BadParameter);
        }
        if port.populated {
            return Err(ComponentError::IncorrectStateOperation);
        }
        let current = inner.current_state();
        let pending = *inner.pending.lock();
        let loading = current.is_unloaded()
            && pending == Some(ComponentState::Idle)
            && port.enabled;
        let enabling =
            port.transition == Some(PortTransition::Enabling) && !current.is_unloaded();
        if !(loading || enabling) {
            return Err(ComponentError::IncorrectStateOperation);
        }
        let role = match &region {
            None => {
                if !port.definition.pre_announcement || port.is_tunneled() {
                    return Err(ComponentError::IncorrectStateOperation);
                }
                SupplierRole::Supplier
            }
            Some(region) => {
                if port.definition.pre_announcement {
                    let len = region.lock().len();
                    let alignment = port.definition.buffer_alignment.max(1);
                    if len % alignment != 0 {
                        return Err(ComponentError::BadParameter);
                    }
                }
                SupplierRole::NonSupplier
            }
        };
        if let Some(recorded) = port.supplier_role {
            // The role is fixed by the first buffer and never overwritten.
            if recorded != role {
                return Err(ComponentError::IncorrectStateOperation);
            }
        }
        if port.dio.is_none() {
            let dio = inner.open_local_dio(&port.definition, role, size)?;
            port.dio = Some(dio);
            port.supplier_role = Some(role);
        }
        let slot_index = port
            .first_free_slot()
            .ok_or(ComponentError::InsufficientResources)?;
        let dio = match port.dio.as_ref() {
            Some(dio) => Arc::clone(dio),
            None => return Err(ComponentError::Undefined),
        };
        let op = match region {
            None => DioUtil::AcquireHeader { slot: slot_index },
            Some(region) => DioUtil::AdoptRegion { slot: slot_index, region },
        };
        let UtilOutcome::Header(mut header) = dio.util(op)? else {
            return Err(ComponentError::Undefined);
        };
        header.app_tag = app_tag;
        port.buffers[slot_index] = Some(header.id);
        if port.buffer_count() == port.definition.buffer_count_target {
            port.populated = true;
            slot.events.set(port_event::ALLOC);
        }
        Ok(header)
    }

    /// Releases a buffer. Outside the legal release windows this still
    /// performs the cleanup (to avoid leaks) but reports the recoverable
    /// `PortUnpopulated` error both synchronously and as an event.
    pub fn free_buffer(&self, port_index: u32, header: &BufferHeader) -> CoreResult<()> {
        let inner = &self.inner;
        let slot = inner.port(port_index)?;
        let mut port = slot.state.lock();
        if port.buffer_count() == 0 {
            return Err(ComponentError::BadParameter);
        }
        let slot_index = port.slot_of(header.id).ok_or(ComponentError::BadParameter)?;
        let current = inner.current_state();
        let pending = *inner.pending.lock();
        let unloading = current == ComponentState::Idle
            && matches!(pending, Some(target) if target.is_unloaded())
            && port.enabled;
        let disabling = port.transition == Some(PortTransition::Disabling);
        let legal = unloading || disabling;
        let dio = port.dio.as_ref().map(Arc::clone);
        port.buffers[slot_index] = None;
        port.populated = false;
        let now_empty = port.buffer_count() == 0;
        drop(port);
        if let Some(dio) = dio {
            let _ = dio.util(DioUtil::ReleaseHeader { slot: slot_index });
        }
        if now_empty {
            slot.events.set(port_event::FREE);
        }
        if legal {
            Ok(())
        } else {
            warn!(port = port_index, "buffer freed outside a release window");
            inner.emit(ComponentEvent::Error {
                error: ComponentError::PortUnpopulated { port: port_index },
            });
            Err(ComponentError::PortUnpopulated { port: port_index })
        }
    }

    /// Hands an input buffer to the component for consumption.
    pub fn empty_this_buffer(&self, header: BufferHeader) -> CoreResult<()> {
        self.submit_buffer(header, PortDirection::Input)
    }

    /// Hands an output buffer to the component to be filled.
    pub fn fill_this_buffer(&self, header: BufferHeader) -> CoreResult<()> {
        self.submit_buffer(header, PortDirection::Output)
    }

    fn submit_buffer(&self, header: BufferHeader, expected: PortDirection) -> CoreResult<()> {
        let inner = &self.inner;
        if inner.current_state() == ComponentState::Invalid {
            return Err(ComponentError::InvalidState);
        }
        if header.direction != expected {
            return Err(ComponentError::BadParameter);
        }
        let slot = inner.port(header.port_index)?;
        let mut port = slot.state.lock();
        if port.definition.direction != expected {
            return Err(ComponentError::BadParameter);
        }
        if !port.definition.pre_announcement {
            // Pointers arrive late, so the admission checks run here.
            let alignment = port.definition.buffer_alignment.max(1);
            if header.alloc_len < port.definition.buffer_size_min
                || header.alloc_len % alignment != 0
                || header.offset + header.filled_len > header.alloc_len
            {
                return Err(ComponentError::BadParameter);
            }
        }
        let current = inner.current_state();
        let pending = *inner.pending.lock();
        let running = matches!(current, ComponentState::Executing | ComponentState::Pause)
            || pending == Some(ComponentState::Executing);
        if !running {
            return Err(ComponentError::IncorrectStateOperation);
        }
        if !port.enabled {
            let supplier_mid_disable = port.supplier_role == Some(SupplierRole::Supplier)
                && port.transition == Some(PortTransition::Disabling);
            if !supplier_mid_disable {
                return Err(ComponentError::IncorrectStateOperation);
            }
        }
        if port.supplier_role == Some(SupplierRole::NonSupplier)
            && (pending == Some(ComponentState::Idle)
                || port.transition == Some(PortTransition::Disabling))
        {
            return Err(ComponentError::IncorrectStateOperation);
        }
        port.eos_received = header.flags.contains(BufferFlags::EOS);
        let dio = port
            .dio
            .as_ref()
            .map(Arc::clone)
            .ok_or(ComponentError::IncorrectStateOperation)?;
        drop(port);
        dio.queue(header)?;
        inner.signal_data();
        Ok(())
    }

    /// Establishes or cancels a tunnel on `port`; returns the agreed (or
    /// reset) supplier setting.
    pub fn tunnel_request(
        &self,
        port: u32,
        request: Option<TunnelRequest>,
    ) -> CoreResult<SupplierSetting> {
        tunnel::tunnel_request(&self.inner, port, request)
    }

    /// Collaborator hook: the allocator or adapter reports a failed buffer
    /// handshake on `port`, failing any blocked population wait.
    pub fn report_port_error(&self, port: u32) -> CoreResult<()> {
        let slot = self.inner.port(port)?;
        slot.events.set(port_event::FAIL);
        Ok(())
    }

    /// Adapter hook: surfaces a port-settings-changed event to the host.
    pub fn signal_port_settings_changed(&self, port: u32) {
        self.inner.emit(ComponentEvent::PortSettingsChanged { port });
    }

    /// Adapter hook: forwards a component-defined event to the host.
    pub fn signal_custom_event(&self, id: u32, data: u64) {
        self.inner.emit(ComponentEvent::Custom { id, data });
    }

    // Adapter-facing data path: thin delegation to the port's DIO.

    pub fn dequeue_buffer(&self, port: u32) -> CoreResult<DequeueOutcome> {
        self.inner.port_dio(port)?.dequeue()
    }

    pub fn send_buffer(&self, port: u32, header: BufferHeader) -> CoreResult<()> {
        self.inner.port_dio(port)?.send(header)
    }

    pub fn cancel_buffer(&self, port: u32, header: BufferHeader) -> CoreResult<()> {
        self.inner.port_dio(port)?.cancel(header)
    }

    pub fn dup_buffer(&self, port: u32, header: &BufferHeader) -> CoreResult<BufferHeader> {
        self.inner.port_dio(port)?.dup(header)
    }

    pub fn buffer_count(&self, port: u32) -> CoreResult<CountReport> {
        self.inner.port_dio(port)?.get_count()
    }

    /// Tears the component down with bounded waits throughout, so a hung
    /// adapter still leaves the object destructible. Returns `Timeout` if
    /// the worker failed to acknowledge shutdown.
    pub fn deinit(&self) -> CoreResult<()> {
        let inner = &self.inner;
        info!(name = %inner.config.name, "component deinit");
        let worker = inner.worker.lock().take();
        let mut result = Ok(());
        if let Some(handle) = worker {
            inner.wake.set(wake::EXIT);
            match handle.done_rx.recv_timeout(inner.config.teardown_wait) {
                Ok(()) => {
                    let _ = handle.join.join();
                }
                Err(_) => {
                    warn!(name = %inner.config.name, "worker did not acknowledge shutdown");
                    result = Err(ComponentError::Timeout);
                }
            }
        }
        // Lock-step drain: each un-processed MarkBuffer record releases
        // exactly one owned payload.
        while let Some(record) = inner.commands.pop() {
            if matches!(record.kind, CommandKind::MarkBuffer(_)) {
                let _ = inner.payloads.pop_front();
            }
        }
        let leaked = inner.payloads.len();
        if leaked > 0 {
            warn!(count = leaked, "draining orphaned mark-buffer payloads");
            while inner.payloads.pop_front().is_some() {}
        }
        for slot in &inner.ports {
            let dio = {
                let mut port = slot.state.lock();
                port.transition = None;
                port.reset_buffers()
            };
            if let Some(dio) = dio {
                let _ = dio.control(DioControl::Stop);
                let _ = dio.close();
            }
        }
        *inner.state.lock() = ComponentState::Invalid;
        *inner.pending.lock() = None;
        result
    }
}
