//! End-to-end component tests against scripted adapter, allocator, and
//! tunnel doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use stagewire_core::adapter::{
    BufferAllocator, CodecAdapter, MemoryHint, Notification, PhysicalBuffer, TunnelCapability,
    TunnelPeer, TunnelTransport,
};
use stagewire_core::buffer::{new_region, BufferFlags, BufferHeader};
use stagewire_core::command::{CommandKind, MarkPayload, PortSelector};
use stagewire_core::dio::DequeueOutcome;
use stagewire_core::error::{Advisory, ComponentError, CoreResult};
use stagewire_core::event::{ComponentEvent, HostCallbacks};
use stagewire_core::event_flag::EventFlag;
use stagewire_core::port::{PortDefinition, PortDirection, SupplierSetting};
use stagewire_core::state::ComponentState;

use crate::component::{Component, TunnelRequest};
use crate::config::{ComponentConfig, TriggerMode};
use crate::params::{Parameter, ParameterIndex};

struct TestAdapter {
    completion: EventFlag,
    notes: Mutex<Vec<Notification>>,
    fail_next: AtomicBool,
}

impl TestAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            completion: EventFlag::new(),
            notes: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        })
    }

    fn saw(&self, wanted: &Notification) -> bool {
        self.notes.lock().iter().any(|note| note == wanted)
    }
}

impl CodecAdapter for TestAdapter {
    fn notify(&self, note: Notification) -> CoreResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ComponentError::Undefined);
        }
        let bit = note.completion_bit();
        self.notes.lock().push(note);
        if let Some(bit) = bit {
            self.completion.set(bit);
        }
        Ok(())
    }

    fn completion(&self) -> &EventFlag {
        &self.completion
    }
}

struct TestAllocator {
    live: AtomicUsize,
}

impl TestAllocator {
    fn new() -> Arc<Self> {
        Arc::new(Self { live: AtomicUsize::new(0) })
    }
}

impl BufferAllocator for TestAllocator {
    fn allocate(
        &self,
        size: usize,
        _alignment: usize,
        _hint: MemoryHint,
    ) -> CoreResult<PhysicalBuffer> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(PhysicalBuffer { region: new_region(size), token: 0 })
    }

    fn free(&self, _buffer: PhysicalBuffer) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingCallbacks {
    events: Mutex<Vec<ComponentEvent>>,
    emptied: Mutex<Vec<BufferHeader>>,
    filled: Mutex<Vec<BufferHeader>>,
}

impl RecordingCallbacks {
    fn wait_for(&self, wanted: &ComponentEvent) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.events.lock().iter().any(|event| event == wanted) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("event never arrived: {wanted:?}");
    }
}

impl HostCallbacks for RecordingCallbacks {
    fn event(&self, event: ComponentEvent) {
        self.events.lock().push(event);
    }

    fn empty_buffer_done(&self, header: BufferHeader) {
        self.emptied.lock().push(header);
    }

    fn fill_buffer_done(&self, header: BufferHeader) {
        self.filled.lock().push(header);
    }
}

struct Harness {
    component: Arc<Component>,
    adapter: Arc<TestAdapter>,
    allocator: Arc<TestAllocator>,
    callbacks: Arc<RecordingCallbacks>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn harness(ports: Vec<PortDefinition>, trigger: TriggerMode) -> Harness {
    init_tracing();
    let adapter = TestAdapter::new();
    let allocator = TestAllocator::new();
    let callbacks = Arc::new(RecordingCallbacks::default());
    let component = Arc::new(
        Component::new(
            ComponentConfig::new("test", trigger),
            ports,
            Arc::clone(&adapter) as Arc<dyn CodecAdapter>,
            Arc::clone(&allocator) as Arc<dyn BufferAllocator>,
            Vec::new(),
        )
        .unwrap(),
    );
    component
        .set_callbacks(Arc::clone(&callbacks) as Arc<dyn HostCallbacks>)
        .unwrap();
    Harness { component, adapter, allocator, callbacks }
}

fn two_ports() -> Vec<PortDefinition> {
    vec![
        PortDefinition::new(0, PortDirection::Input),
        PortDefinition::new(1, PortDirection::Output),
    ]
}

fn one_input_port() -> Vec<PortDefinition> {
    vec![PortDefinition::new(0, PortDirection::Input)]
}

/// Allocates until the population window opens and `count` buffers landed.
fn allocate_all(component: &Arc<Component>, port: u32, count: usize) -> Vec<BufferHeader> {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut headers = Vec::new();
    while headers.len() < count {
        match component.allocate_buffer(port, 4096, headers.len() as u64) {
            Ok(header) => headers.push(header),
            Err(_) => {
                assert!(Instant::now() < deadline, "population window never opened");
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
    headers
}

/// Drives a passive component Loaded -> Idle, allocating from a helper
/// thread while the command blocks.
fn go_idle_passive(harness: &Harness, ports: &[(u32, usize)]) -> Vec<BufferHeader> {
    let component = Arc::clone(&harness.component);
    let ports = ports.to_vec();
    let feeder = thread::spawn(move || {
        let mut headers = Vec::new();
        for (port, count) in ports {
            headers.extend(allocate_all(&component, port, count));
        }
        headers
    });
    harness
        .component
        .send_command(CommandKind::StateSet(ComponentState::Idle), None)
        .unwrap();
    assert_eq!(harness.component.get_state(), ComponentState::Idle);
    feeder.join().unwrap()
}

#[test]
fn construction_starts_loaded() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    assert_eq!(harness.component.get_state(), ComponentState::Loaded);
}

#[test]
fn illegal_transitions_are_rejected_synchronously() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::StateSet(ComponentState::Executing), None),
        Err(ComponentError::IncorrectStateTransition)
    );
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::StateSet(ComponentState::Loaded), None),
        Err(ComponentError::SameState)
    );
}

#[test]
fn second_state_set_is_rejected_while_one_is_pending() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    let component = Arc::clone(&harness.component);
    let sender = thread::spawn(move || {
        component
            .send_command(CommandKind::StateSet(ComponentState::Idle), None)
            .unwrap();
    });
    let deadline = Instant::now() + Duration::from_secs(2);
    while harness.component.inner.pending.lock().is_none() {
        assert!(Instant::now() < deadline, "transition never became pending");
        thread::sleep(Duration::from_millis(5));
    }
    // Even the always-legal Invalid target must queue behind nothing.
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::StateSet(ComponentState::Invalid), None),
        Err(ComponentError::IncorrectStateTransition)
    );
    allocate_all(&harness.component, 0, 4);
    allocate_all(&harness.component, 1, 4);
    sender.join().unwrap();
    assert_eq!(harness.component.get_state(), ComponentState::Idle);
}

#[test]
fn loaded_to_idle_blocks_until_every_port_is_populated() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    go_idle_passive(&harness, &[(0, 4), (1, 4)]);
    assert_eq!(harness.allocator.live.load(Ordering::SeqCst), 8);
    harness.callbacks.wait_for(&ComponentEvent::CmdComplete {
        kind: CommandKind::StateSet(ComponentState::Idle),
    });
}

#[test]
fn idle_to_loaded_blocks_until_every_buffer_is_freed() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    let headers = go_idle_passive(&harness, &[(0, 4), (1, 4)]);
    let component = Arc::clone(&harness.component);
    let sender = thread::spawn(move || {
        component
            .send_command(CommandKind::StateSet(ComponentState::Loaded), None)
            .unwrap();
    });
    let deadline = Instant::now() + Duration::from_secs(2);
    while harness.component.inner.pending.lock().is_none() {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(5));
    }
    for header in &headers {
        harness.component.free_buffer(header.port_index, header).unwrap();
    }
    sender.join().unwrap();
    assert_eq!(harness.component.get_state(), ComponentState::Loaded);
    assert_eq!(harness.allocator.live.load(Ordering::SeqCst), 0);
}

#[test]
fn active_population_failure_recovers_cleanly() {
    let harness = harness(two_ports(), TriggerMode::Active);
    harness
        .component
        .send_command(CommandKind::StateSet(ComponentState::Idle), None)
        .unwrap();
    harness.component.report_port_error(0).unwrap();
    harness.callbacks.wait_for(&ComponentEvent::Error {
        error: ComponentError::UnresponsiveDuringAllocation { port: 0 },
    });
    assert_eq!(harness.component.get_state(), ComponentState::Loaded);
    // The failed transition left nothing pending, so this answers at once.
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::StateSet(ComponentState::Loaded), None),
        Err(ComponentError::SameState)
    );
    assert!(harness.component.deinit().is_ok());
    assert_eq!(harness.component.get_state(), ComponentState::Invalid);
}

#[test]
fn failed_adapter_notify_clears_the_pending_transition() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    harness.adapter.fail_next.store(true, Ordering::SeqCst);
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::StateSet(ComponentState::Idle), None),
        Err(ComponentError::Undefined)
    );
    harness
        .callbacks
        .wait_for(&ComponentEvent::Error { error: ComponentError::Undefined });
    assert_eq!(harness.component.get_state(), ComponentState::Loaded);
    assert!(harness.component.inner.pending.lock().is_none());
}

#[test]
fn passive_blocked_state_set_returns_the_handshake_failure() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    let component = Arc::clone(&harness.component);
    let failer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        component.report_port_error(0).unwrap();
    });
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::StateSet(ComponentState::Idle), None),
        Err(ComponentError::UnresponsiveDuringAllocation { port: 0 })
    );
    failer.join().unwrap();
    assert_eq!(harness.component.get_state(), ComponentState::Loaded);
    harness.callbacks.wait_for(&ComponentEvent::Error {
        error: ComponentError::UnresponsiveDuringAllocation { port: 0 },
    });
}

#[test]
fn concurrent_port_disables_complete_exactly_once() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    let mut joins = Vec::new();
    for _ in 0..2 {
        let component = Arc::clone(&harness.component);
        joins.push(thread::spawn(move || {
            component.send_command(CommandKind::PortDisable(PortSelector::Index(0)), None)
        }));
    }
    let results: Vec<_> = joins.into_iter().map(|join| join.join().unwrap()).collect();
    let accepted = results
        .iter()
        .filter(|result| matches!(result, Ok(None)))
        .count();
    assert_eq!(accepted, 1, "exactly one disable accepted: {results:?}");
    for result in &results {
        assert!(
            matches!(
                result,
                Ok(None)
                    | Ok(Some(Advisory::AlreadyDisabled))
                    | Err(ComponentError::IncorrectStateTransition)
            ),
            "unexpected outcome: {result:?}"
        );
    }
    let completions = harness
        .callbacks
        .events
        .lock()
        .iter()
        .filter(|event| {
            matches!(
                event,
                ComponentEvent::CmdComplete {
                    kind: CommandKind::PortDisable(PortSelector::Index(0)),
                }
            )
        })
        .count();
    assert_eq!(completions, 1, "one completion per accepted command");
}

#[test]
fn redundant_port_commands_return_soft_advisories() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::PortEnable(PortSelector::Index(0)), None),
        Ok(Some(Advisory::AlreadyEnabled))
    );
    harness
        .component
        .send_command(CommandKind::PortDisable(PortSelector::Index(0)), None)
        .unwrap();
    harness.callbacks.wait_for(&ComponentEvent::CmdComplete {
        kind: CommandKind::PortDisable(PortSelector::Index(0)),
    });
    assert_eq!(
        harness
            .component
            .send_command(CommandKind::PortDisable(PortSelector::Index(0)), None),
        Ok(Some(Advisory::AlreadyDisabled))
    );
}

#[test]
fn empty_this_buffer_is_rejected_on_a_disabled_port() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    harness
        .component
        .send_command(CommandKind::PortDisable(PortSelector::Index(0)), None)
        .unwrap();
    go_idle_passive(&harness, &[(1, 4)]);
    harness
        .component
        .send_command(CommandKind::StateSet(ComponentState::Executing), None)
        .unwrap();
    assert_eq!(harness.component.get_state(), ComponentState::Executing);
    let header = BufferHeader::new(0, PortDirection::Input, new_region(4096));
    assert_eq!(
        harness.component.empty_this_buffer(header),
        Err(ComponentError::IncorrectStateOperation)
    );
}

#[test]
fn eos_propagates_and_the_count_reports_it_once_drained() {
    let harness = harness(one_input_port(), TriggerMode::Passive);
    let mut headers = go_idle_passive(&harness, &[(0, 4)]);
    harness
        .component
        .send_command(CommandKind::StateSet(ComponentState::Executing), None)
        .unwrap();
    let mut header = headers.pop().unwrap();
    header.filled_len = 16;
    header.flags.insert(BufferFlags::EOS);
    harness.component.empty_this_buffer(header).unwrap();
    let DequeueOutcome::Delivered(delivered) = harness.component.dequeue_buffer(0).unwrap()
    else {
        panic!("expected a delivered frame");
    };
    assert!(delivered.flags.contains(BufferFlags::EOS));
    let report = harness.component.buffer_count(0).unwrap();
    assert_eq!(report.frames, 0);
    assert_eq!(report.advisory, Some(Advisory::EndOfStreamReceived));
}

#[test]
fn executing_round_trip_returns_the_buffer_through_the_done_callback() {
    let harness = harness(one_input_port(), TriggerMode::Passive);
    let mut headers = go_idle_passive(&harness, &[(0, 4)]);
    harness
        .component
        .send_command(CommandKind::StateSet(ComponentState::Executing), None)
        .unwrap();
    let mut header = headers.pop().unwrap();
    header.filled_len = 32;
    header.app_tag = 77;
    harness.component.empty_this_buffer(header).unwrap();
    let DequeueOutcome::Delivered(delivered) = harness.component.dequeue_buffer(0).unwrap()
    else {
        panic!("expected a delivered frame");
    };
    harness.component.send_buffer(0, delivered).unwrap();
    let emptied = harness.callbacks.emptied.lock();
    assert_eq!(emptied.len(), 1);
    assert_eq!(emptied[0].app_tag, 77);
}

#[test]
fn flush_completes_for_every_selected_port() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    go_idle_passive(&harness, &[(0, 4), (1, 4)]);
    harness
        .component
        .send_command(CommandKind::Flush(PortSelector::All), None)
        .unwrap();
    harness.callbacks.wait_for(&ComponentEvent::CmdComplete {
        kind: CommandKind::Flush(PortSelector::Index(0)),
    });
    harness.callbacks.wait_for(&ComponentEvent::CmdComplete {
        kind: CommandKind::Flush(PortSelector::Index(1)),
    });
}

#[test]
fn mark_buffer_hands_the_owned_payload_to_the_adapter() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    let payload = MarkPayload { target: "sink".into(), data: vec![1, 2, 3] };
    harness
        .component
        .send_command(CommandKind::MarkBuffer(0), Some(&payload))
        .unwrap();
    harness
        .callbacks
        .wait_for(&ComponentEvent::CmdComplete { kind: CommandKind::MarkBuffer(0) });
    assert!(harness.adapter.saw(&Notification::MarkBuffer(payload)));
    assert_eq!(harness.component.inner.payloads.len(), 0);
}

#[test]
fn deinit_drains_orphaned_mark_payloads_in_lock_step() {
    let harness = harness(two_ports(), TriggerMode::Active);
    // Park the worker in a population wait so queued commands pile up
    // behind the blocked transition.
    harness
        .component
        .send_command(CommandKind::StateSet(ComponentState::Idle), None)
        .unwrap();
    let payload = MarkPayload { target: "sink".into(), data: vec![9] };
    harness
        .component
        .send_command(CommandKind::MarkBuffer(1), Some(&payload))
        .unwrap();
    assert_eq!(harness.component.deinit(), Err(ComponentError::Timeout));
    assert_eq!(harness.component.inner.payloads.len(), 0);
    assert_eq!(harness.component.get_state(), ComponentState::Invalid);
}

#[test]
fn set_callbacks_is_legal_only_while_loaded() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    go_idle_passive(&harness, &[(0, 4), (1, 4)]);
    let extra = Arc::new(RecordingCallbacks::default());
    assert_eq!(
        harness.component.set_callbacks(extra as Arc<dyn HostCallbacks>),
        Err(ComponentError::IncorrectStateOperation)
    );
}

#[test]
fn set_parameter_rejects_a_direction_change() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    let definition = PortDefinition::new(0, PortDirection::Output);
    assert_eq!(
        harness
            .component
            .set_parameter(Parameter::PortDefinition(definition)),
        Err(ComponentError::BadParameter)
    );
    let mut resized = PortDefinition::new(0, PortDirection::Input);
    resized.buffer_count_target = 2;
    harness
        .component
        .set_parameter(Parameter::PortDefinition(resized.clone()))
        .unwrap();
    assert_eq!(
        harness.component.get_parameter(ParameterIndex::PortDefinition(0)),
        Ok(Parameter::PortDefinition(resized))
    );
}

#[test]
fn allocate_is_rejected_outside_a_population_window() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    assert_eq!(
        harness.component.allocate_buffer(0, 4096, 0).unwrap_err(),
        ComponentError::IncorrectStateOperation
    );
    assert_eq!(
        harness.component.allocate_buffer(9, 4096, 0).unwrap_err(),
        ComponentError::BadPortIndex { port: 9 }
    );
}

#[test]
fn undersized_buffers_are_rejected() {
    let harness = harness(two_ports(), TriggerMode::Passive);
    let component = Arc::clone(&harness.component);
    let sender = thread::spawn(move || {
        let _ = component.send_command(CommandKind::StateSet(ComponentState::Idle), None);
    });
    let deadline = Instant::now() + Duration::from_secs(2);
    while harness.component.inner.pending.lock().is_none() {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        harness.component.allocate_buffer(0, 128, 0).unwrap_err(),
        ComponentError::BadParameter
    );
    allocate_all(&harness.component, 0, 4);
    allocate_all(&harness.component, 1, 4);
    sender.join().unwrap();
}

struct TestPeer {
    agreed: SupplierSetting,
}

impl TunnelPeer for TestPeer {
    fn negotiate_supplier(
        &self,
        _peer_port: u32,
        _proposed: SupplierSetting,
    ) -> CoreResult<SupplierSetting> {
        Ok(self.agreed)
    }

    fn capability(&self, _peer_port: u32) -> TunnelCapability {
        TunnelCapability::Local
    }
}

struct TestTransport {
    established: AtomicUsize,
}

impl TunnelTransport for TestTransport {
    fn capability(&self) -> TunnelCapability {
        TunnelCapability::Local
    }

    fn establish(
        &self,
        _local_port: u32,
        _peer: &Arc<dyn TunnelPeer>,
        _peer_port: u32,
        _supplier: SupplierSetting,
    ) -> CoreResult<()> {
        self.established.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn teardown(&self, _local_port: u32) -> CoreResult<()> {
        self.established.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn tunnel_harness() -> (Arc<Component>, Arc<TestTransport>) {
    let adapter = TestAdapter::new();
    let allocator = TestAllocator::new();
    let transport = Arc::new(TestTransport { established: AtomicUsize::new(0) });
    let component = Arc::new(
        Component::new(
            ComponentConfig::new("tunneled", TriggerMode::Passive),
            one_input_port(),
            adapter as Arc<dyn CodecAdapter>,
            allocator as Arc<dyn BufferAllocator>,
            vec![Arc::clone(&transport) as Arc<dyn TunnelTransport>],
        )
        .unwrap(),
    );
    (component, transport)
}

#[test]
fn tunnel_negotiation_records_the_agreed_supplier() {
    let (component, transport) = tunnel_harness();
    let peer = Arc::new(TestPeer { agreed: SupplierSetting::Output });
    let agreed = component
        .tunnel_request(0, Some(TunnelRequest { peer, peer_port: 1 }))
        .unwrap();
    assert_eq!(agreed, SupplierSetting::Output);
    assert_eq!(transport.established.load(Ordering::SeqCst), 1);
    assert_eq!(
        component.get_parameter(ParameterIndex::SupplierSetting(0)),
        Ok(Parameter::SupplierSetting { port: 0, setting: SupplierSetting::Output })
    );
}

#[test]
fn tunnel_cancellation_resets_the_supplier_outcome() {
    let (component, transport) = tunnel_harness();
    let peer = Arc::new(TestPeer { agreed: SupplierSetting::Input });
    component
        .tunnel_request(0, Some(TunnelRequest { peer, peer_port: 3 }))
        .unwrap();
    assert_eq!(component.tunnel_request(0, None), Ok(SupplierSetting::Unspecified));
    assert_eq!(transport.established.load(Ordering::SeqCst), 0);
    assert_eq!(
        component.get_parameter(ParameterIndex::SupplierSetting(0)),
        Ok(Parameter::SupplierSetting { port: 0, setting: SupplierSetting::Unspecified })
    );
}

#[test]
fn deinit_is_clean_after_a_full_passive_run() {
    let harness = harness(one_input_port(), TriggerMode::Passive);
    go_idle_passive(&harness, &[(0, 4)]);
    assert!(harness.component.deinit().is_ok());
    assert_eq!(harness.component.get_state(), ComponentState::Invalid);
    assert_eq!(harness.allocator.live.load(Ordering::SeqCst), 0);
    assert_eq!(
        harness.component.allocate_buffer(0, 4096, 0).unwrap_err(),
        ComponentError::InvalidState
    );
}
