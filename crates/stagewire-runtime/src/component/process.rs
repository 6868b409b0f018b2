//! The event-processing routine: drains the command queue, runs each
//! command's notify/wait/apply protocol against the adapter, and forwards
//! data-availability to the adapter afterwards.
//!
//! Exactly one thread runs the routine at a time. In active mode that is
//! the worker; in passive mode it is whichever entry point got the routine
//! lock first, with late arrivals covered by the data/force flags the
//! running pass re-checks before returning.
//!
//! Every handler returns the command's outcome as well as mirroring it
//! through the host event channel, so the passive path can hand the code
//! back to the blocked `send_command` caller.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use stagewire_core::adapter::Notification;
use stagewire_core::command::{CommandKind, PortSelector};
use stagewire_core::dio::DioControl;
use stagewire_core::error::{ComponentError, CoreResult};
use stagewire_core::event::ComponentEvent;
use stagewire_core::state::ComponentState;

use crate::command_queue::QueuedCommand;
use crate::component::ComponentInner;
use crate::port::{port_event, PortTransition};

pub(crate) fn process_events(inner: &Arc<ComponentInner>) {
    let _guard = inner.routine.lock();
    let _ = run_passes(inner, None);
}

/// Passive-mode command trigger: runs the routine inline and returns the
/// outcome of the command pushed under `seq`.
pub(crate) fn process_events_watching(inner: &Arc<ComponentInner>, seq: u64) -> CoreResult<()> {
    let _guard = inner.routine.lock();
    run_passes(inner, Some(seq))
}

/// Passive-mode data trigger: run inline only if the routine is free. A
/// busy routine re-checks the data flag before releasing the lock.
pub(crate) fn try_process_events(inner: &Arc<ComponentInner>) {
    if let Some(_guard) = inner.routine.try_lock() {
        let _ = run_passes(inner, None);
    }
}

fn run_passes(inner: &Arc<ComponentInner>, watched: Option<u64>) -> CoreResult<()> {
    let mut watched_result = Ok(());
    loop {
        let mut drained = false;
        while let Some(record) = inner.commands.pop() {
            drained = true;
            let seq = record.seq;
            let result = handle_command(inner, record);
            if watched == Some(seq) {
                watched_result = result;
            }
        }
        if drained {
            inner.force_notify.store(true, Ordering::Release);
        }
        let data = inner.data_ready.swap(false, Ordering::AcqRel);
        let forced = inner.force_notify.swap(false, Ordering::AcqRel);
        if data || forced {
            if let Err(error) = inner.adapter.notify(Notification::Data) {
                debug!(name = %inner.config.name, %error, "adapter declined data notification");
            }
        }
        let idle = inner.commands.len() == 0
            && !inner.data_ready.load(Ordering::Acquire)
            && !inner.force_notify.load(Ordering::Acquire);
        if idle {
            return watched_result;
        }
    }
}

fn handle_command(inner: &Arc<ComponentInner>, record: QueuedCommand) -> CoreResult<()> {
    debug!(name = %inner.config.name, seq = record.seq, kind = ?record.kind, "processing command");
    match record.kind {
        CommandKind::StateSet(target) => handle_state_set(inner, target),
        CommandKind::PortEnable(selector) => handle_port_enable(inner, selector),
        CommandKind::PortDisable(selector) => handle_port_disable(inner, selector),
        CommandKind::Flush(selector) => handle_flush(inner, selector),
        CommandKind::MarkBuffer(port) => handle_mark_buffer(inner, port),
    }
}

fn handle_state_set(inner: &Arc<ComponentInner>, target: ComponentState) -> CoreResult<()> {
    let current = inner.current_state();
    if target == ComponentState::Invalid {
        // Best-effort adapter notice; the transition cannot fail.
        if inner.adapter.notify(Notification::StateSet(target)).is_ok() {
            let _ = inner
                .adapter
                .completion()
                .wait_any(stagewire_core::adapter::completion::STATE_SET, None);
        }
        *inner.state.lock() = ComponentState::Invalid;
        *inner.pending.lock() = None;
        inner.emit(ComponentEvent::Error { error: ComponentError::InvalidState });
        return Ok(());
    }
    if let Err(error) = inner.adapter.notify(Notification::StateSet(target)) {
        *inner.pending.lock() = None;
        inner.emit(ComponentEvent::Error { error: error.clone() });
        return Err(error);
    }
    let _ = inner
        .adapter
        .completion()
        .wait_any(stagewire_core::adapter::completion::STATE_SET, None);
    match apply_state_side_effects(inner, current, target) {
        Ok(()) => {
            *inner.state.lock() = target;
            *inner.pending.lock() = None;
            inner.emit(ComponentEvent::CmdComplete { kind: CommandKind::StateSet(target) });
            Ok(())
        }
        Err(error) => {
            *inner.pending.lock() = None;
            inner.emit(ComponentEvent::Error { error: error.clone() });
            Err(error)
        }
    }
}

fn apply_state_side_effects(
    inner: &Arc<ComponentInner>,
    current: ComponentState,
    target: ComponentState,
) -> CoreResult<()> {
    match (current, target) {
        (ComponentState::Loaded | ComponentState::WaitForResources, ComponentState::Idle) => {
            populate_ports(inner)
        }
        (ComponentState::Idle, ComponentState::Loaded | ComponentState::WaitForResources) => {
            unpopulate_ports(inner)
        }
        (ComponentState::Idle | ComponentState::Pause, ComponentState::Executing) => {
            control_all_dios(inner, DioControl::Start);
            Ok(())
        }
        (ComponentState::Executing | ComponentState::Pause, ComponentState::Idle) => {
            control_all_dios(inner, DioControl::Stop);
            Ok(())
        }
        // Pause keeps every buffer where it is.
        _ => Ok(()),
    }
}

fn control_all_dios(inner: &Arc<ComponentInner>, op: DioControl) {
    for slot in &inner.ports {
        let dio = {
            let port = slot.state.lock();
            if !port.enabled {
                continue;
            }
            port.dio.as_ref().map(Arc::clone)
        };
        if let Some(dio) = dio {
            if let Err(error) = dio.control(op.clone()) {
                warn!(name = %inner.config.name, %error, "dio control failed");
            }
        }
    }
}

/// Blocks until every enabled port reports its pool fully populated, or
/// any port reports failure. Failure rolls back every port's bookkeeping
/// so the component re-enters its unloaded state cleanly.
fn populate_ports(inner: &Arc<ComponentInner>) -> CoreResult<()> {
    for (index, slot) in inner.ports.iter().enumerate() {
        let needs_buffers = {
            let port = slot.state.lock();
            port.enabled && !port.populated && port.definition.buffer_count_target > 0
        };
        if !needs_buffers {
            continue;
        }
        let matched = slot
            .events
            .wait_any(port_event::ALLOC | port_event::FAIL, None)?;
        if matched & port_event::FAIL != 0 {
            rollback_population(inner);
            return Err(ComponentError::UnresponsiveDuringAllocation { port: index as u32 });
        }
    }
    Ok(())
}

fn rollback_population(inner: &Arc<ComponentInner>) {
    for slot in &inner.ports {
        let dio = slot.state.lock().reset_buffers();
        if let Some(dio) = dio {
            let _ = dio.close();
        }
        slot.events
            .clear(port_event::ALLOC | port_event::FREE | port_event::FAIL);
    }
}

/// Blocks until every populated port's pool has been fully released, then
/// drops the DIO bindings.
fn unpopulate_ports(inner: &Arc<ComponentInner>) -> CoreResult<()> {
    for (index, slot) in inner.ports.iter().enumerate() {
        let has_buffers = {
            let port = slot.state.lock();
            port.enabled && port.buffer_count() > 0
        };
        if !has_buffers {
            continue;
        }
        let matched = slot
            .events
            .wait_any(port_event::FREE | port_event::FAIL, None)?;
        if matched & port_event::FAIL != 0 {
            return Err(ComponentError::UnresponsiveDuringDeallocation { port: index as u32 });
        }
    }
    for slot in &inner.ports {
        let dio = slot.state.lock().reset_buffers();
        if let Some(dio) = dio {
            let _ = dio.close();
        }
    }
    Ok(())
}

fn handle_port_enable(inner: &Arc<ComponentInner>, selector: PortSelector) -> CoreResult<()> {
    let affected = transitioning_ports(inner, PortTransition::Enabling);
    if let Err(error) = inner.adapter.notify(Notification::PortEnable(selector)) {
        for index in affected {
            inner.ports[index].state.lock().transition = None;
        }
        inner.emit(ComponentEvent::Error { error: error.clone() });
        return Err(error);
    }
    let _ = inner
        .adapter
        .completion()
        .wait_any(stagewire_core::adapter::completion::PORT_ENABLE, None);
    let unloaded = inner.current_state().is_unloaded();
    let bounded = matches!(selector, PortSelector::Index(_));
    let mut first_failure = Ok(());
    for index in affected {
        let slot = &inner.ports[index];
        if unloaded {
            // No buffer handshake outside the loaded pipeline.
            let mut port = slot.state.lock();
            port.enabled = true;
            port.transition = None;
            drop(port);
            inner.emit(ComponentEvent::CmdComplete {
                kind: CommandKind::PortEnable(PortSelector::Index(index as u32)),
            });
            continue;
        }
        let timeout = bounded.then_some(inner.config.port_transition_wait);
        let outcome = slot
            .events
            .wait_any(port_event::ALLOC | port_event::FAIL, timeout);
        match outcome {
            Ok(matched) if matched & port_event::FAIL == 0 => {
                let dio = {
                    let mut port = slot.state.lock();
                    port.enabled = true;
                    port.transition = None;
                    port.dio.as_ref().map(Arc::clone)
                };
                if inner.current_state() == ComponentState::Executing {
                    if let Some(dio) = dio {
                        let _ = dio.control(DioControl::Start);
                    }
                }
                inner.emit(ComponentEvent::CmdComplete {
                    kind: CommandKind::PortEnable(PortSelector::Index(index as u32)),
                });
            }
            _ => {
                let dio = {
                    let mut port = slot.state.lock();
                    port.transition = None;
                    port.reset_buffers()
                };
                if let Some(dio) = dio {
                    let _ = dio.close();
                }
                let error = ComponentError::UnresponsiveDuringAllocation { port: index as u32 };
                inner.emit(ComponentEvent::Error { error: error.clone() });
                if first_failure.is_ok() {
                    first_failure = Err(error);
                }
            }
        }
    }
    first_failure
}

fn handle_port_disable(inner: &Arc<ComponentInner>, selector: PortSelector) -> CoreResult<()> {
    let affected = transitioning_ports(inner, PortTransition::Disabling);
    if let Err(error) = inner.adapter.notify(Notification::PortDisable(selector)) {
        for index in affected {
            inner.ports[index].state.lock().transition = None;
        }
        inner.emit(ComponentEvent::Error { error: error.clone() });
        return Err(error);
    }
    let _ = inner
        .adapter
        .completion()
        .wait_any(stagewire_core::adapter::completion::PORT_DISABLE, None);
    let state = inner.current_state();
    let bounded = matches!(selector, PortSelector::Index(_));
    let mut first_failure = Ok(());
    for index in affected {
        let slot = &inner.ports[index];
        let (has_buffers, dio) = {
            let port = slot.state.lock();
            (port.buffer_count() > 0, port.dio.as_ref().map(Arc::clone))
        };
        if !has_buffers {
            let mut port = slot.state.lock();
            port.enabled = false;
            port.transition = None;
            drop(port);
            inner.emit(ComponentEvent::CmdComplete {
                kind: CommandKind::PortDisable(PortSelector::Index(index as u32)),
            });
            continue;
        }
        // Return in-flight buffers so the host can free the pool.
        if matches!(state, ComponentState::Executing | ComponentState::Pause) {
            if let Some(dio) = &dio {
                let _ = dio.control(DioControl::Stop);
            }
        }
        let timeout = bounded.then_some(inner.config.port_transition_wait);
        let outcome = slot
            .events
            .wait_any(port_event::FREE | port_event::FAIL, timeout);
        match outcome {
            Ok(matched) if matched & port_event::FAIL == 0 => {
                let dio = {
                    let mut port = slot.state.lock();
                    port.enabled = false;
                    port.transition = None;
                    port.reset_buffers()
                };
                if let Some(dio) = dio {
                    let _ = dio.close();
                }
                inner.emit(ComponentEvent::CmdComplete {
                    kind: CommandKind::PortDisable(PortSelector::Index(index as u32)),
                });
            }
            _ => {
                // The port stays enabled so the host can retry or tear down.
                slot.state.lock().transition = None;
                let error = ComponentError::UnresponsiveDuringDeallocation { port: index as u32 };
                inner.emit(ComponentEvent::Error { error: error.clone() });
                if first_failure.is_ok() {
                    first_failure = Err(error);
                }
            }
        }
    }
    first_failure
}

fn transitioning_ports(inner: &Arc<ComponentInner>, transition: PortTransition) -> Vec<usize> {
    inner
        .ports
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.state.lock().transition == Some(transition))
        .map(|(index, _)| index)
        .collect()
}

fn handle_flush(inner: &Arc<ComponentInner>, selector: PortSelector) -> CoreResult<()> {
    if let Err(error) = inner.adapter.notify(Notification::Flush(selector)) {
        inner.emit(ComponentEvent::Error { error: error.clone() });
        return Err(error);
    }
    let _ = inner
        .adapter
        .completion()
        .wait_any(stagewire_core::adapter::completion::FLUSH, None);
    let mut first_failure = Ok(());
    for index in selector.resolve(inner.ports.len()) {
        let dio = inner.ports[index as usize]
            .state
            .lock()
            .dio
            .as_ref()
            .map(Arc::clone);
        if let Some(dio) = dio {
            if let Err(error) = dio.control(DioControl::Flush) {
                inner.emit(ComponentEvent::Error { error: error.clone() });
                if first_failure.is_ok() {
                    first_failure = Err(error);
                }
                continue;
            }
        }
        inner.emit(ComponentEvent::CmdComplete {
            kind: CommandKind::Flush(PortSelector::Index(index)),
        });
    }
    first_failure
}

fn handle_mark_buffer(inner: &Arc<ComponentInner>, port: u32) -> CoreResult<()> {
    // Lock-step with the command queue: this record owns exactly one
    // payload, pushed before the record itself.
    let Some(payload) = inner.payloads.pop_timeout(inner.config.payload_wait) else {
        warn!(name = %inner.config.name, port, "mark-buffer payload missing");
        inner.emit(ComponentEvent::Error { error: ComponentError::Undefined });
        return Err(ComponentError::Undefined);
    };
    if let Err(error) = inner.adapter.notify(Notification::MarkBuffer(payload)) {
        inner.emit(ComponentEvent::Error { error: error.clone() });
        return Err(error);
    }
    let _ = inner
        .adapter
        .completion()
        .wait_any(stagewire_core::adapter::completion::MARK_BUFFER, None);
    inner.emit(ComponentEvent::CmdComplete { kind: CommandKind::MarkBuffer(port) });
    Ok(())
}
