//! Tunnel setup and teardown for one port.
//!
//! The output side of a prospective tunnel only records the peer; the
//! input side drives supplier negotiation and transport establishment, so
//! a host wires the output endpoint first and the input endpoint second.

use std::sync::Arc;

use tracing::{info, warn};

use stagewire_core::error::{ComponentError, CoreResult};
use stagewire_core::port::{PortDirection, SupplierSetting};
use stagewire_core::state::ComponentState;

use crate::component::{ComponentInner, TunnelRequest};
use crate::port::TunnelLink;

pub(crate) fn tunnel_request(
    inner: &Arc<ComponentInner>,
    port_index: u32,
    request: Option<TunnelRequest>,
) -> CoreResult<SupplierSetting> {
    let slot = inner.port(port_index)?;
    {
        let port = slot.state.lock();
        if inner.current_state() != ComponentState::Loaded && port.enabled {
            return Err(ComponentError::IncorrectStateOperation);
        }
        if port.buffer_count() != 0 {
            return Err(ComponentError::IncorrectStateOperation);
        }
    }
    let Some(request) = request else {
        // Cancellation always resets the negotiated supplier outcome.
        let link = slot.state.lock().tunnel.take();
        if let Some(link) = link {
            if link.established {
                if let Some(transport) = transport_for(inner, &link.peer, link.peer_port) {
                    if let Err(error) = transport.teardown(port_index) {
                        warn!(port = port_index, %error, "tunnel teardown failed");
                    }
                }
            }
        }
        slot.state.lock().supplier_setting = SupplierSetting::Unspecified;
        return Ok(SupplierSetting::Unspecified);
    };

    let (direction, proposed) = {
        let port = slot.state.lock();
        if port.tunnel.is_some() {
            return Err(ComponentError::IncorrectStateOperation);
        }
        (port.definition.direction, port.supplier_setting)
    };
    match direction {
        PortDirection::Output => {
            // Record the peer and wait for the input side to negotiate.
            let mut port = slot.state.lock();
            port.tunnel = Some(TunnelLink {
                peer: request.peer,
                peer_port: request.peer_port,
                established: false,
            });
            Ok(port.supplier_setting)
        }
        PortDirection::Input => {
            let proposed = match proposed {
                SupplierSetting::Unspecified => SupplierSetting::Input,
                explicit => explicit,
            };
            let agreed = request
                .peer
                .negotiate_supplier(request.peer_port, proposed)
                .map_err(|_| ComponentError::PortsNotCompatible)?;
            let Some(transport) = transport_for(inner, &request.peer, request.peer_port) else {
                return Err(ComponentError::PortsNotCompatible);
            };
            transport
                .establish(port_index, &request.peer, request.peer_port, agreed)
                .map_err(|_| ComponentError::PortsNotCompatible)?;
            let mut port = slot.state.lock();
            port.supplier_setting = agreed;
            port.tunnel = Some(TunnelLink {
                peer: request.peer,
                peer_port: request.peer_port,
                established: true,
            });
            info!(
                name = %inner.config.name,
                port = port_index,
                peer_port = request.peer_port,
                ?agreed,
                "tunnel established"
            );
            Ok(agreed)
        }
    }
}

fn transport_for(
    inner: &Arc<ComponentInner>,
    peer: &Arc<dyn stagewire_core::adapter::TunnelPeer>,
    peer_port: u32,
) -> Option<Arc<dyn stagewire_core::adapter::TunnelTransport>> {
    let capability = peer.capability(peer_port);
    inner
        .transports
        .iter()
        .find(|transport| transport.capability() == capability)
        .map(Arc::clone)
}
