//! Error taxonomy shared by every stagewire layer.
//!
//! Hard failures travel as [`ComponentError`]. Soft outcomes that are
//! successful alternates rather than failures (a redundant port enable, a
//! pending codec attribute, end of stream) travel as [`Advisory`] on the
//! `Ok` side of the APIs that can produce them.

use thiserror::Error;

/// Hard failure codes returned by component entry points and mirrored to
/// the host through asynchronous `Error` events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    /// A call argument was malformed or out of the documented domain.
    #[error("bad parameter")]
    BadParameter,
    /// The port index does not exist on this component.
    #[error("bad port index {port}")]
    BadPortIndex { port: u32 },
    /// The operation is not legal in the current component or port state.
    #[error("incorrect state operation")]
    IncorrectStateOperation,
    /// The requested (current, target) state pair is outside the legal-edge table.
    #[error("incorrect state transition")]
    IncorrectStateTransition,
    /// The requested target state equals the current state.
    #[error("same state")]
    SameState,
    /// A bounded queue or pool had no capacity left.
    #[error("insufficient resources")]
    InsufficientResources,
    /// The component is in the terminal `Invalid` state.
    #[error("component is invalid")]
    InvalidState,
    /// A port's buffer-population handshake failed or expired.
    #[error("port {port} unresponsive during allocation")]
    UnresponsiveDuringAllocation { port: u32 },
    /// A port's buffer-release handshake failed or expired.
    #[error("port {port} unresponsive during deallocation")]
    UnresponsiveDuringDeallocation { port: u32 },
    /// A bounded teardown wait expired.
    #[error("timed out")]
    Timeout,
    /// A buffer was freed outside a legal release window; cleanup continues.
    #[error("port {port} unpopulated")]
    PortUnpopulated { port: u32 },
    /// Tunnel negotiation with the peer component failed.
    #[error("ports not compatible")]
    PortsNotCompatible,
    /// Unclassified internal failure.
    #[error("undefined error")]
    Undefined,
}

/// Successful alternate outcomes. These never travel the error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// The port was already enabled; the request was a no-op.
    AlreadyEnabled,
    /// The port was already disabled; the request was a no-op.
    AlreadyDisabled,
    /// A codec-config buffer is pending; no frame was delivered.
    AttributePending,
    /// The input port saw its end-of-stream marker and no frames remain.
    EndOfStreamReceived,
}

pub type CoreResult<T> = Result<T, ComponentError>;
