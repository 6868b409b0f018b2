//! Host-facing events and the callback contract that receives them.

use crate::buffer::{BufferHeader, BufferId};
use crate::command::CommandKind;
use crate::error::ComponentError;

/// Asynchronous notifications delivered through [`HostCallbacks::event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEvent {
    /// Exactly one per accepted command, carrying the completed kind and
    /// its parameter.
    CmdComplete { kind: CommandKind },
    /// Mirror of a failure whose originating call may already have
    /// returned, including the forced-Invalid path.
    Error { error: ComponentError },
    /// A port's definition changed underneath the host.
    PortSettingsChanged { port: u32 },
    /// A dup reference count crossed the configured watermark.
    RefcountChanged { port: u32, buffer: BufferId, count: u32 },
    /// Component-defined event passthrough.
    Custom { id: u32, data: u64 },
}

/// Callbacks registered by the host. Buffer-done calls transfer header
/// ownership back to the host.
pub trait HostCallbacks: Send + Sync {
    fn event(&self, event: ComponentEvent);
    fn empty_buffer_done(&self, header: BufferHeader);
    fn fill_buffer_done(&self, header: BufferHeader);
}
