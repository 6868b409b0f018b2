//! Command vocabulary shared by the runtime and the host contract.

use crate::state::ComponentState;

/// Target of a port-scoped command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelector {
    All,
    Index(u32),
}

impl PortSelector {
    /// Resolves the selector against a component with `count` ports.
    pub fn resolve(self, count: usize) -> Vec<u32> {
        match self {
            PortSelector::All => (0..count as u32).collect(),
            PortSelector::Index(index) => vec![index],
        }
    }
}

/// One host-issued, state-changing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    StateSet(ComponentState),
    PortEnable(PortSelector),
    PortDisable(PortSelector),
    Flush(PortSelector),
    /// Tag the next buffer on the given port; the owned payload rides the
    /// runtime's separate payload queue.
    MarkBuffer(u32),
}

/// Heap payload of a `MarkBuffer` command, deep-copied at `send_command`
/// time so the caller may free its own copy immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkPayload {
    /// Name of the component that should consume the mark.
    pub target: String,
    pub data: Vec<u8>,
}
