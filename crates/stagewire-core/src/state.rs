use crate::error::ComponentError;

/// Lifecycle state of a component.
///
/// `Invalid` is terminal except for full teardown; every other state is
/// reachable only along the legal edges checked by [`ComponentState::check_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
    Invalid,
}

impl ComponentState {
    /// Validates a requested transition from `self` to `target`.
    ///
    /// `current == target` fails with [`ComponentError::SameState`]; any
    /// state may move to `Invalid`; everything outside the legal-edge table
    /// fails with [`ComponentError::IncorrectStateTransition`].
    pub fn check_transition(self, target: ComponentState) -> Result<(), ComponentError> {
        use ComponentState::{Executing, Idle, Invalid, Loaded, Pause, WaitForResources};

        if self == target {
            return Err(ComponentError::SameState);
        }
        if target == Invalid {
            return Ok(());
        }
        let legal = matches!(
            (self, target),
            (Loaded, Idle)
                | (Idle, Loaded)
                | (Loaded, WaitForResources)
                | (WaitForResources, Loaded)
                | (WaitForResources, Idle)
                | (Idle, WaitForResources)
                | (Idle, Executing)
                | (Executing, Idle)
                | (Idle, Pause)
                | (Pause, Idle)
                | (Executing, Pause)
                | (Pause, Executing)
        );
        if legal {
            Ok(())
        } else {
            Err(ComponentError::IncorrectStateTransition)
        }
    }

    /// True for the two states in which a component holds no buffers.
    pub fn is_unloaded(self) -> bool {
        matches!(self, ComponentState::Loaded | ComponentState::WaitForResources)
    }
}
