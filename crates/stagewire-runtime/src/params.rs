//! Indexed parameter/config surface of a component.

use stagewire_core::port::{PortDefinition, SupplierSetting};

/// What a `get_parameter` call asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterIndex {
    PortDefinition(u32),
    SupplierSetting(u32),
}

/// A parameter value, tagged with the port it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    PortDefinition(PortDefinition),
    SupplierSetting { port: u32, setting: SupplierSetting },
}

/// What a `get_config`/`set_config` call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIndex {
    /// The out-of-band codec-config blob exchanged through one borrowed
    /// FIFO slot of the port's DIO.
    CtrlAttribute(u32),
}
