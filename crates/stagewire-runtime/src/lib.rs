//! The stagewire component runtime.
//!
//! Hosts construct a [`component::Component`] around a codec adapter and an
//! allocator, register callbacks, and drive it through the standardized
//! command/buffer surface. The runtime owns the state machine, the
//! asynchronous command queue, port and buffer lifecycle, and the DIO
//! strategies bound to each port.
//!
//! Host callbacks are delivered synchronously; a callback must not call
//! back into the component that raised it.

#![deny(clippy::wildcard_imports)]

mod command_queue;
pub mod component;
pub mod config;
pub mod params;
mod port;
mod tunnel;

pub use component::{Component, TunnelRequest};
pub use config::{ComponentConfig, TriggerMode};
