//! Data-I/O strategies for stagewire ports.
//!
//! Ships the non-tunneled strategy in full: a bounded FIFO between the
//! host-facing queue calls and the codec adapter's dequeue/send side, the
//! dup reference-count protocol for output buffers, and the extra-data
//! (out-of-band metadata) passes.

#![deny(clippy::wildcard_imports)]

mod extra;
mod fifo;
mod local;

pub use extra::{descriptor_for, found_bit, ExtraDataDescriptor};
pub use local::{DioConfig, LocalDataIo};
