//! The pluggable data-I/O (DIO) strategy contract.
//!
//! A DIO object owns physical buffer transport for exactly one port. The
//! strategies form a small closed set: the non-tunneled queue (implemented
//! in `stagewire-dio`) and the tunneled variants delegated to the
//! [`crate::adapter::TunnelTransport`] collaborator.

use std::sync::Arc;

use crate::buffer::{BufferHeader, BufferRegion};
use crate::error::{Advisory, CoreResult};

/// Re-trigger hook a strategy fires when a completion makes data available
/// again (e.g. a dup count decaying to zero re-enqueues a buffer).
pub type DataTrigger = Arc<dyn Fn() + Send + Sync>;

/// Which side of this port owns physical buffer allocation. Recorded at
/// open time and never overwritten afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplierRole {
    Supplier,
    NonSupplier,
}

/// Outcome of a [`DataIo::dequeue`] call.
#[derive(Debug)]
pub enum DequeueOutcome {
    Delivered(BufferHeader),
    /// An input-side codec-config buffer was pushed back to the FIFO front;
    /// the caller should fetch the pending attribute instead.
    AttributePending,
}

/// FIFO depth plus the end-of-stream advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountReport {
    pub frames: usize,
    pub advisory: Option<Advisory>,
}

/// Out-of-band control operations on a strategy.
#[derive(Debug, Clone)]
pub enum DioControl {
    /// Resume buffer flow; re-triggers processing if the FIFO is non-empty.
    Start,
    /// Halt buffer flow and return every queued buffer to its owner.
    Stop,
    /// Return every queued buffer; output buffers get filled length reset.
    Flush,
    /// Fetch a pending codec-config blob by borrowing one FIFO slot.
    GetCtrlAttribute,
    /// Inject a codec-config blob by borrowing one FIFO slot.
    SetCtrlAttribute(Vec<u8>),
}

#[derive(Debug)]
pub enum ControlOutcome {
    Done,
    /// Result of `GetCtrlAttribute`.
    Attribute(Vec<u8>),
    /// `GetCtrlAttribute` found no codec-config buffer at the FIFO front.
    Pending,
}

/// Strategy-private utility operations.
#[derive(Debug)]
pub enum DioUtil {
    /// Lease the pooled header for `slot` (Allocate path; supplier side).
    AcquireHeader { slot: usize },
    /// Bind a host-supplied region to `slot` and lease its header
    /// (UseBuffer path; non-supplier side).
    AdoptRegion { slot: usize, region: BufferRegion },
    /// Return a leased header to the pool (FreeBuffer path).
    ReleaseHeader { slot: usize },
}

#[derive(Debug)]
pub enum UtilOutcome {
    Header(BufferHeader),
    Released,
}

/// One strategy instance, exclusively owned by its port and internally
/// synchronized: queue/dequeue/send/cancel on different buffers may run
/// from different callers concurrently.
pub trait DataIo: Send + Sync {
    /// Hands a buffer to the strategy. Output buffers run the dup
    /// reference-count protocol.
    fn queue(&self, header: BufferHeader) -> CoreResult<()>;

    /// Pops the oldest entry per the port's timeout policy and runs the
    /// extra-data pass for the caller.
    fn dequeue(&self) -> CoreResult<DequeueOutcome>;

    /// Mirrors the caller's header back onto the shared original and
    /// returns it through the direction-appropriate done-callback, unless
    /// an outstanding dup count withholds it.
    fn send(&self, header: BufferHeader) -> CoreResult<()>;

    /// Pushes the header back to the FIFO front without blocking.
    fn cancel(&self, header: BufferHeader) -> CoreResult<()>;

    /// Output ports only: shadow-copies the header and raises the
    /// per-buffer reference count.
    fn dup(&self, header: &BufferHeader) -> CoreResult<BufferHeader>;

    fn control(&self, op: DioControl) -> CoreResult<ControlOutcome>;

    fn util(&self, op: DioUtil) -> CoreResult<UtilOutcome>;

    fn get_count(&self) -> CoreResult<CountReport>;

    /// Releases pools and per-buffer locks; frees physical buffers only if
    /// this instance opened as the supplying side.
    fn close(&self) -> CoreResult<()>;
}
