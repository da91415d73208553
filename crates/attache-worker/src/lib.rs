//! Attache Worker Library
//!
//! The asynchronous half of attachment processing: an in-process [`JobQueue`]
//! with priorities, leases and retry backoff, a [`WorkerPool`] that drains it
//! through the processor registry, and the [`ResultSink`] seam through which
//! results reach chat messages.

pub mod pool;
pub mod queue;
pub mod sink;

pub use pool::{WorkerPool, WorkerPoolConfig};
pub use queue::{
    compute_retry_backoff, Disposition, JobQueue, Lease, QueueConfig, QueueError, QueueSnapshot,
    ReclaimReport, Reservation,
};
pub use sink::{JobOutcome, RecordingSink, ResultPublisher, ResultSink, TracingResultSink};
