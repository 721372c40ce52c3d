//! Priority queues and worker dispatch.
//!
//! This module owns the coordination side of the pipeline:
//!
//! - **QueueBroker**: priority-partitioned FIFO queues, a worker liveness
//!   registry and a best-effort event channel ([`RedisBroker`] in
//!   production, [`MemoryBroker`] in-process)
//! - **JobEnvelope**: the transient queue record linking a submission to
//!   a priority
//! - **Dispatcher**: the long-running control loop with a bounded
//!   concurrency pool
//!
//! # Architecture
//!
//! ```text
//!   submit ──> [priority 9] ─┐
//!              [priority …] ─┼── dequeue ──> Dispatcher ──> sandbox engine
//!              [priority 0] ─┘  (atomic pop)     │
//!                                                └──> submission store
//! ```
//!
//! The broker's single-key atomic pop is the only anti-double-claim
//! mechanism between racing dispatchers; the store's conditional claim
//! update closes the remaining race at the record level.

pub mod dispatcher;
pub mod job;
pub mod memory;
pub mod queue;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherError};
pub use job::JobEnvelope;
pub use memory::MemoryBroker;
pub use queue::{
    HeartbeatPolicy, QueueBroker, QueueError, QueueEvent, RedisBroker, WorkerHeartbeat,
    WorkerPhase, PRIORITY_LEVELS,
};
