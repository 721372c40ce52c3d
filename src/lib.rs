//! codejudge: Code-execution job pipeline.
//!
//! This library queues code submissions by priority, dispatches them to
//! bounded-concurrency workers, executes them through an external sandbox
//! engine, and persists each submission's lifecycle.

// Core modules
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod sandbox;
pub mod scheduler;
pub mod storage;
pub mod submission;

// Re-export the main entry points
pub use config::Settings;
pub use pipeline::{ExecuteError, JudgePipeline, SubmitError, SubmitRequest};
pub use submission::{Status, Submission};
