//! Sandbox execution adapter.
//!
//! Wraps the external `rustbox` sandbox binary behind the [`CodeExecutor`]
//! trait. The engine is treated as opaque: this module only builds its
//! command-line invocation, bounds it with a wall-clock timeout, parses
//! the structured JSON report it prints, and maps the engine's status
//! vocabulary onto the pipeline's [`crate::submission::Status`] set.

mod languages;
mod result;
mod runner;

pub use languages::{language_by_id, LanguageSpec, LANGUAGES};
pub use result::{map_engine_status, EngineReport, ExecutionResult};
pub use runner::{
    CodeExecutor, ExecutionRequest, RustboxRunner, SandboxError, SelfTestReport,
};
