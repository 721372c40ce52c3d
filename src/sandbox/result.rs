//! Engine report parsing and status translation.

use serde::{Deserialize, Serialize};

use crate::submission::{RuntimeErrorKind, Status};

/// Structured result printed by the sandbox engine on success.
///
/// Fields the engine omits deserialize to `None`; a missing exit code is
/// treated as a failure when computing [`ExecutionResult::success`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub compile_output: Option<String>,
    #[serde(default)]
    pub wall_time: Option<f64>,
    #[serde(default)]
    pub cpu_time: Option<f64>,
    #[serde(default)]
    pub memory_peak_kb: Option<i64>,
    #[serde(default)]
    pub signal: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Translation table from the engine's status vocabulary.
///
/// Kept as one explicit table so the mapping is auditable in a single
/// place. Unrecognized statuses fall through to `RuntimeError(Other)`.
const STATUS_TABLE: &[(&str, Status)] = &[
    ("TLE", Status::TimeLimitExceeded),
    (
        "Memory Limit Exceeded",
        Status::RuntimeError(RuntimeErrorKind::SegFault),
    ),
    ("Success", Status::Accepted),
    ("Runtime Error", Status::RuntimeError(RuntimeErrorKind::Other)),
    ("Compilation Error", Status::CompilationError),
];

/// Maps an engine status string onto the pipeline status set.
pub fn map_engine_status(engine_status: &str) -> Status {
    STATUS_TABLE
        .iter()
        .find(|(name, _)| *name == engine_status)
        .map(|(_, status)| *status)
        .unwrap_or(Status::RuntimeError(RuntimeErrorKind::Other))
}

/// Outcome of one adapter invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: Status,
    /// True only when the mapped status is Accepted *and* the engine
    /// reported exit code 0. The two are checked independently: an
    /// Accepted status with a disagreeing exit code is not a success.
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub wall_time: Option<f64>,
    pub cpu_time: Option<f64>,
    pub memory_peak_kb: Option<i64>,
    pub signal: Option<i32>,
    pub error_message: Option<String>,
    /// Name of the language the job ran as, when known.
    pub language: Option<String>,
}

impl ExecutionResult {
    /// Builds a result from a parsed engine report.
    pub fn from_report(report: EngineReport, language: &str) -> Self {
        let status = map_engine_status(report.status.as_deref().unwrap_or("Unknown"));
        let success = status == Status::Accepted && report.exit_code.unwrap_or(1) == 0;

        Self {
            status,
            success,
            exit_code: report.exit_code,
            stdout: report.stdout,
            stderr: report.stderr,
            compile_output: report.compile_output,
            wall_time: report.wall_time,
            cpu_time: report.cpu_time,
            memory_peak_kb: report.memory_peak_kb,
            signal: report.signal,
            error_message: report.error_message,
            language: Some(language.to_string()),
        }
    }

    /// A failed result with status InternalError and the given message.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::failed(Status::InternalError, message)
    }

    /// A failed result for an adapter-level wall-clock timeout.
    pub fn time_limit_exceeded(message: impl Into<String>) -> Self {
        Self::failed(Status::TimeLimitExceeded, message)
    }

    fn failed(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            exit_code: None,
            stdout: None,
            stderr: None,
            compile_output: None,
            wall_time: None,
            cpu_time: None,
            memory_peak_kb: None,
            signal: None,
            error_message: Some(message.into()),
            language: None,
        }
    }
}
