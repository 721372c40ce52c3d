//! Durable submission record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Status;

/// Resource limits applied to a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock limit in seconds.
    pub time_limit_secs: u32,
    /// Memory limit in megabytes.
    pub memory_limit_mb: u32,
}

/// Input for creating a new submission record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
    pub source_code: String,
    pub language_id: u32,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
    pub limits: ResourceLimits,
}

/// A durable submission record as persisted by the pipeline.
///
/// Output fields stay `None` until the record has left Queued;
/// `started_at` and `finished_at` are each written at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub source_code: String,
    pub language_id: u32,
    pub stdin: Option<String>,
    pub expected_output: Option<String>,
    pub status: Status,
    pub limits: ResourceLimits,

    // Output fields, populated when the submission reaches a terminal status.
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_time: Option<f64>,
    pub cpu_time: Option<f64>,
    pub memory_peak_kb: Option<i64>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Builds a fresh Queued record from creation input.
    ///
    /// The id is assigned by the store on insert; callers pass 0 here.
    pub fn queued(id: i64, new: NewSubmission) -> Self {
        Self {
            id,
            source_code: new.source_code,
            language_id: new.language_id,
            stdin: new.stdin,
            expected_output: new.expected_output,
            status: Status::Queued,
            limits: new.limits,
            stdout: None,
            stderr: None,
            compile_output: None,
            exit_code: None,
            signal: None,
            wall_time: None,
            cpu_time: None,
            memory_peak_kb: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_record_has_no_outputs() {
        let sub = Submission::queued(
            0,
            NewSubmission {
                source_code: "print(1)".to_string(),
                language_id: 1,
                stdin: None,
                expected_output: None,
                limits: ResourceLimits {
                    time_limit_secs: 10,
                    memory_limit_mb: 512,
                },
            },
        );

        assert_eq!(sub.status, Status::Queued);
        assert!(sub.stdout.is_none());
        assert!(sub.exit_code.is_none());
        assert!(sub.started_at.is_none());
        assert!(sub.finished_at.is_none());
    }
}
