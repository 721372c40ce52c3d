//! Submission pipeline facade.
//!
//! [`JudgePipeline`] ties the broker, store, and sandbox adapter together
//! behind the operations callers use: submitting work, executing a
//! submission inline, and reading queue/worker state. Validation happens
//! here, before anything is persisted or enqueued; a rejected submission
//! leaves no trace.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::sandbox::{language_by_id, CodeExecutor, ExecutionRequest, ExecutionResult, SandboxError};
use crate::scheduler::{QueueBroker, QueueError, QueueEvent, WorkerHeartbeat};
use crate::storage::{ClaimOutcome, StoreError, SubmissionStore};
use crate::submission::{NewSubmission, ResourceLimits, Submission};

/// Errors rejecting a submission before it is persisted.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// No language with this id in the static table.
    #[error("Unknown language id: {0}")]
    UnknownLanguage(u32),

    /// Submission source is empty.
    #[error("Source code cannot be empty")]
    EmptySource,

    /// Requested limits exceed the configured maxima.
    #[error("Requested {field} {requested} exceeds maximum {max}")]
    LimitExceeded {
        field: &'static str,
        requested: u32,
        max: u32,
    },

    /// Requested limit is zero.
    #[error("Requested {field} must be greater than 0")]
    ZeroLimit { field: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from inline execution of a single submission.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Submission {0} not found")]
    NotFound(i64),

    /// The submission is already claimed or finished.
    #[error("Submission {0} is not queued")]
    NotQueued(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// An execution request as accepted from callers.
///
/// Limits are optional; absent values fall back to the configured
/// defaults before validation against the maxima.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub source_code: String,
    pub language_id: u32,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub time_limit_secs: Option<u32>,
    #[serde(default)]
    pub memory_limit_mb: Option<u32>,
}

/// The pipeline facade over broker, store, and sandbox adapter.
pub struct JudgePipeline {
    broker: Arc<dyn QueueBroker>,
    store: Arc<dyn SubmissionStore>,
    executor: Arc<dyn CodeExecutor>,
    default_limits: ResourceLimits,
    max_limits: ResourceLimits,
}

impl JudgePipeline {
    pub fn new(
        settings: &Settings,
        broker: Arc<dyn QueueBroker>,
        store: Arc<dyn SubmissionStore>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        Self {
            broker,
            store,
            executor,
            default_limits: settings.default_limits,
            max_limits: settings.max_limits,
        }
    }

    /// Validates, persists, and enqueues a submission.
    ///
    /// Ordering matters: the durable record is written first, so a crash
    /// between insert and enqueue leaves a Queued record that tooling can
    /// re-enqueue, never a queued job with no record.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        priority: u8,
    ) -> Result<Submission, SubmitError> {
        let new = self.validate(request)?;
        let language_id = new.language_id;

        let submission = self.store.create(new).await?;
        let job_id = self.broker.enqueue(submission.id, priority).await?;

        info!(
            submission_id = submission.id,
            language_id,
            priority,
            job_id = %job_id,
            "Submission enqueued"
        );
        self.publish(QueueEvent::new(
            "submission_created",
            serde_json::json!({
                "submission_id": submission.id,
                "priority": priority,
            }),
        ))
        .await;

        Ok(submission)
    }

    /// Submits a batch, validating each entry independently.
    ///
    /// One rejected entry does not fail the rest; callers get a result
    /// per entry in input order.
    pub async fn submit_batch(
        &self,
        requests: Vec<SubmitRequest>,
        priority: u8,
    ) -> Vec<Result<Submission, SubmitError>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.submit(request, priority).await);
        }
        results
    }

    /// Executes a queued submission inline, bypassing the queue.
    ///
    /// Goes through the same claim guard the dispatcher uses, so a
    /// submission cannot be executed twice even when a worker races this
    /// call. Adapter failures and failed outcome writes are recorded as
    /// InternalError before the error is returned, so the claimed record
    /// never stays in Processing.
    pub async fn execute_now(&self, submission_id: i64) -> Result<ExecutionResult, ExecuteError> {
        let submission = match self.store.claim(submission_id).await? {
            ClaimOutcome::Claimed(submission) => submission,
            ClaimOutcome::AlreadyTaken => return Err(ExecuteError::NotQueued(submission_id)),
            ClaimOutcome::NotFound => return Err(ExecuteError::NotFound(submission_id)),
        };

        let request = ExecutionRequest {
            source_code: submission.source_code.clone(),
            language_id: submission.language_id,
            stdin: submission.stdin.clone(),
            time_limit_secs: Some(submission.limits.time_limit_secs),
            memory_limit_mb: Some(submission.limits.memory_limit_mb),
        };

        let result = match self.executor.execute(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(submission_id, error = %e, "Inline execution failed");
                if let Err(store_err) = self
                    .store
                    .mark_internal_error(submission_id, &e.to_string())
                    .await
                {
                    error!(submission_id, error = %store_err, "Failed to record internal error");
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.finish(submission.id, &result).await {
            // The claim succeeded, so the record is Processing; it must
            // still land terminal even when the outcome write fails.
            error!(submission_id, error = %e, "Failed to persist execution outcome");
            if let Err(store_err) = self
                .store
                .mark_internal_error(submission_id, &e.to_string())
                .await
            {
                error!(submission_id, error = %store_err, "Failed to record internal error");
            }
            return Err(e.into());
        }
        info!(submission_id, status = %result.status, "Inline execution finished");

        self.publish(QueueEvent::new(
            "submission_finished",
            serde_json::json!({
                "submission_id": submission.id,
                "status": result.status.code(),
            }),
        ))
        .await;

        Ok(result)
    }

    /// Fetches a submission record.
    pub async fn get_submission(&self, id: i64) -> Result<Option<Submission>, StoreError> {
        self.store.get(id).await
    }

    /// Depth of a single priority partition.
    pub async fn queue_depth(&self, priority: u8) -> Result<usize, QueueError> {
        self.broker.queue_depth(priority).await
    }

    /// Total queued jobs across all partitions.
    pub async fn total_depth(&self) -> Result<usize, QueueError> {
        self.broker.total_depth().await
    }

    /// Workers seen within the liveness window.
    pub async fn live_worker_count(&self) -> Result<usize, QueueError> {
        self.broker.live_worker_count().await
    }

    /// All non-expired worker registry entries.
    pub async fn worker_snapshot(&self) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        self.broker.worker_snapshot().await
    }

    /// Wipes every queue partition. Returns the number of dropped jobs.
    ///
    /// Dropped jobs leave their submissions stuck in Queued; this is an
    /// operational tool, not part of the normal lifecycle.
    pub async fn clear_all_queues(&self) -> Result<usize, QueueError> {
        let dropped = self.broker.clear_all().await?;
        warn!(dropped, "Cleared all queue partitions");
        Ok(dropped)
    }

    /// Resolves limits and checks the request against the static language
    /// table and the configured maxima.
    fn validate(&self, request: SubmitRequest) -> Result<NewSubmission, SubmitError> {
        if request.source_code.trim().is_empty() {
            return Err(SubmitError::EmptySource);
        }

        if language_by_id(request.language_id).is_none() {
            return Err(SubmitError::UnknownLanguage(request.language_id));
        }

        let limits = ResourceLimits {
            time_limit_secs: request
                .time_limit_secs
                .unwrap_or(self.default_limits.time_limit_secs),
            memory_limit_mb: request
                .memory_limit_mb
                .unwrap_or(self.default_limits.memory_limit_mb),
        };

        if limits.time_limit_secs == 0 {
            return Err(SubmitError::ZeroLimit {
                field: "time limit",
            });
        }

        if limits.memory_limit_mb == 0 {
            return Err(SubmitError::ZeroLimit {
                field: "memory limit",
            });
        }

        if limits.time_limit_secs > self.max_limits.time_limit_secs {
            return Err(SubmitError::LimitExceeded {
                field: "time limit",
                requested: limits.time_limit_secs,
                max: self.max_limits.time_limit_secs,
            });
        }

        if limits.memory_limit_mb > self.max_limits.memory_limit_mb {
            return Err(SubmitError::LimitExceeded {
                field: "memory limit",
                requested: limits.memory_limit_mb,
                max: self.max_limits.memory_limit_mb,
            });
        }

        Ok(NewSubmission {
            source_code: request.source_code,
            language_id: request.language_id,
            stdin: request.stdin,
            expected_output: request.expected_output,
            limits,
        })
    }

    async fn publish(&self, event: QueueEvent) {
        if let Err(e) = self.broker.publish_event(event).await {
            debug!(error = %e, "Failed to publish event");
        }
    }
}
