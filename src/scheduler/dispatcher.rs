//! Worker dispatcher.
//!
//! A [`Dispatcher`] runs one control loop per worker identity: it polls
//! the broker, hands each dequeued job to a concurrent handler bounded by
//! a semaphore of N permits, and drives the claimed submission through
//! execution to a terminal status. No path out of a claim leaves a
//! submission in Processing — the exception path force-writes
//! InternalError before the worker's heartbeat returns to idle.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::sandbox::{CodeExecutor, ExecutionRequest, SandboxError};
use crate::storage::{ClaimOutcome, StoreError, SubmissionStore};

use super::job::JobEnvelope;
use super::queue::{QueueBroker, QueueError, QueueEvent, WorkerPhase};

/// Errors raised while handling one claimed job. These never escape the
/// dispatcher; they are resolved into the submission's InternalError.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The submission vanished between dequeue and claim.
    #[error("Submission {0} not found")]
    SubmissionMissing(i64),
}

/// Configuration for a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Identity under which heartbeats are registered.
    pub worker_id: String,
    /// Maximum number of concurrently in-flight jobs.
    pub concurrency: usize,
    /// Idle sleep between empty polls.
    pub poll_interval: Duration,
    /// Backoff after an error escaping one poll iteration.
    pub error_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]),
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Long-running worker process with a bounded concurrency pool.
pub struct Dispatcher {
    inner: Arc<Inner>,
    pool: Arc<Semaphore>,
}

struct Inner {
    config: DispatcherConfig,
    broker: Arc<dyn QueueBroker>,
    store: Arc<dyn SubmissionStore>,
    executor: Arc<dyn CodeExecutor>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        broker: Arc<dyn QueueBroker>,
        store: Arc<dyn SubmissionStore>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.concurrency));
        Self {
            inner: Arc::new(Inner {
                config,
                broker,
                store,
                executor,
            }),
            pool,
        }
    }

    /// Runs the control loop until a shutdown signal arrives.
    ///
    /// On shutdown, new claims cease immediately; already-dispatched jobs
    /// run to completion and the heartbeat is deregistered on exit.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let worker_id = self.inner.config.worker_id.clone();
        info!(
            worker_id = %worker_id,
            concurrency = self.inner.config.concurrency,
            "Dispatcher started"
        );
        self.inner.heartbeat(WorkerPhase::Idle, None).await;

        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %worker_id, "Dispatcher received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.poll_once().await {
                Ok(true) => {
                    // Dispatched; loop immediately for the next job.
                }
                Ok(false) => {
                    tokio::time::sleep(self.inner.config.poll_interval).await;
                }
                Err(e) => {
                    // Transient by policy: back off and keep looping.
                    error!(worker_id = %worker_id, error = %e, "Dispatcher poll failed");
                    tokio::time::sleep(self.inner.config.error_backoff).await;
                }
            }
        }

        // Let in-flight handlers finish; no forced cancellation.
        let _ = self
            .pool
            .acquire_many(self.inner.config.concurrency as u32)
            .await;

        if let Err(e) = self.inner.broker.deregister_worker(&worker_id).await {
            warn!(worker_id = %worker_id, error = %e, "Failed to deregister worker");
        }
        info!(worker_id = %worker_id, "Dispatcher stopped");
    }

    /// Dequeues at most one job and hands it to a pooled handler.
    ///
    /// Returns true when a job was dispatched. Blocks while the pool is
    /// full, so dequeues never outrun capacity.
    async fn poll_once(&self) -> Result<bool, QueueError> {
        let Some(job) = self.inner.broker.dequeue().await? else {
            return Ok(false);
        };

        let permit = match self.pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The pool semaphore is never closed while the loop runs.
            Err(_) => return Ok(false),
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.handle_job(job).await;
            drop(permit);
        });

        Ok(true)
    }
}

impl Inner {
    /// Best-effort heartbeat update; failures are logged, never fatal.
    async fn heartbeat(&self, phase: WorkerPhase, current_submission: Option<i64>) {
        let metadata = serde_json::json!({ "concurrency": self.config.concurrency });
        if let Err(e) = self
            .broker
            .register_heartbeat(&self.config.worker_id, phase, current_submission, metadata)
            .await
        {
            warn!(worker_id = %self.config.worker_id, error = %e, "Failed to update heartbeat");
        }
    }

    /// Drives one job from claim to a terminal status.
    ///
    /// Every failure path ends in a terminal-status write (when the record
    /// still exists) and the heartbeat always returns to idle.
    async fn handle_job(&self, job: JobEnvelope) {
        info!(
            worker_id = %self.config.worker_id,
            job_id = %job.job_id,
            submission_id = job.submission_id,
            "Processing job"
        );
        self.heartbeat(WorkerPhase::Running, Some(job.submission_id))
            .await;

        if let Err(e) = self.run_job(&job).await {
            error!(
                submission_id = job.submission_id,
                error = %e,
                "Job handling failed"
            );
            match self
                .store
                .mark_internal_error(job.submission_id, &e.to_string())
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(
                    submission_id = job.submission_id,
                    "Submission missing or already terminal; nothing to mark"
                ),
                Err(store_err) => error!(
                    submission_id = job.submission_id,
                    error = %store_err,
                    "Failed to record internal error"
                ),
            }
        }

        self.heartbeat(WorkerPhase::Idle, None).await;
    }

    async fn run_job(&self, job: &JobEnvelope) -> Result<(), DispatcherError> {
        let submission = match self.store.claim(job.submission_id).await? {
            ClaimOutcome::Claimed(submission) => submission,
            ClaimOutcome::AlreadyTaken => {
                // Duplicate delivery; the claim guard already protected the
                // record, so this job is simply dropped.
                warn!(
                    submission_id = job.submission_id,
                    "Submission already claimed, skipping"
                );
                return Ok(());
            }
            ClaimOutcome::NotFound => {
                return Err(DispatcherError::SubmissionMissing(job.submission_id));
            }
        };

        let request = ExecutionRequest {
            source_code: submission.source_code.clone(),
            language_id: submission.language_id,
            stdin: submission.stdin.clone(),
            time_limit_secs: Some(submission.limits.time_limit_secs),
            memory_limit_mb: Some(submission.limits.memory_limit_mb),
        };

        let result = self.executor.execute(request).await?;
        self.store.finish(submission.id, &result).await?;

        info!(
            submission_id = submission.id,
            status = %result.status,
            success = result.success,
            "Submission finished"
        );

        let event = QueueEvent::new(
            "submission_finished",
            serde_json::json!({
                "submission_id": submission.id,
                "status": result.status.code(),
            }),
        );
        if let Err(e) = self.broker.publish_event(event).await {
            debug!(error = %e, "Failed to publish completion event");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionResult;
    use crate::scheduler::MemoryBroker;
    use crate::storage::MemoryStore;
    use crate::submission::{NewSubmission, ResourceLimits, Status};

    /// Scripted executor: succeeds with a canned result or fails.
    struct FakeExecutor {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CodeExecutor for FakeExecutor {
        async fn execute(
            &self,
            request: ExecutionRequest,
        ) -> Result<ExecutionResult, SandboxError> {
            if self.fail {
                return Err(SandboxError::UnsupportedLanguage(request.language_id));
            }
            Ok(ExecutionResult {
                status: Status::Accepted,
                success: true,
                exit_code: Some(0),
                stdout: Some("ok\n".to_string()),
                stderr: None,
                compile_output: None,
                wall_time: Some(0.01),
                cpu_time: Some(0.01),
                memory_peak_kb: Some(512),
                signal: None,
                error_message: None,
                language: Some("Python".to_string()),
            })
        }

        async fn is_available(&self) -> bool {
            !self.fail
        }
    }

    fn new_submission() -> NewSubmission {
        NewSubmission {
            source_code: "print('ok')".to_string(),
            language_id: 1,
            stdin: None,
            expected_output: None,
            limits: ResourceLimits {
                time_limit_secs: 5,
                memory_limit_mb: 128,
            },
        }
    }

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            worker_id: "worker-test".to_string(),
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
        }
    }

    struct Harness {
        broker: Arc<MemoryBroker>,
        store: Arc<MemoryStore>,
        inner: Arc<Inner>,
    }

    fn harness(fail: bool) -> Harness {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(MemoryStore::new());
        let inner = Arc::new(Inner {
            config: test_config(),
            broker: broker.clone() as Arc<dyn QueueBroker>,
            store: store.clone() as Arc<dyn SubmissionStore>,
            executor: Arc::new(FakeExecutor { fail }),
        });
        Harness {
            broker,
            store,
            inner,
        }
    }

    async fn worker_phase(broker: &MemoryBroker, worker_id: &str) -> Option<WorkerPhase> {
        broker
            .worker_snapshot()
            .await
            .expect("snapshot")
            .into_iter()
            .find(|beat| beat.worker_id == worker_id)
            .map(|beat| beat.phase)
    }

    #[tokio::test]
    async fn test_job_runs_to_accepted() {
        let h = harness(false);
        let sub = h.store.create(new_submission()).await.expect("create");
        let job = JobEnvelope::new(sub.id, 0);

        h.inner.handle_job(job).await;

        let record = h.store.get(sub.id).await.expect("get").expect("present");
        assert_eq!(record.status, Status::Accepted);
        assert_eq!(record.stdout.as_deref(), Some("ok\n"));
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
        assert_eq!(
            worker_phase(&h.broker, "worker-test").await,
            Some(WorkerPhase::Idle)
        );
    }

    #[tokio::test]
    async fn test_failed_handler_marks_internal_error_and_restores_idle() {
        let h = harness(true);
        let sub = h.store.create(new_submission()).await.expect("create");
        let job = JobEnvelope::new(sub.id, 0);

        h.inner.handle_job(job).await;

        let record = h.store.get(sub.id).await.expect("get").expect("present");
        assert_eq!(record.status, Status::InternalError);
        assert!(record
            .error_message
            .as_deref()
            .is_some_and(|m| !m.is_empty()));
        assert_eq!(
            worker_phase(&h.broker, "worker-test").await,
            Some(WorkerPhase::Idle)
        );
    }

    #[tokio::test]
    async fn test_missing_submission_is_logged_not_fatal() {
        let h = harness(false);
        let job = JobEnvelope::new(12345, 0);

        // Must not panic and must leave the heartbeat idle.
        h.inner.handle_job(job).await;
        assert_eq!(
            worker_phase(&h.broker, "worker-test").await,
            Some(WorkerPhase::Idle)
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_skipped() {
        let h = harness(false);
        let sub = h.store.create(new_submission()).await.expect("create");

        // First delivery wins the claim and finishes the record.
        h.inner.handle_job(JobEnvelope::new(sub.id, 0)).await;
        let first = h.store.get(sub.id).await.expect("get").expect("present");
        let finished_at = first.finished_at;

        // Second delivery of the same submission must change nothing.
        h.inner.handle_job(JobEnvelope::new(sub.id, 0)).await;
        let second = h.store.get(sub.id).await.expect("get").expect("present");
        assert_eq!(second.status, Status::Accepted);
        assert_eq!(second.finished_at, finished_at);
    }

    #[tokio::test]
    async fn test_completion_event_published() {
        let h = harness(false);
        let mut events = h.broker.subscribe_events();
        let sub = h.store.create(new_submission()).await.expect("create");

        h.inner.handle_job(JobEnvelope::new(sub.id, 0)).await;

        let event = events.recv().await.expect("event");
        assert_eq!(event.event_type, "submission_finished");
        assert_eq!(event.payload["submission_id"], sub.id);
    }

    #[tokio::test]
    async fn test_run_loop_processes_and_shuts_down() {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(
            test_config(),
            broker.clone() as Arc<dyn QueueBroker>,
            store.clone() as Arc<dyn SubmissionStore>,
            Arc::new(FakeExecutor { fail: false }),
        );

        let sub = store.create(new_submission()).await.expect("create");
        broker.enqueue(sub.id, 3).await.expect("enqueue");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(dispatcher.run(shutdown_rx));

        // Wait for the loop to drain the job.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = store.get(sub.id).await.expect("get").expect("present");
            if record.status.is_terminal() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).expect("send shutdown");
        handle.await.expect("dispatcher task joins");

        // Heartbeat deregistered on exit.
        assert!(worker_phase(&broker, "worker-test").await.is_none());
        let record = store.get(sub.id).await.expect("get").expect("present");
        assert_eq!(record.status, Status::Accepted);
    }
}
