//! In-process submission store.
//!
//! Mirrors the PostgreSQL store's lifecycle guards over a `HashMap` so the
//! dispatcher and pipeline can be tested without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::sandbox::ExecutionResult;
use crate::submission::{NewSubmission, Status, Submission};

use super::store::{ClaimOutcome, StoreError, SubmissionStore};

/// Memory-backed store with the same transition guards as [`super::PgStore`].
pub struct MemoryStore {
    records: Mutex<HashMap<i64, Submission>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Submission>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let submission = Submission::queued(id, new);
        self.lock().insert(id, submission.clone());
        Ok(submission)
    }

    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn claim(&self, id: i64) -> Result<ClaimOutcome, StoreError> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        if record.status != Status::Queued {
            return Ok(ClaimOutcome::AlreadyTaken);
        }

        record.status = Status::Processing;
        record.started_at = Some(Utc::now());
        Ok(ClaimOutcome::Claimed(Box::new(record.clone())))
    }

    async fn finish(&self, id: i64, result: &ExecutionResult) -> Result<(), StoreError> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&id) else {
            return Err(StoreError::IllegalTransition(id));
        };
        if record.status != Status::Processing {
            return Err(StoreError::IllegalTransition(id));
        }

        record.status = result.status;
        record.stdout = result.stdout.clone();
        record.stderr = result.stderr.clone();
        record.compile_output = result.compile_output.clone();
        record.exit_code = result.exit_code;
        record.signal = result.signal;
        record.wall_time = result.wall_time;
        record.cpu_time = result.cpu_time;
        record.memory_peak_kb = result.memory_peak_kb;
        record.error_message = result.error_message.clone();
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_internal_error(&self, id: i64, message: &str) -> Result<bool, StoreError> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }

        record.status = Status::InternalError;
        record.error_message = Some(message.to_string());
        let now = Utc::now();
        record.started_at.get_or_insert(now);
        record.finished_at = Some(now);
        Ok(true)
    }
}
