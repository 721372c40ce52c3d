//! Store trait and error types.

use async_trait::async_trait;
use thiserror::Error;

use crate::sandbox::ExecutionResult;
use crate::submission::{NewSubmission, Submission};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A persisted status code is outside the known enumeration.
    #[error("Unknown status code {0} in stored record")]
    UnknownStatusCode(i32),

    /// The requested lifecycle write is illegal for the record's current
    /// status (e.g. finishing a submission that is not Processing).
    #[error("Illegal lifecycle write for submission {0}")]
    IllegalTransition(i64),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),
}

/// Result of attempting to claim a submission for processing.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller won the claim; the record is now Processing.
    Claimed(Box<Submission>),
    /// Another worker already moved the record out of Queued.
    AlreadyTaken,
    /// No record with that id exists.
    NotFound,
}

/// Authoritative persistence for submission records.
///
/// `claim` must be an atomic conditional update against the durable store
/// (transition only if the current status is still Queued, verified by
/// rows affected), never an in-memory check.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Inserts a new record in the Queued state.
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    /// Fetches a record by id.
    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError>;

    /// Atomically transitions Queued → Processing and stamps `started_at`.
    async fn claim(&self, id: i64) -> Result<ClaimOutcome, StoreError>;

    /// Writes the execution outcome and transitions Processing → terminal,
    /// stamping `finished_at`. Fails with [`StoreError::IllegalTransition`]
    /// if the record is not currently Processing.
    async fn finish(&self, id: i64, result: &ExecutionResult) -> Result<(), StoreError>;

    /// Force-transitions a still-live record to InternalError with the
    /// given message. Returns false when the record is missing or already
    /// terminal; terminal records are never rewritten.
    async fn mark_internal_error(&self, id: i64, message: &str) -> Result<bool, StoreError>;
}
