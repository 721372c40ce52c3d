//! PostgreSQL submission store.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::sandbox::ExecutionResult;
use crate::submission::{NewSubmission, ResourceLimits, Status, Submission};

use super::migrations::MigrationRunner;
use super::store::{ClaimOutcome, StoreError, SubmissionStore};
use async_trait::async_trait;

const SUBMISSION_COLUMNS: &str = "id, source_code, language_id, stdin, expected_output, status, \
     time_limit, memory_limit, stdout, stderr, compile_output, exit_code, signal, \
     wall_time, cpu_time, memory_peak_kb, error_message, created_at, started_at, finished_at";

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database and returns a new store.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    fn row_to_submission(row: &sqlx::postgres::PgRow) -> Result<Submission, StoreError> {
        let status_code: i32 = row.get("status");
        let status =
            Status::from_code(status_code).ok_or(StoreError::UnknownStatusCode(status_code))?;

        let language_id: i32 = row.get("language_id");
        let time_limit: i32 = row.get("time_limit");
        let memory_limit: i32 = row.get("memory_limit");

        Ok(Submission {
            id: row.get("id"),
            source_code: row.get("source_code"),
            language_id: language_id as u32,
            stdin: row.get("stdin"),
            expected_output: row.get("expected_output"),
            status,
            limits: ResourceLimits {
                time_limit_secs: time_limit as u32,
                memory_limit_mb: memory_limit as u32,
            },
            stdout: row.get("stdout"),
            stderr: row.get("stderr"),
            compile_output: row.get("compile_output"),
            exit_code: row.get("exit_code"),
            signal: row.get("signal"),
            wall_time: row.get("wall_time"),
            cpu_time: row.get("cpu_time"),
            memory_peak_kb: row.get("memory_peak_kb"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
        })
    }
}

#[async_trait]
impl SubmissionStore for PgStore {
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let query = format!(
            "INSERT INTO submissions (source_code, language_id, stdin, expected_output, status, time_limit, memory_limit) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {SUBMISSION_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(&new.source_code)
            .bind(new.language_id as i32)
            .bind(&new.stdin)
            .bind(&new.expected_output)
            .bind(Status::Queued.code())
            .bind(new.limits.time_limit_secs as i32)
            .bind(new.limits.memory_limit_mb as i32)
            .fetch_one(&self.pool)
            .await?;

        let submission = Self::row_to_submission(&row)?;
        debug!(submission_id = submission.id, "Created submission");
        Ok(submission)
    }

    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError> {
        let query = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(Self::row_to_submission).transpose()
    }

    async fn claim(&self, id: i64) -> Result<ClaimOutcome, StoreError> {
        // Conditional update: only a record still in Queued can be claimed.
        // Racing claimers observe zero rows affected and lose.
        let query = format!(
            "UPDATE submissions SET status = $1, started_at = NOW() \
             WHERE id = $2 AND status = $3 RETURNING {SUBMISSION_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(Status::Processing.code())
            .bind(id)
            .bind(Status::Queued.code())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(ClaimOutcome::Claimed(Box::new(Self::row_to_submission(
                &row,
            )?)));
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM submissions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match exists {
            Some(_) => ClaimOutcome::AlreadyTaken,
            None => ClaimOutcome::NotFound,
        })
    }

    async fn finish(&self, id: i64, result: &ExecutionResult) -> Result<(), StoreError> {
        let outcome = sqlx::query(
            "UPDATE submissions SET status = $1, stdout = $2, stderr = $3, compile_output = $4, \
             exit_code = $5, signal = $6, wall_time = $7, cpu_time = $8, memory_peak_kb = $9, \
             error_message = $10, finished_at = NOW() \
             WHERE id = $11 AND status = $12",
        )
        .bind(result.status.code())
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(&result.compile_output)
        .bind(result.exit_code)
        .bind(result.signal)
        .bind(result.wall_time)
        .bind(result.cpu_time)
        .bind(result.memory_peak_kb)
        .bind(&result.error_message)
        .bind(id)
        .bind(Status::Processing.code())
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(StoreError::IllegalTransition(id));
        }
        Ok(())
    }

    async fn mark_internal_error(&self, id: i64, message: &str) -> Result<bool, StoreError> {
        // Force path: any still-live record (Queued or Processing) is moved
        // to InternalError. Terminal records are left untouched.
        let outcome = sqlx::query(
            "UPDATE submissions SET status = $1, error_message = $2, \
             started_at = COALESCE(started_at, NOW()), finished_at = NOW() \
             WHERE id = $3 AND (status = $4 OR status = $5)",
        )
        .bind(Status::InternalError.code())
        .bind(message)
        .bind(id)
        .bind(Status::Queued.code())
        .bind(Status::Processing.code())
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }
}
