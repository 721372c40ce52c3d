//! Embedded schema statements.
//!
//! Each statement is idempotent (IF NOT EXISTS) and applied through the
//! [`super::MigrationRunner`].

/// All schema statements, in application order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id BIGSERIAL PRIMARY KEY,
            source_code TEXT NOT NULL,
            language_id INTEGER NOT NULL,
            stdin TEXT,
            expected_output TEXT,
            status INTEGER NOT NULL DEFAULT 1,
            time_limit INTEGER NOT NULL,
            memory_limit INTEGER NOT NULL,
            stdout TEXT,
            stderr TEXT,
            compile_output TEXT,
            exit_code INTEGER,
            signal INTEGER,
            wall_time DOUBLE PRECISION,
            cpu_time DOUBLE PRECISION,
            memory_peak_kb BIGINT,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions (status)",
        "CREATE INDEX IF NOT EXISTS idx_submissions_created_at ON submissions (created_at)",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for statement in all_schema_statements() {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "statement must be idempotent: {statement}"
            );
        }
    }
}
