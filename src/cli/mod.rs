//! Command-line interface for codejudge.
//!
//! Provides commands for running workers, submitting code, inline
//! execution, queue administration, and database migrations.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
