//! Submission records and their lifecycle.
//!
//! A submission moves through a fixed finite-state lifecycle:
//!
//! ```text
//! Queued ──> Processing ──> {Accepted, WrongAnswer, TimeLimitExceeded,
//!                            CompilationError, RuntimeError(*),
//!                            InternalError, ExecFormatError}
//! ```
//!
//! Queued and Processing are the only non-terminal states. All transition
//! rules live in [`Status::can_transition`]; the durable store enforces
//! them with conditional updates so that a record never leaves a terminal
//! state, even under racing workers.

mod record;
mod status;

pub use record::{NewSubmission, ResourceLimits, Submission};
pub use status::{RuntimeErrorKind, Status};
