//! Submission status enumeration and transition rules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Subkind of a runtime error, distinguishing the signal or exit condition
/// that terminated the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeErrorKind {
    /// Segmentation fault (SIGSEGV). Also used for memory-limit kills.
    SegFault,
    /// File size limit exceeded (SIGXFSZ).
    FileSizeViolation,
    /// Floating point exception (SIGFPE).
    Fpe,
    /// Abort (SIGABRT).
    Abort,
    /// Non-zero exit code without a recognized signal.
    NonZeroExit,
    /// Any other runtime failure.
    Other,
}

/// Status of a submission.
///
/// The numeric codes are a wire contract shared with external collaborators
/// and stored in the database; they must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Waiting in the broker; the only state a worker may claim from.
    Queued,
    /// Claimed by a worker and currently executing.
    Processing,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    CompilationError,
    RuntimeError(RuntimeErrorKind),
    InternalError,
    ExecFormatError,
}

impl Status {
    /// Returns the stable numeric code for this status.
    pub fn code(self) -> i32 {
        match self {
            Status::Queued => 1,
            Status::Processing => 2,
            Status::Accepted => 3,
            Status::WrongAnswer => 4,
            Status::TimeLimitExceeded => 5,
            Status::CompilationError => 6,
            Status::RuntimeError(RuntimeErrorKind::SegFault) => 7,
            Status::RuntimeError(RuntimeErrorKind::FileSizeViolation) => 8,
            Status::RuntimeError(RuntimeErrorKind::Fpe) => 9,
            Status::RuntimeError(RuntimeErrorKind::Abort) => 10,
            Status::RuntimeError(RuntimeErrorKind::NonZeroExit) => 11,
            Status::RuntimeError(RuntimeErrorKind::Other) => 12,
            Status::InternalError => 13,
            Status::ExecFormatError => 14,
        }
    }

    /// Looks up a status by its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            1 => Status::Queued,
            2 => Status::Processing,
            3 => Status::Accepted,
            4 => Status::WrongAnswer,
            5 => Status::TimeLimitExceeded,
            6 => Status::CompilationError,
            7 => Status::RuntimeError(RuntimeErrorKind::SegFault),
            8 => Status::RuntimeError(RuntimeErrorKind::FileSizeViolation),
            9 => Status::RuntimeError(RuntimeErrorKind::Fpe),
            10 => Status::RuntimeError(RuntimeErrorKind::Abort),
            11 => Status::RuntimeError(RuntimeErrorKind::NonZeroExit),
            12 => Status::RuntimeError(RuntimeErrorKind::Other),
            13 => Status::InternalError,
            14 => Status::ExecFormatError,
            _ => return None,
        };
        Some(status)
    }

    /// Returns true if no further transition may leave this status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Queued | Status::Processing)
    }

    /// Returns true if the transition `self -> to` is legal.
    ///
    /// Queued may only move to Processing (the claim), Processing may only
    /// move to a terminal status, and terminal statuses permit nothing.
    pub fn can_transition(self, to: Status) -> bool {
        match self {
            Status::Queued => to == Status::Processing,
            Status::Processing => to.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Queued => "In Queue",
            Status::Processing => "Processing",
            Status::Accepted => "Accepted",
            Status::WrongAnswer => "Wrong Answer",
            Status::TimeLimitExceeded => "Time Limit Exceeded",
            Status::CompilationError => "Compilation Error",
            Status::RuntimeError(RuntimeErrorKind::SegFault) => "Runtime Error (SIGSEGV)",
            Status::RuntimeError(RuntimeErrorKind::FileSizeViolation) => "Runtime Error (SIGXFSZ)",
            Status::RuntimeError(RuntimeErrorKind::Fpe) => "Runtime Error (SIGFPE)",
            Status::RuntimeError(RuntimeErrorKind::Abort) => "Runtime Error (SIGABRT)",
            Status::RuntimeError(RuntimeErrorKind::NonZeroExit) => "Runtime Error (NZEC)",
            Status::RuntimeError(RuntimeErrorKind::Other) => "Runtime Error (Other)",
            Status::InternalError => "Internal Error",
            Status::ExecFormatError => "Exec Format Error",
        };
        f.write_str(name)
    }
}
