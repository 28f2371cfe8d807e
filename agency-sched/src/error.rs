//! Error types for agency-sched.

use std::path::PathBuf;

use thiserror::Error;

use agency_core::types::{RoleName, TaskStatus};

use crate::audit::Violation;

/// Errors returned by scheduler operations.
///
/// All of them are scoped to a single role; none leaves the scheduler in an
/// unusable state.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("unknown role '{role}'")]
    UnknownRole { role: RoleName },

    /// The role is not ready yet: `missing` lists unfinished predecessors or
    /// declared inputs no completed role has produced.
    #[error("role '{role}' is not ready: waiting on {}", .missing.join(", "))]
    DependencyNotSatisfied { role: RoleName, missing: Vec<String> },

    #[error("role '{role}' has already completed")]
    AlreadyCompleted { role: RoleName },

    #[error("cannot {action} role '{role}' while it is {from}")]
    InvalidTransition {
        role: RoleName,
        from: TaskStatus,
        action: &'static str,
    },

    /// A completion report listed artifacts the role does not own. The role
    /// has been moved to `failed`.
    #[error("role '{role}' reported {} artifact(s) outside its ownership: {}", .violations.len(), describe(.violations))]
    OwnershipViolation {
        role: RoleName,
        violations: Vec<Violation>,
    },

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Errors reading, writing or verifying the audit journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A journal line could not be parsed.
    #[error("malformed journal {path} at line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("journal serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The digest chain does not hold at record `seq`.
    #[error("journal integrity check failed at record {seq}: {reason}")]
    Tampered { seq: u64, reason: String },
}

/// Convenience constructor for [`JournalError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> JournalError {
    JournalError::Io {
        path: path.into(),
        source,
    }
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.rejection.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
