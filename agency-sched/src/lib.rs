//! # agency-sched
//!
//! Scheduler and audit trail for an agency run.
//!
//! Build a [`Scheduler`] from a validated [`agency_core::Agency`], call
//! [`Scheduler::tick`] to dispatch ready roles and
//! [`Scheduler::signal_completion`] as their reports come back. Every
//! transition lands in the [`AuditLog`], optionally mirrored to a JSON-lines
//! journal that [`Scheduler::resume`] can replay.

pub mod audit;
pub mod dispatch;
pub mod error;
pub mod scheduler;

pub use audit::{AuditLog, DelegationRecord, FailureReason, History, RecordEvent, Violation};
pub use error::{JournalError, SchedError};
pub use scheduler::{HeldRole, RoleView, Scheduler, TickOutcome};
