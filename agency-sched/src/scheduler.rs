//! The scheduler — per-role state machine over a validated [`Agency`].
//!
//! ```text
//! pending ──dispatch──▶ dispatched ──report──▶ completed
//!    ▲                      │
//!    │                      └──report/violation/cancel──▶ failed
//!    └──────────────retry───────────────────────────────────┘
//! ```
//!
//! Every transition is first appended to the [`AuditLog`] and only then
//! applied, through the same [`Scheduler::apply`] path used by [`Scheduler::resume`]
//! to replay a journal. The in-memory state is therefore always a pure
//! function of the trail.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use agency_core::types::{CompletionReport, ReportStatus, RoleName, TaskDelegation, TaskStatus};
use agency_core::Agency;

use crate::audit::{AuditLog, DelegationRecord, FailureReason, History, RecordEvent, Violation};
use crate::dispatch::{build_delegation, missing_inputs};
use crate::error::SchedError;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct RoleState {
    status: TaskStatus,
    attempt: u32,
    delegation: Option<TaskDelegation>,
    artifacts: Vec<PathBuf>,
    failure: Option<FailureReason>,
}

/// Read-only view of one role, as returned by [`Scheduler::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleView {
    pub role: RoleName,
    pub status: TaskStatus,
    pub attempt: u32,
    pub artifacts: Vec<PathBuf>,
    pub failure: Option<FailureReason>,
    /// Direct predecessors that have not completed yet.
    pub waiting_on: Vec<RoleName>,
    /// Pending, with a failed role somewhere upstream.
    pub blocked: bool,
}

/// A ready role that was not dispatched because declared inputs are missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldRole {
    pub role: RoleName,
    pub missing: Vec<String>,
}

/// Result of [`Scheduler::tick`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickOutcome {
    pub dispatched: Vec<TaskDelegation>,
    pub held: Vec<HeldRole>,
    /// Why the tick stopped before visiting every candidate. Roles in
    /// `dispatched` are journaled regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<String>,
}

impl TickOutcome {
    /// Names of the roles dispatched by this tick.
    pub fn dispatched_roles(&self) -> BTreeSet<RoleName> {
        self.dispatched.iter().map(|d| d.role.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Single-writer coordinator for one agency run.
#[derive(Debug)]
pub struct Scheduler {
    agency: Agency,
    states: BTreeMap<RoleName, RoleState>,
    log: AuditLog,
}

impl Scheduler {
    /// A fresh run with every role pending and an in-memory audit log.
    pub fn new(agency: Agency) -> Self {
        let states = agency
            .roles()
            .map(|spec| (spec.name.clone(), RoleState::default()))
            .collect();
        Self {
            agency,
            states,
            log: AuditLog::new(),
        }
    }

    /// Rebuild a run by replaying `log` on top of a fresh scheduler.
    ///
    /// Replay applies records without appending; new transitions go to the
    /// same log (and its journal file, if any).
    pub fn resume(agency: Agency, log: AuditLog) -> Result<Self, SchedError> {
        let mut scheduler = Self::new(agency);
        for record in log.records() {
            scheduler.apply(record)?;
        }
        tracing::info!(
            agency = %scheduler.agency.name,
            records = log.len(),
            "resumed run from audit trail"
        );
        scheduler.log = log;
        Ok(scheduler)
    }

    pub fn agency(&self) -> &Agency {
        &self.agency
    }

    pub fn log(&self) -> &AuditLog {
        &self.log
    }

    /// Lazy, restartable history of `role`.
    pub fn history_for<'a>(&'a self, role: &'a str) -> History<'a> {
        self.log.history_for(role)
    }

    pub fn status_of(&self, role: &str) -> Result<TaskStatus, SchedError> {
        Ok(self.state(role)?.status)
    }

    /// The delegation of the role's current (or last) dispatch.
    pub fn delegation_of(&self, role: &str) -> Result<Option<&TaskDelegation>, SchedError> {
        Ok(self.state(role)?.delegation.as_ref())
    }

    /// Every role, in name order.
    pub fn snapshot(&self) -> Vec<RoleView> {
        let blocked = self.blocked();
        self.states
            .iter()
            .map(|(role, state)| RoleView {
                role: role.clone(),
                status: state.status,
                attempt: state.attempt,
                artifacts: state.artifacts.clone(),
                failure: state.failure.clone(),
                waiting_on: self.unfinished_dependencies(role),
                blocked: blocked.contains(role),
            })
            .collect()
    }

    /// Pending roles with a failed role among their transitive predecessors.
    pub fn blocked(&self) -> BTreeSet<RoleName> {
        let mut blocked = BTreeSet::new();
        for (role, state) in &self.states {
            if state.status != TaskStatus::Failed {
                continue;
            }
            if let Ok(downstream) = self.agency.graph.transitive_dependents_of(role.as_str()) {
                blocked.extend(
                    downstream
                        .into_iter()
                        .filter(|r| self.status_is(r.as_str(), TaskStatus::Pending)),
                );
            }
        }
        blocked
    }

    /// `true` when every role has completed.
    pub fn is_complete(&self) -> bool {
        self.states
            .values()
            .all(|s| s.status == TaskStatus::Completed)
    }

    /// `true` when no role is running and no tick could dispatch anything:
    /// the run either completed or is waiting on a `retry`.
    pub fn is_finished(&self) -> bool {
        let running = self
            .states
            .values()
            .any(|s| s.status == TaskStatus::Dispatched);
        !running
            && self
                .candidates()
                .iter()
                .all(|role| !self.inputs_missing(role).is_empty())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Dispatch every pending role whose predecessors have completed.
    ///
    /// Roles whose declared inputs were never produced stay pending and are
    /// reported in [`TickOutcome::held`].
    ///
    /// An error is returned only when nothing was dispatched. A failure after
    /// earlier roles were committed stops the tick and is reported in
    /// [`TickOutcome::interrupted`], so those roles still reach the caller.
    pub fn tick(&mut self) -> Result<TickOutcome, SchedError> {
        let mut outcome = TickOutcome::default();
        for role in self.candidates() {
            let missing = self.inputs_missing(&role);
            if !missing.is_empty() {
                tracing::warn!(role = %role, missing = ?missing, "holding role: inputs not produced");
                outcome.held.push(HeldRole { role, missing });
                continue;
            }
            match self.commit_dispatch(&role) {
                Ok(delegation) => outcome.dispatched.push(delegation),
                Err(err) if outcome.dispatched.is_empty() => return Err(err),
                Err(err) => {
                    tracing::error!(role = %role, error = %err, "tick interrupted");
                    outcome.interrupted = Some(err.to_string());
                    break;
                }
            }
        }
        if !outcome.dispatched.is_empty() {
            tracing::info!(
                roles = ?outcome.dispatched_roles(),
                "tick dispatched {} role(s)",
                outcome.dispatched.len()
            );
        }
        Ok(outcome)
    }

    /// Dispatch a single role explicitly.
    pub fn dispatch(&mut self, role: &str) -> Result<TaskDelegation, SchedError> {
        let role = self.known(role)?;
        match self.status_of(role.as_str())? {
            TaskStatus::Pending => {}
            TaskStatus::Completed => return Err(SchedError::AlreadyCompleted { role }),
            from => {
                return Err(SchedError::InvalidTransition {
                    role,
                    from,
                    action: "dispatch",
                })
            }
        }

        let mut missing: Vec<String> = self
            .unfinished_dependencies(&role)
            .into_iter()
            .map(|r| r.0)
            .collect();
        if missing.is_empty() {
            missing = self.inputs_missing(&role);
        }
        if !missing.is_empty() {
            return Err(SchedError::DependencyNotSatisfied { role, missing });
        }
        self.commit_dispatch(&role)
    }

    /// Accept the single report of a dispatched role.
    ///
    /// Returns the role's new status. A completed report listing an artifact
    /// the role does not own fails the role and returns
    /// [`SchedError::OwnershipViolation`].
    pub fn signal_completion(&mut self, report: CompletionReport) -> Result<TaskStatus, SchedError> {
        let role = self.known(report.role.as_str())?;
        match self.status_of(role.as_str())? {
            TaskStatus::Dispatched => {}
            TaskStatus::Completed => return Err(SchedError::AlreadyCompleted { role }),
            from => {
                return Err(SchedError::InvalidTransition {
                    role,
                    from,
                    action: "complete",
                })
            }
        }

        if report.status == ReportStatus::Failed {
            let message = report
                .failure_reason
                .clone()
                .unwrap_or_else(|| "no reason given".to_string());
            tracing::warn!(role = %role, reason = %message, "role reported failure");
            self.record(&role, RecordEvent::Failed {
                reason: FailureReason::Reported { message },
            })?;
            return Ok(TaskStatus::Failed);
        }

        let violations: Vec<Violation> = self
            .agency
            .registry
            .validate_artifacts(role.as_str(), &report.artifacts)
            .into_iter()
            .map(|(path, rejection)| Violation { path, rejection })
            .collect();
        if !violations.is_empty() {
            tracing::warn!(role = %role, count = violations.len(), "completion rejected: ownership violation");
            self.record(&role, RecordEvent::Failed {
                reason: FailureReason::OwnershipViolation {
                    violations: violations.clone(),
                },
            })?;
            return Err(SchedError::OwnershipViolation { role, violations });
        }

        tracing::info!(role = %role, artifacts = report.artifacts.len(), "role completed");
        self.record(&role, RecordEvent::Completed { report })?;
        Ok(TaskStatus::Completed)
    }

    /// Move a pending or dispatched role to `failed` with reason `cancelled`.
    pub fn cancel(&mut self, role: &str, note: Option<String>) -> Result<(), SchedError> {
        let role = self.known(role)?;
        match self.status_of(role.as_str())? {
            TaskStatus::Pending | TaskStatus::Dispatched => {}
            TaskStatus::Completed => return Err(SchedError::AlreadyCompleted { role }),
            from => {
                return Err(SchedError::InvalidTransition {
                    role,
                    from,
                    action: "cancel",
                })
            }
        }
        tracing::info!(role = %role, "role cancelled");
        self.record(&role, RecordEvent::Cancelled { note })?;
        Ok(())
    }

    /// `failed → pending`. Retrying is unbounded; the caller decides when to
    /// stop.
    pub fn retry(&mut self, role: &str) -> Result<(), SchedError> {
        let role = self.known(role)?;
        match self.status_of(role.as_str())? {
            TaskStatus::Failed => {}
            TaskStatus::Completed => return Err(SchedError::AlreadyCompleted { role }),
            from => {
                return Err(SchedError::InvalidTransition {
                    role,
                    from,
                    action: "retry",
                })
            }
        }
        tracing::info!(role = %role, "role re-queued");
        self.record(&role, RecordEvent::Retried)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn commit_dispatch(&mut self, role: &RoleName) -> Result<TaskDelegation, SchedError> {
        let spec = self
            .agency
            .role(role.as_str())
            .ok_or_else(|| SchedError::UnknownRole { role: role.clone() })?;
        let upstream: BTreeMap<RoleName, Vec<PathBuf>> = self
            .agency
            .graph
            .dependencies_of(role.as_str())
            .map_err(|_| SchedError::UnknownRole { role: role.clone() })?
            .iter()
            .map(|dep| {
                let artifacts = self
                    .states
                    .get(dep)
                    .map(|s| s.artifacts.clone())
                    .unwrap_or_default();
                (dep.clone(), artifacts)
            })
            .collect();
        let attempt = self.state(role.as_str())?.attempt + 1;
        let delegation = build_delegation(&self.agency, spec, &upstream, attempt, Utc::now());

        tracing::info!(role = %role, attempt, "dispatching role");
        self.record(role, RecordEvent::Dispatched {
            delegation: delegation.clone(),
        })?;
        Ok(delegation)
    }

    /// Append `event` to the trail, then apply it.
    fn record(&mut self, role: &RoleName, event: RecordEvent) -> Result<(), SchedError> {
        let attempt = match &event {
            RecordEvent::Dispatched { delegation } => delegation.attempt,
            _ => self.state(role.as_str())?.attempt,
        };
        let record = self.log.append(role.clone(), attempt, event)?.clone();
        self.apply(&record)
    }

    /// Apply one record to the in-memory state.
    fn apply(&mut self, record: &DelegationRecord) -> Result<(), SchedError> {
        let state = self
            .states
            .get_mut(&record.role)
            .ok_or_else(|| SchedError::UnknownRole {
                role: record.role.clone(),
            })?;
        match &record.event {
            RecordEvent::Dispatched { delegation } => {
                state.status = TaskStatus::Dispatched;
                state.attempt = record.attempt;
                state.delegation = Some(delegation.clone());
                state.artifacts.clear();
                state.failure = None;
            }
            RecordEvent::Completed { report } => {
                state.status = TaskStatus::Completed;
                state.artifacts = report.artifacts.clone();
            }
            RecordEvent::Failed { reason } => {
                state.status = TaskStatus::Failed;
                state.failure = Some(reason.clone());
            }
            RecordEvent::Cancelled { note } => {
                state.status = TaskStatus::Failed;
                state.failure = Some(FailureReason::Cancelled { note: note.clone() });
            }
            RecordEvent::Retried => {
                state.status = TaskStatus::Pending;
                state.failure = None;
                state.artifacts.clear();
            }
        }
        Ok(())
    }

    fn state(&self, role: &str) -> Result<&RoleState, SchedError> {
        self.states
            .get(role)
            .ok_or_else(|| SchedError::UnknownRole { role: role.into() })
    }

    fn known(&self, role: &str) -> Result<RoleName, SchedError> {
        self.states
            .get_key_value(role)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| SchedError::UnknownRole { role: role.into() })
    }

    fn status_is(&self, role: &str, status: TaskStatus) -> bool {
        self.states.get(role).is_some_and(|s| s.status == status)
    }

    fn completed(&self) -> BTreeSet<RoleName> {
        self.states
            .iter()
            .filter(|(_, s)| s.status == TaskStatus::Completed)
            .map(|(role, _)| role.clone())
            .collect()
    }

    /// Graph-ready roles that are still pending.
    fn candidates(&self) -> Vec<RoleName> {
        self.agency
            .graph
            .ready_set(&self.completed())
            .into_iter()
            .filter(|role| self.status_is(role.as_str(), TaskStatus::Pending))
            .collect()
    }

    fn unfinished_dependencies(&self, role: &RoleName) -> Vec<RoleName> {
        self.agency
            .graph
            .dependencies_of(role.as_str())
            .map(|deps| {
                deps.iter()
                    .filter(|d| !self.status_is(d.as_str(), TaskStatus::Completed))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn inputs_missing(&self, role: &RoleName) -> Vec<String> {
        let Some(spec) = self.agency.role(role.as_str()) else {
            return Vec::new();
        };
        let produced: Vec<&PathBuf> = self
            .states
            .values()
            .filter(|s| s.status == TaskStatus::Completed)
            .flat_map(|s| s.artifacts.iter())
            .collect();
        missing_inputs(&self.agency, spec, &produced)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agency_core::types::{AgencyConfig, EdgeSpec, RoleSpec, RuntimeSettings};

    fn chain() -> Scheduler {
        let cfg = AgencyConfig {
            version: 1,
            name: "chain".into(),
            roles: vec![
                RoleSpec::new("research", &["research/"]),
                RoleSpec::new("design", &["design/"]),
            ],
            edges: vec![EdgeSpec {
                from: "research".into(),
                to: "design".into(),
            }],
            parallel_groups: vec![],
            runtime: RuntimeSettings::default(),
        };
        Scheduler::new(Agency::build(cfg).unwrap())
    }

    #[test]
    fn dispatch_before_predecessor_is_not_ready() {
        let mut s = chain();
        let err = s.dispatch("design").unwrap_err();
        match err {
            SchedError::DependencyNotSatisfied { missing, .. } => assert_eq!(missing, vec!["research"]),
            other => panic!("unexpected {other}"),
        }
        assert_eq!(s.status_of("design").unwrap(), TaskStatus::Pending);
        assert!(s.log().is_empty());
    }

    #[test]
    fn second_tick_does_not_redispatch() {
        let mut s = chain();
        assert_eq!(s.tick().unwrap().dispatched.len(), 1);
        assert!(s.tick().unwrap().dispatched.is_empty());
        assert_eq!(s.log().len(), 1);
    }

    #[test]
    fn completion_requires_dispatch() {
        let mut s = chain();
        let err = s
            .signal_completion(CompletionReport::completed("research", vec![], "early"))
            .unwrap_err();
        assert!(matches!(
            err,
            SchedError::InvalidTransition { from: TaskStatus::Pending, .. }
        ));
    }

    #[test]
    fn unknown_role_is_reported() {
        let mut s = chain();
        assert!(matches!(s.retry("ghost"), Err(SchedError::UnknownRole { .. })));
        assert!(matches!(
            s.signal_completion(CompletionReport::failed("ghost", "x")),
            Err(SchedError::UnknownRole { .. })
        ));
    }

    #[test]
    fn attempts_grow_across_retries() {
        let mut s = chain();
        s.tick().unwrap();
        s.signal_completion(CompletionReport::failed("research", "flaky"))
            .unwrap();
        s.retry("research").unwrap();
        let again = s.tick().unwrap();
        assert_eq!(again.dispatched[0].attempt, 2);
        let events: Vec<&str> = s.history_for("research").map(|r| r.event.name()).collect();
        assert_eq!(events, vec!["dispatched", "failed", "retried", "dispatched"]);
    }

    fn three_roots() -> Scheduler {
        let cfg = AgencyConfig {
            version: 1,
            name: "roots".into(),
            roles: vec![
                RoleSpec::new("build", &["src/"]),
                RoleSpec::new("docs", &["docs/"]),
                RoleSpec::new("tools", &["tools/"]),
            ],
            edges: vec![],
            parallel_groups: vec![],
            runtime: RuntimeSettings::default(),
        };
        Scheduler::new(Agency::build(cfg).unwrap())
    }

    #[test]
    fn failed_write_mid_tick_keeps_committed_dispatches() {
        let mut s = three_roots();
        s.log.fail_writes_after(1);

        let outcome = s.tick().unwrap();
        assert_eq!(outcome.dispatched.len(), 1);
        assert!(outcome.interrupted.as_deref().unwrap().contains("journal write refused"));
        let first = outcome.dispatched[0].role.clone();
        assert_eq!(s.status_of(first.as_str()).unwrap(), TaskStatus::Dispatched);
        assert_eq!(s.log().len(), 1);
        let pending = s
            .snapshot()
            .into_iter()
            .filter(|v| v.status == TaskStatus::Pending)
            .count();
        assert_eq!(pending, 2);
    }

    #[test]
    fn failed_write_before_any_dispatch_is_an_error() {
        let mut s = three_roots();
        s.log.fail_writes_after(0);
        assert!(matches!(s.tick(), Err(SchedError::Journal(_))));
        assert!(s.log().is_empty());
    }
}
