//! End-to-end scheduler scenarios over small agencies.

use std::collections::BTreeSet;
use std::path::PathBuf;

use agency_core::types::{AgencyConfig, CompletionReport, EdgeSpec, RoleName, RoleSpec, TaskStatus};
use agency_core::Agency;
use agency_sched::{FailureReason, SchedError, Scheduler};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn agency(roles: &[(&str, &[&str])], edges: &[(&str, &str)], groups: &[&[&str]]) -> Agency {
    let cfg = AgencyConfig {
        version: 1,
        name: "scenario".into(),
        roles: roles.iter().map(|(n, owned)| RoleSpec::new(*n, owned)).collect(),
        edges: edges
            .iter()
            .map(|(from, to)| EdgeSpec {
                from: (*from).into(),
                to: (*to).into(),
            })
            .collect(),
        parallel_groups: groups
            .iter()
            .map(|g| g.iter().map(|r| RoleName::from(*r)).collect())
            .collect(),
        runtime: Default::default(),
    };
    Agency::build(cfg).expect("valid agency")
}

fn names(roles: &[&str]) -> BTreeSet<RoleName> {
    roles.iter().map(|r| RoleName::from(*r)).collect()
}

fn done(role: &str, artifacts: &[&str]) -> CompletionReport {
    CompletionReport::completed(
        role,
        artifacts.iter().map(PathBuf::from).collect(),
        format!("{role} finished"),
    )
}

/// research → design → {build, write_docs}
fn pipeline() -> Scheduler {
    Scheduler::new(agency(
        &[
            ("research", &["research/"]),
            ("design", &["design/"]),
            ("build", &["src/**"]),
            ("write_docs", &["docs/**"]),
        ],
        &[("research", "design"), ("design", "build"), ("design", "write_docs")],
        &[&["build", "write_docs"]],
    ))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn lone_role_completes_and_nothing_follows() {
    let mut s = Scheduler::new(agency(&[("research", &["research/"])], &[], &[]));
    assert_eq!(s.tick().unwrap().dispatched_roles(), names(&["research"]));
    s.signal_completion(done("research", &["research/notes.md"]))
        .unwrap();
    assert!(s.tick().unwrap().dispatched.is_empty());
    assert!(s.is_complete());
    assert!(s.is_finished());
}

#[test]
fn dependent_is_dispatched_only_after_predecessor_completes() {
    let mut s = pipeline();
    let first = s.tick().unwrap();
    assert_eq!(first.dispatched_roles(), names(&["research"]));
    assert_eq!(s.status_of("design").unwrap(), TaskStatus::Pending);

    s.signal_completion(done("research", &["research/apis.md"]))
        .unwrap();
    let second = s.tick().unwrap();
    assert_eq!(second.dispatched_roles(), names(&["design"]));
    assert!(second.dispatched[0]
        .allowed_inputs
        .contains(&"research/apis.md".to_string()));
}

#[test]
fn parallel_group_dispatches_together() {
    let mut s = pipeline();
    s.tick().unwrap();
    s.signal_completion(done("research", &[])).unwrap();
    s.tick().unwrap();
    s.signal_completion(done("design", &["design/arch.md"]))
        .unwrap();

    let wave = s.tick().unwrap();
    assert_eq!(wave.dispatched_roles(), names(&["build", "write_docs"]));
    for delegation in &wave.dispatched {
        assert_eq!(delegation.boundaries.depends_on, vec![RoleName::from("design")]);
    }
}

#[test]
fn artifact_outside_ownership_fails_role_and_blocks_dependents() {
    let mut s = Scheduler::new(agency(
        &[("build", &["src/**"]), ("write_docs", &["docs/**"]), ("test", &["tests/**"])],
        &[("build", "test")],
        &[],
    ));
    s.tick().unwrap();

    let err = s
        .signal_completion(done("build", &["src/lib.rs", "docs/overview.md"]))
        .unwrap_err();
    match &err {
        SchedError::OwnershipViolation { role, violations } => {
            assert_eq!(role.as_str(), "build");
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].path, PathBuf::from("docs/overview.md"));
        }
        other => panic!("expected ownership violation, got {other}"),
    }
    assert_eq!(s.status_of("build").unwrap(), TaskStatus::Failed);
    assert_eq!(s.status_of("test").unwrap(), TaskStatus::Pending);
    assert_eq!(s.blocked(), names(&["test"]));

    // write_docs is independent and keeps going.
    s.signal_completion(done("write_docs", &["docs/overview.md"]))
        .unwrap();
    assert!(s.tick().unwrap().dispatched.is_empty());
    assert!(s.is_finished());
    assert!(!s.is_complete());

    let view = s.snapshot();
    let build = view.iter().find(|v| v.role.as_str() == "build").unwrap();
    assert!(matches!(
        build.failure,
        Some(FailureReason::OwnershipViolation { .. })
    ));
}

// ---------------------------------------------------------------------------
// Completion, cancel, retry
// ---------------------------------------------------------------------------

#[test]
fn second_completion_is_rejected_without_new_record() {
    let mut s = pipeline();
    s.tick().unwrap();
    s.signal_completion(done("research", &[])).unwrap();
    let records = s.log().len();

    let err = s.signal_completion(done("research", &[])).unwrap_err();
    assert!(matches!(err, SchedError::AlreadyCompleted { .. }));
    assert_eq!(s.log().len(), records);
    assert_eq!(s.history_for("research").count(), 2);
}

#[rstest]
#[case::pending("design", false)]
#[case::dispatched("research", true)]
fn cancel_moves_live_roles_to_failed(#[case] role: &str, #[case] dispatched: bool) {
    let mut s = pipeline();
    s.tick().unwrap();
    assert_eq!(
        s.status_of(role).unwrap() == TaskStatus::Dispatched,
        dispatched
    );

    s.cancel(role, Some("operator stop".into())).unwrap();
    assert_eq!(s.status_of(role).unwrap(), TaskStatus::Failed);
    let last = s.history_for(role).last().unwrap();
    assert_eq!(last.event.name(), "cancelled");
}

#[test]
fn cancel_completed_role_is_refused() {
    let mut s = pipeline();
    s.tick().unwrap();
    s.signal_completion(done("research", &[])).unwrap();
    assert!(matches!(
        s.cancel("research", None),
        Err(SchedError::AlreadyCompleted { .. })
    ));
}

#[test]
fn late_report_after_cancel_is_refused() {
    let mut s = pipeline();
    s.tick().unwrap();
    s.cancel("research", None).unwrap();
    assert!(matches!(
        s.signal_completion(done("research", &[])),
        Err(SchedError::InvalidTransition { from: TaskStatus::Failed, .. })
    ));
}

#[test]
fn retry_unblocks_subtree() {
    let mut s = pipeline();
    s.tick().unwrap();
    s.signal_completion(CompletionReport::failed("research", "rate limited"))
        .unwrap();
    assert_eq!(s.blocked(), names(&["design", "build", "write_docs"]));
    assert!(matches!(
        s.retry("design"),
        Err(SchedError::InvalidTransition { from: TaskStatus::Pending, .. })
    ));

    s.retry("research").unwrap();
    assert!(s.blocked().is_empty());
    let again = s.tick().unwrap();
    assert_eq!(again.dispatched_roles(), names(&["research"]));
    assert_eq!(again.dispatched[0].attempt, 2);
}

// ---------------------------------------------------------------------------
// Declared inputs
// ---------------------------------------------------------------------------

#[test]
fn role_is_held_until_declared_inputs_exist() {
    let mut cfg_roles = vec![
        RoleSpec::new("design", &["design/"]),
        RoleSpec::new("build", &["src/"]),
    ];
    cfg_roles[1].allowed_inputs = vec!["design/api.md".into()];
    let cfg = AgencyConfig {
        version: 1,
        name: "held".into(),
        roles: cfg_roles,
        edges: vec![EdgeSpec {
            from: "design".into(),
            to: "build".into(),
        }],
        parallel_groups: vec![],
        runtime: Default::default(),
    };
    let mut s = Scheduler::new(Agency::build(cfg).unwrap());

    s.tick().unwrap();
    s.signal_completion(done("design", &[])).unwrap();

    let outcome = s.tick().unwrap();
    assert!(outcome.dispatched.is_empty());
    assert_eq!(outcome.held.len(), 1);
    assert_eq!(outcome.held[0].missing, vec!["design/api.md"]);
    assert_eq!(s.status_of("build").unwrap(), TaskStatus::Pending);
    assert!(matches!(
        s.dispatch("build"),
        Err(SchedError::DependencyNotSatisfied { .. })
    ));
    assert!(s.is_finished());
}
