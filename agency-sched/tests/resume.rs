//! Journal persistence and resume-by-replay.

use std::path::PathBuf;

use agency_core::config::sample_config;
use agency_core::types::{CompletionReport, TaskStatus};
use agency_core::Agency;
use agency_sched::audit::load_journal;
use agency_sched::{AuditLog, JournalError, SchedError, Scheduler};
use tempfile::TempDir;

fn starter() -> Agency {
    Agency::build(sample_config("starter")).expect("valid")
}

#[test]
fn resumed_run_matches_interrupted_run() {
    let dir = TempDir::new().unwrap();
    let journal = dir.path().join("journal.jsonl");

    let before = {
        let mut s = Scheduler::resume(starter(), AuditLog::open(&journal).unwrap()).unwrap();
        s.tick().unwrap();
        s.signal_completion(CompletionReport::completed(
            "research",
            vec![PathBuf::from("research/apis.md")],
            "notes",
        ))
        .unwrap();
        s.tick().unwrap();
        s.snapshot()
    };

    let records = load_journal(&journal).unwrap();
    assert_eq!(records.len(), 3);

    let resumed = Scheduler::resume(starter(), AuditLog::open(&journal).unwrap()).unwrap();
    assert_eq!(resumed.snapshot(), before);
    assert_eq!(resumed.status_of("design").unwrap(), TaskStatus::Dispatched);
    assert_eq!(resumed.log().len(), 3, "replay must not append");
}

#[test]
fn resumed_run_keeps_appending_to_the_same_journal() {
    let dir = TempDir::new().unwrap();
    let journal = dir.path().join("journal.jsonl");
    {
        let mut s = Scheduler::resume(starter(), AuditLog::open(&journal).unwrap()).unwrap();
        s.tick().unwrap();
    }
    {
        let mut s = Scheduler::resume(starter(), AuditLog::open(&journal).unwrap()).unwrap();
        s.signal_completion(CompletionReport::completed("research", vec![], "ok"))
            .unwrap();
    }
    let log = AuditLog::open(&journal).unwrap();
    log.verify().unwrap();
    assert_eq!(log.len(), 2);
}

#[test]
fn tampered_journal_refuses_to_load() {
    let dir = TempDir::new().unwrap();
    let journal = dir.path().join("journal.jsonl");
    {
        let mut s = Scheduler::resume(starter(), AuditLog::open(&journal).unwrap()).unwrap();
        s.tick().unwrap();
        s.signal_completion(CompletionReport::failed("research", "offline"))
            .unwrap();
    }
    let text = std::fs::read_to_string(&journal).unwrap();
    std::fs::write(&journal, text.replace("offline", "success")).unwrap();

    let err = AuditLog::open(&journal).unwrap_err();
    assert!(matches!(err, JournalError::Tampered { seq: 1, .. }), "got {err}");
}

#[test]
fn journal_for_another_agency_is_rejected() {
    let dir = TempDir::new().unwrap();
    let journal = dir.path().join("journal.jsonl");
    {
        let mut log = AuditLog::open(&journal).unwrap();
        log.append("ghost".into(), 1, agency_sched::RecordEvent::Retried)
            .unwrap();
    }
    let err = Scheduler::resume(starter(), AuditLog::open(&journal).unwrap()).unwrap_err();
    assert!(matches!(err, SchedError::UnknownRole { .. }));
}
