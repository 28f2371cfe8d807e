//! External worker processes.
//!
//! A role with a `command` is performed by spawning that argv in the
//! workspace directory. The delegation is written to stdin as one JSON line;
//! `AGENCY_ROLE` and `AGENCY_BRIEF` point the worker at its role and rendered
//! brief. The last non-empty stdout line must be the completion report.
//!
//! Every way a worker can go wrong (spawn error, non-zero exit, timeout,
//! garbage output) is folded into a `failed` report, so the coordinator only
//! ever sees reports.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use agency_core::types::{CompletionReport, RoleName, TaskDelegation};

/// How many characters of stderr/stdout to quote in a failure reason.
const PREVIEW_CHARS: usize = 400;

/// Everything needed to run one role's worker.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub role: RoleName,
    pub argv: Vec<String>,
    pub delegation: TaskDelegation,
    pub brief_path: Option<PathBuf>,
}

/// Run `launch` to completion and return the role's report.
pub async fn run_worker(
    launch: &WorkerLaunch,
    workdir: &Path,
    timeout: Option<Duration>,
) -> CompletionReport {
    let role = launch.role.clone();
    let fail = |reason: String| CompletionReport::failed(role.clone(), reason);

    let Some((program, args)) = launch.argv.split_first() else {
        return fail("worker command is empty".to_string());
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(workdir)
        .env("AGENCY_ROLE", launch.role.as_str())
        .kill_on_drop(true)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(brief) = &launch.brief_path {
        cmd.env("AGENCY_BRIEF", brief);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return fail(format!("could not start worker '{program}': {err}")),
    };

    let payload = match serde_json::to_vec(&launch.delegation) {
        Ok(mut bytes) => {
            bytes.push(b'\n');
            bytes
        }
        Err(err) => return fail(format!("could not encode delegation: {err}")),
    };
    if let Some(mut stdin) = child.stdin.take() {
        // A worker that never reads stdin closes the pipe early; that is fine.
        if let Err(err) = stdin.write_all(&payload).await {
            tracing::debug!(role = %launch.role, error = %err, "worker did not read delegation");
        }
        let _ = stdin.shutdown().await;
    }

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                return fail(format!("worker timed out after {}s", limit.as_secs()));
            }
        },
        None => child.wait_with_output().await,
    };
    let output = match output {
        Ok(output) => output,
        Err(err) => return fail(format!("waiting for worker failed: {err}")),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        tracing::debug!(role = %launch.role, stderr = %preview(&stderr), "worker stderr");
    }

    if !output.status.success() {
        return fail(format!(
            "worker exited with {}: {}",
            output.status,
            preview(stderr.trim())
        ));
    }

    match parse_report(&stdout) {
        Ok(report) if report.role == launch.role => report,
        Ok(report) => fail(format!(
            "worker reported for role '{}' instead of '{}'",
            report.role, launch.role
        )),
        Err(reason) => fail(reason),
    }
}

/// Parse the last non-empty stdout line as a [`CompletionReport`].
pub fn parse_report(stdout: &str) -> Result<CompletionReport, String> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| "worker produced no completion report".to_string())?;
    serde_json::from_str(line.trim())
        .map_err(|e| format!("unparsable completion report ({e}): {}", preview(line)))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_core::types::{Boundaries, ReportStatus, TaskStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn launch(argv: &[&str]) -> WorkerLaunch {
        WorkerLaunch {
            role: "build".into(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            delegation: TaskDelegation {
                role: "build".into(),
                objective: "build".into(),
                output_format: "files".into(),
                tools_and_sources: vec![],
                allowed_inputs: vec![],
                boundaries: Boundaries::default(),
                context: BTreeMap::new(),
                status: TaskStatus::Dispatched,
                attempt: 1,
                dispatched_at: Utc::now(),
            },
            brief_path: None,
        }
    }

    #[test]
    fn last_non_empty_line_is_the_report() {
        let out = "working...\n{\"role\":\"build\",\"status\":\"completed\",\"artifacts\":[\"src/a.rs\"]}\n\n";
        let report = parse_report(out).unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.artifacts, vec![PathBuf::from("src/a.rs")]);
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(parse_report("\n  \n").is_err());
    }

    #[tokio::test]
    async fn successful_worker_reports_completion() {
        let dir = TempDir::new().unwrap();
        let script = r#"read line; echo "got $AGENCY_ROLE" >&2; echo '{"role":"build","status":"completed","artifacts":["src/main.rs"],"summary":"ok"}'"#;
        let report = run_worker(&launch(&["sh", "-c", script]), dir.path(), None).await;
        assert_eq!(report.status, ReportStatus::Completed, "{report:?}");
        assert_eq!(report.summary, "ok");
    }

    #[tokio::test]
    async fn non_zero_exit_becomes_failed_report() {
        let dir = TempDir::new().unwrap();
        let report = run_worker(&launch(&["sh", "-c", "echo boom >&2; exit 3"]), dir.path(), None).await;
        assert_eq!(report.status, ReportStatus::Failed);
        let reason = report.failure_reason.unwrap();
        assert!(reason.contains("boom"), "{reason}");
    }

    #[tokio::test]
    async fn report_for_other_role_is_rejected() {
        let dir = TempDir::new().unwrap();
        let script = r#"echo '{"role":"docs","status":"completed"}'"#;
        let report = run_worker(&launch(&["sh", "-c", script]), dir.path(), None).await;
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.failure_reason.unwrap().contains("'docs'"));
    }

    #[tokio::test]
    async fn missing_program_becomes_failed_report() {
        let dir = TempDir::new().unwrap();
        let report = run_worker(&launch(&["definitely-not-a-real-binary-4821"]), dir.path(), None).await;
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.failure_reason.unwrap().contains("could not start worker"));
    }

    #[tokio::test]
    async fn slow_worker_times_out() {
        let dir = TempDir::new().unwrap();
        let report = run_worker(
            &launch(&["sh", "-c", "sleep 5"]),
            dir.path(),
            Some(Duration::from_millis(200)),
        )
        .await;
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.failure_reason.unwrap().contains("timed out"));
    }
}
