//! `agency status` and `agency history` — run visibility.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use agency_daemon::DaemonRequest;

use super::control::execute;
use super::{paint_status, print_json};

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RoleRow {
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "attempt")]
    attempt: u64,
    #[tabled(rename = "waiting on")]
    waiting_on: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl StatusArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let data = execute(config, DaemonRequest::new("status"))?;
        if self.json {
            return print_json(&data);
        }

        let daemon = if data["daemon"]["running"] == Value::Bool(true) {
            format!("daemon running (pid {})", data["daemon"]["pid"]).green()
        } else {
            "daemon not running".dimmed()
        };
        println!(
            "Agency: {}  ·  {} records  ·  {}",
            data["agency"].as_str().unwrap_or("?").bold(),
            data["records"],
            daemon
        );

        let rows: Vec<RoleRow> = data["roles"]
            .as_array()
            .into_iter()
            .flatten()
            .map(role_row)
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));

        if data["complete"] == Value::Bool(true) {
            println!("{}", "✓ every role completed".green());
        } else if data["finished"] == Value::Bool(true) {
            println!(
                "{}",
                "run is stalled: retry or cancel failed roles to continue".yellow()
            );
        }
        Ok(())
    }
}

fn role_row(view: &Value) -> RoleRow {
    let status = view["status"].as_str().unwrap_or("?");
    let blocked = view["blocked"] == Value::Bool(true);
    let status_cell = if blocked {
        format!("{} (blocked)", status).yellow().to_string()
    } else {
        paint_status(status).to_string()
    };

    let waiting_on = strings(&view["waiting_on"]).join(", ");
    let detail = match status {
        "failed" => failure_text(&view["failure"]),
        "completed" => strings(&view["artifacts"]).join(", "),
        _ => String::new(),
    };

    RoleRow {
        role: view["role"].as_str().unwrap_or("?").to_string(),
        status: status_cell,
        attempt: view["attempt"].as_u64().unwrap_or(0),
        waiting_on,
        detail,
    }
}

/// Human form of a serialized failure reason.
fn failure_text(failure: &Value) -> String {
    match failure["kind"].as_str() {
        Some("reported") => failure["message"].as_str().unwrap_or_default().to_string(),
        Some("ownership_violation") => {
            let paths: Vec<&str> = failure["violations"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v["path"].as_str())
                .collect();
            format!("ownership violation: {}", paths.join(", "))
        }
        Some("cancelled") => match failure["note"].as_str() {
            Some(note) => format!("cancelled: {note}"),
            None => "cancelled".to_string(),
        },
        _ => String::new(),
    }
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Only this role's records.
    pub role: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "seq")]
    seq: u64,
    #[tabled(rename = "at")]
    at: String,
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "attempt")]
    attempt: u64,
    #[tabled(rename = "event")]
    event: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl HistoryArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let mut req = DaemonRequest::new("history");
        req.role = self.role;
        let data = execute(config, req)?;
        if self.json {
            return print_json(&data);
        }

        let rows: Vec<RecordRow> = data["records"]
            .as_array()
            .into_iter()
            .flatten()
            .map(record_row)
            .collect();
        if rows.is_empty() {
            println!("no records yet");
            return Ok(());
        }
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}

fn record_row(record: &Value) -> RecordRow {
    let event = record["event"].as_str().unwrap_or("?");
    let detail = match event {
        "completed" => {
            let artifacts = strings(&record["report"]["artifacts"]);
            let summary = record["report"]["summary"].as_str().unwrap_or_default();
            match (artifacts.is_empty(), summary.is_empty()) {
                (false, true) => artifacts.join(", "),
                (true, _) => summary.to_string(),
                (false, false) => format!("{} — {}", artifacts.join(", "), summary),
            }
        }
        "failed" => failure_text(&record["reason"]),
        "cancelled" => record["note"].as_str().unwrap_or_default().to_string(),
        _ => String::new(),
    };
    let at = record["at"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    RecordRow {
        seq: record["seq"].as_u64().unwrap_or(0),
        at,
        role: record["role"].as_str().unwrap_or("?").to_string(),
        attempt: record["attempt"].as_u64().unwrap_or(0),
        event: paint_status(event).to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_reasons_read_naturally() {
        assert_eq!(
            failure_text(&json!({"kind": "reported", "message": "no network"})),
            "no network"
        );
        assert_eq!(
            failure_text(&json!({"kind": "cancelled", "note": null})),
            "cancelled"
        );
        assert_eq!(
            failure_text(&json!({
                "kind": "ownership_violation",
                "violations": [{"path": "docs/a.md", "rejection": {"kind": "owned_by_other"}}]
            })),
            "ownership violation: docs/a.md"
        );
    }

    #[test]
    fn completed_record_shows_artifacts() {
        let row = record_row(&json!({
            "seq": 3,
            "at": "2026-01-02T03:04:05Z",
            "role": "build",
            "attempt": 1,
            "event": "completed",
            "report": {"role": "build", "status": "completed", "artifacts": ["src/lib.rs"], "summary": ""}
        }));
        assert_eq!(row.detail, "src/lib.rs");
        assert_eq!(row.at, "2026-01-02 03:04:05");
    }
}
