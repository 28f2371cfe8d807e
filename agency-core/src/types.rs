//! Domain types for agency configuration, delegations and completion reports.
//!
//! Artifact fields use `PathBuf`; ownership patterns stay as strings and are
//! parsed by [`crate::ownership::PathPattern`].
//! All types are serializable/deserializable via serde (YAML and JSON).

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed role identifier ("researcher", "builder", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleName(pub String);

impl RoleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RoleName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoleName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for RoleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a role's task delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Dispatched,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `completed` and `failed` are terminal; only `retry` leaves `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Dispatched => write!(f, "dispatched"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome a role reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Completed,
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Completed => write!(f, "completed"),
            ReportStatus::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Delegation descriptor and completion report
// ---------------------------------------------------------------------------

/// A tool or source a role may use, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSource {
    pub name: String,
    pub when_to_use: String,
}

/// What a delegated role owns, must leave alone, and waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Boundaries {
    #[serde(default)]
    pub owns: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<RoleName>,
}

/// Structured request handed to a role when it is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDelegation {
    pub role: RoleName,
    pub objective: String,
    #[serde(alias = "output_contract")]
    pub output_format: String,
    #[serde(default)]
    pub tools_and_sources: Vec<ToolSource>,
    /// Paths or artifacts the role may read, typically upstream outputs.
    #[serde(default)]
    pub allowed_inputs: Vec<String>,
    pub boundaries: Boundaries,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub status: TaskStatus,
    /// 1-based dispatch counter; grows with every retry.
    pub attempt: u32,
    pub dispatched_at: DateTime<Utc>,
}

/// The single report a dispatched role sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub role: RoleName,
    pub status: ReportStatus,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl CompletionReport {
    pub fn completed(
        role: impl Into<RoleName>,
        artifacts: Vec<PathBuf>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            status: ReportStatus::Completed,
            artifacts,
            summary: summary.into(),
            failure_reason: None,
        }
    }

    pub fn failed(role: impl Into<RoleName>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            role: role.into(),
            status: ReportStatus::Failed,
            artifacts: vec![],
            summary: String::new(),
            failure_reason: Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration documents
// ---------------------------------------------------------------------------

/// A role as declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: RoleName,
    #[serde(default)]
    pub owned_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    /// argv of an external worker process that performs this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl RoleSpec {
    /// A role with only a name and owned paths.
    pub fn new(name: impl Into<RoleName>, owned_paths: &[&str]) -> Self {
        Self {
            name: name.into(),
            owned_paths: owned_paths.iter().map(|p| (*p).to_string()).collect(),
            description: None,
            objective: None,
            output_format: None,
            allowed_inputs: vec![],
            tools: vec![],
            context: BTreeMap::new(),
            command: None,
        }
    }
}

/// `to` cannot start until `from` signals completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: RoleName,
    pub to: RoleName,
}

/// Coordinator behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Tick automatically after startup and after every state change.
    #[serde(default = "default_auto_tick")]
    pub auto_tick: bool,
    /// Kill an external worker that runs longer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_timeout_secs: Option<u64>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            auto_tick: true,
            worker_timeout_secs: None,
        }
    }
}

fn default_auto_tick() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

/// Root of the agency YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub parallel_groups: Vec<Vec<RoleName>>,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_name_display() {
        assert_eq!(RoleName::from("builder").to_string(), "builder");
    }

    #[test]
    fn status_display_and_terminality() {
        assert_eq!(TaskStatus::Dispatched.to_string(), "dispatched");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn config_defaults_fill_in() {
        let yaml = "name: tiny\nroles:\n  - name: research\n    owned_paths: [\"research/**\"]\n";
        let cfg: AgencyConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cfg.version, 1);
        assert!(cfg.edges.is_empty());
        assert!(cfg.runtime.auto_tick);
        assert_eq!(cfg.roles[0].name, RoleName::from("research"));
    }

    #[test]
    fn output_contract_alias_is_accepted() {
        let yaml = r#"
role: builder
objective: build it
output_contract: src/**
boundaries: {}
status: pending
attempt: 1
dispatched_at: 2024-01-01T00:00:00Z
"#;
        let d: TaskDelegation = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(d.output_format, "src/**");
    }

    #[test]
    fn failed_report_serializes_null_reason_when_completed() {
        let report = CompletionReport::completed("builder", vec![], "done");
        let yaml = serde_yaml::to_string(&report).expect("serialize");
        assert!(yaml.contains("failure_reason: null"));
    }
}
