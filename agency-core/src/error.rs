//! Error types for agency-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RoleName;

/// Errors raised while registering roles and their owned path patterns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A role with the same name is already registered.
    #[error("role '{role}' is already registered")]
    DuplicateRole { role: RoleName },

    /// Two roles claim patterns that match at least one common path.
    #[error(
        "ownership conflict: '{pattern}' of role '{role}' overlaps '{existing_pattern}' owned by '{existing_role}'"
    )]
    OwnershipConflict {
        role: RoleName,
        pattern: String,
        existing_role: RoleName,
        existing_pattern: String,
    },

    /// A path pattern could not be parsed.
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Errors raised while building the role dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Adding the edge would close a cycle. `path` lists the roles of the cycle
    /// starting and ending at `from`.
    #[error("dependency cycle: {}", format_cycle(.path))]
    Cycle {
        from: RoleName,
        to: RoleName,
        path: Vec<RoleName>,
    },

    /// An edge endpoint is not a registered role.
    #[error("unknown role '{role}'")]
    UnknownRole { role: RoleName },
}

/// All errors that can arise while loading an agency configuration.
///
/// Any of these aborts startup; no partially-built graph is ever returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration file did not exist at the expected path.
    #[error("configuration not found at {path}")]
    NotFound { path: PathBuf },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A parallel group names roles that do not share the same predecessors.
    #[error("parallel group [{}] is inconsistent: {reason}", join_roles(.group))]
    ParallelGroupMismatch {
        group: Vec<RoleName>,
        reason: String,
    },

    /// An `edges`/`parallel_groups` entry or role field is malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn format_cycle(path: &[RoleName]) -> String {
    path.iter()
        .map(|r| r.0.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn join_roles(roles: &[RoleName]) -> String {
    roles
        .iter()
        .map(|r| r.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = GraphError::Cycle {
            from: RoleName::from("b"),
            to: RoleName::from("a"),
            path: vec!["b".into(), "a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: b -> a -> b");
    }

    #[test]
    fn conflict_message_names_both_roles() {
        let err = RegistryError::OwnershipConflict {
            role: "extra".into(),
            pattern: "src/readme.md".into(),
            existing_role: "build".into(),
            existing_pattern: "src/**".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("extra"));
        assert!(msg.contains("build"));
        assert!(msg.contains("src/**"));
    }
}
