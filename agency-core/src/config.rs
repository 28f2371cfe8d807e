//! Agency configuration: load, validate, save.
//!
//! The YAML document ([`AgencyConfig`]) is read once at startup and turned
//! into a validated [`Agency`]: a role registry with disjoint ownership and an
//! acyclic dependency graph. Validation is all-or-nothing; any error aborts
//! the build and no partial registry or graph escapes.
//!
//! ```yaml
//! name: docs-site
//! roles:
//!   - name: research
//!     owned_paths: ["research/**"]
//!   - name: build
//!     owned_paths: ["src/**"]
//!     allowed_inputs: ["research/**"]
//! edges:
//!   - { from: research, to: build }
//! parallel_groups: []
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{ConfigError, GraphError};
use crate::graph::DependencyGraph;
use crate::ownership::{PathPattern, RoleRegistry};
use crate::types::{AgencyConfig, EdgeSpec, RoleName, RoleSpec, RuntimeSettings, ToolSource};

/// File name `agency init` writes and every command looks for by default.
pub const DEFAULT_CONFIG_FILE: &str = "agency.yaml";

// ---------------------------------------------------------------------------
// 1. Load / save
// ---------------------------------------------------------------------------

/// Read and parse the configuration at `path`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<AgencyConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically write `config` to `path`.
///
/// Write flow: serialize → `<name>.tmp` sibling → `rename`.
pub fn save_at(path: &Path, config: &AgencyConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Validated agency
// ---------------------------------------------------------------------------

/// A fully validated configuration.
#[derive(Debug, Clone)]
pub struct Agency {
    pub name: String,
    pub runtime: RuntimeSettings,
    pub registry: RoleRegistry,
    pub graph: DependencyGraph,
    roles: BTreeMap<RoleName, RoleSpec>,
    parallel_groups: Vec<Vec<RoleName>>,
}

impl Agency {
    /// Load `path` and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::build(load_at(path)?)
    }

    /// Validate a parsed configuration.
    pub fn build(config: AgencyConfig) -> Result<Self, ConfigError> {
        validate_agency_name(&config.name)?;

        let mut registry = RoleRegistry::new();
        let mut graph = DependencyGraph::new();
        let mut roles = BTreeMap::new();

        for role in config.roles {
            validate_role(&role)?;
            registry.register(role.name.clone(), role.owned_paths.as_slice())?;
            graph.add_node(role.name.clone());
            roles.insert(role.name.clone(), role);
        }

        for EdgeSpec { from, to } in &config.edges {
            graph.add_edge(from, to)?;
        }

        for group in &config.parallel_groups {
            validate_parallel_group(&graph, group)?;
        }

        Ok(Self {
            name: config.name,
            runtime: config.runtime,
            registry,
            graph,
            roles,
            parallel_groups: config.parallel_groups,
        })
    }

    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.get(name)
    }

    /// Declared roles in name order.
    pub fn roles(&self) -> impl Iterator<Item = &RoleSpec> {
        self.roles.values()
    }

    pub fn parallel_groups(&self) -> &[Vec<RoleName>] {
        &self.parallel_groups
    }

    /// Index of the declared parallel group containing `role`, if any.
    pub fn parallel_group_of(&self, role: &str) -> Option<usize> {
        self.parallel_groups
            .iter()
            .position(|group| group.iter().any(|r| r.as_str() == role))
    }
}

/// The agency name doubles as a directory name under the state root.
fn validate_agency_name(name: &str) -> Result<(), ConfigError> {
    let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if name.is_empty() || name.starts_with('.') || !name.chars().all(valid_char) {
        return Err(ConfigError::Invalid(format!(
            "agency name '{name}' must be non-empty and use only letters, digits, '-', '_' or '.'"
        )));
    }
    Ok(())
}

fn validate_role(role: &RoleSpec) -> Result<(), ConfigError> {
    let name = role.name.as_str();
    if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid(format!(
            "role name '{name}' must be non-empty and contain no whitespace"
        )));
    }
    for input in &role.allowed_inputs {
        PathPattern::parse(input)?;
    }
    if matches!(&role.command, Some(argv) if argv.is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "role '{name}' declares an empty command"
        )));
    }
    Ok(())
}

/// Every member of a parallel group must wait on exactly the same roles, so
/// that all of them become ready under the same completed set.
fn validate_parallel_group(
    graph: &DependencyGraph,
    group: &[RoleName],
) -> Result<(), ConfigError> {
    let mut expected: Option<(&RoleName, &BTreeSet<RoleName>)> = None;
    for member in group {
        let deps = graph.dependencies_of(member.as_str()).map_err(|_| {
            ConfigError::Graph(GraphError::UnknownRole {
                role: member.clone(),
            })
        })?;
        match expected {
            None => expected = Some((member, deps)),
            Some((first, first_deps)) if first_deps != deps => {
                return Err(ConfigError::ParallelGroupMismatch {
                    group: group.to_vec(),
                    reason: format!(
                        "'{first}' waits on [{}] but '{member}' waits on [{}]",
                        join(first_deps),
                        join(deps)
                    ),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn join(roles: &BTreeSet<RoleName>) -> String {
    roles
        .iter()
        .map(RoleName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// 3. Scaffold
// ---------------------------------------------------------------------------

/// The six-role starter agency written by `agency init`.
///
/// research → design → {build, tools, docs} → test, with the three middle
/// roles declared as one parallel group.
pub fn sample_config(name: &str) -> AgencyConfig {
    let tool = |name: &str, when: &str| ToolSource {
        name: name.to_string(),
        when_to_use: when.to_string(),
    };

    let mut research = RoleSpec::new("research", &["research/"]);
    research.description = Some("Collects API docs and prior art".into());
    research.output_format = Some("Markdown notes under research/".into());
    research.tools = vec![tool("web-search", "when a public API needs confirming")];

    let mut design = RoleSpec::new("design", &["design/"]);
    design.description = Some("Turns research into an architecture".into());
    design.allowed_inputs = vec!["research/**".into()];

    let mut build = RoleSpec::new("build", &["src/"]);
    build.allowed_inputs = vec!["design/**".into()];

    let mut tools = RoleSpec::new("tools", &["tools/"]);
    tools.allowed_inputs = vec!["design/**".into()];

    let mut docs = RoleSpec::new("docs", &["docs/"]);
    docs.allowed_inputs = vec!["design/**".into()];

    let mut test = RoleSpec::new("test", &["tests/"]);
    test.allowed_inputs = vec!["src/**".into(), "tools/**".into()];

    let edge = |from: &str, to: &str| EdgeSpec {
        from: from.into(),
        to: to.into(),
    };

    AgencyConfig {
        version: 1,
        name: name.to_string(),
        roles: vec![research, design, build, tools, docs, test],
        edges: vec![
            edge("research", "design"),
            edge("design", "build"),
            edge("design", "tools"),
            edge("design", "docs"),
            edge("build", "test"),
            edge("tools", "test"),
        ],
        parallel_groups: vec![vec!["build".into(), "tools".into(), "docs".into()]],
        runtime: RuntimeSettings::default(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
