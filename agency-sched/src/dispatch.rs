//! Build the [`TaskDelegation`] handed to a role when it is dispatched.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use agency_core::ownership::PathPattern;
use agency_core::types::{Boundaries, RoleName, RoleSpec, TaskDelegation, TaskStatus};
use agency_core::Agency;

/// Declared inputs that should have been produced by some role but match
/// none of the `produced` artifacts.
///
/// An input counts as "produced by some role" when its pattern overlaps a
/// claimed ownership pattern. Inputs nobody owns (vendored files, the repo
/// README, ...) are never checked.
pub fn missing_inputs(agency: &Agency, spec: &RoleSpec, produced: &[&PathBuf]) -> Vec<String> {
    spec.allowed_inputs
        .iter()
        .filter(|input| {
            // Patterns were validated when the agency was built.
            let Ok(pattern) = PathPattern::parse(input) else {
                return false;
            };
            let owned = agency.registry.roles().any(|role| {
                agency
                    .registry
                    .patterns_of(role.as_str())
                    .is_some_and(|claims| claims.iter().any(|c| c.overlaps(&pattern)))
            });
            owned && !produced.iter().any(|artifact| pattern.matches(artifact))
        })
        .cloned()
        .collect()
}

/// Assemble the delegation for `spec`.
///
/// `upstream` maps each direct predecessor to the artifacts it completed with;
/// they are appended to the declared inputs.
pub fn build_delegation(
    agency: &Agency,
    spec: &RoleSpec,
    upstream: &BTreeMap<RoleName, Vec<PathBuf>>,
    attempt: u32,
    now: DateTime<Utc>,
) -> TaskDelegation {
    let role = &spec.name;
    let owned = spec.owned_paths.join(", ");

    let objective = spec
        .objective
        .clone()
        .or_else(|| spec.description.clone())
        .unwrap_or_else(|| format!("Carry out the '{role}' role of the {} agency", agency.name));

    let output_format = spec.output_format.clone().unwrap_or_else(|| {
        if owned.is_empty() {
            "A completion report; this role owns no paths".to_string()
        } else {
            format!("Files under {owned}, listed as artifacts in the completion report")
        }
    });

    let mut allowed_inputs = spec.allowed_inputs.clone();
    for artifact in upstream.values().flatten() {
        let artifact = artifact.to_string_lossy().replace('\\', "/");
        if !allowed_inputs.contains(&artifact) {
            allowed_inputs.push(artifact);
        }
    }

    let excludes = agency
        .registry
        .roles()
        .filter(|other| *other != role)
        .filter_map(|other| agency.registry.patterns_of(other.as_str()))
        .flatten()
        .map(|p| p.to_string())
        .collect();

    let mut context = spec.context.clone();
    context
        .entry("agency".to_string())
        .or_insert_with(|| agency.name.clone());

    TaskDelegation {
        role: role.clone(),
        objective,
        output_format,
        tools_and_sources: spec.tools.clone(),
        allowed_inputs,
        boundaries: Boundaries {
            owns: spec.owned_paths.clone(),
            excludes,
            depends_on: upstream.keys().cloned().collect(),
        },
        context,
        status: TaskStatus::Dispatched,
        attempt,
        dispatched_at: now,
    }
}
