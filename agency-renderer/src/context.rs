//! Brief context — serializable rendering payload built from a [`TaskDelegation`].

use serde::{Deserialize, Serialize};

use agency_core::types::{RoleSpec, TaskDelegation};

use crate::error::RenderError;

/// Flat rendering payload for the brief templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefContext {
    pub agency: String,
    pub role: String,
    pub description: Option<String>,
    pub objective: String,
    pub output_format: String,
    pub allowed_inputs: Vec<String>,
    pub boundaries: BoundariesCtx,
    pub tools: Vec<ToolCtx>,
    /// Context entries in key order.
    pub context: Vec<ContextEntry>,
    pub attempt: u32,
    /// RFC 3339, second precision.
    pub dispatched_at: String,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundariesCtx {
    pub owns: Vec<String>,
    pub excludes: Vec<String>,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCtx {
    pub name: String,
    pub when_to_use: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub agency_version: String,
}

impl BriefContext {
    /// Build a [`BriefContext`] from a delegation. The agency name comes from
    /// the delegation's `agency` context entry when present.
    pub fn from_delegation(delegation: &TaskDelegation) -> Self {
        let agency = delegation
            .context
            .get("agency")
            .cloned()
            .unwrap_or_default();
        let boundaries = &delegation.boundaries;

        BriefContext {
            agency,
            role: delegation.role.to_string(),
            description: None,
            objective: delegation.objective.clone(),
            output_format: delegation.output_format.clone(),
            allowed_inputs: delegation.allowed_inputs.clone(),
            boundaries: BoundariesCtx {
                owns: boundaries.owns.clone(),
                excludes: boundaries.excludes.clone(),
                depends_on: boundaries.depends_on.iter().map(|r| r.to_string()).collect(),
            },
            tools: delegation
                .tools_and_sources
                .iter()
                .map(|t| ToolCtx {
                    name: t.name.clone(),
                    when_to_use: t.when_to_use.clone(),
                })
                .collect(),
            context: delegation
                .context
                .iter()
                .filter(|(key, _)| key.as_str() != "agency")
                .map(|(key, value)| ContextEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            attempt: delegation.attempt,
            dispatched_at: delegation
                .dispatched_at
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            meta: MetaCtx {
                agency_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Attach the role's free-text description.
    pub fn with_role(mut self, spec: &RoleSpec) -> Self {
        self.description = spec.description.clone();
        self
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_core::types::{Boundaries, TaskStatus, ToolSource};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn make_delegation() -> TaskDelegation {
        TaskDelegation {
            role: "build".into(),
            objective: "Implement the design".to_string(),
            output_format: "Sources under src/".to_string(),
            tools_and_sources: vec![ToolSource {
                name: "cargo".to_string(),
                when_to_use: "after each edit".to_string(),
            }],
            allowed_inputs: vec!["design/**".to_string()],
            boundaries: Boundaries {
                owns: vec!["src/".to_string()],
                excludes: vec!["docs/**".to_string()],
                depends_on: vec!["design".into()],
            },
            context: BTreeMap::from([
                ("agency".to_string(), "starter".to_string()),
                ("ticket".to_string(), "ENG-7".to_string()),
            ]),
            status: TaskStatus::Dispatched,
            attempt: 1,
            dispatched_at: Utc.with_ymd_and_hms(2024, 3, 9, 8, 15, 0).unwrap(),
        }
    }

    #[test]
    fn context_fields_populated() {
        let ctx = BriefContext::from_delegation(&make_delegation());
        assert_eq!(ctx.agency, "starter");
        assert_eq!(ctx.role, "build");
        assert_eq!(ctx.boundaries.depends_on, vec!["design"]);
        assert_eq!(ctx.context.len(), 1, "agency entry is lifted out of the context list");
        assert_eq!(ctx.dispatched_at, "2024-03-09T08:15:00Z");
    }

    #[test]
    fn with_role_sets_description() {
        let mut spec = RoleSpec::new("build", &["src/"]);
        spec.description = Some("Writes the code".into());
        let ctx = BriefContext::from_delegation(&make_delegation()).with_role(&spec);
        assert_eq!(ctx.description.as_deref(), Some("Writes the code"));
    }

    #[test]
    fn to_tera_context_succeeds() {
        let ctx = BriefContext::from_delegation(&make_delegation());
        ctx.to_tera_context().expect("context conversion");
    }
}
