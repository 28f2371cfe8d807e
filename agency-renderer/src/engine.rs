//! Tera rendering engine for delegation briefs.
//!
//! | Template                       | Purpose                              |
//! |--------------------------------|--------------------------------------|
//! | `brief.md.tera`                | Full brief handed to a role          |
//! | `_partials/header.tera`        | Title, agency, attempt, timestamp    |
//! | `_partials/boundaries.tera`    | Owned / excluded paths, predecessors |
//! | `_partials/tools.tera`         | Tools and sources table              |
//!
//! Any of them can be overridden by a `.tera` file with the same relative
//! name in a user template directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use agency_core::types::{RoleName, RoleSpec, TaskDelegation};

use crate::context::BriefContext;
use crate::error::RenderError;

/// Name of the top-level brief template.
pub const BRIEF_TEMPLATE: &str = "brief.md.tera";

// ---------------------------------------------------------------------------
// Embedded templates — baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("_partials/header.tera", include_str!("templates/_partials/header.tera")),
    (
        "_partials/boundaries.tera",
        include_str!("templates/_partials/boundaries.tera"),
    ),
    ("_partials/tools.tera", include_str!("templates/_partials/tools.tera")),
    (BRIEF_TEMPLATE, include_str!("templates/brief.md.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if path.is_dir() {
            collect_template_files(&path, out)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("tera") {
            out.push(path);
        }
    }
    Ok(())
}

fn load_overrides(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    files
        .into_iter()
        .map(|path| -> Result<(String, String), RenderError> {
            let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
            let name = normalize_template_name(rel);
            let content = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            Ok((name, content))
        })
        .collect()
}

fn build_tera(overrides: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, content)| ((*name).to_string(), (*content).to_string()))
        .collect();
    if let Some(dir) = overrides {
        templates.extend(load_overrides(dir)?);
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// BriefRenderer
// ---------------------------------------------------------------------------

/// Renders [`TaskDelegation`]s into Markdown briefs.
///
/// Create once and reuse; template parsing happens in the constructor.
pub struct BriefRenderer {
    tera: Tera,
}

impl BriefRenderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    /// Embedded templates plus any `.tera` overrides found in `dir`.
    pub fn with_overrides(dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(BriefRenderer {
            tera: build_tera(dir)?,
        })
    }

    /// Render a prepared context. Output is LF-only and ends with a newline.
    pub fn render_context(&self, ctx: &BriefContext) -> Result<String, RenderError> {
        let rendered = self.tera.render(BRIEF_TEMPLATE, &ctx.to_tera_context()?)?;
        let mut out = rendered.replace("\r\n", "\n");
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }

    /// Render the brief for `delegation`, enriched with its role's
    /// description when `spec` is given.
    pub fn render(
        &self,
        delegation: &TaskDelegation,
        spec: Option<&RoleSpec>,
    ) -> Result<String, RenderError> {
        let mut ctx = BriefContext::from_delegation(delegation);
        if let Some(spec) = spec {
            ctx = ctx.with_role(spec);
        }
        self.render_context(&ctx)
    }
}

/// File name of a role's brief: `<role>.md`.
pub fn brief_file_name(role: &RoleName) -> String {
    format!("{role}.md")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
