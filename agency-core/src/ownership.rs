//! Role registry and ownership validation.
//!
//! Every role claims a set of [`PathPattern`]s. Claims of different roles are
//! pairwise disjoint: no concrete path can match patterns of two roles. The
//! check runs once, at registration time, so that validating a write later
//! is a pure lookup.
//!
//! # Pattern syntax
//!
//! ```text
//! docs/overview.md    literal path
//! src/*.rs            `*` matches any run of characters inside one segment
//! src/**              `**` matches zero or more whole segments
//! research/           trailing slash is shorthand for `research/**`
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RegistryError;
use crate::types::RoleName;

// ---------------------------------------------------------------------------
// 1. Patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    /// `**`
    AnyDepth,
    /// A literal segment, possibly containing `*` wildcards.
    Glob(String),
}

/// A parsed ownership pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern, normalising `./` prefixes, backslashes and trailing slashes.
    pub fn parse(pattern: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut text = pattern.trim().replace('\\', "/");
        if text.starts_with('/') {
            return Err(invalid("pattern must be relative to the workspace root"));
        }
        if text.ends_with('/') {
            text.push_str("**");
        }

        let mut segments = Vec::new();
        for part in text.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(invalid("`..` is not allowed")),
                "**" => {
                    // Consecutive `**` segments are equivalent to one.
                    if segments.last() != Some(&Segment::AnyDepth) {
                        segments.push(Segment::AnyDepth);
                    }
                }
                glob if glob.contains("**") => {
                    return Err(invalid("`**` must be a whole path segment"));
                }
                glob => segments.push(Segment::Glob(glob.to_string())),
            }
        }
        if segments.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let raw = segments
            .iter()
            .map(|s| match s {
                Segment::AnyDepth => "**",
                Segment::Glob(g) => g.as_str(),
            })
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self { raw, segments })
    }

    /// Normalised textual form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `path` (already normalised into segments) matches this pattern.
    pub fn matches_segments<S: AsRef<str>>(&self, path: &[S]) -> bool {
        segments_match(&self.segments, path)
    }

    /// Whether the workspace-relative `path` matches this pattern.
    ///
    /// Absolute paths and paths escaping the workspace never match.
    pub fn matches(&self, path: impl AsRef<Path>) -> bool {
        normalize_path(path.as_ref())
            .map(|segs| self.matches_segments(segs.as_slice()))
            .unwrap_or(false)
    }

    /// Whether at least one concrete path matches both patterns.
    pub fn overlaps(&self, other: &PathPattern) -> bool {
        segments_overlap(&self.segments, &other.segments)
    }

    /// Ordering key used by [`RoleRegistry::owner_of`]: more literal segments
    /// win, then the longer pattern.
    fn specificity(&self) -> (usize, usize) {
        let literal = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Glob(g) if !g.contains('*')))
            .count();
        (literal, self.raw.len())
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

fn segments_match<S: AsRef<str>>(pattern: &[Segment], path: &[S]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyDepth, rest)) => {
            (0..=path.len()).any(|skip| segments_match(rest, &path[skip..]))
        }
        Some((Segment::Glob(glob), rest)) => match path.split_first() {
            Some((first, tail)) => glob_match(glob, first.as_ref()) && segments_match(rest, tail),
            None => false,
        },
    }
}

fn segments_overlap(a: &[Segment], b: &[Segment]) -> bool {
    match (a.split_first(), b.split_first()) {
        (None, None) => true,
        (Some((Segment::AnyDepth, rest_a)), _) => {
            segments_overlap(rest_a, b) || (!b.is_empty() && segments_overlap(a, &b[1..]))
        }
        (_, Some((Segment::AnyDepth, rest_b))) => {
            segments_overlap(a, rest_b) || (!a.is_empty() && segments_overlap(&a[1..], b))
        }
        (Some((Segment::Glob(x), rest_a)), Some((Segment::Glob(y), rest_b))) => {
            let x: Vec<char> = x.chars().collect();
            let y: Vec<char> = y.chars().collect();
            globs_overlap(&x, &y) && segments_overlap(rest_a, rest_b)
        }
        _ => false,
    }
}

/// Single-segment wildcard match (`*` only).
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, mark)) = backtrack {
            pi = star + 1;
            ti = mark + 1;
            backtrack = Some((star, mark + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// Whether two single-segment wildcard patterns share a matching string.
fn globs_overlap(a: &[char], b: &[char]) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }
    if a.first() == Some(&'*') && globs_overlap(&a[1..], b) {
        return true;
    }
    if b.first() == Some(&'*') && globs_overlap(a, &b[1..]) {
        return true;
    }
    match (a.first(), b.first()) {
        (Some('*'), Some(c)) if *c != '*' => globs_overlap(a, &b[1..]),
        (Some(c), Some('*')) if *c != '*' => globs_overlap(&a[1..], b),
        (Some(x), Some(y)) if *x != '*' && *y != '*' => x == y && globs_overlap(&a[1..], &b[1..]),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// 2. Path normalisation
// ---------------------------------------------------------------------------

/// Lexically normalise a workspace-relative path into its segments.
///
/// Returns `None` for absolute paths, empty paths and paths whose `..`
/// components climb above the workspace root.
pub fn normalize_path(path: &Path) -> Option<Vec<String>> {
    let mut segments: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                // Tolerate Windows-style separators in reports from workers.
                for piece in part.split('\\').filter(|p| !p.is_empty() && *p != ".") {
                    if piece == ".." {
                        segments.pop()?;
                    } else {
                        segments.push(piece.to_string());
                    }
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                segments.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

// ---------------------------------------------------------------------------
// 3. Validation outcome
// ---------------------------------------------------------------------------

/// Why a proposed write was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteRejection {
    #[error("'{path}' is owned by '{owner}' (pattern '{pattern}')")]
    OwnedByOther {
        path: String,
        owner: RoleName,
        pattern: String,
    },

    #[error("'{path}' is outside the workspace")]
    OutsideWorkspace { path: String },
}

// ---------------------------------------------------------------------------
// 4. Registry
// ---------------------------------------------------------------------------

/// Static role → ownership mapping.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    claims: BTreeMap<RoleName, Vec<PathPattern>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `role` with its owned path patterns.
    ///
    /// All patterns are parsed and checked against every other role before
    /// anything is inserted, so a failed registration leaves the registry as
    /// it was.
    pub fn register<S: AsRef<str>>(
        &mut self,
        role: RoleName,
        owned_paths: &[S],
    ) -> Result<(), RegistryError> {
        if self.claims.contains_key(&role) {
            return Err(RegistryError::DuplicateRole { role });
        }

        let patterns = owned_paths
            .iter()
            .map(|p| PathPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        for pattern in &patterns {
            for (existing_role, existing) in &self.claims {
                if let Some(hit) = existing.iter().find(|e| e.overlaps(pattern)) {
                    return Err(RegistryError::OwnershipConflict {
                        role,
                        pattern: pattern.to_string(),
                        existing_role: existing_role.clone(),
                        existing_pattern: hit.to_string(),
                    });
                }
            }
        }

        self.claims.insert(role, patterns);
        Ok(())
    }

    pub fn contains(&self, role: &str) -> bool {
        self.claims.contains_key(role)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Registered roles in name order.
    pub fn roles(&self) -> impl Iterator<Item = &RoleName> {
        self.claims.keys()
    }

    pub fn patterns_of(&self, role: &str) -> Option<&[PathPattern]> {
        self.claims.get(role).map(Vec::as_slice)
    }

    /// The role and pattern claiming `path`, most specific match first.
    pub fn claim_of(&self, path: impl AsRef<Path>) -> Option<(&RoleName, &PathPattern)> {
        let segments = normalize_path(path.as_ref())?;
        self.claims
            .iter()
            .flat_map(|(role, patterns)| patterns.iter().map(move |p| (role, p)))
            .filter(|(_, p)| p.matches_segments(segments.as_slice()))
            .max_by_key(|(_, p)| p.specificity())
    }

    /// The role owning `path`, or `None` when the path is freely writable.
    pub fn owner_of(&self, path: impl AsRef<Path>) -> Option<&RoleName> {
        self.claim_of(path).map(|(role, _)| role)
    }

    /// Decide whether `role` may write `path`.
    pub fn validate_write(&self, role: &str, path: impl AsRef<Path>) -> Result<(), WriteRejection> {
        let path = path.as_ref();
        let Some(segments) = normalize_path(path) else {
            return Err(WriteRejection::OutsideWorkspace {
                path: path.display().to_string(),
            });
        };
        match self.claim_of(path) {
            Some((owner, pattern)) if owner.as_str() != role => Err(WriteRejection::OwnedByOther {
                path: segments.join("/"),
                owner: owner.clone(),
                pattern: pattern.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Validate a batch of artifacts, returning every rejection.
    pub fn validate_artifacts<'a, I>(&self, role: &str, artifacts: I) -> Vec<(PathBuf, WriteRejection)>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        artifacts
            .into_iter()
            .filter_map(|path| {
                self.validate_write(role, path)
                    .err()
                    .map(|rejection| (path.clone(), rejection))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> PathPattern {
        PathPattern::parse(s).expect("pattern")
    }

    #[test]
    fn trailing_slash_means_whole_directory() {
        assert_eq!(pat("research/").as_str(), "research/**");
        assert_eq!(pat("./docs//guide.md").as_str(), "docs/guide.md");
    }

    #[test]
    fn rejects_malformed_patterns() {
        for bad in ["", "/abs/**", "../up", "src/a**b"] {
            assert!(
                matches!(PathPattern::parse(bad), Err(RegistryError::InvalidPattern { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn double_star_matches_any_depth() {
        let p = pat("src/**");
        assert!(p.matches("src/readme.md"));
        assert!(p.matches("src/a/b/c.rs"));
        assert!(!p.matches("docs/src/x"));
    }

    #[test]
    fn single_star_stays_in_segment() {
        let p = pat("src/*.rs");
        assert!(p.matches("src/main.rs"));
        assert!(!p.matches("src/bin/main.rs"));
        assert!(!p.matches("src/main.md"));
    }

    #[test]
    fn overlap_detection() {
        assert!(pat("src/**").overlaps(&pat("src/readme.md")));
        assert!(pat("src/*.rs").overlaps(&pat("src/main.*")));
        assert!(pat("**/*.md").overlaps(&pat("docs/**")));
        assert!(!pat("src/**").overlaps(&pat("docs/**")));
        assert!(!pat("src/*.rs").overlaps(&pat("src/*.md")));
        assert!(!pat("a/*/c").overlaps(&pat("a/b")));
    }

    #[test]
    fn normalize_resolves_dots_and_rejects_escape() {
        assert_eq!(
            normalize_path(Path::new("./src/../docs/a.md")),
            Some(vec!["docs".to_string(), "a.md".to_string()])
        );
        assert_eq!(normalize_path(Path::new("../etc/passwd")), None);
        assert_eq!(normalize_path(Path::new("/etc/passwd")), None);
        assert_eq!(normalize_path(Path::new("")), None);
    }

    #[test]
    fn owner_of_prefers_most_specific_claim() {
        let mut reg = RoleRegistry::new();
        reg.register("tools".into(), &["tools/*.py"]).unwrap();
        reg.register("docs".into(), &["docs/**"]).unwrap();
        assert_eq!(reg.owner_of("tools/fetch.py").map(RoleName::as_str), Some("tools"));
        assert_eq!(reg.owner_of("docs/a/b.md").map(RoleName::as_str), Some("docs"));
        assert_eq!(reg.owner_of("README.md"), None);
    }

    #[test]
    fn dotdot_cannot_sneak_into_foreign_paths() {
        let mut reg = RoleRegistry::new();
        reg.register("build".into(), &["src/**"]).unwrap();
        reg.register("docs".into(), &["docs/**"]).unwrap();
        let err = reg.validate_write("build", "src/../docs/overview.md").unwrap_err();
        assert!(matches!(err, WriteRejection::OwnedByOther { ref owner, .. } if owner.as_str() == "docs"));
    }

    #[test]
    fn unowned_paths_are_free_for_everyone() {
        let mut reg = RoleRegistry::new();
        reg.register("build".into(), &["src/**"]).unwrap();
        assert!(reg.validate_write("build", "PLAN.md").is_ok());
        assert!(reg.validate_write("someone-else", "PLAN.md").is_ok());
    }
}
