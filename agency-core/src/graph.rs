//! Role dependency graph.
//!
//! An edge `A → B` means "B depends on A": B cannot start until A completes.
//! Cycles are rejected at insertion time, before the edge is committed, so the
//! graph is a DAG at every point in its life.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::GraphError;
use crate::types::RoleName;

/// Directed acyclic graph over roles.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// `role → {roles it waits on}`
    upstream: BTreeMap<RoleName, BTreeSet<RoleName>>,
    /// `role → {roles waiting on it}`
    downstream: BTreeMap<RoleName, BTreeSet<RoleName>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role. Idempotent.
    pub fn add_node(&mut self, role: RoleName) {
        self.upstream.entry(role.clone()).or_default();
        self.downstream.entry(role).or_default();
    }

    pub fn contains(&self, role: &str) -> bool {
        self.upstream.contains_key(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleName> {
        self.upstream.keys()
    }

    pub fn len(&self) -> usize {
        self.upstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }

    /// Add `from → to`. Both roles must be registered.
    ///
    /// Returns [`GraphError::Cycle`] if `from` is already reachable from `to`
    /// (a self-loop included); the graph is left untouched in that case.
    pub fn add_edge(&mut self, from: &RoleName, to: &RoleName) -> Result<(), GraphError> {
        for role in [from, to] {
            if !self.contains(role.as_str()) {
                return Err(GraphError::UnknownRole { role: role.clone() });
            }
        }

        if let Some(mut path) = self.path_between(to, from) {
            // path runs to → … → from; close it with the proposed edge.
            path.insert(0, from.clone());
            return Err(GraphError::Cycle {
                from: from.clone(),
                to: to.clone(),
                path,
            });
        }

        self.downstream
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.upstream
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        Ok(())
    }

    /// Roles not yet completed whose predecessors have all completed.
    pub fn ready_set(&self, completed: &BTreeSet<RoleName>) -> BTreeSet<RoleName> {
        self.upstream
            .iter()
            .filter(|(role, _)| !completed.contains(*role))
            .filter(|(_, deps)| deps.is_subset(completed))
            .map(|(role, _)| role.clone())
            .collect()
    }

    /// Direct predecessors of `role`.
    pub fn dependencies_of(&self, role: &str) -> Result<&BTreeSet<RoleName>, GraphError> {
        self.upstream
            .get(role)
            .ok_or_else(|| GraphError::UnknownRole { role: role.into() })
    }

    /// Direct successors of `role`.
    pub fn dependents_of(&self, role: &str) -> Result<&BTreeSet<RoleName>, GraphError> {
        self.downstream
            .get(role)
            .ok_or_else(|| GraphError::UnknownRole { role: role.into() })
    }

    /// Every role that (transitively) waits on `role`.
    pub fn transitive_dependents_of(&self, role: &str) -> Result<BTreeSet<RoleName>, GraphError> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&RoleName> = self.dependents_of(role)?.iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                if let Some(children) = self.downstream.get(next) {
                    queue.extend(children.iter());
                }
            }
        }
        Ok(seen)
    }

    /// Roles grouped into Kahn levels: every role of wave `n` depends only on
    /// roles of earlier waves. Roles inside a wave are sorted by name.
    pub fn waves(&self) -> Vec<Vec<RoleName>> {
        let mut in_degree: BTreeMap<&RoleName, usize> = self
            .upstream
            .iter()
            .map(|(role, deps)| (role, deps.len()))
            .collect();

        let mut current: Vec<&RoleName> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(role, _)| *role)
            .collect();

        let mut waves = Vec::new();
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for role in &current {
                for child in self.downstream.get(*role).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.insert(child);
                        }
                    }
                }
            }
            waves.push(current.into_iter().cloned().collect());
            current = next.into_iter().collect();
        }
        waves
    }

    /// A path `start → … → goal` along downstream edges, if one exists.
    fn path_between(&self, start: &RoleName, goal: &RoleName) -> Option<Vec<RoleName>> {
        let mut parent: BTreeMap<&RoleName, &RoleName> = BTreeMap::new();
        let mut seen: BTreeSet<&RoleName> = BTreeSet::from([start]);
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if node == goal {
                let mut path = vec![node.clone()];
                let mut cursor = node;
                while let Some(prev) = parent.get(cursor) {
                    path.push((*prev).clone());
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            for child in self.downstream.get(node).into_iter().flatten() {
                if seen.insert(child) {
                    parent.insert(child, node);
                    stack.push(child);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for n in nodes {
            g.add_node((*n).into());
        }
        for (a, b) in edges {
            g.add_edge(&(*a).into(), &(*b).into()).expect("edge");
        }
        g
    }

    fn set(names: &[&str]) -> BTreeSet<RoleName> {
        names.iter().map(|n| RoleName::from(*n)).collect()
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut g = graph(&["a"], &[]);
        let err = g.add_edge(&"a".into(), &"a".into()).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn cycle_is_rejected_without_mutation() {
        let mut g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let err = g.add_edge(&"c".into(), &"a".into()).unwrap_err();
        match err {
            GraphError::Cycle { path, .. } => {
                let names: Vec<&str> = path.iter().map(RoleName::as_str).collect();
                assert_eq!(names, vec!["c", "a", "b", "c"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(g.dependencies_of("a").unwrap().is_empty());
        assert!(g.dependents_of("c").unwrap().is_empty());
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let mut g = graph(&["a"], &[]);
        let err = g.add_edge(&"a".into(), &"ghost".into()).unwrap_err();
        assert_eq!(err, GraphError::UnknownRole { role: "ghost".into() });
    }

    #[test]
    fn ready_set_follows_completions() {
        let g = graph(&["research", "design", "build"], &[("research", "design"), ("design", "build")]);
        assert_eq!(g.ready_set(&set(&[])), set(&["research"]));
        assert_eq!(g.ready_set(&set(&["research"])), set(&["design"]));
        assert_eq!(g.ready_set(&set(&["research", "design", "build"])), set(&[]));
    }

    #[test]
    fn waves_group_independent_roles() {
        let g = graph(
            &["design", "build", "docs", "test"],
            &[("design", "build"), ("design", "docs"), ("build", "test")],
        );
        assert_eq!(
            g.waves(),
            vec![
                vec![RoleName::from("design")],
                vec![RoleName::from("build"), RoleName::from("docs")],
                vec![RoleName::from("test")],
            ]
        );
    }

    #[test]
    fn transitive_dependents_cover_subtree() {
        let g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c")]);
        assert_eq!(g.transitive_dependents_of("a").unwrap(), set(&["b", "c"]));
        assert!(g.transitive_dependents_of("d").unwrap().is_empty());
    }
}
