//! Dependency registry
//!
//! Declared (precedent, dependent) edges between store keys. The registry is
//! an annotation for visualization and QC collaborators: the store never
//! consults it when dispatching listeners. Execution order comes from the
//! hand-sequenced module passes and the listeners modules install.

use std::fmt::Write as _;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

/// Nodes that could not be leveled because they sit on, or downstream of, a cycle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle involving {involved:?}")]
pub struct CycleReport {
    pub involved: Vec<String>,
}

/// Documentation-only dependency edges
#[derive(Debug, Clone, Default)]
pub struct DependencyRegistry {
    edges: IndexSet<(String, String)>,
    dependents: IndexMap<String, IndexSet<String>>,
    precedents: IndexMap<String, IndexSet<String>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge. Returns false if it was already present.
    pub fn register(&mut self, precedent: impl Into<String>, dependent: impl Into<String>) -> bool {
        let precedent = precedent.into();
        let dependent = dependent.into();
        if !self.edges.insert((precedent.clone(), dependent.clone())) {
            return false;
        }
        self.dependents
            .entry(precedent.clone())
            .or_default()
            .insert(dependent.clone());
        self.precedents.entry(dependent).or_default().insert(precedent);
        true
    }

    pub fn dependents_of(&self, key: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(key)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn precedents_of(&self, key: &str) -> impl Iterator<Item = &str> {
        self.precedents
            .get(key)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    /// Every key appearing on either end of an edge, in first-seen order.
    pub fn nodes(&self) -> IndexSet<&str> {
        let mut nodes = IndexSet::new();
        for (p, d) in &self.edges {
            nodes.insert(p.as_str());
            nodes.insert(d.as_str());
        }
        nodes
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Collapse keys into groups (typically the owning module).
    ///
    /// Keys for which `owner` returns `None` are dropped, as are edges that
    /// stay inside one group.
    pub fn grouped_by<F>(&self, owner: F) -> DependencyRegistry
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut grouped = DependencyRegistry::new();
        for (p, d) in &self.edges {
            if let (Some(from), Some(to)) = (owner(p), owner(d))
                && from != to
            {
                grouped.register(from, to);
            }
        }
        grouped
    }

    /// Topological levels (Kahn's algorithm), each level sorted for determinism.
    ///
    /// A cycle here is not an error for execution; it marks where a staged
    /// orchestrator is needed.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, CycleReport> {
        let nodes = self.nodes();
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut in_degree: IndexMap<&str, usize> = nodes
            .iter()
            .map(|n| (*n, self.precedents.get(*n).map_or(0, IndexSet::len)))
            .collect();

        let mut levels = Vec::new();
        let mut current: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut processed = 0;

        while !current.is_empty() {
            current.sort_unstable();
            processed += current.len();

            let mut next = Vec::new();
            for node in &current {
                for dependent in self.dependents_of(node) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }

            levels.push(current.iter().map(|n| n.to_string()).collect());
            current = next;
        }

        if processed != nodes.len() {
            let involved = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(n, _)| n.to_string())
                .collect();
            return Err(CycleReport { involved });
        }

        Ok(levels)
    }

    /// Render as a Graphviz digraph.
    pub fn to_dot(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{name}\" {{");
        let _ = writeln!(out, "    rankdir=LR;");
        for node in self.nodes() {
            let _ = writeln!(out, "    \"{node}\";");
        }
        for (p, d) in self.edges() {
            let _ = writeln!(out, "    \"{p}\" -> \"{d}\";");
        }
        out.push_str("}\n");
        out
    }
}
