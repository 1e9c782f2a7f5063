//! Dependency graph over sibling units
//!
//! Building never fails: structural problems are recorded on the affected
//! nodes and surface later as unit results.

use crate::error::ErrorCode;
use crate::types::{Intent, ResultInfo, ResultSource};
use crate::unit::{ConfigurationUnit, fold_identifier};
use std::collections::HashMap;

/// One unit of a level, by index into the unit slice
#[derive(Debug, Clone)]
pub struct Node {
    /// Indices of the units this one depends on
    pub dependencies: Vec<usize>,
    /// Inactive units are out of scope
    pub excluded: bool,
    /// Structural failure found while building
    pub failure: Option<ResultInfo>,
}

/// Graph for one level of a set (top level or a group's children)
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub nodes: Vec<Node>,
}

impl DependencyGraph {
    /// Validate identifiers, resolve dependencies and detect cycles
    pub fn build(units: &[ConfigurationUnit]) -> Self {
        let mut nodes: Vec<Node> = units
            .iter()
            .map(|u| Node {
                dependencies: Vec::new(),
                excluded: !u.is_active,
                failure: None,
            })
            .collect();

        mark_duplicates(units, &mut nodes);
        let lookup = identifier_lookup(units);
        resolve_dependencies(units, &mut nodes, &lookup);
        mark_unreachable(units, &mut nodes);

        Self { nodes }
    }

    /// Indices of in-scope nodes with a structural failure, in document order
    pub fn failures(&self) -> impl Iterator<Item = (usize, &ResultInfo)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.excluded)
            .filter_map(|(i, n)| n.failure.as_ref().map(|f| (i, f)))
    }
}

fn mark_duplicates(units: &[ConfigurationUnit], nodes: &mut [Node]) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for unit in units.iter().filter(|u| u.is_active && !u.identifier.is_empty()) {
        *counts.entry(unit.folded_identifier()).or_default() += 1;
    }

    for (unit, node) in units.iter().zip(nodes.iter_mut()) {
        if node.excluded || unit.identifier.is_empty() {
            continue;
        }
        if counts.get(&unit.folded_identifier()).copied().unwrap_or(0) > 1 {
            log::warn!("duplicate identifier: {}", unit.identifier);
            node.failure = Some(
                ResultInfo::failure(ErrorCode::DuplicateIdentifier, ResultSource::ConfigurationSet)
                    .with_details(unit.identifier.clone()),
            );
        }
    }
}

/// Folded identifier to unit index; active units win over inactive ones
fn identifier_lookup(units: &[ConfigurationUnit]) -> HashMap<String, usize> {
    let mut lookup: HashMap<String, usize> = HashMap::new();
    for (i, unit) in units.iter().enumerate() {
        if unit.identifier.is_empty() {
            continue;
        }
        match lookup.get(&unit.folded_identifier()) {
            Some(&existing) if units[existing].is_active || !unit.is_active => {}
            _ => {
                lookup.insert(unit.folded_identifier(), i);
            }
        }
    }
    lookup
}

fn resolve_dependencies(units: &[ConfigurationUnit], nodes: &mut [Node], lookup: &HashMap<String, usize>) {
    for (unit, node) in units.iter().zip(nodes.iter_mut()) {
        if node.excluded {
            continue;
        }
        for dependency in unit.dependencies.iter().filter(|d| !d.is_empty()) {
            match lookup.get(&fold_identifier(dependency)) {
                Some(&index) => {
                    if !node.dependencies.contains(&index) {
                        node.dependencies.push(index);
                    }
                }
                None if node.failure.is_none() => {
                    log::warn!(
                        "unit {} depends on missing identifier {dependency}",
                        unit.to_ref()
                    );
                    node.failure = Some(
                        ResultInfo::failure(ErrorCode::MissingDependency, ResultSource::ConfigurationSet)
                            .with_details(dependency.clone()),
                    );
                }
                None => {}
            }
        }
    }
}

/// Simulate phased scheduling; anything that can never become ready is
/// part of (or downstream of) a cycle, or waits on a later phase.
fn mark_unreachable(units: &[ConfigurationUnit], nodes: &mut [Node]) {
    let mut processed: Vec<bool> = nodes.iter().map(|n| n.excluded || n.failure.is_some()).collect();

    for phase in Intent::PHASES {
        loop {
            let mut progressed = false;
            for i in 0..nodes.len() {
                if processed[i] || units[i].intent != phase {
                    continue;
                }
                if nodes[i].dependencies.iter().all(|&d| processed[d]) {
                    processed[i] = true;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    for (i, node) in nodes.iter_mut().enumerate() {
        if !processed[i] {
            log::warn!("unit {} can never become ready", units[i].to_ref());
            node.failure = Some(ResultInfo::failure(
                ErrorCode::DependencyUnsatisfied,
                ResultSource::Precondition,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str) -> ConfigurationUnit {
        ConfigurationUnit::new("Test").with_identifier(id)
    }

    fn code(graph: &DependencyGraph, i: usize) -> Option<ErrorCode> {
        graph.nodes[i].failure.as_ref().and_then(|f| f.code)
    }

    #[test]
    fn test_duplicate_identifiers_case_insensitive() {
        let units = vec![unit("Same"), unit("same"), unit("other"), unit("SAME").inactive()];
        let graph = DependencyGraph::build(&units);

        assert_eq!(code(&graph, 0), Some(ErrorCode::DuplicateIdentifier));
        assert_eq!(code(&graph, 1), Some(ErrorCode::DuplicateIdentifier));
        assert_eq!(code(&graph, 2), None);
        assert!(graph.nodes[3].excluded);
        assert_eq!(code(&graph, 3), None);
    }

    #[test]
    fn test_empty_identifiers_are_not_duplicates() {
        let units = vec![ConfigurationUnit::new("Test"), ConfigurationUnit::new("Test")];
        let graph = DependencyGraph::build(&units);
        assert_eq!(graph.failures().count(), 0);
    }

    #[test]
    fn test_missing_dependency_records_first_missing() {
        let units = vec![unit("a").depends_on("").depends_on("ghost").depends_on("phantom")];
        let graph = DependencyGraph::build(&units);

        let failure = graph.nodes[0].failure.as_ref().unwrap();
        assert_eq!(failure.code, Some(ErrorCode::MissingDependency));
        assert_eq!(failure.details, "ghost");
        assert_eq!(failure.source, ResultSource::ConfigurationSet);
    }

    #[test]
    fn test_cycle_and_downstream_fail() {
        let units = vec![
            unit("a").depends_on("b"),
            unit("b").depends_on("a"),
            unit("c").depends_on("a"),
            unit("d"),
        ];
        let graph = DependencyGraph::build(&units);

        for i in 0..3 {
            let failure = graph.nodes[i].failure.as_ref().unwrap();
            assert_eq!(failure.code, Some(ErrorCode::DependencyUnsatisfied));
            assert_eq!(failure.source, ResultSource::Precondition);
        }
        assert!(graph.nodes[3].failure.is_none());
    }

    #[test]
    fn test_dependency_on_later_phase_is_unsatisfiable() {
        let units = vec![
            unit("check").with_intent(Intent::Assert).depends_on("install"),
            unit("install"),
        ];
        let graph = DependencyGraph::build(&units);

        assert_eq!(code(&graph, 0), Some(ErrorCode::DependencyUnsatisfied));
        assert_eq!(code(&graph, 1), None);
    }

    #[test]
    fn test_dependency_on_earlier_phase_is_fine() {
        let units = vec![
            unit("install").depends_on("check"),
            unit("check").with_intent(Intent::Assert),
        ];
        let graph = DependencyGraph::build(&units);

        assert_eq!(graph.failures().count(), 0);
        assert_eq!(graph.nodes[0].dependencies, vec![1]);
    }

    #[test]
    fn test_inactive_units_still_resolve() {
        let units = vec![unit("off").inactive(), unit("on").depends_on("OFF")];
        let graph = DependencyGraph::build(&units);

        assert_eq!(graph.failures().count(), 0);
        assert_eq!(graph.nodes[1].dependencies, vec![0]);
    }
}
