use std::collections::{HashSet, VecDeque};

use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ImpactConfig;
use crate::graph::DependencyGraph;
use crate::types::CellAddress;

/// A formula cell whose change would ripple through many others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactEntry {
    pub address: CellAddress,
    pub formula: String,
    /// Formula cells that transitively read this one.
    pub dependents: usize,
    /// Direct references out of this formula.
    pub precedents: usize,
}

/// Count formula cells downstream of `start`, visiting at most `max_visited`.
pub fn transitive_dependents(graph: &DependencyGraph, start: NodeIndex, max_visited: usize) -> usize {
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        for next in graph.formula_dependents(node) {
            if next == start || !visited.insert(next) {
                continue;
            }
            if visited.len() >= max_visited {
                return visited.len();
            }
            queue.push_back(next);
        }
    }
    visited.len()
}

/// The `top_n` formula cells by downstream reach.
pub fn rank_impact(graph: &DependencyGraph, config: &ImpactConfig) -> Vec<ImpactEntry> {
    if config.top_n == 0 {
        return Vec::new();
    }
    let nodes: Vec<_> = graph.formula_nodes().collect();
    let mut entries: Vec<ImpactEntry> = nodes
        .par_iter()
        .filter_map(|(idx, node)| {
            let dependents = transitive_dependents(graph, *idx, config.max_visited);
            (dependents > 0).then(|| ImpactEntry {
                address: node.address.clone(),
                formula: node.formula.clone(),
                dependents,
                precedents: graph.references(*idx).len(),
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        b.dependents
            .cmp(&a.dependents)
            .then(b.precedents.cmp(&a.precedents))
            .then_with(|| a.address.cmp(&b.address))
    });
    entries.truncate(config.top_n);
    entries
}
