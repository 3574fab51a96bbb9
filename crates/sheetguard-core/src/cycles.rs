//! Circular reference detection over cell-to-cell formula edges.
//!
//! Whole row/column and external pseudo-nodes are left out of the search.
//! A bounded range pseudo-node links its reader to every formula it covers.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CycleConfig;
use crate::finding::{FindingKind, FindingScope, RiskFinding};
use crate::graph::{DependencyGraph, EdgeKind, GraphNode};
use crate::types::{CellAddress, RangeAddress};

/// Upper bound on DFS steps spent enumerating one component.
const STEP_BUDGET: usize = 200_000;

/// A closed loop of cells: the first address repeats as the last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub cells: Vec<CellAddress>,
    /// Number of distinct cells in the loop.
    pub length: usize,
}

impl Cycle {
    pub fn members(&self) -> &[CellAddress] {
        &self.cells[..self.length]
    }

    pub fn describe(&self) -> String {
        self.cells
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// A strongly connected component too large (or too dense) to enumerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCluster {
    /// Sorted member addresses.
    pub members: Vec<CellAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycles: Vec<Cycle>,
    pub clusters: Vec<CycleCluster>,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty() && self.clusters.is_empty()
    }

    /// One `CircularReference` finding per cycle or cluster.
    pub fn findings(&self) -> Vec<RiskFinding> {
        let mut findings = Vec::new();
        for cycle in &self.cycles {
            let mut members = cycle.members().to_vec();
            members.sort();
            let message = if cycle.length == 1 {
                format!("{} refers to itself", cycle.cells[0])
            } else {
                format!("Circular reference: {}", cycle.describe())
            };
            findings.push(
                RiskFinding::new(
                    FindingKind::CircularReference {
                        cells: cycle.cells.clone(),
                        length: cycle.length,
                        cluster: false,
                    },
                    FindingScope::Cells(members),
                    message,
                )
                .with_suggestion("Break the loop so every value has a non-circular source"),
            );
        }
        for cluster in &self.clusters {
            findings.push(
                RiskFinding::new(
                    FindingKind::CircularReference {
                        cells: cluster.members.clone(),
                        length: cluster.members.len(),
                        cluster: true,
                    },
                    FindingScope::Cells(cluster.members.clone()),
                    format!(
                        "Complex circular cluster of {} mutually dependent cells",
                        cluster.members.len()
                    ),
                )
                .with_suggestion("Untangle the cluster; too many loops to list individually"),
            );
        }
        findings
    }
}

/// Find every circular reference chain in the graph.
pub fn detect_cycles(graph: &DependencyGraph, config: &CycleConfig) -> CycleReport {
    // Formula-only subgraph, nodes added in address order.
    let mut formulas: Vec<(NodeIndex, &CellAddress)> = graph
        .formula_nodes()
        .map(|(idx, f)| (idx, &f.address))
        .collect();
    formulas.sort_by(|a, b| a.1.cmp(b.1));

    let mut sub: DiGraph<(), ()> = DiGraph::with_capacity(formulas.len(), 0);
    let mut local: HashMap<NodeIndex, NodeIndex> = HashMap::with_capacity(formulas.len());
    for (idx, _) in &formulas {
        local.insert(*idx, sub.add_node(()));
    }
    // Bounded ranges too large to expand still feed the cells they cover.
    let mut by_sheet: HashMap<&str, BTreeMap<(u32, u32), NodeIndex>> = HashMap::new();
    for (idx, address) in &formulas {
        by_sheet
            .entry(address.sheet.as_str())
            .or_default()
            .insert((address.row, address.col), local[idx]);
    }
    let mut covered: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();

    for (idx, _) in &formulas {
        let from = local[idx];
        for (target, kind) in graph.references(*idx) {
            match (kind, graph.node(target)) {
                (EdgeKind::Direct | EdgeKind::Expanded, _) => {
                    if let Some(&to) = local.get(&target) {
                        sub.add_edge(from, to, ());
                    }
                }
                (EdgeKind::Pseudo, GraphNode::Range { range }) => {
                    let members = covered
                        .entry(target)
                        .or_insert_with(|| covered_formulas(&by_sheet, range));
                    for &to in members.iter() {
                        sub.add_edge(from, to, ());
                    }
                }
                _ => {}
            }
        }
    }

    // Subgraph index i is formulas[i].
    let address = |sub_idx: NodeIndex| formulas[sub_idx.index()].1.clone();

    let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(&sub)
        .into_iter()
        .filter(|scc| scc.len() > 1 || sub.contains_edge(scc[0], scc[0]))
        .map(|mut scc| {
            scc.sort();
            scc
        })
        .collect();
    // Local indices follow address order, so sorting by first member orders
    // components by their lowest address.
    components.sort_by_key(|scc| scc[0]);

    let mut report = CycleReport::default();
    for component in components {
        if component.len() > config.cluster_threshold {
            debug!(size = component.len(), "reporting large component as cluster");
            report.clusters.push(CycleCluster {
                members: component.iter().map(|&n| address(n)).collect(),
            });
            continue;
        }
        match enumerate_component(&sub, &component, config.max_cycles_per_component) {
            Some(loops) => {
                for path in loops {
                    let mut cells: Vec<CellAddress> =
                        path.iter().map(|&n| address(n)).collect();
                    let length = cells.len();
                    cells.push(cells[0].clone());
                    report.cycles.push(Cycle { cells, length });
                }
            }
            None => {
                debug!(
                    size = component.len(),
                    "cycle enumeration exceeded its budget; reporting as cluster"
                );
                report.clusters.push(CycleCluster {
                    members: component.iter().map(|&n| address(n)).collect(),
                });
            }
        }
    }
    report
}

/// Subgraph nodes of the formula cells inside a bounded range.
fn covered_formulas(
    by_sheet: &HashMap<&str, BTreeMap<(u32, u32), NodeIndex>>,
    range: &RangeAddress,
) -> Vec<NodeIndex> {
    let Some(cells) = by_sheet.get(range.sheet.as_str()) else {
        return Vec::new();
    };
    let b = range.bounds();
    cells
        .range((b.first_row, 0)..=(b.last_row, u32::MAX))
        .filter(|((_, col), _)| *col >= b.first_col && *col <= b.last_col)
        .map(|(_, &idx)| idx)
        .collect()
}

/// Enumerate the elementary cycles of one strongly connected component.
///
/// Each cycle is found exactly once, rooted at its lowest member: the search
/// from `start` only visits members greater than `start`. Returns `None` when
/// the cycle count or step budget is exceeded.
fn enumerate_component(
    sub: &DiGraph<(), ()>,
    component: &[NodeIndex],
    max_cycles: usize,
) -> Option<Vec<Vec<NodeIndex>>> {
    let position: HashMap<NodeIndex, usize> =
        component.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let adjacency: Vec<Vec<usize>> = component
        .iter()
        .map(|&n| {
            let mut next: Vec<usize> = sub
                .neighbors(n)
                .filter_map(|m| position.get(&m).copied())
                .collect();
            next.sort_unstable();
            next.dedup();
            next
        })
        .collect();

    let mut found: Vec<Vec<NodeIndex>> = Vec::new();
    let mut steps = 0usize;

    for start in 0..component.len() {
        let mut path = vec![start];
        let mut on_path = vec![false; component.len()];
        on_path[start] = true;
        // Stack of (node, next neighbour slot to try).
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(&(node, slot)) = stack.last() {
            steps += 1;
            if steps > STEP_BUDGET {
                return None;
            }
            let Some(&next) = adjacency[node].get(slot) else {
                stack.pop();
                path.pop();
                on_path[node] = false;
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            if next == start {
                found.push(path.iter().map(|&i| component[i]).collect());
                if found.len() > max_cycles {
                    return None;
                }
            } else if next > start && !on_path[next] {
                on_path[next] = true;
                path.push(next);
                stack.push((next, 0));
            }
        }
    }
    Some(found)
}
