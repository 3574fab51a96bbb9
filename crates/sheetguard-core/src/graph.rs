use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::resolver::ResolvedRef;
use crate::token::Token;
use crate::types::{CellAddress, ExternalTarget, RangeAddress};

/// Identity of a node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum NodeKey {
    Cell(CellAddress),
    Range(RangeAddress),
    Unbounded(RangeAddress),
    External(ExternalTarget),
}

impl From<&ResolvedRef> for NodeKey {
    fn from(r: &ResolvedRef) -> Self {
        match r {
            ResolvedRef::Cell(c) => NodeKey::Cell(c.clone()),
            ResolvedRef::Range(r) => NodeKey::Range(r.clone()),
            ResolvedRef::Unbounded(r) => NodeKey::Unbounded(r.clone()),
            ResolvedRef::External(t) => NodeKey::External(t.clone()),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Cell(c) => write!(f, "{c}"),
            NodeKey::Range(r) | NodeKey::Unbounded(r) => write!(f, "{r}"),
            NodeKey::External(t) => write!(f, "{t}"),
        }
    }
}

/// One formula-bearing cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaNode {
    pub address: CellAddress,
    pub formula: String,
    pub tokens: Vec<Token>,
    /// Resolved outgoing references in token order.
    pub references: Vec<ResolvedRef>,
}

/// Node in the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum GraphNode {
    Formula(Box<FormulaNode>),
    /// A referenced value cell, or a formula cell whose text failed to parse.
    Leaf { address: CellAddress, malformed: bool },
    /// Bounded range too large to expand.
    Range { range: RangeAddress },
    /// Whole-column or whole-row range.
    Unbounded { range: RangeAddress },
    External { target: ExternalTarget },
}

impl GraphNode {
    pub fn key(&self) -> NodeKey {
        match self {
            GraphNode::Formula(f) => NodeKey::Cell(f.address.clone()),
            GraphNode::Leaf { address, .. } => NodeKey::Cell(address.clone()),
            GraphNode::Range { range } => NodeKey::Range(range.clone()),
            GraphNode::Unbounded { range } => NodeKey::Unbounded(range.clone()),
            GraphNode::External { target } => NodeKey::External(target.clone()),
        }
    }

    fn from_key(key: NodeKey) -> Self {
        match key {
            NodeKey::Cell(address) => GraphNode::Leaf {
                address,
                malformed: false,
            },
            NodeKey::Range(range) => GraphNode::Range { range },
            NodeKey::Unbounded(range) => GraphNode::Unbounded { range },
            NodeKey::External(target) => GraphNode::External { target },
        }
    }

    pub fn as_formula(&self) -> Option<&FormulaNode> {
        match self {
            GraphNode::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, GraphNode::Formula(_))
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            GraphNode::Range { .. } | GraphNode::Unbounded { .. } | GraphNode::External { .. }
        )
    }

    /// Sheet the node lives on; `None` for external targets.
    pub fn sheet(&self) -> Option<&str> {
        match self {
            GraphNode::Formula(f) => Some(&f.address.sheet),
            GraphNode::Leaf { address, .. } => Some(&address.sheet),
            GraphNode::Range { range } | GraphNode::Unbounded { range } => Some(&range.sheet),
            GraphNode::External { .. } => None,
        }
    }
}

/// Edge in the dependency graph, pointing from a dependent to what it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Single-cell reference.
    Direct,
    /// One cell of a small range expanded into per-cell edges.
    Expanded,
    /// Reference to a range, unbounded, or external pseudo-node.
    Pseudo,
    /// From a range pseudo-node to a formula cell it covers.
    Contained,
}

/// Node and edge counts for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub formula_cells: usize,
    pub leaf_cells: usize,
    pub malformed_formulas: usize,
    pub range_nodes: usize,
    pub unbounded_nodes: usize,
    pub external_nodes: usize,
    pub edges: usize,
    pub symbolic_references: usize,
}

/// Workbook-wide dependency graph. Built fresh per run and read-only afterwards.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, EdgeKind>,
    index: HashMap<NodeKey, NodeIndex>,
    edge_set: HashSet<(NodeIndex, NodeIndex)>,
    sheets: Vec<String>,
    symbolic_references: usize,
}

impl DependencyGraph {
    pub fn new(sheets: Vec<String>) -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            edge_set: HashSet::new(),
            sheets,
            symbolic_references: 0,
        }
    }

    /// Add a node. A node already present under the same key is kept.
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        let key = node.key();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(node);
        self.index.insert(key, idx);
        idx
    }

    /// Ensure a key exists as a node, creating a leaf or pseudo-node if needed.
    pub fn ensure_node(&mut self, key: &NodeKey) -> NodeIndex {
        if let Some(&idx) = self.index.get(key) {
            return idx;
        }
        self.add_node(GraphNode::from_key(key.clone()))
    }

    /// Add an edge unless the same pair is already linked. Returns whether it
    /// was added.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) -> bool {
        if !self.edge_set.insert((from, to)) {
            return false;
        }
        self.graph.add_edge(from, to, kind);
        true
    }

    pub(crate) fn add_symbolic_references(&mut self, count: usize) {
        self.symbolic_references += count;
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    pub fn find(&self, key: &NodeKey) -> Option<NodeIndex> {
        self.index.get(key).copied()
    }

    pub fn formula(&self, address: &CellAddress) -> Option<&FormulaNode> {
        self.find(&NodeKey::Cell(address.clone()))
            .and_then(|idx| self.graph[idx].as_formula())
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode)> {
        self.graph
            .node_indices()
            .map(move |idx| (idx, &self.graph[idx]))
    }

    /// Formula nodes in insertion order.
    pub fn formula_nodes(&self) -> impl Iterator<Item = (NodeIndex, &FormulaNode)> {
        self.nodes()
            .filter_map(|(idx, node)| node.as_formula().map(|f| (idx, f)))
    }

    /// Outgoing edges in insertion order.
    pub fn references(&self, idx: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
        let mut out: Vec<(EdgeIndex, NodeIndex, EdgeKind)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), *e.weight()))
            .collect();
        out.sort_by_key(|(id, _, _)| *id);
        out.into_iter().map(|(_, t, k)| (t, k)).collect()
    }

    /// Nodes with an edge into `idx`, sorted by index.
    pub fn dependents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Formula nodes `idx` reads, directly or through a range pseudo-node.
    pub fn formula_precedents(&self, idx: NodeIndex) -> BTreeSet<NodeIndex> {
        let mut out = BTreeSet::new();
        for target in self.graph.neighbors_directed(idx, Direction::Outgoing) {
            match &self.graph[target] {
                GraphNode::Formula(_) => {
                    out.insert(target);
                }
                GraphNode::Range { .. } | GraphNode::Unbounded { .. } => {
                    out.extend(
                        self.graph
                            .neighbors_directed(target, Direction::Outgoing)
                            .filter(|n| self.graph[*n].is_formula()),
                    );
                }
                _ => {}
            }
        }
        out
    }

    /// Formula nodes that read `idx`, directly or through a range pseudo-node.
    pub fn formula_dependents(&self, idx: NodeIndex) -> BTreeSet<NodeIndex> {
        let mut out = BTreeSet::new();
        for source in self.graph.neighbors_directed(idx, Direction::Incoming) {
            match &self.graph[source] {
                GraphNode::Formula(_) => {
                    out.insert(source);
                }
                GraphNode::Range { .. } | GraphNode::Unbounded { .. } => {
                    out.extend(
                        self.graph
                            .neighbors_directed(source, Direction::Incoming)
                            .filter(|n| self.graph[*n].is_formula()),
                    );
                }
                _ => {}
            }
        }
        out
    }

    pub fn has_self_loop(&self, idx: NodeIndex) -> bool {
        self.edge_set.contains(&(idx, idx))
    }

    /// Every edge with its endpoints, in insertion order.
    pub fn edges(&self) -> Vec<(NodeIndex, NodeIndex, EdgeKind)> {
        self.graph
            .edge_references()
            .map(|e| (e.source(), e.target(), *e.weight()))
            .collect()
    }

    pub fn sheets(&self) -> &[String] {
        &self.sheets
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            edges: self.graph.edge_count(),
            symbolic_references: self.symbolic_references,
            ..Default::default()
        };
        for node in self.graph.node_weights() {
            match node {
                GraphNode::Formula(_) => stats.formula_cells += 1,
                GraphNode::Leaf { malformed, .. } => {
                    stats.leaf_cells += 1;
                    if *malformed {
                        stats.malformed_formulas += 1;
                    }
                }
                GraphNode::Range { .. } => stats.range_nodes += 1,
                GraphNode::Unbounded { .. } => stats.unbounded_nodes += 1,
                GraphNode::External { .. } => stats.external_nodes += 1,
            }
        }
        stats
    }

    fn edge_triples(&self) -> Vec<(NodeKey, NodeKey, EdgeKind)> {
        let mut triples: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].key(),
                    self.graph[e.target()].key(),
                    *e.weight(),
                )
            })
            .collect();
        triples.sort();
        triples
    }
}

/// Structural equality: same nodes by key and content, same edges.
impl PartialEq for DependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        if self.sheets != other.sheets
            || self.node_count() != other.node_count()
            || self.edge_count() != other.edge_count()
        {
            return false;
        }
        let mine: BTreeMap<NodeKey, &GraphNode> =
            self.graph.node_weights().map(|n| (n.key(), n)).collect();
        let theirs: BTreeMap<NodeKey, &GraphNode> =
            other.graph.node_weights().map(|n| (n.key(), n)).collect();
        mine == theirs && self.edge_triples() == other.edge_triples()
    }
}
