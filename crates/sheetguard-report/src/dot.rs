use std::collections::{BTreeMap, HashSet};

use petgraph::graph::NodeIndex;

use sheetguard_core::cycles::CycleReport;
use sheetguard_core::graph::{DependencyGraph, EdgeKind, GraphNode, NodeKey};

/// Generate a GraphViz DOT diagram of the dependency graph: one cluster per
/// sheet, pseudo-nodes outside, cycle edges in red.
pub fn generate_dependency_diagram(graph: &DependencyGraph, cycles: &CycleReport) -> String {
    let mut out = String::new();
    out.push_str("digraph workbook {\n");
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, style=filled, fillcolor=white];\n\n");

    let mut by_sheet: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut outside: Vec<String> = Vec::new();
    for (idx, node) in graph.nodes() {
        let line = node_line(idx, node);
        let slot = match node {
            GraphNode::Formula(_) | GraphNode::Leaf { .. } => node
                .sheet()
                .and_then(|s| graph.sheets().iter().position(|name| name == s)),
            _ => None,
        };
        match slot {
            Some(i) => by_sheet.entry(i).or_default().push(line),
            None => outside.push(line),
        }
    }

    for (i, lines) in &by_sheet {
        let sheet = &graph.sheets()[*i];
        // The index keeps sheets whose names sanitize alike apart.
        out.push_str(&format!("  subgraph cluster_{i}_{} {{\n", clean_id(sheet)));
        out.push_str(&format!("    label=\"{}\";\n", escape_label(sheet)));
        out.push_str("    style=rounded;\n");
        out.push_str("    color=\"#9e9e9e\";\n");
        for line in lines {
            out.push_str(&format!("    {line}\n"));
        }
        out.push_str("  }\n\n");
    }
    for line in &outside {
        out.push_str(&format!("  {line}\n"));
    }
    if !outside.is_empty() {
        out.push('\n');
    }

    let cyclic = cycle_edges(graph, cycles);
    for (from, to, kind) in graph.edges() {
        let (a, b) = (from.index(), to.index());
        if cyclic.contains(&(from, to)) {
            out.push_str(&format!("  n{a} -> n{b} [color=red, penwidth=2];\n"));
            continue;
        }
        match kind {
            EdgeKind::Direct | EdgeKind::Expanded => out.push_str(&format!("  n{a} -> n{b};\n")),
            EdgeKind::Pseudo => out.push_str(&format!("  n{a} -> n{b} [style=dashed];\n")),
            EdgeKind::Contained => {
                out.push_str(&format!("  n{a} -> n{b} [style=dotted, arrowhead=none];\n"))
            }
        }
    }

    out.push_str("}\n");
    out
}

fn node_line(idx: NodeIndex, node: &GraphNode) -> String {
    let id = idx.index();
    match node {
        GraphNode::Formula(f) => format!(
            "n{id} [label=\"{}\\n{}\", tooltip=\"{}\"];",
            escape_label(&f.address.a1()),
            escape_label(&truncate(&f.formula, 40)),
            escape_label(&f.formula)
        ),
        GraphNode::Leaf { address, malformed } => {
            if *malformed {
                format!(
                    "n{id} [label=\"{}\", fillcolor=\"#fdecea\", color=red];",
                    escape_label(&address.a1())
                )
            } else {
                format!(
                    "n{id} [label=\"{}\", shape=ellipse, fillcolor=\"#f5f5f5\"];",
                    escape_label(&address.a1())
                )
            }
        }
        GraphNode::Range { range } => format!(
            "n{id} [label=\"{}\", shape=folder, fillcolor=\"#e3f2fd\"];",
            escape_label(&range.to_string())
        ),
        GraphNode::Unbounded { range } => format!(
            "n{id} [label=\"{}\", shape=folder, style=\"filled,dashed\", fillcolor=\"#fff4e5\"];",
            escape_label(&range.to_string())
        ),
        GraphNode::External { target } => format!(
            "n{id} [label=\"{}\", shape=octagon, fillcolor=\"#fdecea\"];",
            escape_label(&target.to_string())
        ),
    }
}

/// Edges that lie on a reported cycle or inside a cycle cluster.
fn cycle_edges(graph: &DependencyGraph, cycles: &CycleReport) -> HashSet<(NodeIndex, NodeIndex)> {
    let index = |address| graph.find(&NodeKey::Cell(address));
    let mut edges = HashSet::new();
    for cycle in &cycles.cycles {
        for pair in cycle.cells.windows(2) {
            if let (Some(a), Some(b)) = (index(pair[0].clone()), index(pair[1].clone())) {
                edges.insert((a, b));
            }
        }
    }
    for cluster in &cycles.clusters {
        let members: HashSet<NodeIndex> = cluster
            .members
            .iter()
            .filter_map(|m| index(m.clone()))
            .collect();
        for &from in &members {
            for (to, _) in graph.references(from) {
                if members.contains(&to) {
                    edges.insert((from, to));
                }
            }
        }
    }
    edges
}

/// Generate a simplified DOT diagram of sheet-to-sheet references with counts.
pub fn generate_sheet_flow(graph: &DependencyGraph) -> String {
    let mut out = String::new();
    out.push_str("digraph sheet_flow {\n");
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, style=filled, fillcolor=\"#e8f5e9\"];\n\n");

    let mut formulas: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, f) in graph.formula_nodes() {
        *formulas.entry(f.address.sheet.as_str()).or_insert(0) += 1;
    }
    for sheet in graph.sheets() {
        let count = formulas.get(sheet.as_str()).copied().unwrap_or(0);
        out.push_str(&format!(
            "  {} [label=\"{} ({count})\"];\n",
            sheet_id(graph, sheet),
            escape_label(sheet)
        ));
    }
    out.push('\n');

    // Count edges between sheets; external targets are grouped per workbook.
    let mut flows: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut externals: BTreeMap<String, String> = BTreeMap::new();
    let mut external_ids: BTreeMap<String, String> = BTreeMap::new();
    for (from, to, kind) in graph.edges() {
        if kind == EdgeKind::Contained {
            continue;
        }
        let Some(src) = graph.node(from).sheet() else {
            continue;
        };
        let tgt = match graph.node(to) {
            GraphNode::External { target } => {
                let next = external_ids.len();
                let id = external_ids
                    .entry(target.workbook.clone())
                    .or_insert_with(|| format!("ext{next}_{}", clean_id(&target.workbook)))
                    .clone();
                externals.insert(id.clone(), target.workbook.clone());
                id
            }
            node => match node.sheet() {
                Some(s) => sheet_id(graph, s),
                None => continue,
            },
        };
        *flows.entry((sheet_id(graph, src), tgt)).or_insert(0) += 1;
    }

    for (id, workbook) in &externals {
        out.push_str(&format!(
            "  {id} [label=\"[{}]\", shape=octagon, fillcolor=\"#fdecea\"];\n",
            escape_label(workbook)
        ));
    }
    for ((from, to), total) in &flows {
        if externals.contains_key(to) {
            out.push_str(&format!(
                "  {from} -> {to} [color=red, style=dashed, label=\"{total} refs\"];\n"
            ));
        } else {
            out.push_str(&format!("  {from} -> {to} [label=\"{total} refs\"];\n"));
        }
    }

    out.push_str("}\n");
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn escape_label(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Sanitize a string to be a valid DOT node ID.
fn clean_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn sanitize_dot_id(s: &str) -> String {
    let cleaned = clean_id(s);
    // DOT IDs must start with a letter or underscore
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) || cleaned.is_empty() {
        format!("s_{cleaned}")
    } else {
        cleaned
    }
}

/// Node id of a sheet, unique per sheet position.
fn sheet_id(graph: &DependencyGraph, sheet: &str) -> String {
    match graph.sheets().iter().position(|s| s == sheet) {
        Some(i) => format!("s{i}_{}", clean_id(sheet)),
        None => sanitize_dot_id(sheet),
    }
}
