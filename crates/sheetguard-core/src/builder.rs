use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use tracing::debug;

use crate::config::GraphConfig;
use crate::error::FormulaError;
use crate::finding::{FindingKind, FindingScope, RiskFinding};
use crate::graph::{DependencyGraph, EdgeKind, FormulaNode, GraphNode, NodeKey};
use crate::resolver::{ResolvedFormula, ResolvedRef, Resolver};
use crate::token::Token;
use crate::tokenizer::tokenize;
use crate::types::{CellAddress, RangeAddress};
use crate::workbook::{Sheet, Workbook};

/// Graph plus the recoverable errors met while building it, already turned
/// into findings.
pub struct BuildOutput {
    pub graph: DependencyGraph,
    pub findings: Vec<RiskFinding>,
}

/// One formula cell after tokenizing and resolving.
enum ParsedCell {
    Parsed {
        address: CellAddress,
        formula: String,
        tokens: Vec<Token>,
        resolved: ResolvedFormula,
    },
    Malformed {
        address: CellAddress,
        formula: String,
        error: FormulaError,
    },
}

/// Build the dependency graph for a workbook.
///
/// Sheets are parsed in parallel; the graph itself is assembled on one thread
/// in sheet order, then row-major cell order, then token order.
pub fn build_graph(workbook: &Workbook, config: &GraphConfig) -> BuildOutput {
    let resolver = Resolver::new(workbook);

    let parsed: Vec<Vec<ParsedCell>> = workbook
        .sheets
        .par_iter()
        .map(|sheet| parse_sheet(sheet, &resolver))
        .collect();

    let mut graph = DependencyGraph::new(workbook.sheet_names());
    let mut findings = Vec::new();

    // Formula nodes first, so a reference to a formula cell never creates a leaf.
    let mut formula_cells: HashMap<String, BTreeMap<(u32, u32), NodeIndex>> = HashMap::new();
    for cell in parsed.iter().flatten() {
        match cell {
            ParsedCell::Parsed {
                address,
                formula,
                tokens,
                resolved,
            } => {
                let idx = graph.add_node(GraphNode::Formula(Box::new(FormulaNode {
                    address: address.clone(),
                    formula: formula.clone(),
                    tokens: tokens.clone(),
                    references: resolved.references.clone(),
                })));
                formula_cells
                    .entry(address.sheet.clone())
                    .or_default()
                    .insert((address.row, address.col), idx);
            }
            ParsedCell::Malformed { address, .. } => {
                graph.add_node(GraphNode::Leaf {
                    address: address.clone(),
                    malformed: true,
                });
            }
        }
    }

    let mut linked: HashSet<NodeIndex> = HashSet::new();
    let mut dropped = 0usize;

    for cell in parsed.iter().flatten() {
        match cell {
            ParsedCell::Parsed {
                address, resolved, ..
            } => {
                let Some(from) = graph.find(&NodeKey::Cell(address.clone())) else {
                    continue;
                };
                for reference in &resolved.references {
                    add_reference_edges(
                        &mut graph,
                        workbook,
                        config,
                        &formula_cells,
                        &mut linked,
                        from,
                        reference,
                    );
                }
                graph.add_symbolic_references(resolved.symbolic.len());

                let mut seen = HashSet::new();
                for error in &resolved.errors {
                    if let FormulaError::UnresolvableReference { reference, reason } = error {
                        dropped += 1;
                        if !seen.insert(reference.clone()) {
                            continue;
                        }
                        findings.push(
                            RiskFinding::new(
                                FindingKind::UnresolvableReference {
                                    reference: reference.clone(),
                                    reason: reason.clone(),
                                },
                                FindingScope::Cell(address.clone()),
                                format!("Reference `{reference}` cannot be resolved: {reason}"),
                            )
                            .with_suggestion(
                                "Repair or remove the reference; it no longer points at anything in this workbook",
                            ),
                        );
                    }
                }
            }
            ParsedCell::Malformed {
                address,
                formula,
                error,
            } => {
                let (position, reason) = match error {
                    FormulaError::MalformedFormula {
                        position, reason, ..
                    } => (*position, reason.clone()),
                    other => (0, other.to_string()),
                };
                findings.push(
                    RiskFinding::new(
                        FindingKind::ParseError {
                            formula: formula.clone(),
                            position,
                            reason: reason.clone(),
                        },
                        FindingScope::Cell(address.clone()),
                        format!("Formula could not be parsed: {reason} at position {position}"),
                    )
                    .with_suggestion("The cell is treated as a value; check the formula text"),
                );
            }
        }
    }

    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        dropped_references = dropped,
        "dependency graph built"
    );

    BuildOutput { graph, findings }
}

fn parse_sheet(sheet: &Sheet, resolver: &Resolver<'_>) -> Vec<ParsedCell> {
    let mut malformed = 0usize;
    let cells: Vec<ParsedCell> = sheet
        .formulas()
        .map(|((row, col), text)| {
            let address = CellAddress::new(sheet.name.clone(), row, col);
            match tokenize(text, &address) {
                Ok(tokens) => {
                    let resolved = resolver.resolve_all(&tokens, &address);
                    ParsedCell::Parsed {
                        address,
                        formula: text.to_string(),
                        tokens,
                        resolved,
                    }
                }
                Err(error) => {
                    malformed += 1;
                    debug!(cell = %address, "malformed formula: {error}");
                    ParsedCell::Malformed {
                        address,
                        formula: text.to_string(),
                        error,
                    }
                }
            }
        })
        .collect();
    debug!(sheet = %sheet.name, formulas = cells.len(), malformed, "sheet parsed");
    cells
}

fn add_reference_edges(
    graph: &mut DependencyGraph,
    workbook: &Workbook,
    config: &GraphConfig,
    formula_cells: &HashMap<String, BTreeMap<(u32, u32), NodeIndex>>,
    linked: &mut HashSet<NodeIndex>,
    from: NodeIndex,
    reference: &ResolvedRef,
) {
    match reference {
        ResolvedRef::Cell(cell) => {
            let to = graph.ensure_node(&NodeKey::Cell(cell.clone()));
            graph.add_edge(from, to, EdgeKind::Direct);
        }
        ResolvedRef::Range(range) if range.cell_count() <= config.expand_threshold => {
            // Only cells that hold something become nodes.
            let Some(sheet) = workbook.sheet(&range.sheet) else {
                return;
            };
            let b = range.bounds();
            let occupied = sheet
                .cells
                .range((b.first_row, 0)..=(b.last_row, u32::MAX))
                .filter(|((_, col), _)| *col >= b.first_col && *col <= b.last_col);
            for (&(row, col), _) in occupied {
                let key = NodeKey::Cell(CellAddress::new(range.sheet.clone(), row, col));
                let to = graph.ensure_node(&key);
                graph.add_edge(from, to, EdgeKind::Expanded);
            }
        }
        ResolvedRef::Range(range) | ResolvedRef::Unbounded(range) => {
            let to = graph.ensure_node(&NodeKey::from(reference));
            graph.add_edge(from, to, EdgeKind::Pseudo);
            if config.link_formula_cells && linked.insert(to) {
                link_contained(graph, formula_cells, to, range);
            }
        }
        ResolvedRef::External(_) => {
            let to = graph.ensure_node(&NodeKey::from(reference));
            graph.add_edge(from, to, EdgeKind::Pseudo);
        }
    }
}

/// Link a range pseudo-node to every formula cell it covers. Formula cells
/// all lie inside the used range, so this is bounded by the sheet's content.
fn link_contained(
    graph: &mut DependencyGraph,
    formula_cells: &HashMap<String, BTreeMap<(u32, u32), NodeIndex>>,
    pseudo: NodeIndex,
    range: &RangeAddress,
) {
    let Some(cells) = formula_cells.get(&range.sheet) else {
        return;
    };
    let b = range.bounds();
    let covered: Vec<NodeIndex> = cells
        .range((b.first_row, 0)..=(b.last_row, u32::MAX))
        .filter(|((_, col), _)| *col >= b.first_col && *col <= b.last_col)
        .map(|(_, &idx)| idx)
        .collect();
    for idx in covered {
        graph.add_edge(pseudo, idx, EdgeKind::Contained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::RiskCategory;
    use crate::workbook::{RawCell, SheetData, WorkbookData};

    fn build(cells: Vec<RawCell>) -> BuildOutput {
        let data = WorkbookData::new("wb").with_sheet(SheetData::new("S").with_cells(cells));
        build_graph(&Workbook::from_data(&data), &GraphConfig::default())
    }

    fn key(row: u32, col: u32) -> NodeKey {
        NodeKey::Cell(CellAddress::new("S", row, col))
    }

    #[test]
    fn test_value_cells_become_leaves() {
        let out = build(vec![
            RawCell::number(0, 0, 3.0),
            RawCell::formula(0, 1, "=A1*2"),
        ]);
        let leaf = out.graph.find(&key(0, 0)).unwrap();
        assert!(matches!(
            out.graph.node(leaf),
            GraphNode::Leaf {
                malformed: false,
                ..
            }
        ));
        let formula = out.graph.find(&key(0, 1)).unwrap();
        assert_eq!(out.graph.references(formula), vec![(leaf, EdgeKind::Direct)]);
    }

    #[test]
    fn test_edges_follow_token_order() {
        let out = build(vec![RawCell::formula(5, 5, "=C1+A1+B1")]);
        let from = out.graph.find(&key(5, 5)).unwrap();
        let targets: Vec<NodeKey> = out
            .graph
            .references(from)
            .into_iter()
            .map(|(t, _)| out.graph.node(t).key())
            .collect();
        assert_eq!(targets, vec![key(0, 2), key(0, 0), key(0, 1)]);
    }

    #[test]
    fn test_small_range_expands_to_occupied_cells() {
        let out = build(vec![
            RawCell::number(0, 0, 1.0),
            RawCell::number(2, 0, 1.0),
            RawCell::formula(9, 0, "=SUM(A1:A5)"),
        ]);
        let from = out.graph.find(&key(9, 0)).unwrap();
        let refs = out.graph.references(from);
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|(_, kind)| *kind == EdgeKind::Expanded));
    }

    #[test]
    fn test_whole_column_points_at_one_pseudo_node() {
        let out = build(vec![
            RawCell::formula(3, 0, "=1+1"),
            RawCell::formula(0, 2, "=SUM(A:A)"),
        ]);
        assert_eq!(out.graph.stats().unbounded_nodes, 1);
        assert!(out.graph.node_count() < 10);
        let total = out.graph.find(&key(0, 2)).unwrap();
        let inside = out.graph.find(&key(3, 0)).unwrap();
        assert!(out.graph.formula_precedents(total).contains(&inside));
    }

    #[test]
    fn test_large_bounded_range_uses_range_node() {
        let out = build(vec![RawCell::formula(0, 5, "=SUM(A1:B500)")]);
        assert_eq!(out.graph.stats().range_nodes, 1);
    }

    #[test]
    fn test_large_bounded_range_links_its_own_reader() {
        let out = build(vec![
            RawCell::formula(0, 1, "=SUM(A1:A300)"),
            RawCell::formula(149, 0, "=B1*2"),
        ]);
        assert_eq!(out.graph.stats().range_nodes, 1);
        let total = out.graph.find(&key(0, 1)).unwrap();
        let inside = out.graph.find(&key(149, 0)).unwrap();
        assert!(out.graph.formula_precedents(total).contains(&inside));
        assert!(out.graph.formula_dependents(total).contains(&inside));
    }

    #[test]
    fn test_malformed_formula_is_opaque_leaf() {
        let out = build(vec![
            RawCell::formula(0, 0, "=SUM(B1"),
            RawCell::formula(0, 1, "=A1+1"),
        ]);
        let bad = out.graph.find(&key(0, 0)).unwrap();
        assert!(matches!(
            out.graph.node(bad),
            GraphNode::Leaf {
                malformed: true,
                ..
            }
        ));
        assert!(out.graph.references(bad).is_empty());
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].category(), RiskCategory::ParseError);
    }

    #[test]
    fn test_unknown_sheet_drops_edge_with_finding() {
        let out = build(vec![RawCell::formula(0, 0, "=Gone!A1+B1")]);
        let from = out.graph.find(&key(0, 0)).unwrap();
        assert_eq!(out.graph.references(from).len(), 1);
        assert_eq!(out.findings.len(), 1);
        assert_eq!(
            out.findings[0].category(),
            RiskCategory::UnresolvableReference
        );
    }

    #[test]
    fn test_rebuild_is_structurally_equal() {
        let cells = vec![
            RawCell::number(0, 0, 2.0),
            RawCell::formula(0, 1, "=A1*2"),
            RawCell::formula(0, 2, "=SUM(A:B)+B1"),
            RawCell::formula(0, 3, "=[1]Other!A1"),
        ];
        let a = build(cells.clone());
        let b = build(cells);
        assert_eq!(a.graph, b.graph);
    }
}
