use std::collections::HashSet;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use tracing::warn;

use crate::config::Config;
use crate::finding::{FindingKind, FindingScope, RiskFinding};
use crate::graph::{DependencyGraph, FormulaNode, GraphNode};
use crate::token::{Literal, Operator, Punct, Token};
use crate::types::{ExternalTarget, RangeAddress};
use crate::workbook::Workbook;

/// Functions recalculated on every change regardless of their inputs.
pub const VOLATILE_FUNCTIONS: &[&str] = &[
    "NOW",
    "TODAY",
    "RAND",
    "RANDBETWEEN",
    "RANDARRAY",
    "OFFSET",
    "INDIRECT",
    "CELL",
    "INFO",
];

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern).case_insensitive(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, "ignoring invalid sheet pattern: {e}"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Per-node structural risk rules.
///
/// Classification reads the graph only, so running it twice yields the same
/// findings.
pub struct RiskClassifier {
    allowed_numbers: Vec<f64>,
    allowed_strings: HashSet<String>,
    flag_strings: bool,
    ignore_functions: HashSet<String>,
    volatile: HashSet<String>,
    orphan_excludes: GlobSet,
    exclude_last_row_or_col: bool,
}

impl RiskClassifier {
    pub fn new(config: &Config) -> Self {
        let volatile = VOLATILE_FUNCTIONS
            .iter()
            .map(|s| s.to_string())
            .chain(
                config
                    .volatile
                    .additional_functions
                    .iter()
                    .map(|s| s.to_uppercase()),
            )
            .collect();
        Self {
            allowed_numbers: config.constants.allowed_numbers.clone(),
            allowed_strings: config.constants.allowed_strings.iter().cloned().collect(),
            flag_strings: config.constants.flag_strings,
            ignore_functions: config
                .constants
                .ignore_functions
                .iter()
                .map(|s| s.to_uppercase())
                .collect(),
            volatile,
            orphan_excludes: build_globset(&config.orphans.exclude_sheets),
            exclude_last_row_or_col: config.orphans.exclude_last_row_or_col,
        }
    }

    /// Classify every formula node. Findings come out in node order.
    pub fn classify(&self, graph: &DependencyGraph, workbook: &Workbook) -> Vec<RiskFinding> {
        let nodes: Vec<(NodeIndex, &FormulaNode)> = graph.formula_nodes().collect();
        nodes
            .par_iter()
            .flat_map_iter(|(idx, node)| self.classify_node(graph, workbook, *idx, node))
            .collect()
    }

    /// All findings for one formula node, at most one per category.
    pub fn classify_node(
        &self,
        graph: &DependencyGraph,
        workbook: &Workbook,
        idx: NodeIndex,
        node: &FormulaNode,
    ) -> Vec<RiskFinding> {
        let mut findings = Vec::new();
        let here = FindingScope::Cell(node.address.clone());

        let literals = self.hardcoded_literals(&node.tokens);
        if !literals.is_empty() {
            findings.push(
                RiskFinding::new(
                    FindingKind::HardcodedConstant {
                        literals: literals.clone(),
                    },
                    here.clone(),
                    format!("Formula embeds hard-coded value(s) {}", literals.join(", ")),
                )
                .with_suggestion("Move assumptions into labelled input cells and reference them"),
            );
        }

        let functions = self.volatile_functions(&node.tokens);
        if !functions.is_empty() {
            findings.push(
                RiskFinding::new(
                    FindingKind::VolatileFunction {
                        functions: functions.clone(),
                    },
                    here.clone(),
                    format!(
                        "Volatile function(s) {} recalculate on every change",
                        functions.join(", ")
                    ),
                )
                .with_suggestion("Replace with a direct reference or a static input where possible"),
            );
        }

        let (unbounded, external) = pseudo_targets(graph, idx);
        if !unbounded.is_empty() {
            let list: Vec<String> = unbounded.iter().map(|r| r.to_string()).collect();
            findings.push(
                RiskFinding::new(
                    FindingKind::WholeRowColumnRef { ranges: unbounded },
                    here.clone(),
                    format!("Whole row/column reference {}", list.join(", ")),
                )
                .with_suggestion("Limit the reference to the rows or columns actually in use"),
            );
        }
        if !external.is_empty() {
            let list: Vec<String> = external.iter().map(|t| t.to_string()).collect();
            findings.push(
                RiskFinding::new(
                    FindingKind::ExternalReference { targets: external },
                    here.clone(),
                    format!("Formula reads from another workbook: {}", list.join(", ")),
                )
                .with_suggestion("Import the values into this workbook or document the link"),
            );
        }

        if self.is_orphan(graph, workbook, idx, node) {
            findings.push(
                RiskFinding::new(
                    FindingKind::OrphanCalculation,
                    here,
                    format!(
                        "{} neither feeds nor depends on any other formula",
                        node.address
                    ),
                )
                .with_suggestion("Remove the calculation or connect it to the model"),
            );
        }

        findings
    }

    /// Literal operands that are not on the allow-list, in formula order,
    /// without duplicates.
    pub fn hardcoded_literals(&self, tokens: &[Token]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        // Innermost open bracket's function, `None` for grouping or arrays.
        let mut enclosing: Vec<Option<String>> = Vec::new();
        let mut pending: Option<&str> = None;

        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::FunctionCall { name } => pending = Some(name),
                Token::Punct {
                    punct: Punct::OpenParen,
                } => enclosing.push(pending.take().map(str::to_string)),
                Token::Punct {
                    punct: Punct::ArrayOpen,
                } => enclosing.push(None),
                Token::Punct {
                    punct: Punct::CloseParen | Punct::ArrayClose,
                } => {
                    enclosing.pop();
                }
                Token::Literal { literal } => {
                    let exempt = enclosing
                        .last()
                        .and_then(|f| f.as_deref())
                        .is_some_and(|f| self.ignore_functions.contains(f));
                    if exempt {
                        continue;
                    }
                    let shown = match literal {
                        Literal::Number { value, raw } => {
                            let negated = i > 0
                                && tokens[i - 1]
                                    == Token::op(Operator::Negate);
                            let percent = tokens.get(i + 1) == Some(&Token::op(Operator::Percent));
                            let mut value = if negated { -*value } else { *value };
                            if percent {
                                value /= 100.0;
                            }
                            if self.number_allowed(value) {
                                continue;
                            }
                            let sign = if negated { "-" } else { "" };
                            let pct = if percent { "%" } else { "" };
                            format!("{sign}{raw}{pct}")
                        }
                        Literal::Text(text) => {
                            if !self.flag_strings || self.allowed_strings.contains(text) {
                                continue;
                            }
                            format!("\"{text}\"")
                        }
                        Literal::Bool(_) | Literal::Error(_) => continue,
                    };
                    if !found.contains(&shown) {
                        found.push(shown);
                    }
                }
                _ => {}
            }
        }
        found
    }

    fn number_allowed(&self, value: f64) -> bool {
        self.allowed_numbers
            .iter()
            .any(|allowed| (allowed - value).abs() < 1e-12)
    }

    /// Volatile functions called, in formula order, without duplicates.
    pub fn volatile_functions(&self, tokens: &[Token]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for token in tokens {
            if let Token::FunctionCall { name } = token {
                if self.volatile.contains(name) && !found.contains(name) {
                    found.push(name.clone());
                }
            }
        }
        found
    }

    fn is_orphan(
        &self,
        graph: &DependencyGraph,
        workbook: &Workbook,
        idx: NodeIndex,
        node: &FormulaNode,
    ) -> bool {
        // A self-referencing cell is already reported as a cycle.
        if graph.has_self_loop(idx) {
            return false;
        }
        let sheet = &node.address.sheet;
        if self.orphan_excludes.is_match(sheet) {
            return false;
        }
        if self.exclude_last_row_or_col {
            let on_edge = workbook
                .sheet(sheet)
                .and_then(|s| s.used_range)
                .is_some_and(|b| node.address.row == b.last_row || node.address.col == b.last_col);
            if on_edge {
                return false;
            }
        }
        let dependents = graph.formula_dependents(idx);
        let precedents = graph.formula_precedents(idx);
        dependents.iter().all(|&n| n == idx) && precedents.iter().all(|&n| n == idx)
    }
}

/// Unbounded ranges and external targets the node points at, in edge order.
fn pseudo_targets(graph: &DependencyGraph, idx: NodeIndex) -> (Vec<RangeAddress>, Vec<ExternalTarget>) {
    let mut unbounded = Vec::new();
    let mut external = Vec::new();
    for (target, _) in graph.references(idx) {
        match graph.node(target) {
            GraphNode::Unbounded { range } => unbounded.push(range.clone()),
            GraphNode::External { target } => external.push(target.clone()),
            _ => {}
        }
    }
    (unbounded, external)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_graph;
    use crate::finding::RiskCategory;
    use crate::tokenizer::tokenize;
    use crate::types::CellAddress;
    use crate::workbook::{RawCell, SheetData, WorkbookData};

    fn classify_with(config: &Config, cells: Vec<RawCell>) -> Vec<RiskFinding> {
        let data = WorkbookData::new("wb").with_sheet(SheetData::new("S").with_cells(cells));
        let wb = Workbook::from_data(&data);
        let out = build_graph(&wb, &config.graph);
        RiskClassifier::new(config).classify(&out.graph, &wb)
    }

    fn classify(cells: Vec<RawCell>) -> Vec<RiskFinding> {
        classify_with(&Config::default(), cells)
    }

    fn categories_at(findings: &[RiskFinding], row: u32, col: u32) -> Vec<RiskCategory> {
        let here = FindingScope::Cell(CellAddress::new("S", row, col));
        findings
            .iter()
            .filter(|f| f.location == here)
            .map(|f| f.category())
            .collect()
    }

    fn literals(formula: &str) -> Vec<String> {
        let tokens = tokenize(formula, &CellAddress::new("S", 0, 0)).unwrap();
        RiskClassifier::new(&Config::default()).hardcoded_literals(&tokens)
    }

    #[test]
    fn test_hardcoded_constants_listed_not_references() {
        assert_eq!(literals("=A1*1.0825+1000"), vec!["1.0825", "1000"]);
    }

    #[test]
    fn test_conventional_numbers_are_exempt() {
        assert!(literals("=A1*-1+0").is_empty());
        assert!(literals("=B2-1").is_empty());
        assert!(literals("=IF(A1=\"\",0,1)").is_empty());
    }

    #[test]
    fn test_ignore_functions_exempt_direct_arguments() {
        assert!(literals("=ROUND(A1,2)").is_empty());
        assert!(literals("=VLOOKUP(A1,B1:D9,3,FALSE)").is_empty());
        assert_eq!(literals("=ROUND(SUM(A1,5),2)"), vec!["5"]);
    }

    #[test]
    fn test_percent_and_strings() {
        assert_eq!(literals("=A1*5%"), vec!["5%"]);
        assert_eq!(literals("=IF(A1>0,\"Yes\",\"\")"), vec!["\"Yes\""]);
        let mut config = Config::default();
        config.constants.flag_strings = false;
        let tokens = tokenize("=IF(A1>0,\"Yes\",\"\")", &CellAddress::new("S", 0, 0)).unwrap();
        assert!(RiskClassifier::new(&config)
            .hardcoded_literals(&tokens)
            .is_empty());
    }

    #[test]
    fn test_allow_list_is_configurable() {
        let mut config = Config::default();
        config.constants.allowed_numbers.push(12.0);
        let tokens = tokenize("=A1/12", &CellAddress::new("S", 0, 0)).unwrap();
        assert!(RiskClassifier::new(&config)
            .hardcoded_literals(&tokens)
            .is_empty());
    }

    #[test]
    fn test_volatile_functions() {
        let findings = classify(vec![
            RawCell::formula(0, 0, "=NOW()-TODAY()+NOW()"),
            RawCell::formula(0, 1, "=A1+1"),
        ]);
        let volatile: Vec<_> = findings
            .iter()
            .filter(|f| f.category() == RiskCategory::VolatileFunction)
            .collect();
        assert_eq!(volatile.len(), 1);
        assert_eq!(
            volatile[0].kind,
            FindingKind::VolatileFunction {
                functions: vec!["NOW".into(), "TODAY".into()]
            }
        );
    }

    #[test]
    fn test_additional_volatile_functions() {
        let mut config = Config::default();
        config.volatile.additional_functions = vec!["myclock".into()];
        let findings = classify_with(&config, vec![RawCell::formula(0, 0, "=MYCLOCK()")]);
        assert!(categories_at(&findings, 0, 0).contains(&RiskCategory::VolatileFunction));
    }

    #[test]
    fn test_whole_column_and_external() {
        let findings = classify(vec![
            RawCell::formula(0, 2, "=SUM(A:A)"),
            RawCell::formula(1, 2, "=[1]Rates!B2"),
        ]);
        assert!(categories_at(&findings, 0, 2).contains(&RiskCategory::WholeRowColumnRef));
        let external = categories_at(&findings, 1, 2);
        assert!(external.contains(&RiskCategory::ExternalReference));
    }

    #[test]
    fn test_orphan_detection() {
        let findings = classify(vec![
            RawCell::number(0, 0, 10.0),
            // B1 reads only a value cell, but C1 reads B1: not an orphan
            RawCell::formula(0, 1, "=A1*2"),
            RawCell::formula(0, 2, "=B1+A1"),
            // E5 is disconnected from every other formula
            RawCell::formula(4, 4, "=A1+A1"),
        ]);
        assert!(!categories_at(&findings, 0, 1).contains(&RiskCategory::OrphanCalculation));
        assert!(!categories_at(&findings, 0, 2).contains(&RiskCategory::OrphanCalculation));
        assert!(categories_at(&findings, 4, 4).contains(&RiskCategory::OrphanCalculation));
    }

    #[test]
    fn test_orphan_exclusions() {
        let mut config = Config::default();
        config.orphans.exclude_sheets = vec!["s".into()];
        let findings = classify_with(&config, vec![RawCell::formula(0, 0, "=1+1")]);
        assert!(findings.is_empty(), "sheet patterns match case-insensitively");

        let mut config = Config::default();
        config.orphans.exclude_last_row_or_col = true;
        let findings = classify_with(
            &config,
            vec![RawCell::number(0, 0, 1.0), RawCell::formula(5, 3, "=A1")],
        );
        assert!(!categories_at(&findings, 5, 3).contains(&RiskCategory::OrphanCalculation));
    }

    #[test]
    fn test_self_reference_is_not_also_orphan() {
        let findings = classify(vec![RawCell::formula(0, 0, "=A1+1")]);
        assert!(!categories_at(&findings, 0, 0).contains(&RiskCategory::OrphanCalculation));
    }

    #[test]
    fn test_classification_is_repeatable() {
        let cells = vec![
            RawCell::formula(0, 0, "=B1*1.2"),
            RawCell::formula(0, 1, "=RAND()"),
            RawCell::formula(0, 2, "=SUM(1:1)"),
        ];
        assert_eq!(classify(cells.clone()), classify(cells));
    }
}
