//! Formula drift: cells whose offset-normalized shape breaks the pattern of a
//! contiguous run of sibling formulas.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DriftConfig;
use crate::finding::{FindingKind, FindingScope, RiskFinding};
use crate::graph::DependencyGraph;
use crate::token::r1c1_shape;
use crate::types::{Bounds, CellAddress, RangeAddress};
use crate::workbook::{Sheet, Workbook};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAxis {
    Column,
    Row,
}

/// A contiguous run of sibling formula cells and its dominant shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftGroup {
    pub range: RangeAddress,
    pub axis: RunAxis,
    pub members: Vec<CellAddress>,
    /// Plurality shape, `None` when no shape reaches the dominance ratio.
    pub dominant_pattern: Option<String>,
    pub deviants: Vec<CellAddress>,
}

struct Member {
    address: CellAddress,
    shape: String,
}

/// Group runs and find deviants for every sheet, in workbook order.
pub fn analyze_drift(
    graph: &DependencyGraph,
    workbook: &Workbook,
    config: &DriftConfig,
) -> Vec<DriftGroup> {
    workbook
        .sheets
        .par_iter()
        .map(|sheet| sheet_groups(graph, sheet, config))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

fn sheet_groups(graph: &DependencyGraph, sheet: &Sheet, config: &DriftConfig) -> Vec<DriftGroup> {
    // Parsed formulas only; malformed cells break runs.
    let shapes: BTreeMap<(u32, u32), String> = sheet
        .formulas()
        .filter_map(|((row, col), _)| {
            let address = CellAddress::new(&sheet.name, row, col);
            graph
                .formula(&address)
                .map(|node| ((row, col), r1c1_shape(&node.tokens)))
        })
        .collect();
    if shapes.is_empty() {
        return Vec::new();
    }

    let regions: Vec<Bounds> = if sheet.regions.is_empty() {
        sheet.used_range.into_iter().collect()
    } else {
        sheet.regions.clone()
    };

    let mut groups = Vec::new();
    for region in &regions {
        for axis in [RunAxis::Column, RunAxis::Row] {
            for run in runs_in_region(&shapes, region, axis) {
                if run.len() < config.min_group_size.max(2) {
                    continue;
                }
                let members: Vec<Member> = run
                    .into_iter()
                    .map(|(row, col)| Member {
                        address: CellAddress::new(&sheet.name, row, col),
                        shape: shapes[&(row, col)].clone(),
                    })
                    .collect();
                groups.push(evaluate_group(&sheet.name, axis, members, config));
            }
        }
    }
    debug!(sheet = %sheet.name, groups = groups.len(), "grouped formula runs");
    groups
}

/// Maximal runs of adjacent formula cells along each column (or row) of a
/// region.
fn runs_in_region(
    shapes: &BTreeMap<(u32, u32), String>,
    region: &Bounds,
    axis: RunAxis,
) -> Vec<Vec<(u32, u32)>> {
    let mut lines: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for &(row, col) in shapes.keys() {
        if !region.contains(row, col) {
            continue;
        }
        match axis {
            RunAxis::Column => lines.entry(col).or_default().push(row),
            RunAxis::Row => lines.entry(row).or_default().push(col),
        }
    }

    let mut runs = Vec::new();
    for (line, positions) in lines {
        let cell = |pos: u32| match axis {
            RunAxis::Column => (pos, line),
            RunAxis::Row => (line, pos),
        };
        let mut current: Vec<(u32, u32)> = Vec::new();
        let mut previous: Option<u32> = None;
        // Keys come from a BTreeMap, so positions are ascending.
        for pos in positions {
            if previous.is_some_and(|p| p + 1 != pos) {
                runs.push(std::mem::take(&mut current));
            }
            current.push(cell(pos));
            previous = Some(pos);
        }
        if !current.is_empty() {
            runs.push(current);
        }
    }
    runs
}

fn evaluate_group(
    sheet: &str,
    axis: RunAxis,
    members: Vec<Member>,
    config: &DriftConfig,
) -> DriftGroup {
    // Shape -> (count, first member index); members are in address order.
    let mut votes: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for (i, member) in members.iter().enumerate() {
        votes
            .entry(member.shape.as_str())
            .and_modify(|v| v.0 += 1)
            .or_insert((1, i));
    }
    let winner = votes
        .iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
        .map(|(shape, (count, _))| (shape.to_string(), *count));

    let first = &members[0].address;
    let last = &members[members.len() - 1].address;
    let range = RangeAddress::cells(sheet, (first.row, first.col), (last.row, last.col));

    let dominant_pattern = winner.and_then(|(shape, count)| {
        let ratio = count as f64 / members.len() as f64;
        (ratio >= config.min_dominant_ratio && count > 1).then_some(shape)
    });
    let deviants = match &dominant_pattern {
        Some(pattern) => members
            .iter()
            .filter(|m| &m.shape != pattern)
            .map(|m| m.address.clone())
            .collect(),
        None => Vec::new(),
    };

    DriftGroup {
        range,
        axis,
        members: members.into_iter().map(|m| m.address).collect(),
        dominant_pattern,
        deviants,
    }
}

/// One `FormulaDrift` finding per deviating cell. A cell that deviates in
/// both a row and a column run is reported once, for the first group.
pub fn drift_findings(groups: &[DriftGroup], graph: &DependencyGraph) -> Vec<RiskFinding> {
    let mut seen: HashSet<&CellAddress> = HashSet::new();
    let mut findings = Vec::new();
    for group in groups {
        let Some(expected) = &group.dominant_pattern else {
            continue;
        };
        for deviant in &group.deviants {
            if !seen.insert(deviant) {
                continue;
            }
            let Some(node) = graph.formula(deviant) else {
                continue;
            };
            let actual = r1c1_shape(&node.tokens);
            findings.push(
                RiskFinding::new(
                    FindingKind::FormulaDrift {
                        formula: node.formula.clone(),
                        expected_pattern: expected.clone(),
                        actual_pattern: actual.clone(),
                        group: group.range.clone(),
                    },
                    FindingScope::Cell(deviant.clone()),
                    format!(
                        "{} breaks the pattern of {}: expected {expected}, found {actual}",
                        deviant, group.range
                    ),
                )
                .with_suggestion("Copy the surrounding formula into this cell, or document why it differs"),
            );
        }
    }
    findings
}
