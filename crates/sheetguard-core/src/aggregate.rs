use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::finding::{RiskCategory, RiskFinding};
use crate::graph::GraphStats;
use crate::impact::ImpactEntry;
use crate::types::Severity;

/// Roll-up score. Field order gives the derived ordering: highest level
/// first, then how many findings sit at that level, then the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeverityScore {
    /// `None` for a clean scope.
    pub level: Option<Severity>,
    pub at_level: usize,
    pub total: usize,
}

impl SeverityScore {
    pub fn of(findings: &[RiskFinding]) -> Self {
        let level = findings.iter().map(|f| f.severity).max();
        let at_level = findings.iter().filter(|f| Some(f.severity) == level).count();
        Self {
            level,
            at_level,
            total: findings.len(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.level.is_none()
    }

    pub fn label(&self) -> &'static str {
        match self.level {
            None => "clean",
            Some(Severity::Low) => "low",
            Some(Severity::Medium) => "medium",
            Some(Severity::High) => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSummary {
    pub name: String,
    pub score: SeverityScore,
    pub formula_cells: usize,
    pub findings: Vec<RiskFinding>,
}

/// Final result of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub workbook: String,
    pub score: SeverityScore,
    pub sheets: Vec<SheetSummary>,
    /// Findings not attached to any known sheet.
    pub workbook_findings: Vec<RiskFinding>,
    pub stats: GraphStats,
    pub high_impact: Vec<ImpactEntry>,
}

impl AuditReport {
    pub fn findings(&self) -> impl Iterator<Item = &RiskFinding> {
        self.sheets
            .iter()
            .flat_map(|s| s.findings.iter())
            .chain(self.workbook_findings.iter())
    }

    pub fn finding_count(&self) -> usize {
        self.score.total
    }

    pub fn is_clean(&self) -> bool {
        self.score.is_clean()
    }

    /// Findings at or above `threshold`.
    pub fn count_at_or_above(&self, threshold: Severity) -> usize {
        self.findings().filter(|f| f.severity >= threshold).count()
    }

    /// Finding counts per category, in category order. Categories without
    /// findings are omitted.
    pub fn counts_by_category(&self) -> BTreeMap<RiskCategory, usize> {
        let mut counts = BTreeMap::new();
        for finding in self.findings() {
            *counts.entry(finding.category()).or_insert(0) += 1;
        }
        counts
    }
}

/// Group findings by sheet (in the given sheet order) and score each level.
///
/// `sheets` pairs each sheet name with its formula cell count.
pub fn aggregate(
    workbook: &str,
    sheets: &[(String, usize)],
    findings: Vec<RiskFinding>,
    stats: GraphStats,
    high_impact: Vec<ImpactEntry>,
) -> AuditReport {
    let mut per_sheet: Vec<Vec<RiskFinding>> = vec![Vec::new(); sheets.len()];
    let mut workbook_findings = Vec::new();
    for finding in findings {
        let slot = finding
            .location
            .sheet()
            .and_then(|name| sheets.iter().position(|(s, _)| s == name));
        match slot {
            Some(i) => per_sheet[i].push(finding),
            None => workbook_findings.push(finding),
        }
    }

    let summaries: Vec<SheetSummary> = sheets
        .iter()
        .zip(per_sheet)
        .map(|((name, formula_cells), mut findings)| {
            findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            SheetSummary {
                name: name.clone(),
                score: SeverityScore::of(&findings),
                formula_cells: *formula_cells,
                findings,
            }
        })
        .collect();
    workbook_findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    // The workbook takes its worst sheet's level; totals cover everything.
    let worst = summaries
        .iter()
        .map(|s| s.score)
        .chain(std::iter::once(SeverityScore::of(&workbook_findings)))
        .max()
        .unwrap_or_default();
    let total = summaries.iter().map(|s| s.score.total).sum::<usize>() + workbook_findings.len();

    AuditReport {
        workbook: workbook.to_string(),
        score: SeverityScore {
            level: worst.level,
            at_level: worst.at_level,
            total,
        },
        sheets: summaries,
        workbook_findings,
        stats,
        high_impact,
    }
}
