use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::{CellAddress, ExternalTarget, RangeAddress, Severity};

/// Structural risk categories, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    CircularReference,
    ExternalReference,
    HardcodedConstant,
    VolatileFunction,
    WholeRowColumnRef,
    FormulaDrift,
    OrphanCalculation,
    ParseError,
    UnresolvableReference,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 9] = [
        RiskCategory::CircularReference,
        RiskCategory::ExternalReference,
        RiskCategory::HardcodedConstant,
        RiskCategory::VolatileFunction,
        RiskCategory::WholeRowColumnRef,
        RiskCategory::FormulaDrift,
        RiskCategory::OrphanCalculation,
        RiskCategory::ParseError,
        RiskCategory::UnresolvableReference,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskCategory::CircularReference => "circular_reference",
            RiskCategory::ExternalReference => "external_reference",
            RiskCategory::HardcodedConstant => "hardcoded_constant",
            RiskCategory::VolatileFunction => "volatile_function",
            RiskCategory::WholeRowColumnRef => "whole_row_column_ref",
            RiskCategory::FormulaDrift => "formula_drift",
            RiskCategory::OrphanCalculation => "orphan_calculation",
            RiskCategory::ParseError => "parse_error",
            RiskCategory::UnresolvableReference => "unresolvable_reference",
        }
    }

    /// Human-readable label for reports.
    pub fn label(self) -> &'static str {
        match self {
            RiskCategory::CircularReference => "Circular reference",
            RiskCategory::ExternalReference => "External reference",
            RiskCategory::HardcodedConstant => "Hard-coded constant",
            RiskCategory::VolatileFunction => "Volatile function",
            RiskCategory::WholeRowColumnRef => "Whole row/column reference",
            RiskCategory::FormulaDrift => "Formula drift",
            RiskCategory::OrphanCalculation => "Orphan calculation",
            RiskCategory::ParseError => "Parse error",
            RiskCategory::UnresolvableReference => "Unresolvable reference",
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            RiskCategory::CircularReference | RiskCategory::ExternalReference => Severity::High,
            RiskCategory::OrphanCalculation => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-specific details of a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum FindingKind {
    CircularReference {
        /// Closed loop: the first address repeats as the last. For a cluster,
        /// the sorted member list.
        cells: Vec<CellAddress>,
        length: usize,
        cluster: bool,
    },
    ExternalReference {
        targets: Vec<ExternalTarget>,
    },
    HardcodedConstant {
        literals: Vec<String>,
    },
    VolatileFunction {
        functions: Vec<String>,
    },
    WholeRowColumnRef {
        ranges: Vec<RangeAddress>,
    },
    FormulaDrift {
        formula: String,
        expected_pattern: String,
        actual_pattern: String,
        group: RangeAddress,
    },
    OrphanCalculation,
    ParseError {
        formula: String,
        position: usize,
        reason: String,
    },
    UnresolvableReference {
        reference: String,
        reason: String,
    },
}

impl FindingKind {
    pub fn category(&self) -> RiskCategory {
        match self {
            FindingKind::CircularReference { .. } => RiskCategory::CircularReference,
            FindingKind::ExternalReference { .. } => RiskCategory::ExternalReference,
            FindingKind::HardcodedConstant { .. } => RiskCategory::HardcodedConstant,
            FindingKind::VolatileFunction { .. } => RiskCategory::VolatileFunction,
            FindingKind::WholeRowColumnRef { .. } => RiskCategory::WholeRowColumnRef,
            FindingKind::FormulaDrift { .. } => RiskCategory::FormulaDrift,
            FindingKind::OrphanCalculation => RiskCategory::OrphanCalculation,
            FindingKind::ParseError { .. } => RiskCategory::ParseError,
            FindingKind::UnresolvableReference { .. } => RiskCategory::UnresolvableReference,
        }
    }
}

/// What a finding is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum FindingScope {
    Cell(CellAddress),
    /// Several cells, sorted (cycle members).
    Cells(Vec<CellAddress>),
    Range(RangeAddress),
    Sheet(String),
    Workbook,
}

impl FindingScope {
    /// The address a finding is sorted and grouped by.
    pub fn primary_address(&self) -> Option<CellAddress> {
        match self {
            FindingScope::Cell(cell) => Some(cell.clone()),
            FindingScope::Cells(cells) => cells.iter().min().cloned(),
            FindingScope::Range(range) => Some(range.start()),
            FindingScope::Sheet(_) | FindingScope::Workbook => None,
        }
    }

    pub fn sheet(&self) -> Option<&str> {
        match self {
            FindingScope::Cell(cell) => Some(&cell.sheet),
            FindingScope::Cells(cells) => cells.iter().min().map(|c| c.sheet.as_str()),
            FindingScope::Range(range) => Some(&range.sheet),
            FindingScope::Sheet(sheet) => Some(sheet),
            FindingScope::Workbook => None,
        }
    }
}

impl fmt::Display for FindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingScope::Cell(cell) => write!(f, "{cell}"),
            FindingScope::Cells(cells) => {
                let list: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
                write!(f, "{}", list.join(", "))
            }
            FindingScope::Range(range) => write!(f, "{range}"),
            FindingScope::Sheet(sheet) => write!(f, "{sheet}"),
            FindingScope::Workbook => write!(f, "workbook"),
        }
    }
}

/// A detected structural risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFinding {
    #[serde(flatten)]
    pub kind: FindingKind,
    pub location: FindingScope,
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
}

impl RiskFinding {
    /// Build a finding at the category's default severity.
    pub fn new(kind: FindingKind, location: FindingScope, message: impl Into<String>) -> Self {
        let severity = kind.category().default_severity();
        Self {
            kind,
            location,
            severity,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn category(&self) -> RiskCategory {
        self.kind.category()
    }

    /// Deterministic order within a sheet: address, then category, then message.
    pub fn sort_key(&self) -> (Option<CellAddress>, RiskCategory, &str) {
        (self.location.primary_address(), self.category(), &self.message)
    }
}

/// Apply `[rules.severities]` overrides. Unknown keys are ignored.
pub fn apply_severity_overrides(findings: &mut [RiskFinding], overrides: &HashMap<String, Severity>) {
    if overrides.is_empty() {
        return;
    }
    for finding in findings {
        if let Some(&severity) = overrides.get(finding.category().as_str()) {
            finding.severity = severity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severities() {
        assert_eq!(
            RiskCategory::CircularReference.default_severity(),
            Severity::High
        );
        assert_eq!(
            RiskCategory::ExternalReference.default_severity(),
            Severity::High
        );
        assert_eq!(
            RiskCategory::OrphanCalculation.default_severity(),
            Severity::Low
        );
        assert_eq!(RiskCategory::FormulaDrift.default_severity(), Severity::Medium);
        assert_eq!(RiskCategory::ParseError.default_severity(), Severity::Medium);
    }

    #[test]
    fn test_finding_serializes_category_tag() {
        let finding = RiskFinding::new(
            FindingKind::HardcodedConstant {
                literals: vec!["1.0825".into()],
            },
            FindingScope::Cell(CellAddress::new("S", 0, 1)),
            "hard-coded",
        );
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["category"], "hardcoded_constant");
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["location"]["scope"], "cell");
        let back: RiskFinding = serde_json::from_value(json).unwrap();
        assert_eq!(back, finding);
    }

    #[test]
    fn test_cells_scope_primary_is_minimum() {
        let scope = FindingScope::Cells(vec![
            CellAddress::new("S", 3, 0),
            CellAddress::new("S", 1, 0),
        ]);
        assert_eq!(scope.primary_address(), Some(CellAddress::new("S", 1, 0)));
        assert_eq!(scope.sheet(), Some("S"));
    }

    #[test]
    fn test_severity_overrides() {
        let mut findings = vec![RiskFinding::new(
            FindingKind::OrphanCalculation,
            FindingScope::Cell(CellAddress::new("S", 0, 0)),
            "orphan",
        )];
        let mut overrides = HashMap::new();
        overrides.insert("orphan_calculation".to_string(), Severity::High);
        overrides.insert("no_such_rule".to_string(), Severity::Low);
        apply_severity_overrides(&mut findings, &overrides);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_category_as_str_round_trips_through_serde() {
        for category in RiskCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
    }
}
