use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::aggregate::{aggregate, AuditReport};
use crate::builder::build_graph;
use crate::classify::RiskClassifier;
use crate::config::Config;
use crate::cycles::{detect_cycles, CycleReport};
use crate::drift::{analyze_drift, drift_findings, DriftGroup};
use crate::finding::apply_severity_overrides;
use crate::graph::DependencyGraph;
use crate::impact::rank_impact;
use crate::reader::WorkbookReader;
use crate::workbook::{Workbook, WorkbookData};

/// Full audit output, including the graph for diagram generation.
pub struct FullAudit {
    pub report: AuditReport,
    pub graph: DependencyGraph,
    pub cycles: CycleReport,
    pub drift_groups: Vec<DriftGroup>,
}

/// Reusable audit pipeline. Each run builds every intermediate value fresh.
pub struct AuditPipeline {
    readers: Vec<Box<dyn WorkbookReader>>,
    config: Config,
    classifier: RiskClassifier,
}

impl AuditPipeline {
    pub fn new(readers: Vec<Box<dyn WorkbookReader>>, config: Config) -> Self {
        let classifier = RiskClassifier::new(&config);
        Self {
            readers,
            config,
            classifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The reader responsible for `path`, by extension.
    pub fn reader_for(&self, path: &Path) -> Option<&dyn WorkbookReader> {
        self.readers
            .iter()
            .find(|r| r.handles(path))
            .map(|r| r.as_ref())
    }

    /// Workbooks to audit under `path`: the file itself, or every supported
    /// file below a directory in sorted order.
    pub fn discover(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if path.is_file() {
            if self.reader_for(path).is_none() {
                bail!("unsupported workbook format: {}", path.display());
            }
            return Ok(vec![path.to_path_buf()]);
        }
        if !path.is_dir() {
            bail!("no such file or directory: {}", path.display());
        }
        let mut found: Vec<PathBuf> = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                // Office lock files share the workbook's extension.
                !e.file_name().to_string_lossy().starts_with("~$")
            })
            .filter(|e| self.reader_for(e.path()).is_some())
            .map(|e| e.into_path())
            .collect();
        found.sort();
        debug!(root = %path.display(), count = found.len(), "discovered workbooks");
        Ok(found)
    }

    /// Read and audit one workbook file.
    pub fn analyze(&self, path: &Path) -> Result<FullAudit> {
        let reader = self
            .reader_for(path)
            .with_context(|| format!("unsupported workbook format: {}", path.display()))?;
        let data = reader
            .read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        info!(path = %path.display(), format = reader.format(), sheets = data.sheets.len(), "read workbook");
        Ok(self.run(&data))
    }

    /// Audit workbook data already in memory. Never fails: malformed formulas
    /// and dangling references become findings.
    pub fn run(&self, data: &WorkbookData) -> FullAudit {
        let workbook = Workbook::from_data(data);
        let built = build_graph(&workbook, &self.config.graph);
        let graph = built.graph;

        let cycles = detect_cycles(&graph, &self.config.cycles);
        let drift_groups = analyze_drift(&graph, &workbook, &self.config.drift);

        let mut findings = built.findings;
        findings.extend(cycles.findings());
        findings.extend(self.classifier.classify(&graph, &workbook));
        findings.extend(drift_findings(&drift_groups, &graph));
        apply_severity_overrides(&mut findings, &self.config.rules.severities);

        let high_impact = rank_impact(&graph, &self.config.impact);
        let sheets: Vec<(String, usize)> = workbook
            .sheets
            .iter()
            .map(|s| (s.name.clone(), s.formulas().count()))
            .collect();
        let report = aggregate(&workbook.name, &sheets, findings, graph.stats(), high_impact);
        debug!(
            findings = report.finding_count(),
            cycles = cycles.cycles.len(),
            clusters = cycles.clusters.len(),
            "audit complete"
        );

        FullAudit {
            report,
            graph,
            cycles,
            drift_groups,
        }
    }
}

/// Audit in-memory workbook data with the given configuration.
pub fn audit(data: &WorkbookData, config: &Config) -> AuditReport {
    AuditPipeline::new(Vec::new(), config.clone()).run(data).report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{FindingKind, FindingScope, RiskCategory};
    use crate::types::{CellAddress, Severity};
    use crate::workbook::{RawCell, SheetData};

    fn workbook(cells: Vec<RawCell>) -> WorkbookData {
        WorkbookData::new("model.xlsx").with_sheet(SheetData::new("Sheet1").with_cells(cells))
    }

    fn categories(report: &AuditReport) -> Vec<RiskCategory> {
        report.findings().map(|f| f.category()).collect()
    }

    fn sample() -> WorkbookData {
        let mut cells = vec![
            RawCell::number(0, 0, 100.0),
            RawCell::formula(0, 1, "=A1*1.0825+1000"),
            RawCell::formula(0, 2, "=B1+NOW()"),
            RawCell::formula(0, 3, "=SUM(A:A)"),
            RawCell::formula(1, 0, "=B2"),
            RawCell::formula(1, 1, "=A2"),
            RawCell::formula(2, 0, "=SUM(("),
            RawCell::formula(3, 0, "=[1]Rates!A1"),
        ];
        for row in 5..15 {
            let factor = if row == 9 { 3 } else { 2 };
            cells.push(RawCell::number(row, 4, row as f64));
            cells.push(RawCell::formula(row, 5, format!("=E{}*{factor}", row + 1)));
        }
        let mut data = workbook(cells);
        data.sheets.push(
            SheetData::new("Summary").with_cells(vec![RawCell::formula(0, 0, "=Sheet1!D1+Missing!A1")]),
        );
        data
    }

    #[test]
    fn test_report_is_deterministic() {
        let config = Config::default();
        let first = serde_json::to_string(&audit(&sample(), &config)).unwrap();
        let second = serde_json::to_string(&audit(&sample(), &config)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_graph_rebuild_is_structurally_equal() {
        let pipeline = AuditPipeline::new(Vec::new(), Config::default());
        let a = pipeline.run(&sample());
        let b = pipeline.run(&sample());
        assert!(a.graph == b.graph);
        assert_eq!(a.graph.edges().len(), b.graph.edges().len());
    }

    #[test]
    fn test_self_reference_end_to_end() {
        let report = audit(&workbook(vec![RawCell::formula(0, 0, "=A1+1")]), &Config::default());
        let circular: Vec<_> = report
            .findings()
            .filter(|f| f.category() == RiskCategory::CircularReference)
            .collect();
        assert_eq!(circular.len(), 1);
        match &circular[0].kind {
            FindingKind::CircularReference { cells, length, .. } => {
                assert_eq!(*length, 1);
                assert_eq!(cells[0], CellAddress::new("Sheet1", 0, 0));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(report.score.level, Some(Severity::High));
    }

    #[test]
    fn test_three_cell_cycle_end_to_end() {
        let report = audit(
            &workbook(vec![
                RawCell::formula(0, 0, "=B1"),
                RawCell::formula(0, 1, "=C1"),
                RawCell::formula(0, 2, "=A1"),
            ]),
            &Config::default(),
        );
        assert_eq!(categories(&report), vec![RiskCategory::CircularReference]);
        let finding = report.findings().next().unwrap();
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(
            finding.location,
            FindingScope::Cells(vec![
                CellAddress::new("Sheet1", 0, 0),
                CellAddress::new("Sheet1", 0, 1),
                CellAddress::new("Sheet1", 0, 2),
            ])
        );
    }

    #[test]
    fn test_sample_categories() {
        let full = AuditPipeline::new(Vec::new(), Config::default()).run(&sample());
        let found = full.report.counts_by_category();
        for category in [
            RiskCategory::CircularReference,
            RiskCategory::ExternalReference,
            RiskCategory::HardcodedConstant,
            RiskCategory::VolatileFunction,
            RiskCategory::WholeRowColumnRef,
            RiskCategory::FormulaDrift,
            RiskCategory::ParseError,
            RiskCategory::UnresolvableReference,
        ] {
            assert!(found.contains_key(&category), "missing {category}");
        }
        assert_eq!(found[&RiskCategory::FormulaDrift], 1);
        assert_eq!(full.report.sheets.len(), 2);
        assert_eq!(full.report.sheets[0].name, "Sheet1");
        assert_eq!(full.report.stats.malformed_formulas, 1);
        assert_eq!(full.report.stats.unbounded_nodes, 1);
        assert!(full.graph.node_count() < 100, "whole column is not materialized");
    }

    #[test]
    fn test_severity_overrides_apply() {
        let mut config = Config::default();
        config
            .rules
            .severities
            .insert("volatile_function".into(), Severity::High);
        let report = audit(&workbook(vec![RawCell::formula(0, 0, "=TODAY()")]), &config);
        let volatile = report
            .findings()
            .find(|f| f.category() == RiskCategory::VolatileFunction)
            .unwrap();
        assert_eq!(volatile.severity, Severity::High);
    }

    #[test]
    fn test_empty_workbook_is_clean() {
        let report = audit(&WorkbookData::new("empty"), &Config::default());
        assert!(report.is_clean());
        assert!(report.sheets.is_empty());
    }

    #[test]
    fn test_discover_without_readers_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("book.xlsx");
        std::fs::write(&file, b"").unwrap();
        let pipeline = AuditPipeline::new(Vec::new(), Config::default());
        assert!(pipeline.discover(&file).is_err());
        assert!(pipeline.discover(dir.path()).unwrap().is_empty());
    }
}
