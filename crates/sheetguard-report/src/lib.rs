//! Renderers for `AuditReport`: terminal text, JSON, Markdown, HTML, and a
//! GraphViz export of the dependency graph.

pub mod dot;
pub mod html;
pub mod json;
pub mod markdown;
pub mod text;

use sheetguard_core::aggregate::AuditReport;
use sheetguard_core::types::Severity;

/// Findings at or above `fail_on`, and whether the check passes.
pub fn check_outcome(report: &AuditReport, fail_on: Severity) -> (usize, bool) {
    let failing = report.count_at_or_above(fail_on);
    (failing, failing == 0)
}

#[cfg(test)]
pub(crate) mod testutil {
    use sheetguard_core::aggregate::AuditReport;
    use sheetguard_core::config::Config;
    use sheetguard_core::workbook::{RawCell, SheetData, WorkbookData};

    pub fn workbook(with_risks: bool) -> WorkbookData {
        let cells = if with_risks {
            vec![
                RawCell::number(0, 0, 100.0),
                RawCell::formula(0, 1, "=A1*1.0825"),
                RawCell::formula(0, 2, "=B1+C2"),
                RawCell::formula(1, 2, "=C1"),
                RawCell::text(2, 0, "<total> & \"tax\""),
                RawCell::formula(2, 1, "=SUM(A:A)+B1"),
            ]
        } else {
            vec![
                RawCell::number(0, 0, 100.0),
                RawCell::formula(0, 1, "=A1"),
                RawCell::formula(0, 2, "=B1"),
            ]
        };
        WorkbookData::new("model.xlsx").with_sheet(SheetData::new("Model").with_cells(cells))
    }

    pub fn report(with_risks: bool) -> AuditReport {
        sheetguard_core::audit(&workbook(with_risks), &Config::default())
    }
}
