use serde::Serialize;

use sheetguard_core::aggregate::AuditReport;
use sheetguard_core::types::Severity;

/// Format a full audit report as JSON.
pub fn format_report(report: &AuditReport, compact: bool) -> String {
    if compact {
        serde_json::to_string(report).expect("AuditReport should be serializable")
    } else {
        serde_json::to_string_pretty(report).expect("AuditReport should be serializable")
    }
}

/// Several reports (one per workbook) as a JSON array.
pub fn format_reports(reports: &[AuditReport], compact: bool) -> String {
    if compact {
        serde_json::to_string(reports).expect("AuditReport should be serializable")
    } else {
        serde_json::to_string_pretty(reports).expect("AuditReport should be serializable")
    }
}

/// Wrapper for check output that adds pass/fail metadata.
#[derive(Debug, Serialize)]
pub struct CheckOutput<'a> {
    #[serde(flatten)]
    pub report: &'a AuditReport,
    pub check: CheckStatus,
}

#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub passed: bool,
    pub fail_on: Severity,
    pub failing_finding_count: usize,
}

/// Format a check result as JSON. Returns (json_string, passed).
pub fn format_check(report: &AuditReport, fail_on: Severity, compact: bool) -> (String, bool) {
    let (failing, passed) = crate::check_outcome(report, fail_on);

    let output = CheckOutput {
        report,
        check: CheckStatus {
            passed,
            fail_on,
            failing_finding_count: failing,
        },
    };

    let json = if compact {
        serde_json::to_string(&output).expect("CheckOutput should be serializable")
    } else {
        serde_json::to_string_pretty(&output).expect("CheckOutput should be serializable")
    };

    (json, passed)
}

/// Check several workbooks at once as a JSON array. Passes only if every
/// workbook passes.
pub fn format_checks(reports: &[AuditReport], fail_on: Severity, compact: bool) -> (String, bool) {
    let outputs: Vec<CheckOutput<'_>> = reports
        .iter()
        .map(|report| {
            let (failing, passed) = crate::check_outcome(report, fail_on);
            CheckOutput {
                report,
                check: CheckStatus {
                    passed,
                    fail_on,
                    failing_finding_count: failing,
                },
            }
        })
        .collect();
    let passed = outputs.iter().all(|o| o.check.passed);

    let json = if compact {
        serde_json::to_string(&outputs).expect("CheckOutput should be serializable")
    } else {
        serde_json::to_string_pretty(&outputs).expect("CheckOutput should be serializable")
    };

    (json, passed)
}
