use sheetguard_core::aggregate::AuditReport;
use sheetguard_core::finding::RiskFinding;
use sheetguard_core::types::Severity;

/// Table cells cannot contain raw pipes or newlines.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn push_table(out: &mut String, findings: &[RiskFinding]) {
    out.push_str("| Severity | Category | Location | Message |\n");
    out.push_str("|----------|----------|----------|---------|\n");
    for f in findings {
        out.push_str(&format!(
            "| {} | {} | `{}` | {} |\n",
            f.severity.to_string().to_uppercase(),
            f.category().label(),
            cell(&f.location.to_string()),
            cell(&f.message),
        ));
    }
}

/// Format a full audit report as Markdown.
pub fn format_report(report: &AuditReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("# SheetGuard - Workbook Audit: {}\n\n", report.workbook));

    out.push_str("## Summary\n\n");
    out.push_str(&format!(
        "- **Overall severity:** {}\n",
        report.score.label().to_uppercase()
    ));
    out.push_str(&format!("- **Findings:** {}\n", report.score.total));
    out.push_str(&format!("- **Formula cells:** {}\n", report.stats.formula_cells));
    out.push_str(&format!("- **Edges:** {}\n", report.stats.edges));

    out.push_str("\n## Sheets\n\n");
    out.push_str("| Sheet | Severity | Formula cells | Findings |\n");
    out.push_str("|-------|----------|---------------|----------|\n");
    for sheet in &report.sheets {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            cell(&sheet.name),
            sheet.score.label().to_uppercase(),
            sheet.formula_cells,
            sheet.findings.len()
        ));
    }

    let counts = report.counts_by_category();
    if !counts.is_empty() {
        out.push_str("\n## Findings by Category\n\n");
        out.push_str("| Category | Count |\n");
        out.push_str("|----------|-------|\n");
        for (category, count) in &counts {
            out.push_str(&format!("| {} | {count} |\n", category.label()));
        }
    }

    if report.is_clean() {
        out.push_str("\n## Findings\n\nNo structural risks found.\n");
    } else {
        for sheet in report.sheets.iter().filter(|s| !s.findings.is_empty()) {
            out.push_str(&format!(
                "\n## Findings: {} ({} found)\n\n",
                sheet.name,
                sheet.findings.len()
            ));
            push_table(&mut out, &sheet.findings);
        }
        if !report.workbook_findings.is_empty() {
            out.push_str("\n## Findings: workbook\n\n");
            push_table(&mut out, &report.workbook_findings);
        }
    }

    if !report.high_impact.is_empty() {
        out.push_str("\n## Highest Impact Cells\n\n");
        out.push_str("| Cell | Dependents | Precedents | Formula |\n");
        out.push_str("|------|------------|------------|---------|\n");
        for entry in &report.high_impact {
            out.push_str(&format!(
                "| `{}` | {} | {} | `{}` |\n",
                entry.address,
                entry.dependents,
                entry.precedents,
                cell(&entry.formula)
            ));
        }
    }

    out.push('\n');
    out
}

/// Format a check result as Markdown. Returns (markdown, passed).
pub fn format_check(report: &AuditReport, fail_on: Severity) -> (String, bool) {
    let (failing, passed) = crate::check_outcome(report, fail_on);
    let mut out = format_report(report);

    if passed {
        out.push_str("## Result\n\n**CHECK PASSED**\n");
    } else {
        out.push_str(&format!(
            "## Result\n\n**CHECK FAILED**: {failing} finding(s) at severity {fail_on} or above\n",
        ));
    }

    (out, passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::report;

    #[test]
    fn test_clean_report() {
        let out = format_report(&report(false));
        assert!(out.contains("**Overall severity:** CLEAN"), "{out}");
        assert!(out.contains("No structural risks found"));
        assert!(out.contains("| Model | CLEAN | 2 | 0 |"), "{out}");
    }

    #[test]
    fn test_findings_table() {
        let out = format_report(&report(true));
        assert!(out.contains("## Findings: Model"), "{out}");
        assert!(out.contains("| HIGH | Circular reference |"), "{out}");
        assert!(out.contains("## Highest Impact Cells"));
    }

    #[test]
    fn test_pipes_are_escaped() {
        assert_eq!(cell("a|b\nc"), "a\\|b c");
    }

    #[test]
    fn test_format_check() {
        let (out, passed) = format_check(&report(false), Severity::Low);
        assert!(passed);
        assert!(out.contains("CHECK PASSED"));
        let (out, passed) = format_check(&report(true), Severity::Medium);
        assert!(!passed);
        assert!(out.contains("**CHECK FAILED**: "), "{out}");
    }
}
