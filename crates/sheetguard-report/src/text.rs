use colored::Colorize;

use sheetguard_core::aggregate::{AuditReport, SeverityScore};
use sheetguard_core::finding::RiskFinding;
use sheetguard_core::types::Severity;

fn severity_tag(severity: Severity) -> String {
    match severity {
        Severity::High => "HIGH".red().bold().to_string(),
        Severity::Medium => "MED".yellow().bold().to_string(),
        Severity::Low => "LOW".blue().bold().to_string(),
    }
}

fn score_label(score: &SeverityScore) -> String {
    let label = score.label().to_uppercase();
    match score.level {
        None => label.green().bold().to_string(),
        Some(Severity::Low) => label.blue().bold().to_string(),
        Some(Severity::Medium) => label.yellow().bold().to_string(),
        Some(Severity::High) => label.red().bold().to_string(),
    }
}

/// Format a full audit report for terminal output.
pub fn format_report(report: &AuditReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("\n{}\n", "SheetGuard - Workbook Audit".bold()));
    out.push_str(&format!("{}\n\n", "=".repeat(40)));
    out.push_str(&format!("{}: {}\n", "Workbook".bold(), report.workbook));
    out.push_str(&format!(
        "{}: {} ({} finding(s))\n",
        "Overall Severity".bold(),
        score_label(&report.score),
        report.score.total
    ));

    let stats = &report.stats;
    out.push_str(&format!(
        "\n{}: {} formula cells, {} precedent cells, {} edges\n",
        "Summary".bold(),
        stats.formula_cells,
        stats.leaf_cells,
        stats.edges,
    ));
    if stats.range_nodes + stats.unbounded_nodes + stats.external_nodes > 0 {
        out.push_str(&format!(
            "  Range targets: {} bounded, {} whole row/column, {} external\n",
            stats.range_nodes, stats.unbounded_nodes, stats.external_nodes
        ));
    }
    if stats.malformed_formulas > 0 {
        out.push_str(&format!(
            "  Unparseable formulas: {}\n",
            stats.malformed_formulas
        ));
    }

    let counts = report.counts_by_category();
    if !counts.is_empty() {
        out.push_str(&format!("\n{}\n{}\n", "Findings by category".bold(), "-".repeat(40)));
        for (category, count) in &counts {
            out.push_str(&format!("  {:<28}{count}\n", category.label()));
        }
    }

    if report.is_clean() {
        out.push_str(&format!("\n{}\n", "No structural risks found!".green().bold()));
    } else {
        for sheet in &report.sheets {
            if sheet.findings.is_empty() {
                continue;
            }
            out.push_str(&format!(
                "\n{} {} [{}] ({} found)\n{}\n",
                "Sheet".bold(),
                sheet.name.bold(),
                score_label(&sheet.score),
                sheet.findings.len(),
                "-".repeat(40),
            ));
            for finding in &sheet.findings {
                push_finding(&mut out, finding);
            }
        }
        if !report.workbook_findings.is_empty() {
            out.push_str(&format!("\n{}\n{}\n", "Workbook".bold(), "-".repeat(40)));
            for finding in &report.workbook_findings {
                push_finding(&mut out, finding);
            }
        }
    }

    if !report.high_impact.is_empty() {
        out.push_str(&format!("\n{}\n{}\n", "Highest impact cells".bold(), "-".repeat(40)));
        for entry in &report.high_impact {
            out.push_str(&format!(
                "  {}  {} dependent(s), {} precedent(s)  {}\n",
                entry.address,
                entry.dependents,
                entry.precedents,
                entry.formula.dimmed()
            ));
        }
    }

    out.push('\n');
    out
}

fn push_finding(out: &mut String, finding: &RiskFinding) {
    out.push_str(&format!(
        "\n  {} [{}] {}\n",
        severity_tag(finding.severity),
        finding.category().label(),
        finding.location,
    ));
    out.push_str(&format!("    {}\n", finding.message));
    if let Some(ref suggestion) = finding.suggestion {
        out.push_str(&format!("    {}: {}\n", "Suggestion".cyan(), suggestion));
    }
}

/// Format a check result for CI use. Returns (text, passed).
pub fn format_check(report: &AuditReport, fail_on: Severity) -> (String, bool) {
    let (failing, passed) = crate::check_outcome(report, fail_on);
    let mut out = format_report(report);

    if passed {
        out.push_str(&format!("{}\n", "CHECK PASSED".green().bold()));
    } else {
        out.push_str(&format!(
            "{}: {} finding(s) at severity {} or above\n",
            "CHECK FAILED".red().bold(),
            failing,
            fail_on,
        ));
    }

    (out, passed)
}
