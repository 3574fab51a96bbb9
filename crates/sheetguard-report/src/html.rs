//! Standalone HTML report: one file, inline styles, no scripts.

use chrono::{DateTime, Local};

use sheetguard_core::aggregate::{AuditReport, SeverityScore};
use sheetguard_core::finding::RiskFinding;
use sheetguard_core::types::Severity;

const STYLE: &str = "body{font-family:system-ui,Segoe UI,Roboto,Arial,sans-serif;margin:24px;color:#222}\
h1{margin-bottom:4px}.muted{color:#777}\
table{border-collapse:collapse;width:100%;margin:8px 0 24px}\
th,td{border:1px solid #ddd;padding:6px 8px;text-align:left;vertical-align:top}\
th{background:#f5f5f5}code{font-family:ui-monospace,Menlo,Consolas,monospace}\
.pill{display:inline-block;padding:1px 8px;border-radius:10px;font-size:12px;font-weight:600}\
.high{background:#fdecea;color:#b71c1c}.medium{background:#fff4e5;color:#e65100}\
.low{background:#e3f2fd;color:#0d47a1}.clean{background:#e8f5e9;color:#1b5e20}";

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn badge(score: &SeverityScore) -> String {
    let label = score.label();
    format!(r#"<span class="pill {label}">{}</span>"#, label.to_uppercase())
}

fn severity_badge(severity: Severity) -> String {
    format!(
        r#"<span class="pill {severity}">{}</span>"#,
        severity.to_string().to_uppercase()
    )
}

fn push_findings(out: &mut String, findings: &[RiskFinding]) {
    out.push_str("<table><tr><th>Severity</th><th>Category</th><th>Location</th><th>Details</th></tr>\n");
    for f in findings {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td><code>{}</code></td><td>{}",
            severity_badge(f.severity),
            escape(f.category().label()),
            escape(&f.location.to_string()),
            escape(&f.message),
        ));
        if let Some(ref suggestion) = f.suggestion {
            out.push_str(&format!(r#"<br><span class="muted">{}</span>"#, escape(suggestion)));
        }
        out.push_str("</td></tr>\n");
    }
    out.push_str("</table>\n");
}

/// Render a self-contained HTML document.
pub fn format_report(report: &AuditReport, generated: DateTime<Local>) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!(
        "<title>SheetGuard audit: {}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n",
        escape(&report.workbook)
    ));
    out.push_str(&format!(
        "<h1>{} {}</h1>\n<p class=\"muted\">Generated {} &middot; {} finding(s) &middot; {} formula cells &middot; {} edges</p>\n",
        escape(&report.workbook),
        badge(&report.score),
        generated.format("%Y-%m-%d %H:%M:%S"),
        report.score.total,
        report.stats.formula_cells,
        report.stats.edges,
    ));

    out.push_str("<h2>Sheets</h2>\n<table><tr><th>Sheet</th><th>Severity</th><th>Formula cells</th><th>Findings</th></tr>\n");
    for sheet in &report.sheets {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&sheet.name),
            badge(&sheet.score),
            sheet.formula_cells,
            sheet.findings.len()
        ));
    }
    out.push_str("</table>\n");

    if report.is_clean() {
        out.push_str("<h2>Findings</h2>\n<p>No structural risks found.</p>\n");
    } else {
        for sheet in report.sheets.iter().filter(|s| !s.findings.is_empty()) {
            out.push_str(&format!("<h2>Findings: {}</h2>\n", escape(&sheet.name)));
            push_findings(&mut out, &sheet.findings);
        }
        if !report.workbook_findings.is_empty() {
            out.push_str("<h2>Findings: workbook</h2>\n");
            push_findings(&mut out, &report.workbook_findings);
        }
    }

    if !report.high_impact.is_empty() {
        out.push_str("<h2>Highest impact cells</h2>\n<table><tr><th>Cell</th><th>Dependents</th><th>Precedents</th><th>Formula</th></tr>\n");
        for entry in &report.high_impact {
            out.push_str(&format!(
                "<tr><td><code>{}</code></td><td>{}</td><td>{}</td><td><code>{}</code></td></tr>\n",
                escape(&entry.address.to_string()),
                entry.dependents,
                entry.precedents,
                escape(&entry.formula)
            ));
        }
        out.push_str("</table>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::report;
    use chrono::TimeZone;

    fn generated() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_document_structure() {
        let html = format_report(&report(true), generated());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.ends_with("</html>\n"));
        assert!(html.contains("Generated 2024-03-01 09:30:00"));
        assert!(html.contains(r#"<span class="pill high">HIGH</span>"#));
        assert!(html.contains("<h2>Findings: Model</h2>"));
        assert!(!html.contains("<script"));
    }

    #[test]
    fn test_clean_document() {
        let html = format_report(&report(false), generated());
        assert!(html.contains(r#"<span class="pill clean">CLEAN</span>"#));
        assert!(html.contains("No structural risks found."));
    }
}
