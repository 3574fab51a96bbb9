use std::process::Command;

fn fixture(name: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    format!("{manifest_dir}/tests/fixtures/models/{name}")
}

fn sheetguard_cmd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sheetguard"));
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_analyze_risky_workbook() {
    let output = sheetguard_cmd()
        .args(["analyze", &fixture("risky.json")])
        .output()
        .expect("failed to run sheetguard analyze");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "sheetguard analyze failed: stdout={stdout}, stderr={stderr}"
    );
    assert!(stdout.contains("risky.xlsx"), "should name the workbook: {stdout}");
    assert!(stdout.contains("Overall Severity"), "should contain severity: {stdout}");
    assert!(stdout.contains("Circular reference"), "should report the cycle: {stdout}");
    assert!(stdout.contains("Formula drift"), "should report drift: {stdout}");
}

#[test]
fn test_analyze_clean_workbook() {
    let output = sheetguard_cmd()
        .args(["analyze", &fixture("clean.json")])
        .output()
        .expect("failed to run sheetguard analyze");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(
        stdout.contains("No structural risks found"),
        "clean workbook should have no findings: {stdout}"
    );
}

#[test]
fn test_analyze_json_output_is_valid() {
    let output = sheetguard_cmd()
        .args(["analyze", &fixture("risky.json"), "--format", "json"])
        .output()
        .expect("failed to run sheetguard analyze");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("output should be valid JSON");
    assert_eq!(parsed["workbook"], "risky.xlsx");
    assert_eq!(parsed["score"]["level"], "high");
    let model = &parsed["sheets"][0];
    assert_eq!(model["name"], "Model");
    let categories: Vec<&str> = model["findings"]
        .as_array()
        .expect("findings should be an array")
        .iter()
        .filter_map(|f| f["category"].as_str())
        .collect();
    for expected in [
        "circular_reference",
        "volatile_function",
        "hardcoded_constant",
        "whole_row_column_ref",
        "formula_drift",
    ] {
        assert!(categories.contains(&expected), "missing {expected}: {categories:?}");
    }
    assert!(parsed["high_impact"].is_array());
}

#[test]
fn test_analyze_directory_json_lists_every_workbook() {
    let output = sheetguard_cmd()
        .args(["analyze", &fixture(""), "--format", "json", "--compact"])
        .output()
        .expect("failed to run sheetguard analyze");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout.lines().count(), 1, "compact output is one line");

    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    let names: Vec<&str> = parsed
        .as_array()
        .expect("directory output should be an array")
        .iter()
        .filter_map(|r| r["workbook"].as_str())
        .collect();
    assert_eq!(names, vec!["clean.xlsx", "risky.xlsx"]);
}

#[test]
fn test_analyze_writes_output_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let out = dir.path().join("report.md");

    let output = sheetguard_cmd()
        .args([
            "analyze",
            &fixture("risky.json"),
            "--format",
            "markdown",
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .expect("failed to run sheetguard analyze");

    assert!(output.status.success());
    assert!(output.stdout.is_empty(), "report should go to the file");
    let content = std::fs::read_to_string(&out).expect("report file should exist");
    assert!(content.contains("risky.xlsx"));
    assert!(content.contains("Findings"));
}

#[test]
fn test_analyze_html_report() {
    let output = sheetguard_cmd()
        .args(["analyze", &fixture("risky.json"), "--format", "html"])
        .output()
        .expect("failed to run sheetguard analyze");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("<html"), "{stdout}");
    assert!(stdout.contains("risky.xlsx"));
}

#[test]
fn test_check_risky_workbook_fails() {
    let output = sheetguard_cmd()
        .args(["check", &fixture("risky.json"), "--fail-on", "high"])
        .output()
        .expect("failed to run sheetguard check");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        output.status.code(),
        Some(1),
        "expected exit code 1 for high findings: {stdout}"
    );
    assert!(stdout.contains("CHECK FAILED"), "should say CHECK FAILED: {stdout}");
}

#[test]
fn test_check_clean_workbook_passes() {
    let output = sheetguard_cmd()
        .args(["check", &fixture("clean.json"), "--fail-on", "low"])
        .output()
        .expect("failed to run sheetguard check");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "clean workbook should pass: {stdout}");
    assert!(stdout.contains("CHECK PASSED"), "should say CHECK PASSED: {stdout}");
}

#[test]
fn test_check_json_reports_status() {
    let output = sheetguard_cmd()
        .args([
            "check",
            &fixture("risky.json"),
            "--format",
            "json",
            "--fail-on",
            "medium",
        ])
        .output()
        .expect("failed to run sheetguard check");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(parsed["check"]["passed"], false);
    assert_eq!(parsed["check"]["fail_on"], "medium");
    assert!(parsed["check"]["failing_finding_count"].as_u64().unwrap() > 0);
}

#[test]
fn test_check_uses_config_fail_on() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let workbook = dir.path().join("book.json");
    std::fs::copy(fixture("risky.json"), &workbook).unwrap();

    // Demote everything the fixture triggers so nothing reaches the threshold.
    std::fs::write(
        dir.path().join(".sheetguard.toml"),
        r#"
[rules]
fail_on = "high"

[rules.severities]
circular_reference = "low"
external_reference = "medium"
"#,
    )
    .unwrap();

    let output = sheetguard_cmd()
        .args(["check", workbook.to_str().unwrap()])
        .output()
        .expect("failed to run sheetguard check");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "demoted cycle should not fail the check: {stdout}"
    );
}

#[test]
fn test_check_rejects_unknown_severity() {
    let output = sheetguard_cmd()
        .args(["check", &fixture("clean.json"), "--fail-on", "critical"])
        .output()
        .expect("failed to run sheetguard check");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "{stderr}");
}

#[test]
fn test_graph_exports_dot() {
    let output = sheetguard_cmd()
        .args(["graph", &fixture("risky.json")])
        .output()
        .expect("failed to run sheetguard graph");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.starts_with("digraph"), "{stdout}");
    assert!(stdout.contains("cluster_"), "sheets should be clusters: {stdout}");
    assert!(stdout.contains("color=red"), "cycle edges are highlighted: {stdout}");
}

#[test]
fn test_graph_sheet_flow() {
    let output = sheetguard_cmd()
        .args(["graph", &fixture("risky.json"), "--sheets"])
        .output()
        .expect("failed to run sheetguard graph");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Links"), "{stdout}");
    assert!(stdout.contains("Model"), "{stdout}");
}

#[test]
fn test_missing_path_is_an_error() {
    let output = sheetguard_cmd()
        .args(["analyze", "/nonexistent/book.xlsx"])
        .output()
        .expect("failed to run sheetguard analyze");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "{stderr}");
}

#[test]
fn test_malformed_snapshot_is_an_error() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let workbook = dir.path().join("broken.json");
    std::fs::write(&workbook, "{ not json").unwrap();

    let output = sheetguard_cmd()
        .args(["analyze", workbook.to_str().unwrap()])
        .output()
        .expect("failed to run sheetguard analyze");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken.json"), "error should name the file: {stderr}");
}

#[test]
fn test_init_creates_config() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let output = sheetguard_cmd()
        .arg("init")
        .current_dir(dir.path())
        .output()
        .expect("failed to run sheetguard init");

    assert!(output.status.success());
    let config = std::fs::read_to_string(dir.path().join(".sheetguard.toml"))
        .expect("config file should exist");
    assert!(config.contains("[constants]"));
    assert!(config.contains("fail_on"));

    let again = sheetguard_cmd()
        .arg("init")
        .current_dir(dir.path())
        .output()
        .expect("failed to run sheetguard init");
    assert_eq!(again.status.code(), Some(2), "init should not overwrite");

    let forced = sheetguard_cmd()
        .args(["init", "--force"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run sheetguard init --force");
    assert!(forced.status.success());
}
