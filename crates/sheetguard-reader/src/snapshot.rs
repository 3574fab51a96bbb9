//! JSON workbook snapshots.
//!
//! ```json
//! {
//!   "name": "model.xlsx",
//!   "sheets": [
//!     {
//!       "name": "Inputs",
//!       "used_range": "A1:D20",
//!       "regions": ["B2:D20"],
//!       "cells": { "A1": "=B1*2", "B1": 3, "C1": "label", "D1": true }
//!     }
//!   ],
//!   "defined_names": [{ "name": "Rate", "refers_to": "Inputs!$B$1" }],
//!   "external_workbooks": ["rates.xlsx"]
//! }
//! ```
//!
//! Strings starting with `=` are formulas; `{"error": "#N/A"}` is an error value.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use sheetguard_core::reader::WorkbookReader;
use sheetguard_core::types::{parse_a1, Bounds};
use sheetguard_core::workbook::{CellContent, CellValue, DefinedName, RawCell, SheetData, WorkbookData};

pub struct SnapshotReader;

#[derive(Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sheets: Vec<SnapshotSheet>,
    #[serde(default)]
    defined_names: Vec<DefinedName>,
    #[serde(default)]
    external_workbooks: Vec<String>,
}

#[derive(Deserialize)]
struct SnapshotSheet {
    name: String,
    #[serde(default)]
    used_range: Option<String>,
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default)]
    cells: BTreeMap<String, Value>,
}

impl WorkbookReader for SnapshotReader {
    fn format(&self) -> &'static str {
        "snapshot"
    }

    fn file_extensions(&self) -> &[&str] {
        &["json"]
    }

    fn read(&self, path: &Path) -> Result<WorkbookData> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut data = parse_snapshot(&text)
            .with_context(|| format!("invalid workbook snapshot {}", path.display()))?;
        if data.name.is_empty() {
            data.name = crate::workbook_name(path);
        }
        Ok(data)
    }
}

/// Parse snapshot JSON. The workbook name is left empty when absent.
pub fn parse_snapshot(text: &str) -> Result<WorkbookData> {
    let file: SnapshotFile = serde_json::from_str(text)?;
    let mut sheets = Vec::with_capacity(file.sheets.len());
    for sheet in file.sheets {
        sheets.push(
            convert_sheet(&sheet).with_context(|| format!("in sheet '{}'", sheet.name))?,
        );
    }
    Ok(WorkbookData {
        name: file.name.unwrap_or_default(),
        sheets,
        defined_names: file.defined_names,
        external_workbooks: file.external_workbooks,
    })
}

fn convert_sheet(sheet: &SnapshotSheet) -> Result<SheetData> {
    let mut cells = Vec::with_capacity(sheet.cells.len());
    for (address, value) in &sheet.cells {
        let Some((row, col)) = parse_a1(address) else {
            bail!("invalid cell address '{address}'");
        };
        let Some(content) = cell_content(value).with_context(|| format!("cell {address}"))? else {
            continue;
        };
        cells.push(RawCell { row, col, content });
    }

    let used_range = sheet
        .used_range
        .as_deref()
        .map(parse_bounds)
        .transpose()?;
    let regions = sheet
        .regions
        .iter()
        .map(|r| parse_bounds(r))
        .collect::<Result<Vec<_>>>()?;
    debug!(sheet = %sheet.name, cells = cells.len(), "parsed snapshot sheet");

    Ok(SheetData {
        name: sheet.name.clone(),
        cells,
        used_range,
        regions,
    })
}

fn parse_bounds(text: &str) -> Result<Bounds> {
    Bounds::parse(text).with_context(|| format!("invalid range '{text}'"))
}

/// `None` for null and empty strings, which are empty cells.
fn cell_content(value: &Value) -> Result<Option<CellContent>> {
    let content = match value {
        Value::Null => return Ok(None),
        Value::String(s) if s.is_empty() => return Ok(None),
        Value::String(s) if s.starts_with('=') => CellContent::Formula(s.clone()),
        Value::String(s) => CellContent::Value(CellValue::Text(s.clone())),
        Value::Bool(b) => CellContent::Value(CellValue::Bool(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(v) => CellContent::Value(CellValue::Number(v)),
            None => bail!("number out of range"),
        },
        Value::Object(map) => match map.get("error").and_then(Value::as_str) {
            Some(code) => CellContent::Value(CellValue::Error(code.to_string())),
            None => bail!("unsupported cell object; expected {{\"error\": \"#...\"}}"),
        },
        Value::Array(_) => bail!("arrays are not valid cell values"),
    };
    Ok(Some(content))
}
