use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use tracing::{debug, warn};

use sheetguard_core::reader::WorkbookReader;
use sheetguard_core::types::{Bounds, MAX_COLS, MAX_ROWS};
use sheetguard_core::workbook::{CellContent, CellValue, DefinedName, RawCell, SheetData, WorkbookData};

/// Spreadsheet files readable by calamine (xlsx, xlsm, xlsb, xls, ods).
pub struct SpreadsheetReader;

impl WorkbookReader for SpreadsheetReader {
    fn format(&self) -> &'static str {
        "spreadsheet"
    }

    fn file_extensions(&self) -> &[&str] {
        &["xlsx", "xlsm", "xlsb", "xls", "ods"]
    }

    fn read(&self, path: &Path) -> Result<WorkbookData> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| anyhow!("failed to open workbook: {e}"))?;
        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

        let mut sheets = Vec::with_capacity(sheet_names.len());
        for name in &sheet_names {
            let values = workbook
                .worksheet_range(name)
                .map_err(|e| anyhow!("{e}"))
                .with_context(|| format!("failed to read sheet '{name}'"))?;
            // Chart sheets and some legacy formats have no formula part.
            let formulas = match workbook.worksheet_formula(name) {
                Ok(range) => Some(range),
                Err(e) => {
                    warn!(sheet = %name, "formulas unavailable: {e}");
                    None
                }
            };
            sheets.push(convert_sheet(name, &values, formulas.as_ref()));
        }

        let defined_names = workbook
            .defined_names()
            .iter()
            .filter(|(name, _)| {
                let builtin = name.starts_with("_xlnm.");
                if builtin {
                    debug!(name = %name, "skipping built-in defined name");
                }
                !builtin
            })
            .map(|(name, refers_to)| DefinedName {
                name: name.clone(),
                refers_to: refers_to.clone(),
                scope: None,
            })
            .collect();

        Ok(WorkbookData {
            name: crate::workbook_name(path),
            sheets,
            defined_names,
            external_workbooks: crate::links::external_workbooks(path),
        })
    }
}

/// Merge the value and formula ranges of one sheet. A formula replaces the
/// cached value at the same address.
fn convert_sheet(name: &str, values: &Range<Data>, formulas: Option<&Range<String>>) -> SheetData {
    let mut cells: BTreeMap<(u32, u32), CellContent> = BTreeMap::new();

    if let Some((start_row, start_col)) = values.start() {
        for (r, c, data) in values.used_cells() {
            let Some(pos) = absolute(start_row, start_col, r, c) else {
                continue;
            };
            if let Some(value) = cell_value(data) {
                cells.insert(pos, CellContent::Value(value));
            }
        }
    }

    let mut formula_count = 0usize;
    if let Some(formulas) = formulas {
        if let Some((start_row, start_col)) = formulas.start() {
            for (r, c, text) in formulas.used_cells() {
                let Some(pos) = absolute(start_row, start_col, r, c) else {
                    continue;
                };
                if text.trim().is_empty() {
                    continue;
                }
                let text = if text.starts_with('=') {
                    text.clone()
                } else {
                    format!("={text}")
                };
                cells.insert(pos, CellContent::Formula(text));
                formula_count += 1;
            }
        }
    }

    let used_range = [values.start().zip(values.end()), formulas.and_then(|f| f.start().zip(f.end()))]
        .into_iter()
        .flatten()
        .map(|(a, b)| Bounds::from_corners(a, b))
        .reduce(|acc, b| acc.union(&b));

    debug!(sheet = %name, cells = cells.len(), formulas = formula_count, "read sheet");
    SheetData {
        name: name.to_string(),
        cells: cells
            .into_iter()
            .map(|((row, col), content)| RawCell { row, col, content })
            .collect(),
        used_range,
        regions: Vec::new(),
    }
}

/// Absolute zero-based position of a cell inside a range, if on the sheet.
fn absolute(start_row: u32, start_col: u32, r: usize, c: usize) -> Option<(u32, u32)> {
    let row = start_row.checked_add(u32::try_from(r).ok()?)?;
    let col = start_col.checked_add(u32::try_from(c).ok()?)?;
    (row < MAX_ROWS && col < MAX_COLS).then_some((row, col))
}

fn cell_value(data: &Data) -> Option<CellValue> {
    match data {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            Some(CellValue::Text(s.clone()))
        }
        Data::Float(n) => Some(CellValue::Number(*n)),
        Data::Int(n) => Some(CellValue::Number(*n as f64)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(dt) => Some(CellValue::Number(dt.as_f64())),
        Data::Error(e) => Some(CellValue::Error(e.to_string())),
    }
}
