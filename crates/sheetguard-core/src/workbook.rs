use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::Bounds;

/// A stored (non-formula) cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Error(String),
}

/// Contents of one non-empty cell as supplied by a reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellContent {
    /// Formula text, with or without the leading `=`.
    Formula(String),
    Value(CellValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCell {
    pub row: u32,
    pub col: u32,
    pub content: CellContent,
}

impl RawCell {
    pub fn formula(row: u32, col: u32, text: impl Into<String>) -> Self {
        Self {
            row,
            col,
            content: CellContent::Formula(text.into()),
        }
    }

    pub fn number(row: u32, col: u32, value: f64) -> Self {
        Self {
            row,
            col,
            content: CellContent::Value(CellValue::Number(value)),
        }
    }

    pub fn text(row: u32, col: u32, value: impl Into<String>) -> Self {
        Self {
            row,
            col,
            content: CellContent::Value(CellValue::Text(value.into())),
        }
    }
}

/// One sheet as read from the file, cells in reader order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetData {
    pub name: String,
    #[serde(default)]
    pub cells: Vec<RawCell>,
    #[serde(default)]
    pub used_range: Option<Bounds>,
    /// Enclosing contexts for drift grouping (tables, named blocks).
    #[serde(default)]
    pub regions: Vec<Bounds>,
}

impl SheetData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_cells(mut self, cells: Vec<RawCell>) -> Self {
        self.cells = cells;
        self
    }
}

/// A workbook-level or sheet-scoped defined name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinedName {
    pub name: String,
    /// Formula text the name stands for (`Inputs!$B$2`, `=0.07`).
    pub refers_to: String,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Everything the engine needs from a workbook reader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkbookData {
    pub name: String,
    pub sheets: Vec<SheetData>,
    #[serde(default)]
    pub defined_names: Vec<DefinedName>,
    /// External workbook paths, indexed from 1 by `[n]` prefixes in formulas.
    #[serde(default)]
    pub external_workbooks: Vec<String>,
}

impl WorkbookData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_sheet(mut self, sheet: SheetData) -> Self {
        self.sheets.push(sheet);
        self
    }
}

/// A sheet after normalization: one entry per address, row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub cells: BTreeMap<(u32, u32), CellContent>,
    pub used_range: Option<Bounds>,
    pub regions: Vec<Bounds>,
}

impl Sheet {
    pub fn formulas(&self) -> impl Iterator<Item = ((u32, u32), &str)> {
        self.cells.iter().filter_map(|(&pos, content)| match content {
            CellContent::Formula(text) => Some((pos, text.as_str())),
            CellContent::Value(_) => None,
        })
    }
}

/// Normalized, read-only view of a workbook used by every analysis stage.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub name: String,
    pub sheets: Vec<Sheet>,
    pub external_workbooks: Vec<String>,
    defined_names: Vec<DefinedName>,
    sheet_lookup: HashMap<String, usize>,
}

impl Workbook {
    /// Normalize reader output. Duplicate addresses keep the last write in
    /// input order; sheets repeated under the same (case-insensitive) name are
    /// merged into the first occurrence.
    pub fn from_data(data: &WorkbookData) -> Self {
        let mut sheets: Vec<Sheet> = Vec::new();
        let mut sheet_lookup: HashMap<String, usize> = HashMap::new();

        for raw in &data.sheets {
            let key = raw.name.to_lowercase();
            let idx = match sheet_lookup.get(&key) {
                Some(&idx) => {
                    debug!(sheet = %raw.name, "merging duplicate sheet");
                    idx
                }
                None => {
                    sheets.push(Sheet {
                        name: raw.name.clone(),
                        cells: BTreeMap::new(),
                        used_range: None,
                        regions: Vec::new(),
                    });
                    sheet_lookup.insert(key, sheets.len() - 1);
                    sheets.len() - 1
                }
            };

            let sheet = &mut sheets[idx];
            for cell in &raw.cells {
                if sheet
                    .cells
                    .insert((cell.row, cell.col), cell.content.clone())
                    .is_some()
                {
                    debug!(sheet = %sheet.name, row = cell.row, col = cell.col, "duplicate cell, last write wins");
                }
            }
            if let Some(range) = raw.used_range {
                sheet.used_range = Some(match sheet.used_range {
                    Some(existing) => existing.union(&range),
                    None => range,
                });
            }
            sheet.regions.extend(raw.regions.iter().copied());
        }

        for sheet in &mut sheets {
            let extent = cell_extent(&sheet.cells);
            sheet.used_range = match (sheet.used_range, extent) {
                (Some(given), Some(extent)) => Some(given.union(&extent)),
                (given, extent) => given.or(extent),
            };
            sheet.regions.sort();
            sheet.regions.dedup();
        }

        Self {
            name: data.name.clone(),
            sheets,
            external_workbooks: data.external_workbooks.clone(),
            defined_names: data.defined_names.clone(),
            sheet_lookup,
        }
    }

    /// Index of a sheet by case-insensitive name.
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheet_lookup.get(&name.to_lowercase()).copied()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheet_index(name).map(|idx| &self.sheets[idx])
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Look up a defined name. A name scoped to `sheet` shadows a global one.
    pub fn defined_name(&self, name: &str, sheet: &str) -> Option<&DefinedName> {
        let scoped = self.defined_names.iter().find(|d| {
            d.name.eq_ignore_ascii_case(name)
                && d.scope
                    .as_deref()
                    .is_some_and(|scope| scope.eq_ignore_ascii_case(sheet))
        });
        scoped.or_else(|| {
            self.defined_names
                .iter()
                .find(|d| d.scope.is_none() && d.name.eq_ignore_ascii_case(name))
        })
    }

    /// Map an `[n]` workbook marker to its declared path when one exists.
    pub fn external_workbook(&self, marker: &str) -> String {
        marker
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.external_workbooks.get(i))
            .cloned()
            .unwrap_or_else(|| marker.to_string())
    }
}

fn cell_extent(cells: &BTreeMap<(u32, u32), CellContent>) -> Option<Bounds> {
    cells.keys().fold(None, |acc: Option<Bounds>, &(row, col)| {
        let here = Bounds::from_corners((row, col), (row, col));
        Some(match acc {
            Some(b) => b.union(&here),
            None => here,
        })
    })
}
