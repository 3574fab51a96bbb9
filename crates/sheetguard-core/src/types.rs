use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of rows in a modern worksheet (1-based row 1048576 is the last).
pub const MAX_ROWS: u32 = 1_048_576;
/// Number of columns in a modern worksheet (column XFD is the last).
pub const MAX_COLS: u32 = 16_384;

/// Location of a single cell. Rows and columns are zero-based.
///
/// Field order gives the derived ordering: sheet, then row, then column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    pub fn new(sheet: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    /// Parse an A1-style address (`B7`, `$B$7`) on the given sheet.
    pub fn parse(sheet: impl Into<String>, a1: &str) -> Option<Self> {
        let (row, col) = parse_a1(a1)?;
        Some(Self::new(sheet, row, col))
    }

    /// The A1 text of this cell without its sheet (`B7`).
    pub fn a1(&self) -> String {
        format!("{}{}", column_name(self.col), self.row + 1)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", quote_sheet(&self.sheet), self.a1())
    }
}

/// Inclusive rectangular bounds, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bounds {
    pub first_row: u32,
    pub first_col: u32,
    pub last_row: u32,
    pub last_col: u32,
}

impl Bounds {
    /// Build bounds from two corners in any order.
    pub fn from_corners(a: (u32, u32), b: (u32, u32)) -> Self {
        Self {
            first_row: a.0.min(b.0),
            first_col: a.1.min(b.1),
            last_row: a.0.max(b.0),
            last_col: a.1.max(b.1),
        }
    }

    /// Parse `A1:D20` (or a single `A1`).
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once(':') {
            Some((a, b)) => Some(Self::from_corners(parse_a1(a)?, parse_a1(b)?)),
            None => {
                let p = parse_a1(text)?;
                Some(Self::from_corners(p, p))
            }
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.first_row && row <= self.last_row && col >= self.first_col && col <= self.last_col
    }

    pub fn cell_count(&self) -> u64 {
        let rows = (self.last_row - self.first_row) as u64 + 1;
        let cols = (self.last_col - self.first_col) as u64 + 1;
        rows * cols
    }

    /// Intersection of two bounds, if any.
    pub fn intersect(&self, other: &Bounds) -> Option<Bounds> {
        let first_row = self.first_row.max(other.first_row);
        let first_col = self.first_col.max(other.first_col);
        let last_row = self.last_row.min(other.last_row);
        let last_col = self.last_col.min(other.last_col);
        (first_row <= last_row && first_col <= last_col).then_some(Bounds {
            first_row,
            first_col,
            last_row,
            last_col,
        })
    }

    /// Smallest bounds covering both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            first_row: self.first_row.min(other.first_row),
            first_col: self.first_col.min(other.first_col),
            last_row: self.last_row.max(other.last_row),
            last_col: self.last_col.max(other.last_col),
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}{}",
            column_name(self.first_col),
            self.first_row + 1,
            column_name(self.last_col),
            self.last_row + 1
        )
    }
}

/// Extent of a range: a bounded rectangle, or whole columns / whole rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeExtent {
    Cells(Bounds),
    /// `A:C` style, unbounded along rows.
    Columns { first_col: u32, last_col: u32 },
    /// `3:5` style, unbounded along columns.
    Rows { first_row: u32, last_row: u32 },
}

/// Which axis an unbounded range leaves open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnboundedAxis {
    EntireColumn,
    EntireRow,
}

impl fmt::Display for UnboundedAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnboundedAxis::EntireColumn => write!(f, "whole-column"),
            UnboundedAxis::EntireRow => write!(f, "whole-row"),
        }
    }
}

/// A range on a single sheet. Bounded extents always satisfy start <= end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RangeAddress {
    pub sheet: String,
    pub extent: RangeExtent,
}

impl RangeAddress {
    pub fn cells(sheet: impl Into<String>, a: (u32, u32), b: (u32, u32)) -> Self {
        Self {
            sheet: sheet.into(),
            extent: RangeExtent::Cells(Bounds::from_corners(a, b)),
        }
    }

    pub fn columns(sheet: impl Into<String>, a: u32, b: u32) -> Self {
        Self {
            sheet: sheet.into(),
            extent: RangeExtent::Columns {
                first_col: a.min(b),
                last_col: a.max(b),
            },
        }
    }

    pub fn rows(sheet: impl Into<String>, a: u32, b: u32) -> Self {
        Self {
            sheet: sheet.into(),
            extent: RangeExtent::Rows {
                first_row: a.min(b),
                last_row: a.max(b),
            },
        }
    }

    /// The axis left open, or `None` for a bounded rectangle.
    pub fn unbounded_axis(&self) -> Option<UnboundedAxis> {
        match self.extent {
            RangeExtent::Cells(_) => None,
            RangeExtent::Columns { .. } => Some(UnboundedAxis::EntireColumn),
            RangeExtent::Rows { .. } => Some(UnboundedAxis::EntireRow),
        }
    }

    /// The bounds covered on a full-size sheet.
    pub fn bounds(&self) -> Bounds {
        match self.extent {
            RangeExtent::Cells(b) => b,
            RangeExtent::Columns {
                first_col,
                last_col,
            } => Bounds {
                first_row: 0,
                first_col,
                last_row: MAX_ROWS - 1,
                last_col,
            },
            RangeExtent::Rows {
                first_row,
                last_row,
            } => Bounds {
                first_row,
                first_col: 0,
                last_row,
                last_col: MAX_COLS - 1,
            },
        }
    }

    pub fn start(&self) -> CellAddress {
        let b = self.bounds();
        CellAddress::new(self.sheet.clone(), b.first_row, b.first_col)
    }

    pub fn end(&self) -> CellAddress {
        let b = self.bounds();
        CellAddress::new(self.sheet.clone(), b.last_row, b.last_col)
    }

    pub fn cell_count(&self) -> u64 {
        self.bounds().cell_count()
    }

    pub fn contains(&self, cell: &CellAddress) -> bool {
        cell.sheet == self.sheet && self.bounds().contains(cell.row, cell.col)
    }
}

impl fmt::Display for RangeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sheet = quote_sheet(&self.sheet);
        match self.extent {
            RangeExtent::Cells(b) => write!(f, "{sheet}!{b}"),
            RangeExtent::Columns {
                first_col,
                last_col,
            } => write!(
                f,
                "{sheet}!{}:{}",
                column_name(first_col),
                column_name(last_col)
            ),
            RangeExtent::Rows {
                first_row,
                last_row,
            } => write!(f, "{sheet}!{}:{}", first_row + 1, last_row + 1),
        }
    }
}

/// Target of a reference into another workbook. Never expanded: its contents
/// are not available locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalTarget {
    pub workbook: String,
    pub sheet: Option<String>,
    /// Reference text inside the external workbook (`B5`, `A:A`, `Rate`).
    pub reference: String,
}

impl fmt::Display for ExternalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "[{}]{}!{}", self.workbook, sheet, self.reference),
            None => write!(f, "[{}]!{}", self.workbook, self.reference),
        }
    }
}

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" | "med" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(anyhow::anyhow!("unknown severity: {s}")),
        }
    }
}

/// Convert a zero-based column index to letters (`0` -> `A`, `27` -> `AB`).
pub fn column_name(col: u32) -> String {
    let mut n = col as u64 + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert column letters to a zero-based index. Case-insensitive.
/// Returns `None` for empty input, non-letters, or columns past `XFD`.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut n: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        n = n * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    (n >= 1 && n <= MAX_COLS).then(|| n - 1)
}

/// Parse an A1 address (`$`-markers allowed) into zero-based (row, col).
pub fn parse_a1(text: &str) -> Option<(u32, u32)> {
    let text = text.trim();
    let cleaned: String = text.chars().filter(|&c| c != '$').collect();
    let split = cleaned.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cleaned.split_at(split);
    let col = column_index(letters)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: u32 = digits.parse().ok()?;
    (row >= 1 && row <= MAX_ROWS).then_some((row - 1, col))
}

/// Quote a sheet name for display when it is not a plain identifier.
pub fn quote_sheet(sheet: &str) -> String {
    let plain = !sheet.is_empty()
        && sheet
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !sheet.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_name_round_trip_edges() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(MAX_COLS - 1), "XFD");
        assert_eq!(column_index("xfd"), Some(MAX_COLS - 1));
        assert_eq!(column_index("XFE"), None);
        assert_eq!(column_index("ABCD"), None);
    }

    #[test]
    fn test_parse_a1() {
        assert_eq!(parse_a1("A1"), Some((0, 0)));
        assert_eq!(parse_a1("$C$10"), Some((9, 2)));
        assert_eq!(parse_a1("A0"), None);
        assert_eq!(parse_a1("A1048577"), None);
        assert_eq!(parse_a1("1A"), None);
    }

    #[test]
    fn test_cell_address_ordering_is_sheet_row_col() {
        let a = CellAddress::new("S", 0, 5);
        let b = CellAddress::new("S", 1, 0);
        let c = CellAddress::new("T", 0, 0);
        assert!(a < b, "row dominates column");
        assert!(b < c, "sheet dominates row");
    }

    #[test]
    fn test_cell_address_display_quotes_sheet() {
        assert_eq!(CellAddress::new("Sheet1", 0, 0).to_string(), "Sheet1!A1");
        assert_eq!(
            CellAddress::new("My Sheet", 4, 1).to_string(),
            "'My Sheet'!B5"
        );
        assert_eq!(CellAddress::new("O'Neil", 0, 0).to_string(), "'O''Neil'!A1");
    }

    #[test]
    fn test_range_normalizes_corners() {
        let r = RangeAddress::cells("S", (5, 3), (1, 1));
        assert_eq!(r.start(), CellAddress::new("S", 1, 1));
        assert_eq!(r.end(), CellAddress::new("S", 5, 3));
        assert_eq!(r.cell_count(), 15);
        assert_eq!(r.to_string(), "S!B2:D6");
    }

    #[test]
    fn test_unbounded_ranges() {
        let col = RangeAddress::columns("S", 0, 0);
        assert_eq!(col.unbounded_axis(), Some(UnboundedAxis::EntireColumn));
        assert_eq!(col.cell_count(), MAX_ROWS as u64);
        assert_eq!(col.to_string(), "S!A:A");

        let row = RangeAddress::rows("S", 2, 0);
        assert_eq!(row.unbounded_axis(), Some(UnboundedAxis::EntireRow));
        assert_eq!(row.to_string(), "S!1:3");
    }

    #[test]
    fn test_bounds_intersect() {
        let a = Bounds::parse("A1:C3").unwrap();
        let b = Bounds::parse("B2:D4").unwrap();
        assert_eq!(a.intersect(&b), Bounds::parse("B2:C3"));
        assert_eq!(a.intersect(&Bounds::parse("E5:F6").unwrap()), None);
    }

    #[test]
    fn test_severity_ordering_and_parse() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!("med".parse::<Severity>().unwrap(), Severity::Medium);
        assert!("fatal".parse::<Severity>().is_err());
    }
}
