//! Reference resolution: reference tokens plus an origin cell become
//! fully-qualified targets.

use serde::{Deserialize, Serialize};

use crate::error::FormulaError;
use crate::token::{CellRef, Literal, RangeRef, SheetSpan, Token};
use crate::tokenizer::tokenize;
use crate::types::{CellAddress, ExternalTarget, RangeAddress, MAX_COLS, MAX_ROWS};
use crate::workbook::Workbook;

/// Defined names may refer to other names; deeper chains are treated as broken.
const MAX_NAME_DEPTH: usize = 8;

/// A fully-qualified reference target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum ResolvedRef {
    Cell(CellAddress),
    /// Bounded rectangle.
    Range(RangeAddress),
    /// Whole columns or whole rows.
    Unbounded(RangeAddress),
    External(ExternalTarget),
}

impl std::fmt::Display for ResolvedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedRef::Cell(cell) => write!(f, "{cell}"),
            ResolvedRef::Range(range) | ResolvedRef::Unbounded(range) => write!(f, "{range}"),
            ResolvedRef::External(target) => write!(f, "{target}"),
        }
    }
}

/// Outcome of resolving a single token.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Not a reference (literal, operator, function name).
    None,
    Targets(Vec<ResolvedRef>),
    /// A name the workbook does not define: structured table references,
    /// LET/LAMBDA parameters, or names from add-ins. No edge is produced.
    Symbolic(String),
}

/// All references of one formula, in token order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFormula {
    pub references: Vec<ResolvedRef>,
    pub symbolic: Vec<String>,
    pub errors: Vec<FormulaError>,
}

/// Resolves reference tokens against a normalized workbook.
pub struct Resolver<'a> {
    workbook: &'a Workbook,
}

impl<'a> Resolver<'a> {
    pub fn new(workbook: &'a Workbook) -> Self {
        Self { workbook }
    }

    /// Resolve every reference in a token sequence. Unresolvable references
    /// are collected, not propagated, so one bad reference drops only its own
    /// edge.
    pub fn resolve_all(&self, tokens: &[Token], origin: &CellAddress) -> ResolvedFormula {
        let mut out = ResolvedFormula::default();
        for token in tokens {
            match self.resolve(token, origin) {
                Ok(Resolution::None) => {}
                Ok(Resolution::Targets(targets)) => out.references.extend(targets),
                Ok(Resolution::Symbolic(name)) => out.symbolic.push(name),
                Err(err) => out.errors.push(err),
            }
        }
        out
    }

    pub fn resolve(&self, token: &Token, origin: &CellAddress) -> Result<Resolution, FormulaError> {
        self.resolve_at(token, origin, None, 0)
    }

    /// `sheets` overrides the origin sheet for qualified inner references.
    fn resolve_at(
        &self,
        token: &Token,
        origin: &CellAddress,
        sheets: Option<&[String]>,
        depth: usize,
    ) -> Result<Resolution, FormulaError> {
        let origin_sheet = std::slice::from_ref(&origin.sheet);
        let targets_on = sheets.unwrap_or(origin_sheet);

        match token {
            Token::Literal {
                literal: Literal::Error(e),
            } if e == "#REF!" => Err(FormulaError::unresolvable(
                "#REF!",
                "reference points at a deleted cell or sheet",
            )),
            Token::CellRef { cell } => {
                let (row, col) = self.cell_coords(cell, origin, token)?;
                Ok(Resolution::Targets(
                    targets_on
                        .iter()
                        .map(|s| ResolvedRef::Cell(CellAddress::new(s.clone(), row, col)))
                        .collect(),
                ))
            }
            Token::RangeRef { range } => {
                let make = self.range_maker(range, origin, token)?;
                Ok(Resolution::Targets(
                    targets_on.iter().map(|s| make(s.clone())).collect(),
                ))
            }
            Token::SheetQualifiedRef { sheet, inner } => {
                let names = self.expand_span(sheet, token, origin)?;
                self.resolve_at(inner, origin, Some(names.as_slice()), depth)
            }
            Token::ExternalRef { workbook, inner } => {
                let workbook = self.workbook.external_workbook(workbook);
                let (sheet, reference) = match inner.as_ref() {
                    Token::SheetQualifiedRef { sheet, inner } => {
                        (Some(sheet.to_string()), a1_text(inner, origin))
                    }
                    other => (None, a1_text(other, origin)),
                };
                Ok(Resolution::Targets(vec![ResolvedRef::External(
                    ExternalTarget {
                        workbook,
                        sheet,
                        reference,
                    },
                )]))
            }
            Token::Name { name } => {
                let scope = sheets
                    .and_then(|s| s.first())
                    .map(String::as_str)
                    .unwrap_or(origin.sheet.as_str());
                self.resolve_name(name, scope, origin, depth)
            }
            _ => Ok(Resolution::None),
        }
    }

    fn resolve_name(
        &self,
        name: &str,
        scope: &str,
        origin: &CellAddress,
        depth: usize,
    ) -> Result<Resolution, FormulaError> {
        let Some(defined) = self.workbook.defined_name(name, scope) else {
            return Ok(Resolution::Symbolic(name.to_string()));
        };
        if depth >= MAX_NAME_DEPTH {
            return Err(FormulaError::unresolvable(
                name,
                "defined name chain is too deep or circular",
            ));
        }
        let tokens = tokenize(&defined.refers_to, origin).map_err(|e| {
            FormulaError::unresolvable(name, format!("defined name does not parse: {e}"))
        })?;

        let mut targets = Vec::new();
        for token in &tokens {
            match self.resolve_at(token, origin, None, depth + 1)? {
                Resolution::Targets(found) => targets.extend(found),
                Resolution::None | Resolution::Symbolic(_) => {}
            }
        }
        Ok(Resolution::Targets(targets))
    }

    /// Canonical sheet names covered by a (possibly 3-D) qualifier, in
    /// workbook order.
    fn expand_span(
        &self,
        span: &SheetSpan,
        token: &Token,
        origin: &CellAddress,
    ) -> Result<Vec<String>, FormulaError> {
        let lookup = |name: &str| {
            self.workbook.sheet_index(name).ok_or_else(|| {
                FormulaError::unresolvable(a1_text(token, origin), format!("unknown sheet '{name}'"))
            })
        };
        let first = lookup(&span.first)?;
        let last = match &span.last {
            Some(last) => lookup(last)?,
            None => first,
        };
        let (lo, hi) = (first.min(last), first.max(last));
        Ok(self.workbook.sheets[lo..=hi]
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }

    fn cell_coords(
        &self,
        cell: &CellRef,
        origin: &CellAddress,
        token: &Token,
    ) -> Result<(u32, u32), FormulaError> {
        let row = cell.row.resolve(origin.row).filter(|r| *r < MAX_ROWS);
        let col = cell.col.resolve(origin.col).filter(|c| *c < MAX_COLS);
        match (row, col) {
            (Some(row), Some(col)) => Ok((row, col)),
            _ => Err(FormulaError::unresolvable(
                a1_text(token, origin),
                "relative offset falls outside the sheet",
            )),
        }
    }

    fn range_maker(
        &self,
        range: &RangeRef,
        origin: &CellAddress,
        token: &Token,
    ) -> Result<Box<dyn Fn(String) -> ResolvedRef>, FormulaError> {
        let outside = || {
            FormulaError::unresolvable(
                a1_text(token, origin),
                "relative offset falls outside the sheet",
            )
        };
        match *range {
            RangeRef::Cells { start, end } => {
                let a = self.cell_coords(&start, origin, token)?;
                let b = self.cell_coords(&end, origin, token)?;
                Ok(Box::new(move |sheet| {
                    ResolvedRef::Range(RangeAddress::cells(sheet, a, b))
                }))
            }
            RangeRef::Columns { start, end } => {
                let a = start.resolve(origin.col).filter(|c| *c < MAX_COLS).ok_or_else(outside)?;
                let b = end.resolve(origin.col).filter(|c| *c < MAX_COLS).ok_or_else(outside)?;
                Ok(Box::new(move |sheet| {
                    ResolvedRef::Unbounded(RangeAddress::columns(sheet, a, b))
                }))
            }
            RangeRef::Rows { start, end } => {
                let a = start.resolve(origin.row).filter(|r| *r < MAX_ROWS).ok_or_else(outside)?;
                let b = end.resolve(origin.row).filter(|r| *r < MAX_ROWS).ok_or_else(outside)?;
                Ok(Box::new(move |sheet| {
                    ResolvedRef::Unbounded(RangeAddress::rows(sheet, a, b))
                }))
            }
        }
    }
}

fn a1_text(token: &Token, origin: &CellAddress) -> String {
    let mut out = String::new();
    token.write_a1(origin.row, origin.col, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::{DefinedName, RawCell, SheetData, WorkbookData};

    fn workbook() -> Workbook {
        let mut data = WorkbookData::new("model.xlsx")
            .with_sheet(SheetData::new("Jan").with_cells(vec![RawCell::number(0, 0, 1.0)]))
            .with_sheet(SheetData::new("Feb"))
            .with_sheet(SheetData::new("Mar"))
            .with_sheet(SheetData::new("Summary"));
        data.defined_names = vec![
            DefinedName {
                name: "Rate".into(),
                refers_to: "=Jan!$B$2".into(),
                scope: None,
            },
            DefinedName {
                name: "Loop".into(),
                refers_to: "=Loop".into(),
                scope: None,
            },
        ];
        data.external_workbooks = vec![r"C:\data\rates.xlsx".into()];
        Workbook::from_data(&data)
    }

    fn resolve(formula: &str, origin: &CellAddress) -> ResolvedFormula {
        let wb = workbook();
        let tokens = tokenize(formula, origin).unwrap();
        Resolver::new(&wb).resolve_all(&tokens, origin)
    }

    #[test]
    fn test_relative_reference_uses_origin() {
        let origin = CellAddress::new("Summary", 9, 3); // D10
        let resolved = resolve("=B10+$A$1", &origin);
        assert_eq!(
            resolved.references,
            vec![
                ResolvedRef::Cell(CellAddress::new("Summary", 9, 1)),
                ResolvedRef::Cell(CellAddress::new("Summary", 0, 0)),
            ]
        );
    }

    #[test]
    fn test_sheet_names_are_case_insensitive_and_canonical() {
        let origin = CellAddress::new("Summary", 0, 0);
        let resolved = resolve("=jan!A1", &origin);
        assert_eq!(
            resolved.references,
            vec![ResolvedRef::Cell(CellAddress::new("Jan", 0, 0))]
        );
    }

    #[test]
    fn test_three_d_reference_expands_in_workbook_order() {
        let origin = CellAddress::new("Summary", 0, 0);
        let resolved = resolve("=SUM(Mar:Jan!B2)", &origin);
        let sheets: Vec<_> = resolved
            .references
            .iter()
            .map(|r| match r {
                ResolvedRef::Cell(c) => c.sheet.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sheets, vec!["Jan", "Feb", "Mar"]);
    }

    #[test]
    fn test_unknown_sheet_is_unresolvable() {
        let origin = CellAddress::new("Summary", 0, 0);
        let resolved = resolve("=Deleted!A1+Jan!A1", &origin);
        assert_eq!(resolved.references.len(), 1);
        assert_eq!(resolved.errors.len(), 1);
        assert!(matches!(
            &resolved.errors[0],
            FormulaError::UnresolvableReference { reason, .. } if reason.contains("Deleted")
        ));
    }

    #[test]
    fn test_ref_error_is_unresolvable() {
        let resolved = resolve("=#REF!*2", &CellAddress::new("Jan", 0, 1));
        assert_eq!(resolved.errors.len(), 1);
    }

    #[test]
    fn test_whole_column_is_unbounded() {
        let origin = CellAddress::new("Jan", 0, 3);
        let resolved = resolve("=SUM(A:A)", &origin);
        assert_eq!(
            resolved.references,
            vec![ResolvedRef::Unbounded(RangeAddress::columns("Jan", 0, 0))]
        );
    }

    #[test]
    fn test_external_index_maps_to_declared_path() {
        let origin = CellAddress::new("Jan", 0, 3);
        let resolved = resolve("=[1]Rates!B5", &origin);
        assert_eq!(
            resolved.references,
            vec![ResolvedRef::External(ExternalTarget {
                workbook: r"C:\data\rates.xlsx".into(),
                sheet: Some("Rates".into()),
                reference: "B5".into(),
            })]
        );
    }

    #[test]
    fn test_defined_name_resolves_through_refers_to() {
        let origin = CellAddress::new("Summary", 4, 4);
        let resolved = resolve("=A1*Rate", &origin);
        assert_eq!(
            resolved.references[1],
            ResolvedRef::Cell(CellAddress::new("Jan", 1, 1))
        );
    }

    #[test]
    fn test_unknown_and_structured_names_are_symbolic() {
        let origin = CellAddress::new("Summary", 0, 0);
        let resolved = resolve("=SUM(Sales[Amount])+x", &origin);
        assert!(resolved.references.is_empty());
        assert_eq!(resolved.symbolic, vec!["Sales[Amount]", "x"]);
    }

    #[test]
    fn test_self_referential_name_is_bounded() {
        let origin = CellAddress::new("Summary", 0, 0);
        let resolved = resolve("=Loop", &origin);
        assert_eq!(resolved.errors.len(), 1);
    }

    #[test]
    fn test_offset_before_first_row_is_unresolvable() {
        let wb = workbook();
        let token = Token::CellRef {
            cell: CellRef {
                row: crate::token::Axis::Relative(-5),
                col: crate::token::Axis::Relative(0),
            },
        };
        let result = Resolver::new(&wb).resolve(&token, &CellAddress::new("Jan", 1, 0));
        assert!(result.is_err());
    }
}
