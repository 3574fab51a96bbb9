//! Typed token model for formula text.
//!
//! Relative reference axes are stored as offsets from the cell that owns the
//! formula, so the same token sequence describes every copy of a filled-down
//! formula. Absolute axes keep their zero-based coordinate.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

use crate::types::column_name;

/// One axis (row or column) of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Axis {
    /// `$`-anchored, zero-based coordinate.
    Absolute(u32),
    /// Offset from the origin cell's coordinate.
    Relative(i64),
}

impl Axis {
    /// Build an axis from a zero-based coordinate written in the formula.
    pub fn from_written(coord: u32, absolute: bool, origin: u32) -> Self {
        if absolute {
            Axis::Absolute(coord)
        } else {
            Axis::Relative(coord as i64 - origin as i64)
        }
    }

    /// Combine with the origin coordinate. `None` when the result falls before
    /// the first row/column.
    pub fn resolve(self, origin: u32) -> Option<u32> {
        match self {
            Axis::Absolute(v) => Some(v),
            Axis::Relative(offset) => {
                let v = origin as i64 + offset;
                u32::try_from(v).ok()
            }
        }
    }

    pub fn is_absolute(self) -> bool {
        matches!(self, Axis::Absolute(_))
    }
}

/// A single-cell reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub row: Axis,
    pub col: Axis,
}

/// A range reference on one sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeRef {
    Cells { start: CellRef, end: CellRef },
    Columns { start: Axis, end: Axis },
    Rows { start: Axis, end: Axis },
}

/// Sheet qualifier, possibly a 3-D span (`Jan:Dec!B2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetSpan {
    pub first: String,
    pub last: Option<String>,
}

impl SheetSpan {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            first: name.into(),
            last: None,
        }
    }
}

impl fmt::Display for SheetSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last {
            Some(last) => write!(f, "{}:{}", self.first, last),
            None => write!(f, "{}", self.first),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    /// `raw` keeps the written spelling (`1.50`, `5%`) for reporting.
    Number { value: f64, raw: String },
    Text(String),
    Bool(bool),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Concat,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    /// Unary minus.
    Negate,
    /// Unary plus.
    Identity,
    /// Postfix `%`.
    Percent,
    /// `:` between operands that are not plain references.
    Range,
    /// Postfix `#` spill reference.
    Spill,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add | Operator::Identity => "+",
            Operator::Subtract | Operator::Negate => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Power => "^",
            Operator::Concat => "&",
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::Percent => "%",
            Operator::Range => ":",
            Operator::Spill => "#",
        }
    }

    /// Binary operators need an operand on both sides.
    pub fn is_binary(self) -> bool {
        !matches!(
            self,
            Operator::Negate | Operator::Identity | Operator::Percent | Operator::Spill
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Punct {
    OpenParen,
    CloseParen,
    /// Function-argument / union separator (`,` or `;`).
    Separator,
    ArrayOpen,
    ArrayClose,
    /// `;` inside an array constant.
    ArrayRowSeparator,
}

/// A formula token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "token", rename_all = "snake_case")]
pub enum Token {
    Literal { literal: Literal },
    Operator { op: Operator },
    Punct { punct: Punct },
    /// Identifier immediately followed by `(`. The `(` follows as its own token.
    FunctionCall { name: String },
    CellRef { cell: CellRef },
    RangeRef { range: RangeRef },
    SheetQualifiedRef { sheet: SheetSpan, inner: Box<Token> },
    ExternalRef { workbook: String, inner: Box<Token> },
    /// Defined name, structured table reference, or LET/LAMBDA parameter.
    Name { name: String },
}

impl Token {
    pub fn number(value: f64, raw: impl Into<String>) -> Self {
        Token::Literal {
            literal: Literal::Number {
                value,
                raw: raw.into(),
            },
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Token::Literal {
            literal: Literal::Text(value.into()),
        }
    }

    pub fn op(op: Operator) -> Self {
        Token::Operator { op }
    }

    pub fn punct(punct: Punct) -> Self {
        Token::Punct { punct }
    }

    /// True for tokens that can end an operand (and so precede a binary operator).
    pub fn ends_operand(&self) -> bool {
        match self {
            Token::Literal { .. }
            | Token::CellRef { .. }
            | Token::RangeRef { .. }
            | Token::SheetQualifiedRef { .. }
            | Token::ExternalRef { .. }
            | Token::Name { .. } => true,
            Token::Punct { punct } => {
                matches!(punct, Punct::CloseParen | Punct::ArrayClose)
            }
            Token::Operator { op } => matches!(op, Operator::Percent | Operator::Spill),
            Token::FunctionCall { .. } => false,
        }
    }

    /// True for any of the reference variants.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Token::CellRef { .. }
                | Token::RangeRef { .. }
                | Token::SheetQualifiedRef { .. }
                | Token::ExternalRef { .. }
        )
    }

    /// Write the token in offset-normalized R1C1 form, so that copies of the same
    /// relative formula produce identical text.
    pub fn write_r1c1(&self, out: &mut String) {
        match self {
            Token::Literal { literal } => match literal {
                Literal::Number { raw, .. } => out.push_str(raw),
                Literal::Text(s) => {
                    out.push('"');
                    out.push_str(&s.replace('"', "\"\""));
                    out.push('"');
                }
                Literal::Bool(b) => out.push_str(if *b { "TRUE" } else { "FALSE" }),
                Literal::Error(e) => out.push_str(e),
            },
            Token::Operator { op } => out.push_str(op.symbol()),
            Token::Punct { punct } => out.push(match punct {
                Punct::OpenParen => '(',
                Punct::CloseParen => ')',
                Punct::Separator => ',',
                Punct::ArrayOpen => '{',
                Punct::ArrayClose => '}',
                Punct::ArrayRowSeparator => ';',
            }),
            Token::FunctionCall { name } => out.push_str(name),
            Token::CellRef { cell } => write_cell_r1c1(cell, out),
            Token::RangeRef { range } => match range {
                RangeRef::Cells { start, end } => {
                    write_cell_r1c1(start, out);
                    out.push(':');
                    write_cell_r1c1(end, out);
                }
                RangeRef::Columns { start, end } => {
                    write_axis('C', *start, out);
                    out.push(':');
                    write_axis('C', *end, out);
                }
                RangeRef::Rows { start, end } => {
                    write_axis('R', *start, out);
                    out.push(':');
                    write_axis('R', *end, out);
                }
            },
            Token::SheetQualifiedRef { sheet, inner } => {
                let _ = write!(out, "'{sheet}'!");
                inner.write_r1c1(out);
            }
            Token::ExternalRef { workbook, inner } => {
                let _ = write!(out, "[{workbook}]");
                inner.write_r1c1(out);
            }
            Token::Name { name } => out.push_str(&name.to_uppercase()),
        }
    }

    /// Write the token back as A1 text relative to the given origin.
    pub fn write_a1(&self, origin_row: u32, origin_col: u32, out: &mut String) {
        match self {
            Token::CellRef { cell } => write_cell_a1(cell, origin_row, origin_col, out),
            Token::RangeRef { range } => match range {
                RangeRef::Cells { start, end } => {
                    write_cell_a1(start, origin_row, origin_col, out);
                    out.push(':');
                    write_cell_a1(end, origin_row, origin_col, out);
                }
                RangeRef::Columns { start, end } => {
                    write_col_a1(*start, origin_col, out);
                    out.push(':');
                    write_col_a1(*end, origin_col, out);
                }
                RangeRef::Rows { start, end } => {
                    write_row_a1(*start, origin_row, out);
                    out.push(':');
                    write_row_a1(*end, origin_row, out);
                }
            },
            Token::SheetQualifiedRef { sheet, inner } => {
                let _ = write!(out, "{sheet}!");
                inner.write_a1(origin_row, origin_col, out);
            }
            Token::ExternalRef { workbook, inner } => {
                let _ = write!(out, "[{workbook}]");
                inner.write_a1(origin_row, origin_col, out);
            }
            Token::Name { name } => out.push_str(name),
            other => other.write_r1c1(out),
        }
    }
}

fn write_axis(prefix: char, axis: Axis, out: &mut String) {
    out.push(prefix);
    match axis {
        Axis::Absolute(v) => {
            let _ = write!(out, "{}", v + 1);
        }
        Axis::Relative(off) => {
            let _ = write!(out, "[{off}]");
        }
    }
}

fn write_cell_r1c1(cell: &CellRef, out: &mut String) {
    write_axis('R', cell.row, out);
    write_axis('C', cell.col, out);
}

fn write_col_a1(axis: Axis, origin_col: u32, out: &mut String) {
    if axis.is_absolute() {
        out.push('$');
    }
    match axis.resolve(origin_col) {
        Some(c) => out.push_str(&column_name(c)),
        None => out.push_str("#REF!"),
    }
}

fn write_row_a1(axis: Axis, origin_row: u32, out: &mut String) {
    if axis.is_absolute() {
        out.push('$');
    }
    match axis.resolve(origin_row) {
        Some(r) => {
            let _ = write!(out, "{}", r + 1);
        }
        None => out.push_str("#REF!"),
    }
}

fn write_cell_a1(cell: &CellRef, origin_row: u32, origin_col: u32, out: &mut String) {
    write_col_a1(cell.col, origin_col, out);
    write_row_a1(cell.row, origin_row, out);
}

/// Offset-normalized text of a whole token sequence, prefixed with `=`.
pub fn r1c1_shape(tokens: &[Token]) -> String {
    let mut out = String::from("=");
    for token in tokens {
        token.write_r1c1(&mut out);
    }
    out
}
