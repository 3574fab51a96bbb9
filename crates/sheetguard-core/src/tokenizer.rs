//! Formula tokenizer.
//!
//! Function names are recognised syntactically (an identifier directly followed
//! by `(`), so unknown and future functions tokenize like any other.

use crate::error::FormulaError;
use crate::token::{Axis, CellRef, Literal, Operator, Punct, RangeRef, SheetSpan, Token};
use crate::types::{column_index, CellAddress, MAX_ROWS};

/// Error literals, longest first so prefixes never shadow a longer match.
const ERROR_LITERALS: &[&str] = &[
    "#GETTING_DATA",
    "#DIV/0!",
    "#SPILL!",
    "#VALUE!",
    "#NAME?",
    "#NULL!",
    "#CALC!",
    "#FIELD!",
    "#REF!",
    "#NUM!",
    "#N/A",
];

const WORKBOOK_EXTENSIONS: &[&str] = &[".xlsx", ".xlsm", ".xlsb", ".xls", ".xltx", ".xltm", ".ods"];

const FUNCTION_PREFIXES: &[&str] = &["_XLFN.", "_XLWS.", "_XLPM."];

/// Tokenize a formula written in `origin`. A leading `=` is optional.
///
/// Positions in errors are character offsets into `formula` as given.
pub fn tokenize(formula: &str, origin: &CellAddress) -> Result<Vec<Token>, FormulaError> {
    Tokenizer::new(formula, origin.row, origin.col).run()
}

/// What a bare word looks like once `$` markers are accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordShape {
    Cell {
        row: u32,
        row_abs: bool,
        col: u32,
        col_abs: bool,
    },
    Column {
        col: u32,
        abs: bool,
    },
    Row {
        row: u32,
        abs: bool,
    },
    /// `$`-marked but past `XFD` or row 1048576.
    OutOfBounds,
    Other,
}

fn classify_word(word: &str) -> WordShape {
    let mut rest = word;
    let col_abs = rest.starts_with('$');
    if col_abs {
        rest = &rest[1..];
    }
    let letters_end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let (letters, mut tail) = rest.split_at(letters_end);
    let row_abs = tail.starts_with('$');
    if row_abs {
        tail = &tail[1..];
    }
    let digits_ok = !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit());
    let marked = col_abs || row_abs;

    match (letters.is_empty(), tail.is_empty(), digits_ok) {
        (false, false, true) => {
            let col = column_index(letters);
            let row = tail.parse::<u32>().ok().filter(|r| *r >= 1 && *r <= MAX_ROWS);
            match (col, row) {
                (Some(col), Some(row)) => WordShape::Cell {
                    row: row - 1,
                    row_abs,
                    col,
                    col_abs,
                },
                _ if marked => WordShape::OutOfBounds,
                _ => WordShape::Other,
            }
        }
        (false, true, _) if !row_abs => match column_index(letters) {
            Some(col) => WordShape::Column { col, abs: col_abs },
            None if col_abs => WordShape::OutOfBounds,
            None => WordShape::Other,
        },
        (true, false, true) => match tail.parse::<u32>().ok().filter(|r| *r >= 1 && *r <= MAX_ROWS) {
            Some(row) => WordShape::Row {
                row: row - 1,
                abs: marked,
            },
            None => WordShape::OutOfBounds,
        },
        _ => WordShape::Other,
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '\\' | '$')
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '\\' | '?')
}

fn is_workbook_file(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    WORKBOOK_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn function_name(word: &str) -> String {
    let mut name = word.to_uppercase();
    while let Some(stripped) = FUNCTION_PREFIXES
        .iter()
        .find_map(|p| name.strip_prefix(p).map(str::to_string))
    {
        name = stripped;
    }
    name
}

fn sheet_span(text: &str) -> SheetSpan {
    match text.split_once(':') {
        Some((first, last)) => SheetSpan {
            first: first.to_string(),
            last: Some(last.to_string()),
        },
        None => SheetSpan::single(text),
    }
}

/// Split `C:\dir\[Book.xlsx]Sheet` into (`C:\dir\Book.xlsx`, `Sheet`).
fn split_external(content: &str) -> (Option<String>, &str) {
    if let Some(open) = content.find('[') {
        if let Some(close) = content[open..].find(']') {
            let close = open + close;
            let workbook = format!("{}{}", &content[..open], &content[open + 1..close]);
            return (Some(workbook), &content[close + 1..]);
        }
    }
    (None, content)
}

/// Wrap an inner reference with its qualifiers. A destroyed reference
/// (`Sheet1!#REF!`) stays a bare error literal.
fn qualify(workbook: Option<String>, sheet: Option<SheetSpan>, inner: Token) -> Token {
    if matches!(inner, Token::Literal { .. }) {
        return inner;
    }
    let inner = match sheet {
        Some(sheet) => Token::SheetQualifiedRef {
            sheet,
            inner: Box::new(inner),
        },
        None => inner,
    };
    match workbook {
        Some(workbook) => Token::ExternalRef {
            workbook,
            inner: Box::new(inner),
        },
        None => inner,
    }
}

/// True when the token still needs an operand on its right.
fn awaits_operand(token: &Token) -> bool {
    match token {
        Token::Operator { op } => op.is_binary() || matches!(op, Operator::Negate | Operator::Identity),
        _ => false,
    }
}

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    origin_row: u32,
    origin_col: u32,
    tokens: Vec<Token>,
    /// Open `(` / `{` with their positions.
    nesting: Vec<(char, usize)>,
    last_start: usize,
}

impl Tokenizer {
    fn new(formula: &str, origin_row: u32, origin_col: u32) -> Self {
        Self {
            chars: formula.chars().collect(),
            pos: 0,
            origin_row,
            origin_col,
            tokens: Vec::new(),
            nesting: Vec::new(),
            last_start: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, start: usize, reason: &str) -> FormulaError {
        let end = (start + 16).min(self.chars.len());
        let fragment: String = self.chars[start.min(end)..end].iter().collect();
        FormulaError::malformed(fragment, start, reason)
    }

    fn prev_ends_operand(&self) -> bool {
        self.tokens.last().is_some_and(Token::ends_operand)
    }

    fn prev_awaits_operand(&self) -> bool {
        self.tokens.last().is_some_and(awaits_operand)
    }

    fn push(&mut self, start: usize, token: Token) {
        self.last_start = start;
        self.tokens.push(token);
    }

    fn run(mut self) -> Result<Vec<Token>, FormulaError> {
        if self.peek() == Some('=') {
            self.pos += 1;
        }

        while let Some(c) = self.peek() {
            let start = self.pos;
            match c {
                ' ' | '\t' | '\n' | '\r' | '\u{a0}' => self.pos += 1,
                '"' => {
                    let text = self.string_literal()?;
                    self.push(start, Token::text(text));
                }
                '\'' => {
                    let token = self.quoted_reference()?;
                    self.push(start, token);
                }
                '[' => {
                    let token = self.bracketed()?;
                    self.push(start, token);
                }
                '#' if self.prev_ends_operand() => {
                    self.pos += 1;
                    self.push(start, Token::op(Operator::Spill));
                }
                '#' => {
                    let token = self.error_literal()?;
                    self.push(start, token);
                }
                '0'..='9' | '.' => {
                    let token = self.numeric()?;
                    self.push(start, token);
                }
                '+' | '-' => {
                    let op = match (c, self.prev_ends_operand()) {
                        ('+', true) => Operator::Add,
                        ('+', false) => Operator::Identity,
                        (_, true) => Operator::Subtract,
                        (_, false) => Operator::Negate,
                    };
                    self.pos += 1;
                    self.push(start, Token::op(op));
                }
                '*' => self.binary(Operator::Multiply, 1)?,
                '/' => self.binary(Operator::Divide, 1)?,
                '^' => self.binary(Operator::Power, 1)?,
                '&' => self.binary(Operator::Concat, 1)?,
                '=' => self.binary(Operator::Equal, 1)?,
                '<' => match self.peek_at(1) {
                    Some('=') => self.binary(Operator::LessEqual, 2)?,
                    Some('>') => self.binary(Operator::NotEqual, 2)?,
                    _ => self.binary(Operator::Less, 1)?,
                },
                '>' => match self.peek_at(1) {
                    Some('=') => self.binary(Operator::GreaterEqual, 2)?,
                    _ => self.binary(Operator::Greater, 1)?,
                },
                ':' => self.binary(Operator::Range, 1)?,
                '%' => {
                    if !self.prev_ends_operand() {
                        return Err(self.error(start, "'%' without an operand"));
                    }
                    self.pos += 1;
                    self.push(start, Token::op(Operator::Percent));
                }
                '(' | '{' => {
                    self.nesting.push((c, start));
                    self.pos += 1;
                    let punct = if c == '(' {
                        Punct::OpenParen
                    } else {
                        Punct::ArrayOpen
                    };
                    self.push(start, Token::punct(punct));
                }
                ')' | '}' => self.close(c)?,
                ',' | ';' => {
                    if self.prev_awaits_operand() {
                        return Err(self.error(start, "missing operand before separator"));
                    }
                    let in_array = matches!(self.nesting.last(), Some(('{', _)));
                    let punct = if c == ';' && in_array {
                        Punct::ArrayRowSeparator
                    } else {
                        Punct::Separator
                    };
                    self.pos += 1;
                    self.push(start, Token::punct(punct));
                }
                // implicit intersection marker, no effect on dependencies
                '@' => self.pos += 1,
                '!' => return Err(self.error(start, "unexpected '!'")),
                c if is_word_start(c) => {
                    let token = self.word_token()?;
                    self.push(start, token);
                }
                _ => return Err(self.error(start, "unexpected character")),
            }
        }

        if let Some(&(open, at)) = self.nesting.last() {
            let reason = if open == '(' {
                "unclosed '('"
            } else {
                "unclosed '{'"
            };
            return Err(self.error(at, reason));
        }
        if self.tokens.is_empty() {
            return Err(FormulaError::malformed("", 0, "empty formula"));
        }
        if self.prev_awaits_operand() {
            return Err(self.error(self.last_start, "formula ends with an operator"));
        }
        Ok(self.tokens)
    }

    fn binary(&mut self, op: Operator, width: usize) -> Result<(), FormulaError> {
        let start = self.pos;
        if !self.prev_ends_operand() {
            return Err(self.error(start, "operator without a left operand"));
        }
        self.pos += width;
        self.push(start, Token::op(op));
        Ok(())
    }

    fn close(&mut self, c: char) -> Result<(), FormulaError> {
        let start = self.pos;
        let expected = if c == ')' { '(' } else { '{' };
        if self.prev_awaits_operand() {
            return Err(self.error(start, "missing operand before closing bracket"));
        }
        match self.nesting.pop() {
            Some((open, _)) if open == expected => {}
            _ => {
                let reason = if c == ')' {
                    "unmatched ')'"
                } else {
                    "unmatched '}'"
                };
                return Err(self.error(start, reason));
            }
        }
        self.pos += 1;
        let punct = if c == ')' {
            Punct::CloseParen
        } else {
            Punct::ArrayClose
        };
        self.push(start, Token::punct(punct));
        Ok(())
    }

    fn read_word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_word_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn string_literal(&mut self) -> Result<String, FormulaError> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error(start, "unterminated string literal")),
                Some('"') if self.peek_at(1) == Some('"') => {
                    text.push('"');
                    self.pos += 2;
                }
                Some('"') => {
                    self.pos += 1;
                    return Ok(text);
                }
                Some(ch) => {
                    text.push(ch);
                    self.pos += 1;
                }
            }
        }
    }

    fn error_literal(&mut self) -> Result<Token, FormulaError> {
        let start = self.pos;
        let rest = &self.chars[self.pos..];
        for lit in ERROR_LITERALS {
            let len = lit.chars().count();
            let matches = rest.len() >= len
                && rest
                    .iter()
                    .zip(lit.chars())
                    .all(|(a, b)| a.to_ascii_uppercase() == b);
            if matches {
                self.pos += len;
                return Ok(Token::Literal {
                    literal: Literal::Error((*lit).to_string()),
                });
            }
        }
        Err(self.error(start, "unknown error literal"))
    }

    fn numeric(&mut self) -> Result<Token, FormulaError> {
        let start = self.pos;

        // `1:3` row range
        let mut digits_end = self.pos;
        while self.chars.get(digits_end).is_some_and(char::is_ascii_digit) {
            digits_end += 1;
        }
        if digits_end > start
            && self.chars.get(digits_end) == Some(&':')
            && self
                .chars
                .get(digits_end + 1)
                .is_some_and(|c| c.is_ascii_digit() || *c == '$')
        {
            let word = self.read_word();
            return self.reference_or_name(word, start);
        }

        let mut seen_digit = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            seen_digit = true;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
                seen_digit = true;
            }
        }
        if !seen_digit {
            return Err(self.error(start, "expected a number"));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1 + sign;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let raw: String = self.chars[start..self.pos].iter().collect();
        let value = raw
            .parse::<f64>()
            .map_err(|_| self.error(start, "invalid number"))?;
        Ok(Token::number(value, raw))
    }

    /// A word in operand position: function, qualifier, structured reference,
    /// boolean, reference, or name.
    fn word_token(&mut self) -> Result<Token, FormulaError> {
        let start = self.pos;
        let word = self.read_word();

        match self.peek() {
            Some('(') => {
                if word.contains('$') {
                    return Err(self.error(start, "invalid function name"));
                }
                Ok(Token::FunctionCall {
                    name: function_name(&word),
                })
            }
            Some('!') => {
                self.pos += 1;
                let inner = self.qualified_inner(start)?;
                if is_workbook_file(&word) {
                    Ok(qualify(Some(word), None, inner))
                } else {
                    Ok(qualify(None, Some(SheetSpan::single(word)), inner))
                }
            }
            Some('[') => {
                let block = self.bracket_block(start)?;
                Ok(Token::Name {
                    name: format!("{word}{block}"),
                })
            }
            Some(':') => match self.sheet_span_ahead() {
                Some(last) => {
                    let inner = self.qualified_inner(start)?;
                    let span = SheetSpan {
                        first: word,
                        last: Some(last),
                    };
                    Ok(qualify(None, Some(span), inner))
                }
                None => self.reference_or_name(word, start),
            },
            _ => match word.to_ascii_uppercase().as_str() {
                "TRUE" => Ok(Token::Literal {
                    literal: Literal::Bool(true),
                }),
                "FALSE" => Ok(Token::Literal {
                    literal: Literal::Bool(false),
                }),
                _ => self.reference_or_name(word, start),
            },
        }
    }

    /// At a `:`, look for `Last!` completing a 3-D span. Consumes through `!`
    /// on success, otherwise leaves the position unchanged.
    fn sheet_span_ahead(&mut self) -> Option<String> {
        let save = self.pos;
        self.pos += 1;
        let last = self.read_word();
        if !last.is_empty() && self.peek() == Some('!') {
            self.pos += 1;
            return Some(last);
        }
        self.pos = save;
        None
    }

    /// Reference (or name) following a `!` qualifier.
    fn qualified_inner(&mut self, start: usize) -> Result<Token, FormulaError> {
        match self.peek() {
            Some('#') => self.error_literal(),
            Some(c) if is_word_char(c) => {
                let word_start = self.pos;
                let word = self.read_word();
                self.reference_or_name(word, word_start)
            }
            _ => Err(self.error(start, "expected a reference after '!'")),
        }
    }

    /// Shape of the word after a `:` at the current position, with the position
    /// it would end at. The current position is left unchanged.
    fn range_end(&mut self) -> Option<(WordShape, usize)> {
        if self.peek() != Some(':') {
            return None;
        }
        let save = self.pos;
        self.pos += 1;
        let word = self.read_word();
        let shape = classify_word(&word);
        let end = self.pos;
        self.pos = save;
        Some((shape, end))
    }

    fn cell_ref(&self, row: u32, row_abs: bool, col: u32, col_abs: bool) -> CellRef {
        CellRef {
            row: Axis::from_written(row, row_abs, self.origin_row),
            col: Axis::from_written(col, col_abs, self.origin_col),
        }
    }

    fn reference_or_name(&mut self, word: String, start: usize) -> Result<Token, FormulaError> {
        match classify_word(&word) {
            WordShape::Cell {
                row,
                row_abs,
                col,
                col_abs,
            } => {
                let first = self.cell_ref(row, row_abs, col, col_abs);
                if let Some((
                    WordShape::Cell {
                        row,
                        row_abs,
                        col,
                        col_abs,
                    },
                    end,
                )) = self.range_end()
                {
                    self.pos = end;
                    let last = self.cell_ref(row, row_abs, col, col_abs);
                    return Ok(Token::RangeRef {
                        range: RangeRef::Cells {
                            start: first,
                            end: last,
                        },
                    });
                }
                Ok(Token::CellRef { cell: first })
            }
            WordShape::Column { col, abs } => {
                if let Some((WordShape::Column { col: last, abs: last_abs }, end)) =
                    self.range_end()
                {
                    self.pos = end;
                    return Ok(Token::RangeRef {
                        range: RangeRef::Columns {
                            start: Axis::from_written(col, abs, self.origin_col),
                            end: Axis::from_written(last, last_abs, self.origin_col),
                        },
                    });
                }
                if abs {
                    return Err(self.error(start, "incomplete column reference"));
                }
                Ok(Token::Name { name: word })
            }
            WordShape::Row { row, abs } => {
                if let Some((WordShape::Row { row: last, abs: last_abs }, end)) = self.range_end()
                {
                    self.pos = end;
                    return Ok(Token::RangeRef {
                        range: RangeRef::Rows {
                            start: Axis::from_written(row, abs, self.origin_row),
                            end: Axis::from_written(last, last_abs, self.origin_row),
                        },
                    });
                }
                Err(self.error(start, "incomplete row reference"))
            }
            WordShape::OutOfBounds => Err(self.error(start, "reference outside sheet bounds")),
            WordShape::Other => {
                if word.contains('$') {
                    return Err(self.error(start, "invalid reference"));
                }
                Ok(Token::Name { name: word })
            }
        }
    }

    fn quoted_reference(&mut self) -> Result<Token, FormulaError> {
        let start = self.pos;
        self.pos += 1;
        let mut content = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error(start, "unterminated quoted sheet name")),
                Some('\'') if self.peek_at(1) == Some('\'') => {
                    content.push('\'');
                    self.pos += 2;
                }
                Some('\'') => {
                    self.pos += 1;
                    break;
                }
                Some(ch) => {
                    content.push(ch);
                    self.pos += 1;
                }
            }
        }
        if self.peek() != Some('!') {
            return Err(self.error(start, "expected '!' after quoted sheet name"));
        }
        self.pos += 1;

        let (workbook, sheet) = split_external(&content);
        let sheet = (!sheet.is_empty()).then(|| sheet_span(sheet));
        let inner = self.qualified_inner(start)?;
        Ok(qualify(workbook, sheet, inner))
    }

    /// Consume a balanced `[...]` block and return it with its brackets.
    fn bracket_block(&mut self, start: usize) -> Result<String, FormulaError> {
        let mut depth = 0usize;
        let mut text = String::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.error(start, "unclosed '['"));
            };
            self.pos += 1;
            text.push(ch);
            match ch {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(text);
                    }
                }
                // escape character inside structured references
                '\'' => {
                    if let Some(next) = self.peek() {
                        text.push(next);
                        self.pos += 1;
                    }
                }
                _ => {}
            }
        }
    }

    /// `[` in operand position: external workbook prefix or structured reference.
    fn bracketed(&mut self) -> Result<Token, FormulaError> {
        let start = self.pos;
        let block = self.bracket_block(start)?;
        let workbook = block[1..block.len() - 1].to_string();

        match self.peek() {
            Some('!') => {
                self.pos += 1;
                let inner = self.qualified_inner(start)?;
                return Ok(qualify(Some(workbook), None, inner));
            }
            Some(c) if is_word_char(c) => {
                let save = self.pos;
                let first = self.read_word();
                if self.peek() == Some('!') {
                    self.pos += 1;
                    let inner = self.qualified_inner(start)?;
                    return Ok(qualify(Some(workbook), Some(SheetSpan::single(first)), inner));
                }
                if self.peek() == Some(':') {
                    if let Some(last) = self.sheet_span_ahead() {
                        let inner = self.qualified_inner(start)?;
                        let span = SheetSpan {
                            first,
                            last: Some(last),
                        };
                        return Ok(qualify(Some(workbook), Some(span), inner));
                    }
                }
                self.pos = save;
            }
            _ => {}
        }
        Ok(Token::Name { name: block })
    }
}
