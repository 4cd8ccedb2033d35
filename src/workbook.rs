// Workbook - csv-backed multi-sheet document
//
// A single CSV file holds several named sheets. A record starting with
// `@sheet,<Name>` opens a sheet; the records after it are that sheet's rows.
// A data row whose first cell starts with `@` is stored with one extra `@`,
// so cell text can never be mistaken for a marker.
// Cells are addressed spreadsheet style (`B2`), and a tiny formula engine
// evaluates `SUM(...)` so derived cells behave the way they would in a
// spreadsheet application.

use crate::error::{FormulaError, ReadError, WriteError};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// First field of a record that starts a new sheet
pub const SHEET_MARKER: &str = "@sheet";

const MARKER_PREFIX: char = '@';

/// Leading cell of a data row as stored on disk
fn escape_lead(cell: &str) -> String {
    if cell.starts_with(MARKER_PREFIX) {
        format!("{}{}", MARKER_PREFIX, cell)
    } else {
        cell.to_string()
    }
}

/// Inverse of `escape_lead`. A single `@` written by hand is kept as is.
fn unescape_lead(cell: &str) -> &str {
    match cell.strip_prefix(MARKER_PREFIX) {
        Some(rest) if rest.starts_with(MARKER_PREFIX) => rest,
        _ => cell,
    }
}

// ============================================================================
// CELL ADDRESSING
// ============================================================================

/// Zero-based cell coordinates. Displays and parses as `A1` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub col: usize,
    pub row: usize,
}

impl CellRef {
    pub fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }

    /// Parse `B12`, `$B$12` or `b12`
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let cleaned: String = text.trim().chars().filter(|c| *c != '$').collect();
        let split = cleaned
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| FormulaError::BadReference(text.to_string()))?;
        let (letters, digits) = cleaned.split_at(split);

        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FormulaError::BadReference(text.to_string()));
        }

        let col = letters
            .to_ascii_uppercase()
            .bytes()
            .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize)
            - 1;
        let row: usize = digits
            .parse()
            .map_err(|_| FormulaError::BadReference(text.to_string()))?;
        if row == 0 {
            return Err(FormulaError::BadReference(text.to_string()));
        }

        Ok(Self { col, row: row - 1 })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row + 1)
    }
}

fn column_name(col: usize) -> String {
    let mut n = col + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}

// ============================================================================
// SHEET
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    name: String,
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows with trailing empty cells trimmed, so a row whose last column is
    /// blank reports fewer cells.
    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(|row| {
            let len = row
                .iter()
                .rposition(|cell| !cell.is_empty())
                .map(|i| i + 1)
                .unwrap_or(0);
            &row[..len]
        })
    }

    pub fn cell(&self, at: CellRef) -> &str {
        self.rows
            .get(at.row)
            .and_then(|row| row.get(at.col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Set a cell, growing the grid with empty cells as needed
    pub fn set_cell(&mut self, at: CellRef, value: impl Into<String>) {
        if self.rows.len() <= at.row {
            self.rows.resize_with(at.row + 1, Vec::new);
        }
        let row = &mut self.rows[at.row];
        if row.len() <= at.col {
            row.resize(at.col + 1, String::new());
        }
        row[at.col] = value.into();
    }

    pub fn set_formula(&mut self, at: CellRef, formula: &str) {
        self.set_cell(at, format!("={}", formula.trim_start_matches('=')));
    }

    /// Evaluated value of a cell: formulas are computed, literals parsed.
    pub fn evaluate(&self, at: CellRef) -> Result<f64, FormulaError> {
        let raw = self.cell(at).trim();
        match raw.strip_prefix('=') {
            Some(formula) => self.eval_formula(formula),
            None => raw
                .parse::<f64>()
                .map_err(|_| FormulaError::NotANumber(raw.to_string())),
        }
    }

    fn eval_formula(&self, formula: &str) -> Result<f64, FormulaError> {
        let upper = formula.trim().to_ascii_uppercase();
        let args = upper
            .strip_prefix("SUM(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| FormulaError::Unsupported(formula.to_string()))?;

        let mut total = 0.0;
        for arg in args.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            if let Ok(number) = arg.parse::<f64>() {
                total += number;
                continue;
            }
            let (from, to) = match arg.split_once(':') {
                Some((a, b)) => (CellRef::parse(a)?, CellRef::parse(b)?),
                None => {
                    let cell = CellRef::parse(arg)?;
                    (cell, cell)
                }
            };
            total += self.sum_range(from, to);
        }
        Ok(total)
    }

    /// Spreadsheet SUM semantics: text and blanks are ignored
    fn sum_range(&self, from: CellRef, to: CellRef) -> f64 {
        let rows = from.row.min(to.row)..=from.row.max(to.row);
        let cols = from.col.min(to.col)..=from.col.max(to.col);

        self.rows
            .iter()
            .enumerate()
            .filter(|(r, _)| rows.contains(r))
            .flat_map(|(_, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(c, _)| cols.contains(c))
                    .map(|(_, value)| value)
            })
            .filter_map(|value| value.trim().parse::<f64>().ok())
            .sum()
    }
}

// ============================================================================
// WORKBOOK
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self, ReadError> {
        let file = File::open(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReadError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut sheets: Vec<Sheet> = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if record.get(0) == Some(SHEET_MARKER) {
                sheets.push(Sheet::new(record.get(1).unwrap_or("").trim()));
                continue;
            }
            let row: Vec<String> = record
                .iter()
                .enumerate()
                .map(|(i, cell)| (if i == 0 { unescape_lead(cell) } else { cell }).to_string())
                .collect();
            match sheets.last_mut() {
                Some(sheet) => sheet.rows.push(row),
                None => debug!("ignoring record before first sheet marker: {:?}", record),
            }
        }

        Ok(Self { sheets })
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(writer);

        for sheet in &self.sheets {
            wtr.write_record([SHEET_MARKER, sheet.name.as_str()])?;
            for row in &sheet.rows {
                if row.is_empty() {
                    // a lone empty field is quoted, keeping the row in place
                    wtr.write_record([""])?;
                } else {
                    let lead = escape_lead(&row[0]);
                    let rest = row[1..].iter().map(String::as_str);
                    wtr.write_record(std::iter::once(lead.as_str()).chain(rest))?;
                }
            }
        }
        wtr.flush()?;
        Ok(())
    }

    /// Encode fully in memory, then replace the file contents in one write
    pub fn save(&self, path: &Path) -> Result<(), WriteError> {
        let mut buf = Vec::new();
        self.to_writer(&mut buf)?;
        std::fs::write(path, buf).map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// Existing sheet by name, or a new empty one appended at the end
    pub fn sheet_or_insert(&mut self, name: &str) -> &mut Sheet {
        let idx = match self.sheets.iter().position(|s| s.name == name) {
            Some(i) => i,
            None => {
                self.sheets.push(Sheet::new(name));
                self.sheets.len() - 1
            }
        };
        &mut self.sheets[idx]
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.name.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
