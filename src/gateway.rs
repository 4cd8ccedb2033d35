// Document Gateway
// Reads the document into a Snapshot and writes a Snapshot back, positionally.
// Both calls block on file I/O; the orchestrator only runs them on worker threads.

use crate::error::{ReadError, RowParseError, WriteError};
use crate::model::{Collection, Expense, Snapshot, Stonk, WatchItem};
use crate::workbook::{CellRef, Sheet, Workbook};
use std::path::Path;
use tracing::{debug, warn};

/// Reserved cell in the Expenses sheet receiving the total formula.
/// Lives on the header row so it never collides with data.
pub const TOTAL_CELL: CellRef = CellRef { col: 3, row: 0 };

/// Summation over the whole amount column, below the header
pub const TOTAL_FORMULA: &str = "SUM(B2:B65536)";

/// Rows above the data (the header)
const HEADER_ROWS: usize = 1;

/// Read/write access to the tabular document
pub trait DocumentGateway: Send + Sync {
    fn read(&self, path: &Path) -> Result<Snapshot, ReadError>;
    fn write(&self, path: &Path, snapshot: &Snapshot) -> Result<(), WriteError>;
}

/// Gateway over the csv [`Workbook`] format
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookGateway;

impl DocumentGateway for WorkbookGateway {
    fn read(&self, path: &Path) -> Result<Snapshot, ReadError> {
        let mut book = Workbook::open(path)?;

        let expenses = parse_sheet(&book, Collection::Expenses, parse_expense)?;
        let stonks = parse_sheet(&book, Collection::Stonks, parse_stonk)?;
        let watch_list = parse_sheet(&book, Collection::WatchList, parse_watch_item)?;

        // the formula lives only in this in-memory copy; a read never saves
        let total_expenses = match book.sheet_mut(Collection::Expenses.sheet_name()) {
            Some(sheet) => {
                sheet.set_formula(TOTAL_CELL, TOTAL_FORMULA);
                sheet.evaluate(TOTAL_CELL).unwrap_or_else(|e| {
                    warn!("total formula failed, using 0: {}", e);
                    0.0
                })
            }
            None => 0.0,
        };

        debug!(
            "read {}: {} expenses, {} stonks, {} watch items, total {}",
            path.display(),
            expenses.len(),
            stonks.len(),
            watch_list.len(),
            total_expenses
        );

        Ok(Snapshot {
            expenses,
            stonks,
            watch_list,
            total_expenses,
        })
    }

    fn write(&self, path: &Path, snapshot: &Snapshot) -> Result<(), WriteError> {
        let mut book = if path.exists() {
            Workbook::open(path)?
        } else {
            Workbook::new()
        };

        // Overwrite rows positionally. Rows past the new length are left as they are.
        let sheet = sheet_with_header(&mut book, Collection::Expenses);
        for (i, e) in snapshot.expenses.iter().enumerate() {
            let row = HEADER_ROWS + i;
            sheet.set_cell(CellRef::new(0, row), e.name.as_str());
            sheet.set_cell(CellRef::new(1, row), e.amount.to_string());
        }

        let sheet = sheet_with_header(&mut book, Collection::Stonks);
        for (i, s) in snapshot.stonks.iter().enumerate() {
            let row = HEADER_ROWS + i;
            sheet.set_cell(CellRef::new(0, row), s.symbol.as_str());
            sheet.set_cell(CellRef::new(1, row), s.change.to_string());
            sheet.set_cell(CellRef::new(2, row), s.comment.as_str());
            sheet.set_cell(CellRef::new(3, row), s.extra.to_string());
        }

        let sheet = sheet_with_header(&mut book, Collection::WatchList);
        for (i, w) in snapshot.watch_list.iter().enumerate() {
            let row = HEADER_ROWS + i;
            sheet.set_cell(CellRef::new(0, row), w.symbol.as_str());
            sheet.set_cell(CellRef::new(1, row), w.quantity.as_str());
            sheet.set_cell(CellRef::new(2, row), if w.owned { "Yes" } else { "No" });
        }

        book.save(path)?;
        debug!("wrote {}", path.display());
        Ok(())
    }
}

/// Existing sheet, or a fresh one carrying the collection's header row
fn sheet_with_header(book: &mut Workbook, collection: Collection) -> &mut Sheet {
    let sheet = book.sheet_or_insert(collection.sheet_name());
    if sheet.row_count() == 0 {
        for (col, header) in collection.headers().iter().enumerate() {
            sheet.set_cell(CellRef::new(col, 0), *header);
        }
    }
    sheet
}

// ============================================================================
// ROW PARSING
// ============================================================================

fn parse_sheet<T>(
    book: &Workbook,
    collection: Collection,
    parse: fn(&[String], usize) -> Result<T, RowParseError>,
) -> Result<Vec<T>, ReadError> {
    let sheet = book
        .sheet(collection.sheet_name())
        .ok_or_else(|| ReadError::MissingSheet(collection.sheet_name().to_string()))?;

    let mut out = Vec::new();
    for (i, cells) in sheet.rows().enumerate().skip(HEADER_ROWS) {
        match parse(cells, i + 1) {
            Ok(value) => out.push(value),
            Err(e) => debug!("skipping row: {}", e),
        }
    }
    Ok(out)
}

fn require(cells: &[String], sheet: &'static str, row: usize, needed: usize) -> Result<(), RowParseError> {
    if cells.len() < needed {
        return Err(RowParseError {
            sheet,
            row,
            reason: format!("expected {} columns, found {}", needed, cells.len()),
        });
    }
    Ok(())
}

fn number(value: &str, sheet: &'static str, row: usize, column: &str) -> Result<f64, RowParseError> {
    value.trim().parse::<f64>().map_err(|_| RowParseError {
        sheet,
        row,
        reason: format!("{} '{}' is not a number", column, value),
    })
}

pub(crate) fn parse_expense(cells: &[String], row: usize) -> Result<Expense, RowParseError> {
    const SHEET: &str = "Expenses";
    require(cells, SHEET, row, 2)?;
    Ok(Expense {
        name: cells[0].clone(),
        amount: number(&cells[1], SHEET, row, "Amount")?,
    })
}

pub(crate) fn parse_stonk(cells: &[String], row: usize) -> Result<Stonk, RowParseError> {
    const SHEET: &str = "Stonks";
    require(cells, SHEET, row, 4)?;
    Ok(Stonk {
        symbol: cells[0].clone(),
        change: number(&cells[1], SHEET, row, "Change")?,
        comment: cells[2].clone(),
        extra: number(&cells[3], SHEET, row, "Extra")?,
    })
}

pub(crate) fn parse_watch_item(cells: &[String], row: usize) -> Result<WatchItem, RowParseError> {
    const SHEET: &str = "WatchList";
    require(cells, SHEET, row, 3)?;
    Ok(WatchItem {
        symbol: cells[0].clone(),
        quantity: cells[1].clone(),
        owned: cells[2] == "Yes",
    })
}

// ============================================================================
// TESTS
// ============================================================================
