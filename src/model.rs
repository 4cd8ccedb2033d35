// Snapshot Model
// In-memory copy of the document: three ordered collections plus the derived total

use crate::error::TransitionError;

// ============================================================================
// ROW TYPES
// ============================================================================

/// One line of the Expenses sheet
#[derive(Debug, Clone, PartialEq)]
pub struct Expense {
    pub name: String,
    pub amount: f64,
}

impl Expense {
    pub fn new(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

/// One line of the Stonks sheet
#[derive(Debug, Clone, PartialEq)]
pub struct Stonk {
    pub symbol: String,
    pub change: f64,
    pub comment: String,
    pub extra: f64,
}

/// One line of the WatchList sheet
#[derive(Debug, Clone, PartialEq)]
pub struct WatchItem {
    pub symbol: String,
    pub quantity: String,
    pub owned: bool,
}

/// A row of any collection, used where the collection is only known at runtime
/// (edit sessions, commits).
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Expense(Expense),
    Stonk(Stonk),
    Watch(WatchItem),
}

impl Row {
    pub fn collection(&self) -> Collection {
        match self {
            Row::Expense(_) => Collection::Expenses,
            Row::Stonk(_) => Collection::Stonks,
            Row::Watch(_) => Collection::WatchList,
        }
    }
}

// ============================================================================
// COLLECTIONS / SCREENS
// ============================================================================

/// The three named collections. Also doubles as the screen being viewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Expenses,
    Stonks,
    WatchList,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Expenses, Collection::Stonks, Collection::WatchList];

    /// Human-readable name for display
    pub fn title(&self) -> &'static str {
        match self {
            Collection::Expenses => "Expenses",
            Collection::Stonks => "Stonks",
            Collection::WatchList => "Watchlist",
        }
    }

    /// Sheet name inside the document
    pub fn sheet_name(&self) -> &'static str {
        match self {
            Collection::Expenses => "Expenses",
            Collection::Stonks => "Stonks",
            Collection::WatchList => "WatchList",
        }
    }

    /// Column headers, in persisted order
    pub fn headers(&self) -> &'static [&'static str] {
        match self {
            Collection::Expenses => &["Name", "Amount"],
            Collection::Stonks => &["Symbol", "Change", "Comment", "Extra"],
            Collection::WatchList => &["Symbol", "Quantity", "Owned"],
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Collection::Expenses => 0,
            Collection::Stonks => 1,
            Collection::WatchList => 2,
        }
    }
}

/// Where a commit lands: an existing position or the end of the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Existing(usize),
    New,
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Full copy of the document. Never mutated in place once published: a reload
/// builds a new one and the old one is swapped out whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub expenses: Vec<Expense>,
    pub stonks: Vec<Stonk>,
    pub watch_list: Vec<WatchItem>,
    /// Evaluated by the document's formula engine, never summed here
    pub total_expenses: f64,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Expenses => self.expenses.len(),
            Collection::Stonks => self.stonks.len(),
            Collection::WatchList => self.watch_list.len(),
        }
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    /// Row at `index` of `collection`, cloned into the collection-agnostic form
    pub fn row(&self, collection: Collection, index: usize) -> Option<Row> {
        match collection {
            Collection::Expenses => self.expenses.get(index).cloned().map(Row::Expense),
            Collection::Stonks => self.stonks.get(index).cloned().map(Row::Stonk),
            Collection::WatchList => self.watch_list.get(index).cloned().map(Row::Watch),
        }
    }

    /// First position holding a row equal to `row`
    pub fn position_of(&self, row: &Row) -> Option<usize> {
        match row {
            Row::Expense(e) => self.expenses.iter().position(|x| x == e),
            Row::Stonk(s) => self.stonks.iter().position(|x| x == s),
            Row::Watch(w) => self.watch_list.iter().position(|x| x == w),
        }
    }

    /// Copy of this snapshot with `row` committed at `target`.
    ///
    /// `Target::New` appends; `Target::Existing(i)` replaces position `i` and
    /// leaves every other element where it was. The derived total is carried
    /// over unchanged; the document recomputes it on the next read.
    pub fn with_row(&self, target: Target, row: Row) -> Result<Snapshot, TransitionError> {
        let mut next = self.clone();
        match row {
            Row::Expense(e) => place(&mut next.expenses, target, e)?,
            Row::Stonk(s) => place(&mut next.stonks, target, s)?,
            Row::Watch(w) => place(&mut next.watch_list, target, w)?,
        }
        Ok(next)
    }
}

fn place<T>(rows: &mut Vec<T>, target: Target, value: T) -> Result<(), TransitionError> {
    match target {
        Target::New => rows.push(value),
        Target::Existing(i) => {
            let len = rows.len();
            let slot = rows
                .get_mut(i)
                .ok_or(TransitionError::NoSuchRow { index: i, len })?;
            *slot = value;
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
