// Field editor
// A draft is a small ordered field map; the widget collecting input is pluggable.

use crate::bus::Key;
use crate::error::DraftError;
use crate::model::{Collection, Expense, Row, Stonk, WatchItem};

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub label: &'static str,
    pub value: String,
}

/// In-progress values for one row, kept as text until commit
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    collection: Collection,
    fields: Vec<Field>,
    focus: usize,
}

impl Draft {
    /// Empty form for a new row
    pub fn blank(collection: Collection) -> Self {
        let values: Vec<String> = match collection {
            Collection::Expenses => vec![String::new(), "0.00".to_string()],
            Collection::Stonks => vec![
                String::new(),
                "0.00".to_string(),
                String::new(),
                "0.00".to_string(),
            ],
            Collection::WatchList => vec![String::new(), String::new(), "No".to_string()],
        };
        Self::build(collection, values)
    }

    /// Form pre-filled from an existing row. Numbers use the same shortest
    /// round-trip text the document stores, so untouched fields commit unchanged.
    pub fn from_row(row: &Row) -> Self {
        let values = match row {
            Row::Expense(e) => vec![e.name.clone(), e.amount.to_string()],
            Row::Stonk(s) => vec![
                s.symbol.clone(),
                s.change.to_string(),
                s.comment.clone(),
                s.extra.to_string(),
            ],
            Row::Watch(w) => vec![
                w.symbol.clone(),
                w.quantity.clone(),
                if w.owned { "Yes" } else { "No" }.to_string(),
            ],
        };
        Self::build(row.collection(), values)
    }

    fn build(collection: Collection, values: Vec<String>) -> Self {
        let fields = collection
            .headers()
            .iter()
            .zip(values)
            .map(|(label, value)| Field {
                label: *label,
                value,
            })
            .collect();
        Self {
            collection,
            fields,
            focus: 0,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn value(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.value.as_str())
    }

    /// Replace a field's text. False if there is no such field.
    pub fn set(&mut self, label: &str, value: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|f| f.label == label) {
            Some(field) => {
                field.value = value.into();
                true
            }
            None => false,
        }
    }

    pub fn focused_mut(&mut self) -> Option<&mut Field> {
        self.fields.get_mut(self.focus)
    }

    pub fn focus_next(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + 1) % self.fields.len();
        }
    }

    pub fn focus_prev(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
        }
    }

    /// Typed row, or the first field that does not convert
    pub fn to_row(&self) -> Result<Row, DraftError> {
        let text = |i: usize| self.fields[i].value.trim().to_string();
        let number = |i: usize| parse_number(self.fields[i].label, &self.fields[i].value);

        let row = match self.collection {
            Collection::Expenses => Row::Expense(Expense {
                name: text(0),
                amount: number(1)?,
            }),
            Collection::Stonks => Row::Stonk(Stonk {
                symbol: text(0),
                change: number(1)?,
                comment: text(2),
                extra: number(3)?,
            }),
            Collection::WatchList => Row::Watch(WatchItem {
                symbol: text(0),
                quantity: text(1),
                owned: parse_flag(self.fields[2].label, &self.fields[2].value)?,
            }),
        };
        Ok(row)
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, DraftError> {
    value.trim().parse::<f64>().map_err(|_| DraftError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, DraftError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" => Ok(true),
        "no" | "n" | "false" | "" => Ok(false),
        _ => Err(DraftError::InvalidFlag {
            field,
            value: value.to_string(),
        }),
    }
}

// ============================================================================
// EDITOR INTERFACE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorOutcome {
    Continue,
    Submit,
    Cancel,
}

/// Collects keystrokes into a draft. Swappable so another input widget can
/// stand in for the inline form.
pub trait FieldEditor: Send {
    fn handle_key(&mut self, draft: &mut Draft, key: Key) -> EditorOutcome;
}

/// Form drawn inside the main view: one line per field, Tab to move
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineForm;

impl FieldEditor for InlineForm {
    fn handle_key(&mut self, draft: &mut Draft, key: Key) -> EditorOutcome {
        match key {
            Key::Enter => return EditorOutcome::Submit,
            Key::Esc => return EditorOutcome::Cancel,
            Key::Tab | Key::Down => draft.focus_next(),
            Key::BackTab | Key::Up => draft.focus_prev(),
            Key::Backspace => {
                if let Some(field) = draft.focused_mut() {
                    field.value.pop();
                }
            }
            Key::Char(c) => {
                if let Some(field) = draft.focused_mut() {
                    field.value.push(c);
                }
            }
            Key::Interrupt => {}
        }
        EditorOutcome::Continue
    }
}
