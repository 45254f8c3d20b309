//! Turns flattened rows into a fixed-width table.
//!
//! There are two column orders:
//! - a batch of rows (a json array, or a stream of documents) gets the sorted union of all keys,
//!   so the header does not depend on which row happened to come first;
//! - a lone json object keeps the order in which its keys were flattened.

use {
    crate::flatten_json_value::{
        FlatRow, KeyCollision, Scalar,
        flatten::{self, Flattener},
    },
    itertools::Itertools,
    serde_json::Value,
    std::borrow::Borrow,
    tap::Pipe,
    tracing::instrument,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "malformed input at {}: expected an object or an array of objects, found {found}",
        location(.index)
    )]
    MalformedInput {
        index: Option<usize>,
        found: &'static str,
    },
    #[error("flattening {}", location(.index))]
    Flatten {
        index: Option<usize>,
        #[source]
        source: flatten::Error,
    },
}

fn location(index: &Option<usize>) -> String {
    index
        .map(|idx| format!("element #{idx}"))
        .unwrap_or_else(|| "top level".to_string())
}

type Result<T> = std::result::Result<T, self::Error>;

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "Value::Null",
        Value::Bool(_) => "Value::Bool",
        Value::Number(_) => "Value::Number",
        Value::String(_) => "Value::String",
        Value::Array(_) => "Value::Array",
        Value::Object(_) => "Value::Object",
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    /// Every row holds exactly `columns.len()` cells.
    pub rows: Vec<Vec<Scalar>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnOrder {
    #[default]
    Sorted,
    Inserted,
}

/// Flattened rows of one conversion, together with the rule that orders their columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    rows: Vec<FlatRow>,
    order: ColumnOrder,
}

impl RowSet {
    pub fn single(row: FlatRow) -> Self {
        Self {
            rows: vec![row],
            order: ColumnOrder::Inserted,
        }
    }

    pub fn push(&mut self, row: FlatRow) {
        self.rows.push(row);
        self.order = ColumnOrder::Sorted;
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }

    pub fn order(&self) -> ColumnOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> Vec<String> {
        match self.order {
            ColumnOrder::Sorted => unified_columns(&self.rows),
            ColumnOrder::Inserted => self
                .rows
                .iter()
                .flat_map(FlatRow::keys)
                .unique()
                .cloned()
                .collect(),
        }
    }

    pub fn to_table(&self) -> Table {
        self.columns().pipe(|columns| fill(columns, &self.rows))
    }

    /// Every key collision, tagged with the index of the row it happened in.
    pub fn collisions(&self) -> impl Iterator<Item = (usize, &KeyCollision)> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(idx, row)| row.collisions().iter().map(move |c| (idx, c)))
    }
}

impl FromIterator<FlatRow> for RowSet {
    fn from_iter<T: IntoIterator<Item = FlatRow>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
            order: ColumnOrder::Sorted,
        }
    }
}

impl From<Vec<FlatRow>> for RowSet {
    fn from(rows: Vec<FlatRow>) -> Self {
        rows.into_iter().collect()
    }
}

/// Sorted, duplicate-free union of the keys of all `rows`.
pub fn unified_columns(rows: &[FlatRow]) -> Vec<String> {
    rows.iter()
        .flat_map(FlatRow::keys)
        .sorted()
        .dedup()
        .cloned()
        .collect()
}

fn fill(columns: Vec<String>, rows: &[FlatRow]) -> Table {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| row.get(column).cloned().unwrap_or_else(Scalar::empty))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .pipe(|rows| Table { columns, rows })
}

/// Tabulates a batch of rows under the sorted union of their keys.
pub fn tabulate(rows: &[FlatRow]) -> Table {
    fill(unified_columns(rows), rows)
}

/// Tabulates a parsed json document.
///
/// An array must contain only objects, each of which becomes one row. An object becomes
/// a single row whose header keeps the flattening order. Anything else is rejected.
#[instrument(skip_all)]
pub fn tabulate_document(flattener: &Flattener, document: &Value) -> Result<RowSet> {
    (match document {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| flatten_object(flattener, item, Some(idx)))
            .collect::<Result<RowSet>>(),
        Value::Object(_) => flatten_object(flattener, document, None).map(RowSet::single),
        other => Err(self::Error::MalformedInput {
            index: None,
            found: kind(other),
        }),
    })
    .inspect(log_rows)
}

/// Tabulates a stream of documents, such as newline delimited json. Every document must be an object.
#[instrument(skip_all)]
pub fn tabulate_documents<I>(flattener: &Flattener, documents: I) -> Result<RowSet>
where
    I: IntoIterator,
    I::Item: Borrow<Value>,
{
    documents
        .into_iter()
        .enumerate()
        .map(|(idx, document)| flatten_object(flattener, document.borrow(), Some(idx)))
        .collect::<Result<RowSet>>()
        .inspect(log_rows)
}

fn flatten_object(flattener: &Flattener, value: &Value, index: Option<usize>) -> Result<FlatRow> {
    match value {
        Value::Object(_) => flattener
            .flatten(value)
            .map_err(|source| self::Error::Flatten { index, source }),
        other => Err(self::Error::MalformedInput {
            index,
            found: kind(other),
        }),
    }
}

fn log_rows(rows: &RowSet) {
    tracing::debug!(rows = rows.len(), order = ?rows.order(), "tabulated");
}
