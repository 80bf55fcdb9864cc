//! Scanned row values and order-key comparison.

use crate::{Column, ColumnKind};
use ordered_float::OrderedFloat;
use snafu::Snafu;
use std::collections::BTreeMap;

/// Errors turning scanned rows into comparable key tuples.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum RowError {
    #[snafu(display("row is missing column `{}`", column))]
    MissingColumn { column: String },

    #[snafu(display("can not parse `{}` as numeric key column `{}`", value, column))]
    InvalidNumericKey { column: String, value: String },
}

/// One scanned cell: the raw bytes plus the NULL flag.
///
/// NULL values compare equal only to other NULL values, regardless of the
/// bytes they carry.
#[derive(Debug, Clone, Default)]
pub struct ColumnValue {
    /// Raw value bytes as scanned from the table.
    pub bytes: Vec<u8>,
    /// SQL NULL flag.
    pub is_null: bool,
}

impl ColumnValue {
    /// A non-NULL value.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            is_null: false,
        }
    }

    /// The NULL value.
    pub fn null() -> Self {
        Self {
            bytes: Vec::new(),
            is_null: true,
        }
    }

    /// Lossy textual form of the value bytes.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        if self.is_null || other.is_null {
            return self.is_null && other.is_null;
        }
        self.bytes == other.bytes
    }
}

impl Eq for ColumnValue {}

/// A scanned row: column name → value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRecord {
    columns: BTreeMap<String, ColumnValue>,
}

impl RowRecord {
    /// An empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one column value, replacing any previous value.
    pub fn insert(&mut self, column: impl Into<String>, value: ColumnValue) {
        self.columns.insert(column.into(), value);
    }

    /// Get one column value.
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.get(column)
    }

    /// Number of columns in this row.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether this row carries no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, ColumnValue)> for RowRecord {
    fn from_iter<T: IntoIterator<Item = (String, ColumnValue)>>(iter: T) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// One comparable part of an order-key tuple.
///
/// The variant order gives SQL NULL-first ordering for free through the
/// derived `Ord`. `Number` and `Text` never mix within one column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPart {
    /// NULL key value; sorts before everything else.
    Null,
    /// Numeric column parsed as a double.
    Number(OrderedFloat<f64>),
    /// Quoted column compared byte-lexicographically.
    Text(Vec<u8>),
}

/// The totally-ordered form of a row's order-key columns, compared
/// lexicographically part by part.
pub type KeyTuple = Vec<KeyPart>;

/// Convert one raw value into a [`KeyPart`] under the column's kind.
pub(crate) fn key_part(column: &Column, value: &ColumnValue) -> Result<KeyPart, RowError> {
    if value.is_null {
        return Ok(KeyPart::Null);
    }
    match column.kind {
        ColumnKind::Quoted => Ok(KeyPart::Text(value.bytes.clone())),
        ColumnKind::Numeric => {
            let text = value.text();
            let parsed: f64 = text.parse().map_err(|_| RowError::InvalidNumericKey {
                column: column.name.clone(),
                value: text,
            })?;
            Ok(KeyPart::Number(OrderedFloat(parsed)))
        }
    }
}

/// Build the comparable key tuple of `row` over `key_columns`.
///
/// A missing order-key column or an unparsable numeric key value is an
/// error; the caller aborts the chunk.
pub fn key_tuple(row: &RowRecord, key_columns: &[&Column]) -> Result<KeyTuple, RowError> {
    key_columns
        .iter()
        .map(|col| {
            let value = row.get(&col.name).ok_or_else(|| RowError::MissingColumn {
                column: col.name.clone(),
            })?;
            key_part(col, value)
        })
        .collect()
}

/// Row equality over the projected columns, skipping ignored ones.
///
/// A projected column missing from either row is an error rather than an
/// inequality, so fetch bugs surface instead of producing bogus DML.
pub fn rows_equal(
    a: &RowRecord,
    b: &RowRecord,
    columns: &[&Column],
    ignore_columns: &[String],
) -> Result<bool, RowError> {
    for col in columns {
        if ignore_columns.contains(&col.name) {
            continue;
        }
        let va = a.get(&col.name).ok_or_else(|| RowError::MissingColumn {
            column: col.name.clone(),
        })?;
        let vb = b.get(&col.name).ok_or_else(|| RowError::MissingColumn {
            column: col.name.clone(),
        })?;
        if va != vb {
            return Ok(false);
        }
    }
    Ok(true)
}
