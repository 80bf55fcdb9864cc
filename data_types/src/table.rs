//! Table addressing and resolved schemas.

use std::fmt::{Display, Formatter};

/// Addresses one physical table on one physical endpoint.
///
/// The `instance_id` distinguishes tables with the same schema/table name
/// that live on different endpoints, e.g. a target and the sources it is
/// verified against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    /// Unique identifier of the physical endpoint this table lives on.
    pub instance_id: String,
    /// Schema (database) name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Create a new table reference.
    pub fn new(
        instance_id: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:`{}`.`{}`", self.instance_id, self.schema, self.table)
    }
}

/// Comparison class of a column.
///
/// Values always travel as raw bytes; the kind decides how two byte strings
/// are compared and how a value is rendered into DML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Compared by parsing both sides as `f64`; rendered bare in DML.
    Numeric,
    /// Compared byte-lexicographically; rendered single-quoted in DML.
    /// Strings, temporals and binary types fall in this class.
    Quoted,
}

/// One column of a resolved table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Comparison class.
    pub kind: ColumnKind,
    /// Whether the column admits NULL.
    pub nullable: bool,
}

impl Column {
    /// Create a new column descriptor.
    pub fn new(name: impl Into<String>, kind: ColumnKind, nullable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable,
        }
    }
}

/// A resolved table schema: the ordered column list plus the unique
/// order-key column set chosen for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Columns in declared order.
    pub columns: Vec<Column>,
    /// Names of the order-key columns, in key order. Always a subset of
    /// `columns` by construction.
    pub order_key: Vec<String>,
}

impl TableSchema {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The order-key columns, in key order.
    ///
    /// Columns named by `order_key` but absent from `columns` are skipped;
    /// schema resolution rejects such schemas before they reach here.
    pub fn key_columns(&self) -> Vec<&Column> {
        self.order_key
            .iter()
            .filter_map(|name| self.column(name))
            .collect()
    }

    /// The boolean "structurally equal?" predicate: same columns (name,
    /// kind, nullability) in the same order and the same order-key set.
    pub fn structurally_equal(&self, other: &Self) -> bool {
        self.columns == other.columns && self.order_key == other.order_key
    }
}
