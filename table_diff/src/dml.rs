//! REPLACE/DELETE statement generation.
//!
//! Values are rendered with naive single-quote wrapping and NO escaping,
//! preserving the wire-compatible output format downstream tooling already
//! consumes. A quote inside a value therefore produces a broken statement;
//! callers that need safe quoting must post-process the patch.

use data_types::{Column, ColumnKind, ColumnValue, RowError, RowRecord, TableRef};
use itertools::Itertools;

fn render_value(column: &Column, value: &ColumnValue) -> String {
    if value.is_null {
        return "NULL".to_string();
    }
    match column.kind {
        ColumnKind::Numeric => value.text(),
        ColumnKind::Quoted => format!("'{}'", value.text()),
    }
}

fn lookup<'a>(row: &'a RowRecord, column: &Column) -> Result<&'a ColumnValue, RowError> {
    row.get(&column.name).ok_or_else(|| RowError::MissingColumn {
        column: column.name.clone(),
    })
}

/// `REPLACE INTO` with every projected column in declared order.
pub(crate) fn replace_stmt(
    table: &TableRef,
    columns: &[&Column],
    row: &RowRecord,
) -> Result<String, RowError> {
    let names = columns.iter().map(|c| c.name.as_str()).join(",");
    let values: Vec<String> = columns
        .iter()
        .map(|c| lookup(row, c).map(|v| render_value(c, v)))
        .collect::<Result<_, _>>()?;
    Ok(format!(
        "REPLACE INTO `{}`.`{}`({}) VALUES ({});",
        table.schema,
        table.table,
        names,
        values.join(",")
    ))
}

/// Keyed `DELETE`: one backtick-quoted condition per order-key column,
/// `is NULL` for NULL key values.
pub(crate) fn delete_stmt(
    table: &TableRef,
    key_columns: &[&Column],
    row: &RowRecord,
) -> Result<String, RowError> {
    let conditions: Vec<String> = key_columns
        .iter()
        .map(|c| {
            lookup(row, c).map(|v| {
                if v.is_null {
                    format!("`{}` is NULL", c.name)
                } else {
                    format!("`{}` = {}", c.name, render_value(c, v))
                }
            })
        })
        .collect::<Result<_, _>>()?;
    Ok(format!(
        "DELETE FROM `{}`.`{}` WHERE {};",
        table.schema,
        table.table,
        conditions.join(" AND ")
    ))
}
