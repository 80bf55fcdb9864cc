//! In-memory implementation of [`TableSource`], used in tests.
//!
//! Tables are plain row vectors behind a mutex. Scans filter on the
//! structured chunk bounds, so only the default `TRUE` range predicate is
//! supported. The source records every scan and checksum request so tests
//! can assert which chunks were touched, and it can apply the engine's own
//! REPLACE/DELETE output back onto a table to close the verification loop.

use crate::interface::{ScanRequest, SourceError, SourceResult, TableMeta, TableSource};
use async_trait::async_trait;
use data_types::{key_tuple, Column, ColumnValue, RowRecord};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug)]
struct MemTable {
    meta: TableMeta,
    rows: Vec<RowRecord>,
}

/// A [`TableSource`] over in-memory tables.
#[derive(Debug, Default)]
pub struct MemTableSource {
    instance_id: String,
    tables: Mutex<HashMap<(String, String), MemTable>>,
    scans: Mutex<Vec<String>>,
    checksums: Mutex<Vec<String>>,
}

/// Build a row from `(column, value)` pairs; `None` is NULL.
pub fn row(pairs: &[(&str, Option<&str>)]) -> RowRecord {
    pairs
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Some(v) => ColumnValue::new(v.as_bytes()),
                None => ColumnValue::null(),
            };
            (name.to_string(), value)
        })
        .collect()
}

impl MemTableSource {
    /// Create a new, empty source.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Self::default()
        }
    }

    /// Register a table.
    pub fn create_table(&self, schema: &str, table: &str, meta: TableMeta) {
        self.tables.lock().insert(
            (schema.to_string(), table.to_string()),
            MemTable {
                meta,
                rows: Vec::new(),
            },
        );
    }

    /// Append rows to a table.
    ///
    /// # Panics
    ///
    /// Panics if the table was not created first; this is test setup code.
    pub fn insert_rows(&self, schema: &str, table: &str, rows: impl IntoIterator<Item = RowRecord>) {
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&(schema.to_string(), table.to_string()))
            .expect("table not created");
        t.rows.extend(rows);
    }

    /// Current contents of a table, unordered.
    pub fn table_rows(&self, schema: &str, table: &str) -> Vec<RowRecord> {
        self.tables
            .lock()
            .get(&(schema.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Chunk predicates of every row scan served so far.
    pub fn scan_log(&self) -> Vec<String> {
        self.scans.lock().clone()
    }

    /// Chunk predicates of every checksum served so far.
    pub fn checksum_log(&self) -> Vec<String> {
        self.checksums.lock().clone()
    }

    /// Apply one REPLACE/DELETE statement produced by the DML generator.
    ///
    /// Understands exactly the generator's output shape; anything else is
    /// an error. Values must not contain single quotes (the generator's
    /// naive quoting can not represent them either).
    pub fn apply_stmt(&self, stmt: &str) -> SourceResult<()> {
        let stmt = stmt.trim().trim_end_matches(';');
        if let Some(rest) = stmt.strip_prefix("REPLACE INTO ") {
            self.apply_replace(rest)
        } else if let Some(rest) = stmt.strip_prefix("DELETE FROM ") {
            self.apply_delete(rest)
        } else {
            Err(SourceError::unsupported(format!(
                "can not apply statement: {}",
                stmt
            )))
        }
    }

    /// Apply a whole patch, one statement per entry.
    pub fn apply_patch(&self, stmts: &[String]) -> SourceResult<()> {
        for stmt in stmts {
            self.apply_stmt(stmt)?;
        }
        Ok(())
    }

    fn apply_replace(&self, rest: &str) -> SourceResult<()> {
        let open = rest
            .find('(')
            .ok_or_else(|| SourceError::invalid_data("REPLACE without column list"))?;
        let (schema, table) = parse_table_name(rest[..open].trim())?;
        let rest = &rest[open + 1..];
        let close = rest
            .find(')')
            .ok_or_else(|| SourceError::invalid_data("unterminated column list"))?;
        let columns: Vec<String> = rest[..close]
            .split(',')
            .map(|c| c.trim().trim_matches('`').to_string())
            .collect();

        let rest = rest[close + 1..].trim_start();
        let rest = rest
            .strip_prefix("VALUES")
            .map(str::trim_start)
            .and_then(|r| r.strip_prefix('('))
            .ok_or_else(|| SourceError::invalid_data("REPLACE without VALUES"))?;
        let end = rest
            .rfind(')')
            .ok_or_else(|| SourceError::invalid_data("unterminated VALUES"))?;
        let values = split_values(&rest[..end]);
        if values.len() != columns.len() {
            return Err(SourceError::invalid_data(
                "column/value count mismatch in REPLACE",
            ));
        }

        let new_row: RowRecord = columns
            .into_iter()
            .zip(values.iter().map(|v| parse_value(v)))
            .collect();

        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&(schema, table))
            .ok_or_else(|| SourceError::io("unknown table in REPLACE"))?;
        let key_names = t
            .meta
            .unique_key
            .clone()
            .ok_or_else(|| SourceError::unsupported("REPLACE into table without unique key"))?;
        let key_columns = resolve_columns(&t.meta.columns, &key_names)?;

        let new_key = key_tuple(&new_row, &key_columns)?;
        for existing in &mut t.rows {
            if key_tuple(existing, &key_columns)? == new_key {
                *existing = new_row;
                return Ok(());
            }
        }
        t.rows.push(new_row);
        Ok(())
    }

    fn apply_delete(&self, rest: &str) -> SourceResult<()> {
        let (table_part, where_part) = rest
            .split_once(" WHERE ")
            .ok_or_else(|| SourceError::invalid_data("DELETE without WHERE"))?;
        let (schema, table) = parse_table_name(table_part.trim())?;

        let mut conditions = Vec::new();
        for cond in where_part.split(" AND ") {
            conditions.push(parse_condition(cond.trim())?);
        }

        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&(schema, table))
            .ok_or_else(|| SourceError::io("unknown table in DELETE"))?;
        t.rows.retain(|row| {
            !conditions.iter().all(|(col, expected)| {
                row.get(col).map_or(false, |actual| match expected {
                    None => actual.is_null,
                    Some(bytes) => !actual.is_null && actual.bytes == *bytes,
                })
            })
        });
        Ok(())
    }

    fn with_selected_rows<T>(
        &self,
        req: &ScanRequest,
        f: impl FnOnce(&[&RowRecord], &[&Column]) -> SourceResult<T>,
    ) -> SourceResult<T> {
        if req.range != "TRUE" {
            return Err(SourceError::unsupported(
                "the in-memory source only supports the default TRUE range",
            ));
        }
        let tables = self.tables.lock();
        let t = tables
            .get(&(req.schema.clone(), req.table.clone()))
            .ok_or_else(|| {
                SourceError::io(format!("unknown table `{}`.`{}`", req.schema, req.table))
            })?;
        let key_columns = resolve_columns(&t.meta.columns, &req.order_by)?;

        let mut selected: Vec<(data_types::KeyTuple, &RowRecord)> = Vec::new();
        for row in &t.rows {
            let key = key_tuple(row, &key_columns)?;
            if req.bounds.contains(&key, &key_columns)? {
                selected.push((key, row));
            }
        }
        selected.sort_by(|a, b| a.0.cmp(&b.0));
        let rows: Vec<&RowRecord> = selected.into_iter().map(|(_, row)| row).collect();
        f(&rows, &key_columns)
    }
}

fn resolve_columns<'a>(
    columns: &'a [Column],
    names: &[String],
) -> SourceResult<Vec<&'a Column>> {
    names
        .iter()
        .map(|name| {
            columns
                .iter()
                .find(|c| c.name == *name)
                .ok_or_else(|| SourceError::invalid_data(format!("unknown column `{}`", name)))
        })
        .collect()
}

fn parse_table_name(s: &str) -> SourceResult<(String, String)> {
    let parts: Vec<&str> = s.split('.').collect();
    match parts.as_slice() {
        [schema, table] => Ok((
            schema.trim_matches('`').to_string(),
            table.trim_matches('`').to_string(),
        )),
        _ => Err(SourceError::invalid_data(format!(
            "malformed table name `{}`",
            s
        ))),
    }
}

/// Split a VALUES body on top-level commas, honoring single quotes.
fn split_values(s: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in s.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            ',' if !in_quote => {
                values.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    values.push(current.trim().to_string());
    values
}

fn parse_value(s: &str) -> ColumnValue {
    if s == "NULL" {
        ColumnValue::null()
    } else if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        ColumnValue::new(s[1..s.len() - 1].as_bytes())
    } else {
        ColumnValue::new(s.as_bytes())
    }
}

/// Parse one backtick-quoted DELETE condition (`= value` or `is NULL`)
/// into `(column, matcher)`; `None` matches NULL.
fn parse_condition(cond: &str) -> SourceResult<(String, Option<Vec<u8>>)> {
    let rest = cond
        .strip_prefix('`')
        .ok_or_else(|| SourceError::invalid_data(format!("malformed condition `{}`", cond)))?;
    let (name, rest) = rest
        .split_once('`')
        .ok_or_else(|| SourceError::invalid_data(format!("malformed condition `{}`", cond)))?;
    let rest = rest.trim_start();
    if rest == "is NULL" {
        Ok((name.to_string(), None))
    } else if let Some(value) = rest.strip_prefix("= ") {
        Ok((name.to_string(), Some(parse_value(value.trim()).bytes)))
    } else {
        Err(SourceError::invalid_data(format!(
            "malformed condition `{}`",
            cond
        )))
    }
}

/// Per-row checksum encoding mirroring the SQL formula: non-NULL values
/// comma-joined, then the NULL flag string as the final element.
fn row_checksum(row: &RowRecord, projection: &[String]) -> u32 {
    let mut parts = Vec::with_capacity(projection.len() + 1);
    let mut flags = String::with_capacity(projection.len());
    for name in projection {
        match row.get(name) {
            Some(v) if !v.is_null => {
                parts.push(v.text());
                flags.push('0');
            }
            _ => flags.push('1'),
        }
    }
    parts.push(flags);
    crc32fast::hash(parts.join(",").as_bytes())
}

#[async_trait]
impl TableSource for MemTableSource {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn table_meta(&self, schema: &str, table: &str) -> SourceResult<TableMeta> {
        self.tables
            .lock()
            .get(&(schema.to_string(), table.to_string()))
            .map(|t| t.meta.clone())
            .ok_or_else(|| SourceError::io(format!("unknown table `{}`.`{}`", schema, table)))
    }

    async fn scan_rows(&self, req: &ScanRequest) -> SourceResult<Vec<RowRecord>> {
        self.scans.lock().push(req.where_clause.clone());
        self.with_selected_rows(req, |rows, _| {
            rows.iter()
                .map(|row| {
                    req.projection
                        .iter()
                        .map(|name| {
                            let value = row.get(name).cloned().ok_or_else(|| {
                                SourceError::invalid_data(format!("row misses column `{}`", name))
                            })?;
                            Ok((name.clone(), value))
                        })
                        .collect::<SourceResult<RowRecord>>()
                })
                .collect()
        })
    }

    async fn range_checksum(&self, req: &ScanRequest) -> SourceResult<u64> {
        self.checksums.lock().push(req.where_clause.clone());
        self.with_selected_rows(req, |rows, _| {
            Ok(rows
                .iter()
                .fold(0u64, |acc, row| {
                    acc ^ u64::from(row_checksum(row, &req.projection))
                }))
        })
    }
}
