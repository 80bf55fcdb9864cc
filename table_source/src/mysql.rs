//! MySQL-family implementation of [`TableSource`] on top of `sqlx`.
//!
//! Rows travel in their textual form: every projected column is fetched
//! through `CAST(... AS CHAR)` so that value bytes compare and render the
//! same way regardless of the server-side type.

use crate::interface::{ScanRequest, SourceResult, TableMeta, TableSource};
use async_trait::async_trait;
use data_types::{Column, ColumnKind, ColumnValue, RowRecord};
use observability_deps::tracing::debug;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

/// [`TableSource`] implementation for one MySQL-family endpoint.
#[derive(Debug)]
pub struct MysqlTableSource {
    instance_id: String,
    pool: MySqlPool,
}

impl MysqlTableSource {
    /// Create a new source for the endpoint behind `pool`.
    pub fn new(instance_id: impl Into<String>, pool: MySqlPool) -> Self {
        Self {
            instance_id: instance_id.into(),
            pool,
        }
    }

    /// The underlying connection pool, e.g. to share with the checkpoint
    /// store when this endpoint is the target.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// Comparison class for a MySQL `DATA_TYPE` name.
fn column_kind(data_type: &str) -> ColumnKind {
    match data_type {
        "tinyint" | "smallint" | "mediumint" | "int" | "bigint" | "decimal" | "float"
        | "double" | "year" => ColumnKind::Numeric,
        _ => ColumnKind::Quoted,
    }
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name)
}

/// Render the scan statement for `req`, with `?` placeholders for the chunk
/// predicate arguments.
pub(crate) fn build_scan_sql(req: &ScanRequest) -> String {
    let hint = if req.read_hint {
        "/*!40001 SQL_NO_CACHE */ "
    } else {
        ""
    };
    let projection = req
        .projection
        .iter()
        .map(|c| format!("CAST({} AS CHAR) AS {}", quote_ident(c), quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let order_by = req
        .order_by
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let collate = match &req.collation {
        Some(c) => format!(" COLLATE \"{}\"", c),
        None => String::new(),
    };
    format!(
        "SELECT {}{} FROM {}.{} WHERE ({}) AND ({}) ORDER BY {}{}",
        hint,
        projection,
        quote_ident(&req.schema),
        quote_ident(&req.table),
        req.where_clause,
        req.range,
        order_by,
        collate,
    )
}

/// Render the range checksum statement for `req`.
///
/// Per-row CRC32 over the comma-joined column values plus the NULL flags,
/// XOR-folded by the server; disjoint ranges therefore compose by XOR.
pub(crate) fn build_checksum_sql(req: &ScanRequest) -> String {
    let cols = req
        .projection
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let null_flags = req
        .projection
        .iter()
        .map(|c| format!("ISNULL({})", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT BIT_XOR(CAST(CRC32(CONCAT_WS(',', {}, CONCAT({}))) AS UNSIGNED)) AS checksum \
         FROM {}.{} WHERE ({}) AND ({})",
        cols,
        null_flags,
        quote_ident(&req.schema),
        quote_ident(&req.table),
        req.where_clause,
        req.range,
    )
}

#[async_trait]
impl TableSource for MysqlTableSource {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn table_meta(&self, schema: &str, table: &str) -> SourceResult<TableMeta> {
        let rows = sqlx::query(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let data_type: String = row.try_get(1)?;
            let is_nullable: String = row.try_get(2)?;
            columns.push(Column::new(
                name,
                column_kind(&data_type.to_lowercase()),
                is_nullable.eq_ignore_ascii_case("YES"),
            ));
        }

        // Unique indexes, primary key first; the first index in the result
        // is the preferred order key.
        let rows = sqlx::query(
            "SELECT index_name, column_name \
             FROM information_schema.statistics \
             WHERE table_schema = ? AND table_name = ? AND non_unique = 0 \
             ORDER BY index_name = 'PRIMARY' DESC, index_name, seq_in_index",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut unique_key: Option<(String, Vec<String>)> = None;
        for row in &rows {
            let index: String = row.try_get(0)?;
            let column: String = row.try_get(1)?;
            match &mut unique_key {
                None => unique_key = Some((index, vec![column])),
                Some((chosen, cols)) if *chosen == index => cols.push(column),
                Some(_) => break,
            }
        }

        Ok(TableMeta {
            columns,
            unique_key: unique_key.map(|(_, cols)| cols),
        })
    }

    async fn scan_rows(&self, req: &ScanRequest) -> SourceResult<Vec<RowRecord>> {
        let sql = build_scan_sql(req);
        let mut query = sqlx::query(&sql);
        for arg in &req.args {
            query = query.bind(arg);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = RowRecord::new();
            for (i, name) in req.projection.iter().enumerate() {
                let bytes: Option<Vec<u8>> = row.try_get(i)?;
                let value = match bytes {
                    Some(bytes) => ColumnValue::new(bytes),
                    None => ColumnValue::null(),
                };
                record.insert(name.clone(), value);
            }
            records.push(record);
        }
        debug!(
            instance = %self.instance_id,
            table = %req.table,
            chunk_where = %req.where_clause,
            rows = records.len(),
            "scanned chunk rows"
        );
        Ok(records)
    }

    async fn range_checksum(&self, req: &ScanRequest) -> SourceResult<u64> {
        let sql = build_checksum_sql(req);
        let mut query = sqlx::query(&sql);
        for arg in &req.args {
            query = query.bind(arg);
        }
        let row = query.fetch_one(&self.pool).await?;
        let checksum: Option<u64> = row.try_get(0)?;
        Ok(checksum.unwrap_or(0))
    }
}
