//! Scan plan construction: one [`ScanRequest`] per (table, chunk).

use crate::config::DiffConfig;
use crate::run::TableInstance;
use data_types::{ChunkRange, TableSchema};
use table_source::ScanRequest;

/// Build the ordered range-scan request for `chunk` against one table.
///
/// The projection is the resolved column list minus the ignored columns
/// (the synthetic row-id column, when in use, is part of the resolved
/// list); the ordering is the order key with the configured collation. The
/// read-only cache-bypass hint is always requested.
pub(crate) fn scan_request(
    instance: &TableInstance,
    schema: &TableSchema,
    chunk: &ChunkRange,
    config: &DiffConfig,
) -> ScanRequest {
    ScanRequest {
        schema: instance.table.schema.clone(),
        table: instance.table.table.clone(),
        projection: config
            .projected_columns(schema)
            .iter()
            .map(|c| c.name.clone())
            .collect(),
        where_clause: chunk.where_clause.clone(),
        args: chunk.args.clone(),
        bounds: chunk.bounds.clone(),
        range: config.range.clone(),
        order_by: schema.order_key.clone(),
        collation: config.collation.clone(),
        read_hint: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{Column, ColumnKind, RangeBounds, TableRef};
    use std::sync::Arc;
    use table_source::mem::MemTableSource;

    #[test]
    fn request_carries_chunk_and_config() {
        let instance = TableInstance::new(
            TableRef::new("source-1", "app", "users"),
            Arc::new(MemTableSource::new("source-1")),
        );
        let id = Column::new("id", ColumnKind::Numeric, false);
        let name = Column::new("name", ColumnKind::Quoted, true);
        let schema = TableSchema {
            columns: vec![id.clone(), name],
            order_key: vec!["id".to_string()],
        };
        let chunk = ChunkRange::new(0, RangeBounds::all(), &[&id]);
        let config = DiffConfig {
            ignore_columns: vec!["name".to_string()],
            collation: Some("latin1_bin".to_string()),
            ..Default::default()
        };

        let req = scan_request(&instance, &schema, &chunk, &config);
        assert_eq!(req.schema, "app");
        assert_eq!(req.table, "users");
        assert_eq!(req.projection, vec!["id"]);
        assert_eq!(req.where_clause, "TRUE");
        assert_eq!(req.order_by, vec!["id"]);
        assert_eq!(req.collation.as_deref(), Some("latin1_bin"));
        assert!(req.read_hint);
    }
}
