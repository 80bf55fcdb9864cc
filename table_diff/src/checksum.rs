//! The coarse verification tier: per-chunk CRC comparison.
//!
//! The source-side checksum is the XOR of the per-source range checksums.
//! XOR is commutative and associative, so N sources that partition the key
//! space reduce to one scalar comparable against the target checksum
//! without materializing rows. Overlapping sources can produce a false
//! mismatch here; the row-level fallback resolves those chunks.

use crate::config::DiffConfig;
use crate::fetch;
use crate::run::TableInstance;
use data_types::{ChunkRange, TableSchema};
use futures::future::try_join_all;
use observability_deps::tracing::debug;
use std::time::Duration;
use table_source::{SourceError, SourceResult};

async fn checksum_one(
    instance: &TableInstance,
    schema: &TableSchema,
    chunk: &ChunkRange,
    config: &DiffConfig,
    deadline: Duration,
) -> SourceResult<u64> {
    let req = fetch::scan_request(instance, schema, chunk, config);
    match tokio::time::timeout(deadline, instance.source.range_checksum(&req)).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::io(format!(
            "checksum query timed out on {}",
            instance.source.instance_id()
        ))),
    }
}

/// Compare the XOR-composed source checksum of `chunk` against the target
/// checksum. All checksum queries run concurrently under `deadline`.
pub(crate) async fn checksums_match(
    target: &TableInstance,
    sources: &[TableInstance],
    schema: &TableSchema,
    chunk: &ChunkRange,
    config: &DiffConfig,
    deadline: Duration,
) -> SourceResult<bool> {
    let (target_crc, source_crcs) = futures::try_join!(
        checksum_one(target, schema, chunk, config, deadline),
        try_join_all(
            sources
                .iter()
                .map(|s| checksum_one(s, schema, chunk, config, deadline))
        ),
    )?;
    let source_crc = source_crcs.into_iter().fold(0, |acc, crc| acc ^ crc);
    debug!(
        chunk = chunk.id,
        source_crc,
        target_crc,
        "chunk checksum comparison"
    );
    Ok(source_crc == target_crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{Column, ColumnKind, RangeBounds, TableRef, TableSchema};
    use std::sync::Arc;
    use std::time::Duration;
    use table_source::mem::{row, MemTableSource};
    use table_source::TableMeta;

    const DEADLINE: Duration = Duration::from_secs(5);

    fn meta() -> TableMeta {
        TableMeta {
            columns: vec![
                Column::new("id", ColumnKind::Numeric, false),
                Column::new("name", ColumnKind::Quoted, true),
            ],
            unique_key: Some(vec!["id".to_string()]),
        }
    }

    fn instance(id: &str, rows: &[(&str, Option<&str>)]) -> TableInstance {
        let source = MemTableSource::new(id);
        source.create_table("app", "users", meta());
        source.insert_rows(
            "app",
            "users",
            rows.iter()
                .map(|(k, v)| row(&[("id", Some(k)), ("name", *v)])),
        );
        TableInstance::new(TableRef::new(id, "app", "users"), Arc::new(source))
    }

    fn schema() -> TableSchema {
        TableSchema {
            columns: meta().columns,
            order_key: vec!["id".to_string()],
        }
    }

    #[tokio::test]
    async fn partitioned_sources_match_their_union() {
        let target = instance(
            "target-1",
            &[("1", Some("a")), ("2", Some("b")), ("3", None)],
        );
        let sources = vec![
            instance("source-1", &[("1", Some("a")), ("3", None)]),
            instance("source-2", &[("2", Some("b"))]),
        ];
        let schema = schema();
        let chunk = ChunkRange::new(0, RangeBounds::all(), &schema.key_columns());

        let matched = checksums_match(
            &target,
            &sources,
            &schema,
            &chunk,
            &DiffConfig::default(),
            DEADLINE,
        )
        .await
        .unwrap();
        assert!(matched);
    }

    #[tokio::test]
    async fn differing_row_breaks_the_checksum() {
        let target = instance("target-1", &[("1", Some("a")), ("2", Some("B"))]);
        let sources = vec![instance("source-1", &[("1", Some("a")), ("2", Some("b"))])];
        let schema = schema();
        let chunk = ChunkRange::new(0, RangeBounds::all(), &schema.key_columns());

        let matched = checksums_match(
            &target,
            &sources,
            &schema,
            &chunk,
            &DiffConfig::default(),
            DEADLINE,
        )
        .await
        .unwrap();
        assert!(!matched);
    }
}
