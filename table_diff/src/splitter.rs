//! The chunk splitter interface.
//!
//! Splitting heuristics (statistics buckets, random probing against the
//! table named by [`DiffConfig::stats_source`](crate::DiffConfig), with a
//! random fallback when it is absent) live outside this crate; the engine
//! only relies on the contract below.

use crate::config::DiffConfig;
use crate::run::TableInstance;
use async_trait::async_trait;
use data_types::{ChunkRange, RangeBounds, TableSchema};
use std::fmt::Debug;
use table_source::SourceResult;

/// Produces the initial chunk list for a table.
///
/// Contract: chunk ids are dense from 0, all states are `new`, and the
/// union of the chunk bounds covers the key space selected by the user's
/// range predicate with no overlap.
#[async_trait]
pub trait ChunkSplitter: Send + Sync + Debug {
    /// Split `target` into chunks of roughly
    /// [`chunk_size`](crate::DiffConfig::chunk_size) rows.
    async fn split(
        &self,
        target: &TableInstance,
        schema: &TableSchema,
        config: &DiffConfig,
    ) -> SourceResult<Vec<ChunkRange>>;
}

/// The trivial splitter: one chunk covering the whole key space.
///
/// Useful for small tables and as the fallback when no statistics are
/// available at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeTableSplitter;

#[async_trait]
impl ChunkSplitter for WholeTableSplitter {
    async fn split(
        &self,
        _target: &TableInstance,
        schema: &TableSchema,
        _config: &DiffConfig,
    ) -> SourceResult<Vec<ChunkRange>> {
        Ok(vec![ChunkRange::new(
            0,
            RangeBounds::all(),
            &schema.key_columns(),
        )])
    }
}
