//! In-memory implementation of [`CheckpointStore`], used in tests.

use crate::{summary_state, CheckpointStore, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use data_types::{ChunkRange, ChunkState, Column, TableRef};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
struct TableCheckpoint {
    fingerprint: String,
    chunks: BTreeMap<u64, ChunkRange>,
    total_chunks: u64,
    checked_chunks: u64,
    state: &'static str,
    updated_at: DateTime<Utc>,
}

impl TableCheckpoint {
    fn new(fingerprint: String) -> Self {
        Self {
            fingerprint,
            chunks: BTreeMap::new(),
            total_chunks: 0,
            checked_chunks: 0,
            state: "checking",
            updated_at: Utc::now(),
        }
    }
}

/// Test-visible copy of one summary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySnapshot {
    /// Fingerprint the chunk lineage belongs to.
    pub fingerprint: String,
    /// Number of chunks recorded.
    pub total_chunks: u64,
    /// Number of chunks in a terminal state.
    pub checked_chunks: u64,
    /// Derived run state.
    pub state: String,
    /// Last refresh time.
    pub updated_at: DateTime<Utc>,
}

/// A [`CheckpointStore`] over an in-memory map.
#[derive(Debug, Default)]
pub struct MemCheckpointStore {
    tables: Mutex<HashMap<TableRef, TableCheckpoint>>,
}

impl MemCheckpointStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// States of the persisted chunks of `target`, by chunk id.
    pub fn chunk_states(&self, target: &TableRef) -> Vec<(u64, ChunkState)> {
        self.tables
            .lock()
            .get(target)
            .map(|t| t.chunks.iter().map(|(id, c)| (*id, c.state)).collect())
            .unwrap_or_default()
    }

    /// The persisted summary of `target`, if any.
    pub fn summary(&self, target: &TableRef) -> Option<SummarySnapshot> {
        self.tables.lock().get(target).map(|t| SummarySnapshot {
            fingerprint: t.fingerprint.clone(),
            total_chunks: t.total_chunks,
            checked_chunks: t.checked_chunks,
            state: t.state.to_string(),
            updated_at: t.updated_at,
        })
    }
}

#[async_trait]
impl CheckpointStore for MemCheckpointStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn load_chunks(
        &self,
        target: &TableRef,
        fingerprint: &str,
        _key_columns: &[&Column],
    ) -> Result<Vec<ChunkRange>> {
        let tables = self.tables.lock();
        Ok(tables
            .get(target)
            .filter(|t| t.fingerprint == fingerprint)
            .map(|t| t.chunks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clean(&self, target: &TableRef) -> Result<()> {
        self.tables.lock().remove(target);
        Ok(())
    }

    async fn init_summary(&self, target: &TableRef, fingerprint: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let entry = tables
            .entry(target.clone())
            .or_insert_with(|| TableCheckpoint::new(fingerprint.to_string()));
        entry.fingerprint = fingerprint.to_string();
        entry.total_chunks = 0;
        entry.checked_chunks = 0;
        entry.state = "checking";
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn save_chunk(&self, target: &TableRef, chunk: &ChunkRange) -> Result<()> {
        let mut tables = self.tables.lock();
        let entry = tables
            .entry(target.clone())
            .or_insert_with(|| TableCheckpoint::new(String::new()));
        entry.chunks.insert(chunk.id, chunk.clone());
        Ok(())
    }

    async fn update_summary(&self, target: &TableRef) -> Result<()> {
        let mut tables = self.tables.lock();
        if let Some(entry) = tables.get_mut(target) {
            let total = entry.chunks.len() as u64;
            let checked = entry.chunks.values().filter(|c| c.state.is_terminal()).count() as u64;
            let unequal = entry
                .chunks
                .values()
                .filter(|c| matches!(c.state, ChunkState::Failed | ChunkState::Error))
                .count() as u64;
            entry.total_chunks = total;
            entry.checked_chunks = checked;
            entry.state = summary_state(total, checked, unequal);
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{ChunkState, ColumnKind, KeyBound, RangeBounds};

    fn target() -> TableRef {
        TableRef::new("target-1", "app", "users")
    }

    fn chunk(id: u64, state: ChunkState) -> ChunkRange {
        let id_col = Column::new("id", ColumnKind::Numeric, false);
        let mut chunk = ChunkRange::new(
            id,
            RangeBounds {
                lower: Some(KeyBound::excluding(vec![(id * 10).to_string()])),
                upper: Some(KeyBound::including(vec![((id + 1) * 10).to_string()])),
            },
            &[&id_col],
        );
        chunk.state = state;
        chunk
    }

    #[tokio::test]
    async fn load_is_fingerprint_gated() {
        test_helpers::maybe_start_logging();
        let store = MemCheckpointStore::new();
        let t = target();
        store.init_summary(&t, "fp-1").await.unwrap();
        store.save_chunk(&t, &chunk(0, ChunkState::Success)).await.unwrap();
        store.save_chunk(&t, &chunk(1, ChunkState::New)).await.unwrap();

        let loaded = store.load_chunks(&t, "fp-1", &[]).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, 0);
        assert_eq!(loaded[0].state, ChunkState::Success);

        let other = store.load_chunks(&t, "fp-2", &[]).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn clean_drops_the_lineage() {
        let store = MemCheckpointStore::new();
        let t = target();
        store.init_summary(&t, "fp-1").await.unwrap();
        store.save_chunk(&t, &chunk(0, ChunkState::Success)).await.unwrap();

        store.clean(&t).await.unwrap();
        assert!(store.load_chunks(&t, "fp-1", &[]).await.unwrap().is_empty());
        assert!(store.summary(&t).is_none());
    }

    #[tokio::test]
    async fn summary_counters_follow_chunk_states() {
        let store = MemCheckpointStore::new();
        let t = target();
        store.init_summary(&t, "fp-1").await.unwrap();
        store.save_chunk(&t, &chunk(0, ChunkState::Success)).await.unwrap();
        store.save_chunk(&t, &chunk(1, ChunkState::Checking)).await.unwrap();
        store.update_summary(&t).await.unwrap();

        let summary = store.summary(&t).unwrap();
        assert_eq!(summary.total_chunks, 2);
        assert_eq!(summary.checked_chunks, 1);
        assert_eq!(summary.state, "checking");

        store.save_chunk(&t, &chunk(1, ChunkState::Failed)).await.unwrap();
        store.update_summary(&t).await.unwrap();
        let summary = store.summary(&t).unwrap();
        assert_eq!(summary.checked_chunks, 2);
        assert_eq!(summary.state, "failed");
    }
}
