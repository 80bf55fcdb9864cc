//! Persistence of per-chunk verification progress and the per-table run
//! summary, keyed by the run's configuration fingerprint so that resumed
//! runs only replay non-terminal chunks.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod mem;
pub mod mysql;

use async_trait::async_trait;
use data_types::{ChunkRange, Column, TableRef};
use snafu::Snafu;
use std::fmt::Debug;

/// Errors talking to a checkpoint store.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("checkpoint query failed: {}", source))]
    Query { source: sqlx::Error },

    #[snafu(display("malformed persisted chunk bounds: {}", source))]
    MalformedBounds { source: serde_json::Error },

    #[snafu(display("malformed persisted chunk state: {}", source))]
    MalformedState { source: data_types::ChunkStateError },
}

/// Convenient result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Derive the summary state from the chunk counters.
pub(crate) fn summary_state(total: u64, checked: u64, unequal: u64) -> &'static str {
    if total > 0 && checked == total {
        if unequal == 0 {
            "success"
        } else {
            "failed"
        }
    } else {
        "checking"
    }
}

/// Persists chunks and the run summary for one target table.
///
/// `save_chunk` is atomic per chunk: a crash between a save and the next
/// worker action costs at most a re-verification of that chunk on restart.
/// Non-terminal states (`new`, `checking`) re-run; terminal states do not.
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug + 'static {
    /// Ensure the backing tables exist. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Return the saved chunk list iff the stored summary fingerprint
    /// equals `fingerprint`; otherwise an empty list.
    ///
    /// `key_columns` re-renders the SQL predicate from the persisted
    /// structured bounds.
    async fn load_chunks(
        &self,
        target: &TableRef,
        fingerprint: &str,
        key_columns: &[&Column],
    ) -> Result<Vec<ChunkRange>>;

    /// Drop all rows recorded for `target`.
    async fn clean(&self, target: &TableRef) -> Result<()>;

    /// Insert a fresh summary row for `target` under `fingerprint`.
    async fn init_summary(&self, target: &TableRef, fingerprint: &str) -> Result<()>;

    /// Upsert one chunk row.
    async fn save_chunk(&self, target: &TableRef, chunk: &ChunkRange) -> Result<()>;

    /// Refresh the summary counters (total/checked/state/last-updated)
    /// from the persisted chunk states.
    async fn update_summary(&self, target: &TableRef) -> Result<()>;
}
