//! The per-worker verification path: receive chunks, decide their state,
//! persist every transition.

use crate::checksum;
use crate::config::DiffConfig;
use crate::fetch;
use crate::merge::{self, MergeError};
use crate::run::TableInstance;
use checkpoint::CheckpointStore;
use data_types::{ChunkRange, ChunkState, RowRecord, TableSchema};
use futures::future::try_join_all;
use observability_deps::tracing::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use std::time::Duration;
use table_source::SourceError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Deadline for one verification query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for one checkpoint write, 5x the query deadline.
const PERSIST_TIMEOUT: Duration = Duration::from_secs(150);

#[derive(Debug, Snafu)]
enum ChunkError {
    #[snafu(display("chunk query failed: {}", source))]
    Query { source: SourceError },

    #[snafu(display("{}", source))]
    Merge { source: MergeError },
}

#[derive(Debug, Clone, Copy)]
enum Verdict {
    Equal,
    Unequal,
}

/// Everything a worker needs to verify chunks, shared by the pool.
#[derive(Debug)]
pub(crate) struct ChunkChecker {
    pub(crate) target: TableInstance,
    pub(crate) sources: Vec<TableInstance>,
    pub(crate) schema: TableSchema,
    pub(crate) config: DiffConfig,
    pub(crate) checkpoint: Arc<dyn CheckpointStore>,
    pub(crate) dml_tx: mpsc::Sender<String>,
    pub(crate) cancel: CancellationToken,
    pub(crate) sampler: Mutex<StdRng>,
    /// Chunks were loaded from a checkpoint; sampling never applies.
    pub(crate) resumed: bool,
}

/// One worker: drain the inbound chunk channel until it closes or the run
/// is cancelled, reporting one boolean per chunk.
pub(crate) async fn worker_loop(
    checker: Arc<ChunkChecker>,
    mut chunks: mpsc::Receiver<ChunkRange>,
    results: mpsc::Sender<bool>,
) {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = checker.cancel.cancelled() => break,
            chunk = chunks.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };
        let ok = checker.check_chunk(chunk).await;
        if results.send(ok).await.is_err() {
            break;
        }
    }
}

impl ChunkChecker {
    /// Verify one chunk, owning it from `checking` to its terminal state.
    /// Returns whether the chunk counts as equal.
    pub(crate) async fn check_chunk(&self, mut chunk: ChunkRange) -> bool {
        if chunk.is_terminal() {
            // resumed terminal chunks are never re-verified
            return matches!(chunk.state, ChunkState::Success | ChunkState::Ignore);
        }

        if !self.resumed && self.config.sample < 100 {
            let draw: u8 = self.sampler.lock().gen_range(0..100);
            if draw > self.config.sample {
                debug!(chunk = chunk.id, draw, "chunk excluded by sampling");
                chunk.state = ChunkState::Ignore;
                self.persist(&chunk).await;
                return true;
            }
        }

        chunk.state = ChunkState::Checking;
        self.persist(&chunk).await;

        let verdict = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                // abandoned mid-flight; stays `checking` for the next run
                return false;
            }
            verdict = self.verify(&chunk) => verdict,
        };

        let (state, ok) = match verdict {
            Ok(Verdict::Equal) => (ChunkState::Success, true),
            Ok(Verdict::Unequal) => (ChunkState::Failed, false),
            Err(e) => {
                warn!(chunk = chunk.id, error = %e, "chunk verification errored");
                (ChunkState::Error, false)
            }
        };
        chunk.state = state;
        self.persist(&chunk).await;
        ok
    }

    async fn verify(&self, chunk: &ChunkRange) -> Result<Verdict, ChunkError> {
        if self.config.checksum_enabled() {
            let matched = checksum::checksums_match(
                &self.target,
                &self.sources,
                &self.schema,
                chunk,
                &self.config,
                QUERY_TIMEOUT,
            )
            .await
            .context(QuerySnafu)?;
            if matched {
                return Ok(Verdict::Equal);
            }
            if self.config.only_use_checksum {
                info!(chunk = chunk.id, "checksum mismatch, row comparison disabled");
                return Ok(Verdict::Unequal);
            }
            debug!(chunk = chunk.id, "checksum mismatch, comparing rows");
        }
        self.compare_rows(chunk).await
    }

    async fn compare_rows(&self, chunk: &ChunkRange) -> Result<Verdict, ChunkError> {
        let (target_rows, source_rows) = futures::try_join!(
            self.scan(&self.target, chunk),
            try_join_all(self.sources.iter().map(|s| self.scan(s, chunk))),
        )?;

        let columns = self.config.projected_columns(&self.schema);
        let key_columns = self.schema.key_columns();
        let equal = merge::diff_chunk(
            &self.target.table,
            &columns,
            &key_columns,
            target_rows,
            source_rows,
            &self.dml_tx,
        )
        .await
        .context(MergeSnafu)?;

        Ok(if equal { Verdict::Equal } else { Verdict::Unequal })
    }

    async fn scan(
        &self,
        instance: &TableInstance,
        chunk: &ChunkRange,
    ) -> Result<Vec<RowRecord>, ChunkError> {
        let req = fetch::scan_request(instance, &self.schema, chunk, &self.config);
        match tokio::time::timeout(QUERY_TIMEOUT, instance.source.scan_rows(&req)).await {
            Ok(result) => result.context(QuerySnafu),
            Err(_) => Err(ChunkError::Query {
                source: SourceError::io(format!(
                    "row scan timed out on {}",
                    instance.source.instance_id()
                )),
            }),
        }
    }

    /// Persist one chunk state transition, bounded by [`PERSIST_TIMEOUT`]
    /// and abandoned as soon as the run is cancelled. Failures are logged
    /// and non-fatal; the next save overwrites.
    async fn persist(&self, chunk: &ChunkRange) {
        let save = self.checkpoint.save_chunk(&self.target.table, chunk);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(chunk = chunk.id, "chunk state persist abandoned by cancellation");
            }
            result = tokio::time::timeout(PERSIST_TIMEOUT, save) => match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(chunk = chunk.id, error = %e, "failed to persist chunk state")
                }
                Err(_) => warn!(chunk = chunk.id, "chunk state persist timed out"),
            },
        }
    }
}
