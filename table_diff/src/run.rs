//! Run orchestration: schema resolution, the structural pre-check, chunk
//! lineage setup and the worker fan-out of the data phase.

use crate::checker::{worker_loop, ChunkChecker};
use crate::config::{ConfigError, DiffConfig};
use crate::sink::{run_patch_sink, run_summary_ticker, PatchWriter};
use crate::splitter::ChunkSplitter;
use checkpoint::CheckpointStore;
use data_types::{TableRef, TableSchema};
use futures::future::join_all;
use observability_deps::tracing::{info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use table_source::{SourceError, TableSource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the DML channel between the workers and the patch sink.
const DML_CHANNEL_CAPACITY: usize = 64;

/// Capacity of each worker's inbound chunk channel. Small on purpose: it
/// only exists to keep the dispatcher slightly ahead of the workers.
const WORKER_QUEUE_CAPACITY: usize = 4;

/// Errors that prevent a run from making meaningful progress. Per-chunk
/// failures are not here: they land in the chunk state and aggregate into
/// `data_equal = false`.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("invalid configuration: {}", source))]
    Config { source: ConfigError },

    #[snafu(display("can not resolve the schema of {}: {}", table, source))]
    ResolveSchema {
        table: TableRef,
        source: SourceError,
    },

    #[snafu(display(
        "order-key sets differ between {} and {}; the run can not proceed",
        target,
        source_table
    ))]
    OrderKeyMismatch {
        target: TableRef,
        source_table: TableRef,
    },

    #[snafu(display("checkpoint store failed: {}", source))]
    Checkpoint { source: checkpoint::Error },

    #[snafu(display("chunk splitting failed: {}", source))]
    Split { source: SourceError },
}

/// Convenient result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run `fut` to completion unless the run is cancelled first.
///
/// Checkpoint reads/writes and the splitter query are suspension points
/// like any other; cancellation must not wait out a stuck one.
async fn or_cancelled<F: std::future::Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

/// One physical table bound to the query channel of its endpoint.
#[derive(Debug, Clone)]
pub struct TableInstance {
    /// The addressed table.
    pub table: TableRef,
    /// The endpoint's query channel.
    pub source: Arc<dyn TableSource>,
}

impl TableInstance {
    /// Bind `table` to `source`.
    pub fn new(table: TableRef, source: Arc<dyn TableSource>) -> Self {
        Self { table, source }
    }

    async fn resolved_schema(&self, config: &DiffConfig) -> Result<TableSchema> {
        let meta = self
            .source
            .table_meta(&self.table.schema, &self.table.table)
            .await
            .context(ResolveSchemaSnafu {
                table: self.table.clone(),
            })?;
        config.resolve_schema(&meta).context(ConfigSnafu)
    }
}

/// Outcome of one verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    /// The target and every source are structurally equal.
    pub struct_equal: bool,
    /// The target equals the union of the sources over the verified
    /// chunks. Under cancellation this covers the finished chunks only.
    pub data_equal: bool,
}

/// A configured verification run of one target table against N sources.
#[derive(Debug)]
pub struct TableDiff {
    config: DiffConfig,
    target: TableInstance,
    sources: Vec<TableInstance>,
    checkpoint: Arc<dyn CheckpointStore>,
    splitter: Arc<dyn ChunkSplitter>,
    writer: Arc<dyn PatchWriter>,
}

impl TableDiff {
    /// Assemble a run. The configuration is sanitized here; construction
    /// never fails.
    pub fn new(
        config: DiffConfig,
        target: TableInstance,
        sources: Vec<TableInstance>,
        checkpoint: Arc<dyn CheckpointStore>,
        splitter: Arc<dyn ChunkSplitter>,
        writer: Arc<dyn PatchWriter>,
    ) -> Self {
        Self {
            config: config.sanitized(),
            target,
            sources,
            checkpoint,
            splitter,
            writer,
        }
    }

    /// Run the verification.
    ///
    /// Returns the structural and data verdicts. Cancellation is not an
    /// error: finished chunks report, unfinished ones stay `checking` in
    /// the checkpoint and the partial result reads "equal so far".
    pub async fn check(&self, cancel: CancellationToken) -> Result<CheckResult> {
        let schema = self.target.resolved_schema(&self.config).await?;

        let mut struct_equal = true;
        for source in &self.sources {
            let source_schema = source.resolved_schema(&self.config).await?;
            if source_schema.order_key != schema.order_key {
                return OrderKeyMismatchSnafu {
                    target: self.target.table.clone(),
                    source_table: source.table.clone(),
                }
                .fail();
            }
            if !self.config.ignore_struct_check && !schema.structurally_equal(&source_schema) {
                warn!(
                    table = %self.target.table,
                    source = %source.table,
                    "tables are structurally unequal"
                );
                struct_equal = false;
            }
        }
        if !struct_equal {
            // the data phase relies on identical structure
            return Ok(CheckResult {
                struct_equal: false,
                data_equal: false,
            });
        }

        if self.config.ignore_data_check {
            info!(table = %self.target.table, "data comparison disabled by configuration");
            return Ok(CheckResult {
                struct_equal: true,
                data_equal: true,
            });
        }

        let data_equal = self.check_data(&schema, cancel).await?;
        Ok(CheckResult {
            struct_equal: true,
            data_equal,
        })
    }

    async fn check_data(&self, schema: &TableSchema, cancel: CancellationToken) -> Result<bool> {
        // cancellation during setup ends the run with the partial
        // "equal so far" verdict, same as cancellation mid-verification
        let store = &self.checkpoint;
        match or_cancelled(&cancel, store.initialize()).await {
            Some(result) => result.context(CheckpointSnafu)?,
            None => return Ok(true),
        };

        let source_refs: Vec<TableRef> = self.sources.iter().map(|s| s.table.clone()).collect();
        let fingerprint = self.config.fingerprint(&self.target.table, &source_refs);

        let loaded = if self.config.use_checkpoint {
            match or_cancelled(
                &cancel,
                store.load_chunks(&self.target.table, &fingerprint, &schema.key_columns()),
            )
            .await
            {
                Some(result) => result.context(CheckpointSnafu)?,
                None => return Ok(true),
            }
        } else {
            Vec::new()
        };
        let resumed = !loaded.is_empty();

        let chunks = if resumed {
            info!(
                table = %self.target.table,
                chunks = loaded.len(),
                "resuming from checkpointed chunks"
            );
            loaded
        } else {
            let chunks = match or_cancelled(
                &cancel,
                self.splitter.split(&self.target, schema, &self.config),
            )
            .await
            {
                Some(result) => result.context(SplitSnafu)?,
                None => return Ok(true),
            };
            match or_cancelled(&cancel, store.clean(&self.target.table)).await {
                Some(result) => result.context(CheckpointSnafu)?,
                None => return Ok(true),
            };
            match or_cancelled(&cancel, store.init_summary(&self.target.table, &fingerprint))
                .await
            {
                Some(result) => result.context(CheckpointSnafu)?,
                None => return Ok(true),
            };
            for chunk in &chunks {
                match or_cancelled(&cancel, store.save_chunk(&self.target.table, chunk)).await {
                    Some(result) => result.context(CheckpointSnafu)?,
                    None => return Ok(true),
                };
            }
            chunks
        };

        let total = chunks.len();
        if total == 0 {
            return Ok(true);
        }

        let (dml_tx, dml_rx) = mpsc::channel(DML_CHANNEL_CAPACITY);
        let sink_task = tokio::spawn(run_patch_sink(
            dml_rx,
            Arc::clone(&self.writer),
            cancel.clone(),
        ));

        let summary_stop = CancellationToken::new();
        let summary_task = tokio::spawn(run_summary_ticker(
            Arc::clone(store),
            self.target.table.clone(),
            summary_stop.clone(),
        ));

        let sampler = match self.config.sample_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let checker = Arc::new(ChunkChecker {
            target: self.target.clone(),
            sources: self.sources.clone(),
            schema: schema.clone(),
            config: self.config.clone(),
            checkpoint: Arc::clone(store),
            dml_tx,
            cancel: cancel.clone(),
            sampler: Mutex::new(sampler),
            resumed,
        });

        let workers = self.config.check_thread_count;
        let (result_tx, mut result_rx) = mpsc::channel(total);
        let mut worker_txs = Vec::with_capacity(workers);
        let mut worker_tasks = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
            worker_txs.push(tx);
            worker_tasks.push(tokio::spawn(worker_loop(
                Arc::clone(&checker),
                rx,
                result_tx.clone(),
            )));
        }
        // the workers hold the only references from here on; dropping ours
        // lets the DML channel close once they are done
        drop(checker);
        drop(result_tx);

        // stable affinity: a chunk lands on the same worker across resumes
        for chunk in chunks {
            let worker = (chunk.id % workers as u64) as usize;
            if worker_txs[worker].send(chunk).await.is_err() {
                break;
            }
        }
        drop(worker_txs);

        let mut data_equal = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        table = %self.target.table,
                        "run cancelled; unfinished chunks stay checking"
                    );
                    break;
                }
                result = result_rx.recv() => match result {
                    Some(ok) => data_equal &= ok,
                    None => break,
                },
            }
        }

        join_all(worker_tasks).await;
        summary_stop.cancel();
        let _ = summary_task.await;
        if let Some(Err(e)) = or_cancelled(&cancel, store.update_summary(&self.target.table)).await
        {
            warn!(table = %self.target.table, error = %e, "final summary refresh failed");
        }
        let _ = sink_task.await;

        Ok(data_equal)
    }
}
