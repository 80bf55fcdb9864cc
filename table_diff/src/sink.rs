//! The patch sink and the periodic summary refresh.

use checkpoint::CheckpointStore;
use data_types::TableRef;
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How often the run summary counters are refreshed.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

/// Caller-supplied consumer of the corrective DML, one statement per call.
///
/// Write errors are logged and swallowed: the patch is advisory and a sink
/// hiccup must not fail the verification run.
pub trait PatchWriter: Send + Sync + Debug + 'static {
    /// Record one statement.
    fn write_stmt(&self, stmt: &str) -> std::io::Result<()>;
}

/// A [`PatchWriter`] collecting statements in memory.
#[derive(Debug, Default)]
pub struct VecPatchWriter {
    stmts: Mutex<Vec<String>>,
}

impl VecPatchWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The statements written so far, in arrival order.
    pub fn stmts(&self) -> Vec<String> {
        self.stmts.lock().clone()
    }
}

impl PatchWriter for VecPatchWriter {
    fn write_stmt(&self, stmt: &str) -> std::io::Result<()> {
        self.stmts.lock().push(stmt.to_string());
        Ok(())
    }
}

fn write_one(writer: &Arc<dyn PatchWriter>, stmt: &str) {
    if let Err(e) = writer.write_stmt(stmt) {
        warn!(error = %e, "patch writer failed; statement dropped");
    }
}

/// Drain the DML channel into `writer` until the channel closes or the run
/// is cancelled. On cancellation, already-buffered statements are drained
/// best-effort before exiting.
pub(crate) async fn run_patch_sink(
    mut dml_rx: mpsc::Receiver<String>,
    writer: Arc<dyn PatchWriter>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            stmt = dml_rx.recv() => match stmt {
                Some(stmt) => write_one(&writer, &stmt),
                None => break,
            },
            _ = cancel.cancelled() => {
                while let Ok(stmt) = dml_rx.try_recv() {
                    write_one(&writer, &stmt);
                }
                debug!("patch sink cancelled");
                break;
            }
        }
    }
}

/// Refresh the run summary every [`SUMMARY_INTERVAL`] until stopped.
/// Refresh failures are logged and non-fatal; the next tick overwrites.
pub(crate) async fn run_summary_ticker(
    store: Arc<dyn CheckpointStore>,
    target: TableRef,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(SUMMARY_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.cancelled() => break,
        }
        // the refresh itself is a suspension point; a stuck store must not
        // outlive the stop signal
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = store.update_summary(&target) => {
                if let Err(e) = result {
                    warn!(table = %target, error = %e, "summary refresh failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FailingWriter;

    impl PatchWriter for FailingWriter {
        fn write_stmt(&self, _stmt: &str) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "sink broke"))
        }
    }

    #[tokio::test]
    async fn sink_drains_until_channel_closes() {
        let writer = Arc::new(VecPatchWriter::new());
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_patch_sink(
            rx,
            Arc::clone(&writer) as Arc<dyn PatchWriter>,
            CancellationToken::new(),
        ));

        tx.send("REPLACE ...;".to_string()).await.unwrap();
        tx.send("DELETE ...;".to_string()).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(writer.stmts(), vec!["REPLACE ...;", "DELETE ...;"]);
    }

    #[tokio::test]
    async fn cancellation_drains_buffered_statements() {
        let writer = Arc::new(VecPatchWriter::new());
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send("REPLACE ...;".to_string()).await.unwrap();
        cancel.cancel();
        run_patch_sink(rx, Arc::clone(&writer) as Arc<dyn PatchWriter>, cancel).await;

        assert_eq!(writer.stmts(), vec!["REPLACE ...;"]);
    }

    #[tokio::test]
    async fn write_errors_do_not_stop_the_sink() {
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_patch_sink(
            rx,
            Arc::new(FailingWriter) as Arc<dyn PatchWriter>,
            CancellationToken::new(),
        ));
        tx.send("REPLACE ...;".to_string()).await.unwrap();
        drop(tx);
        // the sink exits normally even though every write failed
        task.await.unwrap();
    }
}
