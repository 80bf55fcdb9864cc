//! End-to-end verification runs over in-memory sources and checkpoints.

use async_trait::async_trait;
use checkpoint::mem::MemCheckpointStore;
use checkpoint::CheckpointStore;
use data_types::{
    ChunkRange, ChunkState, Column, ColumnKind, KeyBound, RangeBounds, RowRecord, TableRef,
    TableSchema,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use table_diff::{
    ChunkSplitter, DiffConfig, Error, TableDiff, TableInstance, VecPatchWriter, WholeTableSplitter,
};
use table_source::mem::{row, MemTableSource};
use table_source::{SourceResult, TableMeta, TableSource};
use tokio_util::sync::CancellationToken;

fn users_meta() -> TableMeta {
    TableMeta {
        columns: vec![
            Column::new("id", ColumnKind::Numeric, false),
            Column::new("name", ColumnKind::Quoted, true),
        ],
        unique_key: Some(vec!["id".to_string()]),
    }
}

fn users_rows(pairs: &[(&str, Option<&str>)]) -> Vec<RowRecord> {
    pairs
        .iter()
        .map(|(id, name)| row(&[("id", Some(id)), ("name", *name)]))
        .collect()
}

fn mem_instance(instance_id: &str, meta: TableMeta, rows: Vec<RowRecord>) -> (TableInstance, Arc<MemTableSource>) {
    let source = Arc::new(MemTableSource::new(instance_id));
    source.create_table("app", "users", meta);
    source.insert_rows("app", "users", rows);
    let handle: Arc<dyn TableSource> = source.clone();
    (
        TableInstance::new(TableRef::new(instance_id, "app", "users"), handle),
        source,
    )
}

/// Splits a single-column numeric key space at fixed boundaries.
#[derive(Debug)]
struct BoundarySplitter {
    boundaries: Vec<String>,
}

impl BoundarySplitter {
    fn new(boundaries: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            boundaries: boundaries.iter().map(|b| b.to_string()).collect(),
        })
    }
}

#[async_trait]
impl ChunkSplitter for BoundarySplitter {
    async fn split(
        &self,
        _target: &TableInstance,
        schema: &TableSchema,
        _config: &DiffConfig,
    ) -> SourceResult<Vec<ChunkRange>> {
        let keys = schema.key_columns();
        let mut chunks = Vec::new();
        let mut lower: Option<KeyBound> = None;
        for boundary in &self.boundaries {
            chunks.push(ChunkRange::new(
                chunks.len() as u64,
                RangeBounds {
                    lower: lower.clone(),
                    upper: Some(KeyBound::including(vec![boundary.clone()])),
                },
                &keys,
            ));
            lower = Some(KeyBound::excluding(vec![boundary.clone()]));
        }
        chunks.push(ChunkRange::new(
            chunks.len() as u64,
            RangeBounds { lower, upper: None },
            &keys,
        ));
        Ok(chunks)
    }
}

struct Fixture {
    diff: TableDiff,
    target: Arc<MemTableSource>,
    store: Arc<MemCheckpointStore>,
    writer: Arc<VecPatchWriter>,
    target_ref: TableRef,
}

fn fixture_with_store(
    config: DiffConfig,
    target_rows: Vec<RowRecord>,
    source_rows: Vec<Vec<RowRecord>>,
    splitter: Arc<dyn ChunkSplitter>,
    store: Arc<MemCheckpointStore>,
) -> Fixture {
    let (target, target_mem) = mem_instance("target-1", users_meta(), target_rows);
    let mut sources = Vec::new();
    for (i, rows) in source_rows.into_iter().enumerate() {
        let (instance, _) = mem_instance(&format!("source-{}", i + 1), users_meta(), rows);
        sources.push(instance);
    }
    let writer = Arc::new(VecPatchWriter::new());
    let target_ref = target.table.clone();
    let diff = TableDiff::new(
        config,
        target,
        sources,
        Arc::clone(&store) as Arc<dyn CheckpointStore>,
        splitter,
        Arc::clone(&writer) as Arc<dyn table_diff::PatchWriter>,
    );
    Fixture {
        diff,
        target: target_mem,
        store,
        writer,
        target_ref,
    }
}

fn fixture(
    config: DiffConfig,
    target_rows: Vec<RowRecord>,
    source_rows: Vec<Vec<RowRecord>>,
    splitter: Arc<dyn ChunkSplitter>,
) -> Fixture {
    fixture_with_store(
        config,
        target_rows,
        source_rows,
        splitter,
        Arc::new(MemCheckpointStore::new()),
    )
}

#[tokio::test]
async fn equal_tables_emit_no_dml() {
    test_helpers::maybe_start_logging();
    let data = &[("1", Some("a")), ("2", Some("b")), ("3", Some("c"))];
    let f = fixture(
        DiffConfig::default(),
        users_rows(data),
        vec![users_rows(data)],
        Arc::new(WholeTableSplitter),
    );

    let result = f.diff.check(CancellationToken::new()).await.unwrap();
    assert!(result.struct_equal);
    assert!(result.data_equal);
    assert!(f.writer.stmts().is_empty());
    assert_eq!(
        f.store.chunk_states(&f.target_ref),
        vec![(0, ChunkState::Success)]
    );
}

#[tokio::test]
async fn differing_row_fails_the_chunk_and_emits_replace() {
    let f = fixture(
        DiffConfig::default(),
        users_rows(&[("1", Some("a")), ("2", Some("B")), ("3", Some("c"))]),
        vec![users_rows(&[("1", Some("a")), ("2", Some("b")), ("3", Some("c"))])],
        Arc::new(WholeTableSplitter),
    );

    let result = f.diff.check(CancellationToken::new()).await.unwrap();
    assert!(result.struct_equal);
    assert!(!result.data_equal);
    assert_eq!(
        f.writer.stmts(),
        vec!["REPLACE INTO `app`.`users`(id,name) VALUES (2,'b');"]
    );
    assert_eq!(
        f.store.chunk_states(&f.target_ref),
        vec![(0, ChunkState::Failed)]
    );
}

#[tokio::test]
async fn extra_target_row_emits_keyed_delete() {
    let f = fixture(
        DiffConfig::default(),
        users_rows(&[
            ("1", Some("a")),
            ("2", Some("b")),
            ("3", Some("c")),
            ("4", Some("d")),
        ]),
        vec![users_rows(&[("1", Some("a")), ("2", Some("b")), ("3", Some("c"))])],
        Arc::new(WholeTableSplitter),
    );

    let result = f.diff.check(CancellationToken::new()).await.unwrap();
    assert!(!result.data_equal);
    assert_eq!(
        f.writer.stmts(),
        vec!["DELETE FROM `app`.`users` WHERE `id` = 4;"]
    );
}

#[tokio::test]
async fn two_disjoint_sources_fill_an_empty_target_in_key_order() {
    let f = fixture(
        DiffConfig::default(),
        Vec::new(),
        vec![
            users_rows(&[("1", Some("a")), ("3", Some("c"))]),
            users_rows(&[("2", Some("b")), ("4", Some("d"))]),
        ],
        Arc::new(WholeTableSplitter),
    );

    let result = f.diff.check(CancellationToken::new()).await.unwrap();
    assert!(!result.data_equal);
    assert_eq!(
        f.writer.stmts(),
        vec![
            "REPLACE INTO `app`.`users`(id,name) VALUES (1,'a');",
            "REPLACE INTO `app`.`users`(id,name) VALUES (2,'b');",
            "REPLACE INTO `app`.`users`(id,name) VALUES (3,'c');",
            "REPLACE INTO `app`.`users`(id,name) VALUES (4,'d');",
        ]
    );
}

#[tokio::test]
async fn checksum_only_mode_fails_without_materializing_rows() {
    let config = DiffConfig {
        only_use_checksum: true,
        ..Default::default()
    };
    let f = fixture(
        config,
        users_rows(&[("1", Some("a")), ("2", Some("B"))]),
        vec![users_rows(&[("1", Some("a")), ("2", Some("b"))])],
        Arc::new(WholeTableSplitter),
    );

    let result = f.diff.check(CancellationToken::new()).await.unwrap();
    assert!(!result.data_equal);
    assert!(f.writer.stmts().is_empty());
    assert_eq!(
        f.store.chunk_states(&f.target_ref),
        vec![(0, ChunkState::Failed)]
    );
    // the checksum tier ran, the row tier did not
    assert!(f.target.scan_log().is_empty());
    assert_eq!(f.target.checksum_log().len(), 1);
}

#[tokio::test]
async fn resume_replays_only_non_terminal_chunks() {
    let source_data = users_rows(&[("1", Some("a")), ("2", Some("b")), ("3", Some("c"))]);
    let target_data = users_rows(&[("1", Some("a")), ("2", Some("b")), ("3", Some("C"))]);
    let config = DiffConfig::default();
    let splitter = BoundarySplitter::new(&["2"]);

    // the uninterrupted run, for the expected patch
    let full = fixture(
        config.clone(),
        target_data.clone(),
        vec![source_data.clone()],
        Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
    );
    full.diff.check(CancellationToken::new()).await.unwrap();
    let expected_patch = full.writer.stmts();
    assert_eq!(expected_patch.len(), 1);

    // a checkpoint as an interrupted run would leave it: chunk 0 already
    // verified, chunk 1 untouched
    let store = Arc::new(MemCheckpointStore::new());
    let target_ref = TableRef::new("target-1", "app", "users");
    let source_ref = TableRef::new("source-1", "app", "users");
    let fingerprint = config.fingerprint(&target_ref, &[source_ref]);
    let id_col = Column::new("id", ColumnKind::Numeric, false);
    store.init_summary(&target_ref, &fingerprint).await.unwrap();
    let mut chunk0 = ChunkRange::new(
        0,
        RangeBounds {
            lower: None,
            upper: Some(KeyBound::including(vec!["2".to_string()])),
        },
        &[&id_col],
    );
    chunk0.state = ChunkState::Success;
    store.save_chunk(&target_ref, &chunk0).await.unwrap();
    let chunk1 = ChunkRange::new(
        1,
        RangeBounds {
            lower: Some(KeyBound::excluding(vec!["2".to_string()])),
            upper: None,
        },
        &[&id_col],
    );
    store.save_chunk(&target_ref, &chunk1).await.unwrap();

    let resumed = fixture_with_store(
        config,
        target_data,
        vec![source_data],
        Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
        store,
    );
    let result = resumed.diff.check(CancellationToken::new()).await.unwrap();
    assert!(!result.data_equal);
    // only the unfinished chunk was scanned, and the patch is identical
    assert_eq!(resumed.target.scan_log(), vec![chunk1.where_clause.clone()]);
    assert_eq!(resumed.writer.stmts(), expected_patch);
}

#[tokio::test]
async fn changed_fingerprint_discards_the_old_lineage() {
    let source_data = users_rows(&[("1", Some("a")), ("2", Some("b")), ("3", Some("c"))]);
    let config = DiffConfig::default();
    let splitter = BoundarySplitter::new(&["2"]);

    let first = fixture(
        config.clone(),
        source_data.clone(),
        vec![source_data.clone()],
        Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
    );
    first.diff.check(CancellationToken::new()).await.unwrap();
    assert_eq!(first.store.chunk_states(&first.target_ref).len(), 2);

    // same store, different chunk size: the fingerprint changes, the
    // lineage is rebuilt and every chunk is verified again
    let changed = DiffConfig {
        chunk_size: 17,
        ..Default::default()
    };
    let second = fixture_with_store(
        changed,
        source_data.clone(),
        vec![source_data],
        Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
        Arc::clone(&first.store),
    );
    let result = second.diff.check(CancellationToken::new()).await.unwrap();
    assert!(result.data_equal);
    assert_eq!(second.target.scan_log().len(), 0); // checksums matched
    assert_eq!(second.target.checksum_log().len(), 2); // both chunks re-run
}

#[tokio::test]
async fn sampling_ignores_chunks_deterministically_and_never_on_resume() {
    let source_data = users_rows(&[("5", Some("a")), ("15", Some("b")), ("25", Some("c"))]);
    // target differs everywhere; ignored chunks still count as equal
    let target_data = users_rows(&[("5", Some("x")), ("15", Some("y")), ("25", Some("z"))]);
    let splitter = BoundarySplitter::new(&["10", "20"]);
    // one worker keeps the draw order, and with it the selection, stable
    let config = DiffConfig {
        sample: 0,
        sample_seed: Some(42),
        check_thread_count: 1,
        ..Default::default()
    };

    let f = fixture(
        config.clone(),
        target_data.clone(),
        vec![source_data.clone()],
        Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
    );
    f.diff.check(CancellationToken::new()).await.unwrap();
    let states = f.store.chunk_states(&f.target_ref);
    let ignored: Vec<u64> = states
        .iter()
        .filter(|(_, s)| *s == ChunkState::Ignore)
        .map(|(id, _)| *id)
        .collect();
    assert!(!ignored.is_empty());

    // same seed, same selection
    let again = fixture(
        config.clone(),
        target_data,
        vec![source_data.clone()],
        Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
    );
    again.diff.check(CancellationToken::new()).await.unwrap();
    assert_eq!(again.store.chunk_states(&again.target_ref), states);

    // resumed chunks are never sampled away: reuse the lineage with every
    // chunk reset to `new`
    let store = Arc::new(MemCheckpointStore::new());
    let target_ref = TableRef::new("target-1", "app", "users");
    let source_ref = TableRef::new("source-1", "app", "users");
    let fingerprint = config.fingerprint(&target_ref, &[source_ref]);
    store.init_summary(&target_ref, &fingerprint).await.unwrap();
    let id_col = Column::new("id", ColumnKind::Numeric, false);
    for (i, bounds) in [
        RangeBounds {
            lower: None,
            upper: Some(KeyBound::including(vec!["10".to_string()])),
        },
        RangeBounds {
            lower: Some(KeyBound::excluding(vec!["10".to_string()])),
            upper: Some(KeyBound::including(vec!["20".to_string()])),
        },
        RangeBounds {
            lower: Some(KeyBound::excluding(vec!["20".to_string()])),
            upper: None,
        },
    ]
    .into_iter()
    .enumerate()
    {
        store
            .save_chunk(&target_ref, &ChunkRange::new(i as u64, bounds, &[&id_col]))
            .await
            .unwrap();
    }
    let resumed = fixture_with_store(
        config,
        users_rows(&[("5", Some("a"))]),
        vec![users_rows(&[("5", Some("a"))])],
        Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
        store,
    );
    resumed.diff.check(CancellationToken::new()).await.unwrap();
    assert!(resumed
        .store
        .chunk_states(&resumed.target_ref)
        .iter()
        .all(|(_, s)| *s != ChunkState::Ignore));
}

#[tokio::test]
async fn full_sampling_never_ignores() {
    let data = users_rows(&[("1", Some("a"))]);
    let f = fixture(
        DiffConfig {
            sample: 100,
            sample_seed: Some(7),
            ..Default::default()
        },
        data.clone(),
        vec![data],
        BoundarySplitter::new(&["0", "1", "2"]) as Arc<dyn ChunkSplitter>,
    );
    f.diff.check(CancellationToken::new()).await.unwrap();
    assert!(f
        .store
        .chunk_states(&f.target_ref)
        .iter()
        .all(|(_, s)| *s == ChunkState::Success));
}

#[tokio::test]
async fn cancellation_reports_equal_so_far_and_leaves_chunks_resumable() {
    let data = users_rows(&[("1", Some("a")), ("2", Some("b"))]);
    let f = fixture(
        DiffConfig::default(),
        data.clone(),
        vec![data],
        Arc::new(WholeTableSplitter),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = f.diff.check(cancel).await.unwrap();
    assert!(result.struct_equal);
    assert!(result.data_equal);
    // nothing was verified and nothing reached a terminal state
    assert!(f.target.scan_log().is_empty());
    assert!(f
        .store
        .chunk_states(&f.target_ref)
        .iter()
        .all(|(_, s)| !s.is_terminal()));
}

/// Passes setup writes through but hangs every later chunk save, flagging
/// `entered` when the first one starts.
#[derive(Debug)]
struct HangingSaveStore {
    inner: MemCheckpointStore,
    entered: CancellationToken,
}

#[async_trait]
impl CheckpointStore for HangingSaveStore {
    async fn initialize(&self) -> checkpoint::Result<()> {
        self.inner.initialize().await
    }

    async fn load_chunks(
        &self,
        target: &TableRef,
        fingerprint: &str,
        key_columns: &[&Column],
    ) -> checkpoint::Result<Vec<ChunkRange>> {
        self.inner.load_chunks(target, fingerprint, key_columns).await
    }

    async fn clean(&self, target: &TableRef) -> checkpoint::Result<()> {
        self.inner.clean(target).await
    }

    async fn init_summary(&self, target: &TableRef, fingerprint: &str) -> checkpoint::Result<()> {
        self.inner.init_summary(target, fingerprint).await
    }

    async fn save_chunk(&self, target: &TableRef, chunk: &ChunkRange) -> checkpoint::Result<()> {
        if chunk.state == ChunkState::New {
            return self.inner.save_chunk(target, chunk).await;
        }
        self.entered.cancel();
        futures::future::pending().await
    }

    async fn update_summary(&self, target: &TableRef) -> checkpoint::Result<()> {
        self.inner.update_summary(target).await
    }
}

#[tokio::test]
async fn cancellation_interrupts_a_stuck_persist() {
    let data = users_rows(&[("1", Some("a"))]);
    let entered = CancellationToken::new();
    let store = Arc::new(HangingSaveStore {
        inner: MemCheckpointStore::new(),
        entered: entered.clone(),
    });
    let (target, _) = mem_instance("target-1", users_meta(), data.clone());
    let (source, _) = mem_instance("source-1", users_meta(), data);
    let diff = TableDiff::new(
        DiffConfig::default(),
        target,
        vec![source],
        store,
        Arc::new(WholeTableSplitter),
        Arc::new(VecPatchWriter::new()),
    );

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { diff.check(run_cancel).await });

    // a worker is now stuck persisting its `checking` transition
    entered.cancelled().await;
    cancel.cancel();

    // the run must return promptly instead of waiting out the persist
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run did not return after cancellation")
        .unwrap()
        .unwrap();
    assert!(result.struct_equal);
}

#[tokio::test]
async fn structurally_unequal_tables_skip_the_data_phase() {
    let (target, target_mem) = mem_instance("target-1", users_meta(), Vec::new());
    let mut source_meta = users_meta();
    source_meta.columns[1].nullable = false;
    let (source, _) = mem_instance("source-1", source_meta, Vec::new());

    let writer = Arc::new(VecPatchWriter::new());
    let diff = TableDiff::new(
        DiffConfig::default(),
        target,
        vec![source],
        Arc::new(MemCheckpointStore::new()),
        Arc::new(WholeTableSplitter),
        Arc::clone(&writer) as Arc<dyn table_diff::PatchWriter>,
    );
    let result = diff.check(CancellationToken::new()).await.unwrap();
    assert!(!result.struct_equal);
    assert!(!result.data_equal);
    assert!(target_mem.scan_log().is_empty());
    assert!(target_mem.checksum_log().is_empty());
}

#[tokio::test]
async fn differing_order_keys_abort_the_run() {
    let (target, _) = mem_instance("target-1", users_meta(), Vec::new());
    let mut source_meta = users_meta();
    source_meta.unique_key = Some(vec!["name".to_string()]);
    let (source, _) = mem_instance("source-1", source_meta, Vec::new());

    let diff = TableDiff::new(
        DiffConfig {
            ignore_struct_check: true,
            ..Default::default()
        },
        target,
        vec![source],
        Arc::new(MemCheckpointStore::new()),
        Arc::new(WholeTableSplitter),
        Arc::new(VecPatchWriter::new()),
    );
    let err = diff.check(CancellationToken::new()).await.unwrap_err();
    assert_matches::assert_matches!(err, Error::OrderKeyMismatch { .. });
}

#[tokio::test]
async fn applying_the_patch_converges_and_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(4242);
    for sources_n in 1..=4usize {
        // disjoint sources: key k lives in source k % n
        let mut source_rows: Vec<Vec<RowRecord>> = vec![Vec::new(); sources_n];
        let mut target_rows = Vec::new();
        for key in 0..40u32 {
            let value = format!("v{}", rng.gen_range(0..1000));
            source_rows[(key as usize) % sources_n]
                .push(row(&[("id", Some(&key.to_string())), ("name", Some(&value))]));
            // the target gets a corrupted copy: some rows missing, some
            // altered, some extra
            match rng.gen_range(0..4) {
                0 => {}
                1 => target_rows.push(row(&[
                    ("id", Some(&key.to_string())),
                    ("name", Some("corrupt")),
                ])),
                _ => target_rows.push(row(&[
                    ("id", Some(&key.to_string())),
                    ("name", Some(&value)),
                ])),
            }
        }
        target_rows.push(row(&[("id", Some("999")), ("name", Some("extra"))]));

        let splitter = BoundarySplitter::new(&["10", "20", "30"]);
        let f = fixture(
            DiffConfig::default(),
            target_rows,
            source_rows.clone(),
            Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
        );
        f.diff.check(CancellationToken::new()).await.unwrap();

        // apply once, apply twice: same table either way
        let patch = f.writer.stmts();
        f.target.apply_patch(&patch).unwrap();
        let after_once = f.target.table_rows("app", "users");
        f.target.apply_patch(&patch).unwrap();
        assert_eq!(f.target.table_rows("app", "users"), after_once);

        // the patched target verifies clean
        let verify = fixture(
            DiffConfig::default(),
            after_once,
            source_rows,
            Arc::clone(&splitter) as Arc<dyn ChunkSplitter>,
        );
        let result = verify.diff.check(CancellationToken::new()).await.unwrap();
        assert!(result.data_equal, "{} sources did not converge", sources_n);
        assert!(verify.writer.stmts().is_empty());
    }
}

#[tokio::test]
async fn summary_reflects_the_finished_run() {
    let data = users_rows(&[("1", Some("a")), ("2", Some("b"))]);
    let f = fixture(
        DiffConfig::default(),
        data.clone(),
        vec![data],
        BoundarySplitter::new(&["1"]) as Arc<dyn ChunkSplitter>,
    );
    f.diff.check(CancellationToken::new()).await.unwrap();

    let summary = f.store.summary(&f.target_ref).unwrap();
    assert_eq!(summary.total_chunks, 2);
    assert_eq!(summary.checked_chunks, 2);
    assert_eq!(summary.state, "success");
}
