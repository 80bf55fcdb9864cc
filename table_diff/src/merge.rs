//! The row-level verification path: k-way merge of the source streams and
//! the sorted diff walk against the target stream, emitting corrective DML.
//!
//! Order keys are assumed unique per table. When multiple sources carry the
//! same key, the heap yields them in (key, source index) order and the walk
//! advances both cursors once per key comparison; the patch then ends with
//! the last REPLACE winning, which is deterministic but order-dependent.
//! Non-unique order keys within one table are unsupported.

use crate::dml;
use data_types::{key_tuple, rows_equal, Column, KeyTuple, RowError, RowRecord, TableRef};
use snafu::{ResultExt, Snafu};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tokio::sync::mpsc;

/// Errors aborting the row-level verification of one chunk.
#[derive(Debug, Snafu)]
pub(crate) enum MergeError {
    #[snafu(display("bad row in merge: {}", source))]
    BadRow { source: RowError },

    #[snafu(display("patch channel closed before the chunk finished"))]
    PatchChannelClosed,
}

struct HeapEntry {
    key: KeyTuple,
    source: usize,
    row: RowRecord,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merge the per-source key-ordered row vectors into one ordered stream.
///
/// The heap holds at most one entry per source; the source tag only routes
/// the advance back to the right stream.
fn merge_sources(
    source_rows: Vec<Vec<RowRecord>>,
    key_columns: &[&Column],
) -> Result<Vec<(KeyTuple, RowRecord)>, MergeError> {
    let mut streams: Vec<std::vec::IntoIter<RowRecord>> =
        source_rows.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(streams.len());

    for (source, stream) in streams.iter_mut().enumerate() {
        if let Some(row) = stream.next() {
            let key = key_tuple(&row, key_columns).context(BadRowSnafu)?;
            heap.push(Reverse(HeapEntry { key, source, row }));
        }
    }

    let mut merged = Vec::new();
    while let Some(Reverse(entry)) = heap.pop() {
        if let Some(row) = streams[entry.source].next() {
            let key = key_tuple(&row, key_columns).context(BadRowSnafu)?;
            heap.push(Reverse(HeapEntry {
                key,
                source: entry.source,
                row,
            }));
        }
        merged.push((entry.key, entry.row));
    }
    Ok(merged)
}

async fn send(dml_tx: &mpsc::Sender<String>, stmt: String) -> Result<(), MergeError> {
    dml_tx
        .send(stmt)
        .await
        .map_err(|_| MergeError::PatchChannelClosed)
}

/// Diff the merged source stream against the target stream and emit the
/// minimal REPLACE/DELETE patch in key order.
///
/// Every emitted statement is pushed through the bounded patch channel
/// before this function returns, so the chunk's checkpoint state can never
/// get ahead of what the sink has accepted. Returns whether the chunk was
/// equal (no DML emitted).
pub(crate) async fn diff_chunk(
    target_table: &TableRef,
    columns: &[&Column],
    key_columns: &[&Column],
    target_rows: Vec<RowRecord>,
    source_rows: Vec<Vec<RowRecord>>,
    dml_tx: &mpsc::Sender<String>,
) -> Result<bool, MergeError> {
    let merged = merge_sources(source_rows, key_columns)?;
    let target: Vec<(KeyTuple, RowRecord)> = target_rows
        .into_iter()
        .map(|row| {
            key_tuple(&row, key_columns)
                .map(|key| (key, row))
                .context(BadRowSnafu)
        })
        .collect::<Result<_, _>>()?;

    let mut equal = true;
    let mut i = 0;
    let mut j = 0;
    while i < merged.len() && j < target.len() {
        let (source_key, source_row) = &merged[i];
        let (target_key, target_row) = &target[j];
        match source_key.cmp(target_key) {
            Ordering::Equal => {
                if !rows_equal(source_row, target_row, columns, &[]).context(BadRowSnafu)? {
                    let stmt =
                        dml::replace_stmt(target_table, columns, source_row).context(BadRowSnafu)?;
                    send(dml_tx, stmt).await?;
                    equal = false;
                }
                i += 1;
                j += 1;
            }
            // the source has a row the target lacks
            Ordering::Less => {
                let stmt =
                    dml::replace_stmt(target_table, columns, source_row).context(BadRowSnafu)?;
                send(dml_tx, stmt).await?;
                equal = false;
                i += 1;
            }
            // the target has an extra row
            Ordering::Greater => {
                let stmt =
                    dml::delete_stmt(target_table, key_columns, target_row).context(BadRowSnafu)?;
                send(dml_tx, stmt).await?;
                equal = false;
                j += 1;
            }
        }
    }

    for (_, source_row) in &merged[i..] {
        let stmt = dml::replace_stmt(target_table, columns, source_row).context(BadRowSnafu)?;
        send(dml_tx, stmt).await?;
        equal = false;
    }
    for (_, target_row) in &target[j..] {
        let stmt = dml::delete_stmt(target_table, key_columns, target_row).context(BadRowSnafu)?;
        send(dml_tx, stmt).await?;
        equal = false;
    }

    Ok(equal)
}
