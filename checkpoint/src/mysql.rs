//! MySQL-family implementation of [`CheckpointStore`].
//!
//! Progress lives inside the target store itself, in a dedicated
//! `sync_diff` schema, so that a restarted run finds its lineage without a
//! separate metadata service. Rows are partitioned by
//! (instance, schema, table, chunk id), keeping concurrent writers on
//! different targets from conflicting; a single writer per target is
//! assumed.

use crate::{summary_state, CheckpointStore, MalformedBoundsSnafu, MalformedStateSnafu, QuerySnafu, Result};
use async_trait::async_trait;
use data_types::{ChunkRange, ChunkState, Column, RangeBounds, TableRef};
use observability_deps::tracing::debug;
use snafu::ResultExt;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

const CREATE_SCHEMA: &str = "CREATE DATABASE IF NOT EXISTS `sync_diff`";

const CREATE_CHUNK_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS `sync_diff`.`chunk` (
    `instance` VARCHAR(64) NOT NULL,
    `schema` VARCHAR(64) NOT NULL,
    `table` VARCHAR(64) NOT NULL,
    `chunk_id` BIGINT UNSIGNED NOT NULL,
    `where_text` TEXT NOT NULL,
    `args_json` TEXT NOT NULL,
    `state` VARCHAR(16) NOT NULL,
    `updated_at` DATETIME NOT NULL,
    PRIMARY KEY (`instance`, `schema`, `table`, `chunk_id`)
)";

const CREATE_SUMMARY_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS `sync_diff`.`summary` (
    `instance` VARCHAR(64) NOT NULL,
    `schema` VARCHAR(64) NOT NULL,
    `table` VARCHAR(64) NOT NULL,
    `config_hash` VARCHAR(32) NOT NULL,
    `total_chunks` BIGINT UNSIGNED NOT NULL,
    `checked_chunks` BIGINT UNSIGNED NOT NULL,
    `state` VARCHAR(16) NOT NULL,
    `updated_at` DATETIME NOT NULL,
    PRIMARY KEY (`instance`, `schema`, `table`)
)";

/// A [`CheckpointStore`] persisting into the target MySQL-family store.
#[derive(Debug)]
pub struct MysqlCheckpointStore {
    pool: MySqlPool,
}

impl MysqlCheckpointStore {
    /// Create a store writing through `pool`, which should point at the
    /// target endpoint.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for MysqlCheckpointStore {
    async fn initialize(&self) -> Result<()> {
        for sql in [CREATE_SCHEMA, CREATE_CHUNK_TABLE, CREATE_SUMMARY_TABLE] {
            sqlx::query(sql).execute(&self.pool).await.context(QuerySnafu)?;
        }
        Ok(())
    }

    async fn load_chunks(
        &self,
        target: &TableRef,
        fingerprint: &str,
        key_columns: &[&Column],
    ) -> Result<Vec<ChunkRange>> {
        let summary = sqlx::query(
            "SELECT `config_hash` FROM `sync_diff`.`summary` \
             WHERE `instance` = ? AND `schema` = ? AND `table` = ?",
        )
        .bind(&target.instance_id)
        .bind(&target.schema)
        .bind(&target.table)
        .fetch_optional(&self.pool)
        .await
        .context(QuerySnafu)?;

        let matches = match summary {
            Some(row) => {
                let hash: String = row.try_get(0).context(QuerySnafu)?;
                hash == fingerprint
            }
            None => false,
        };
        if !matches {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT `chunk_id`, `args_json`, `state` FROM `sync_diff`.`chunk` \
             WHERE `instance` = ? AND `schema` = ? AND `table` = ? \
             ORDER BY `chunk_id`",
        )
        .bind(&target.instance_id)
        .bind(&target.schema)
        .bind(&target.table)
        .fetch_all(&self.pool)
        .await
        .context(QuerySnafu)?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: u64 = row.try_get(0).context(QuerySnafu)?;
            let args_json: String = row.try_get(1).context(QuerySnafu)?;
            let state: String = row.try_get(2).context(QuerySnafu)?;

            let bounds: RangeBounds =
                serde_json::from_str(&args_json).context(MalformedBoundsSnafu)?;
            let state: ChunkState = state.parse().context(MalformedStateSnafu)?;
            let (where_clause, args) = ChunkRange::render(&bounds, key_columns);
            chunks.push(ChunkRange {
                id,
                bounds,
                where_clause,
                args,
                state,
            });
        }
        debug!(table = %target, chunks = chunks.len(), "loaded checkpointed chunks");
        Ok(chunks)
    }

    async fn clean(&self, target: &TableRef) -> Result<()> {
        for table in ["chunk", "summary"] {
            let sql = format!(
                "DELETE FROM `sync_diff`.`{}` \
                 WHERE `instance` = ? AND `schema` = ? AND `table` = ?",
                table
            );
            sqlx::query(&sql)
                .bind(&target.instance_id)
                .bind(&target.schema)
                .bind(&target.table)
                .execute(&self.pool)
                .await
                .context(QuerySnafu)?;
        }
        Ok(())
    }

    async fn init_summary(&self, target: &TableRef, fingerprint: &str) -> Result<()> {
        sqlx::query(
            "REPLACE INTO `sync_diff`.`summary` \
             (`instance`, `schema`, `table`, `config_hash`, `total_chunks`, \
              `checked_chunks`, `state`, `updated_at`) \
             VALUES (?, ?, ?, ?, 0, 0, 'checking', NOW())",
        )
        .bind(&target.instance_id)
        .bind(&target.schema)
        .bind(&target.table)
        .bind(fingerprint)
        .execute(&self.pool)
        .await
        .context(QuerySnafu)?;
        Ok(())
    }

    async fn save_chunk(&self, target: &TableRef, chunk: &ChunkRange) -> Result<()> {
        let args_json = serde_json::to_string(&chunk.bounds).context(MalformedBoundsSnafu)?;
        sqlx::query(
            "REPLACE INTO `sync_diff`.`chunk` \
             (`instance`, `schema`, `table`, `chunk_id`, `where_text`, \
              `args_json`, `state`, `updated_at`) \
             VALUES (?, ?, ?, ?, ?, ?, ?, NOW())",
        )
        .bind(&target.instance_id)
        .bind(&target.schema)
        .bind(&target.table)
        .bind(chunk.id)
        .bind(&chunk.where_clause)
        .bind(args_json)
        .bind(chunk.state.to_string())
        .execute(&self.pool)
        .await
        .context(QuerySnafu)?;
        Ok(())
    }

    async fn update_summary(&self, target: &TableRef) -> Result<()> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COUNT(IF(`state` IN ('success', 'failed', 'error', 'ignore'), 1, NULL)) AS checked, \
                    COUNT(IF(`state` IN ('failed', 'error'), 1, NULL)) AS unequal \
             FROM `sync_diff`.`chunk` \
             WHERE `instance` = ? AND `schema` = ? AND `table` = ?",
        )
        .bind(&target.instance_id)
        .bind(&target.schema)
        .bind(&target.table)
        .fetch_one(&self.pool)
        .await
        .context(QuerySnafu)?;

        let total: i64 = row.try_get(0).context(QuerySnafu)?;
        let checked: i64 = row.try_get(1).context(QuerySnafu)?;
        let unequal: i64 = row.try_get(2).context(QuerySnafu)?;
        let state = summary_state(total as u64, checked as u64, unequal as u64);

        sqlx::query(
            "UPDATE `sync_diff`.`summary` \
             SET `total_chunks` = ?, `checked_chunks` = ?, `state` = ?, `updated_at` = NOW() \
             WHERE `instance` = ? AND `schema` = ? AND `table` = ?",
        )
        .bind(total.max(0) as u64)
        .bind(checked.max(0) as u64)
        .bind(state)
        .bind(&target.instance_id)
        .bind(&target.schema)
        .bind(&target.table)
        .execute(&self.pool)
        .await
        .context(QuerySnafu)?;
        Ok(())
    }
}
