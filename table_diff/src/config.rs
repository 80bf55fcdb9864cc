//! Run configuration, order-key resolution and the run fingerprint.

use data_types::{Column, ColumnKind, TableRef, TableSchema};
use md5::{Digest, Md5};
use serde::Serialize;
use snafu::Snafu;
use table_source::TableMeta;

/// Name of the synthetic row-id column appended when [`DiffConfig::use_rowid`]
/// is set and the table has no unique key of its own.
pub const ROWID_COLUMN: &str = "_rowid";

/// Errors resolving a configuration against a table's metadata.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[snafu(display("ordering field `{}` does not exist in the table", field))]
    UnknownField { field: String },

    #[snafu(display("order-key column `{}` can not be ignored", column))]
    IgnoredKeyColumn { column: String },

    #[snafu(display(
        "no usable order key: the table has no unique key and row-id usage is disabled"
    ))]
    NoOrderKey,
}

/// User-visible configuration of one verification run.
///
/// Fields that shape the chunk lineage are folded into the run fingerprint;
/// changing any of them invalidates previously checkpointed chunks.
#[derive(Debug, Clone)]
pub struct DiffConfig {
    /// Ordered hint for the order-key columns. Empty means "use the table's
    /// unique key".
    pub fields: Vec<String>,
    /// User range predicate ANDed into every scan. `TRUE` checks the whole
    /// table.
    pub range: String,
    /// Target number of rows per chunk, coerced to at least 1.
    pub chunk_size: usize,
    /// Percentage of chunks to verify, 0–100. Applied on first-pass chunks
    /// only, never on resumed ones.
    pub sample: u8,
    /// Number of verification workers, coerced to at least 1.
    pub check_thread_count: usize,
    /// Fall back to the synthetic row-id column when the table has no
    /// unique key.
    pub use_rowid: bool,
    /// Try the cheap checksum comparison before materializing rows.
    pub use_checksum: bool,
    /// Report a mismatching chunk as failed on checksum inequality alone,
    /// without materializing rows or emitting DML.
    pub only_use_checksum: bool,
    /// Collation applied to the scan ordering.
    pub collation: Option<String>,
    /// Skip the structural equality pre-check. The order-key invariant is
    /// still enforced.
    pub ignore_struct_check: bool,
    /// Skip the data phase entirely.
    pub ignore_data_check: bool,
    /// Load previously checkpointed chunks when the fingerprint matches.
    pub use_checkpoint: bool,
    /// Columns excluded from projection and comparison.
    pub ignore_columns: Vec<String>,
    /// Columns stripped from the resolved schema altogether.
    pub remove_columns: Vec<String>,
    /// Optional `schema.table` whose statistics a splitter may consult;
    /// splitters fall back to random splitting when absent.
    pub stats_source: Option<String>,
    /// Seed for the sampling RNG; injected by tests for determinism.
    pub sample_seed: Option<u64>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            range: "TRUE".to_string(),
            chunk_size: 100,
            sample: 100,
            check_thread_count: 4,
            use_rowid: false,
            use_checksum: true,
            only_use_checksum: false,
            collation: None,
            ignore_struct_check: false,
            ignore_data_check: false,
            use_checkpoint: true,
            ignore_columns: Vec::new(),
            remove_columns: Vec::new(),
            stats_source: None,
            sample_seed: None,
        }
    }
}

/// Canonical fingerprint input; the field order is part of the format.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    sources: Vec<String>,
    target: String,
    fields: &'a [String],
    range: &'a str,
    chunk_size: usize,
    sample: u8,
    use_rowid: bool,
    collation: Option<&'a str>,
    use_checkpoint: bool,
}

impl DiffConfig {
    /// Apply the documented coercions: `chunk_size` and
    /// `check_thread_count` at least 1, `sample` at most 100.
    pub fn sanitized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.check_thread_count = self.check_thread_count.max(1);
        self.sample = self.sample.min(100);
        self
    }

    /// Whether any checksum comparison runs at all.
    pub(crate) fn checksum_enabled(&self) -> bool {
        self.use_checksum || self.only_use_checksum
    }

    /// MD5 fingerprint of the chunk-lineage-shaping configuration. Two runs
    /// with equal fingerprints share a checkpoint lineage.
    pub fn fingerprint(&self, target: &TableRef, sources: &[TableRef]) -> String {
        let mut source_names: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        source_names.sort();
        let input = FingerprintInput {
            sources: source_names,
            target: target.to_string(),
            fields: &self.fields,
            range: &self.range,
            chunk_size: self.chunk_size,
            sample: self.sample,
            use_rowid: self.use_rowid,
            collation: self.collation.as_deref(),
            use_checkpoint: self.use_checkpoint,
        };
        let canonical =
            serde_json::to_vec(&input).expect("fingerprint input is always serializable");
        let digest = Md5::new().chain_update(&canonical).finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Resolve a table's raw metadata into the schema this run operates on:
    /// strip `remove_columns`, choose the order key, validate
    /// `ignore_columns` against it.
    pub fn resolve_schema(&self, meta: &TableMeta) -> Result<TableSchema, ConfigError> {
        let mut columns: Vec<Column> = meta
            .columns
            .iter()
            .filter(|c| !self.remove_columns.contains(&c.name))
            .cloned()
            .collect();

        let order_key = if !self.fields.is_empty() {
            for field in &self.fields {
                if !columns.iter().any(|c| c.name == *field) {
                    return Err(ConfigError::UnknownField {
                        field: field.clone(),
                    });
                }
            }
            self.fields.clone()
        } else if let Some(key) = meta
            .unique_key
            .as_ref()
            .filter(|key| key.iter().all(|k| columns.iter().any(|c| c.name == *k)))
        {
            key.clone()
        } else if self.use_rowid {
            columns.push(Column::new(ROWID_COLUMN, ColumnKind::Numeric, false));
            vec![ROWID_COLUMN.to_string()]
        } else {
            return Err(ConfigError::NoOrderKey);
        };

        for column in &order_key {
            if self.ignore_columns.contains(column) {
                return Err(ConfigError::IgnoredKeyColumn {
                    column: column.clone(),
                });
            }
        }

        Ok(TableSchema { columns, order_key })
    }

    /// The columns a scan projects and the diff compares: the resolved
    /// columns minus `ignore_columns`.
    pub(crate) fn projected_columns<'a>(&self, schema: &'a TableSchema) -> Vec<&'a Column> {
        schema
            .columns
            .iter()
            .filter(|c| !self.ignore_columns.contains(&c.name))
            .collect()
    }
}
