//! Traits and request types shared by all table source implementations.

use async_trait::async_trait;
use data_types::{Column, RangeBounds, RowRecord};
use std::fmt::{Debug, Display, Formatter};

/// Generic boxed error type that is used in this crate.
///
/// The dynamic boxing makes it easier to deal with errors from different
/// implementations; the kind preserves the engine-relevant classification.
#[derive(Debug)]
pub struct SourceError {
    inner: Box<dyn std::error::Error + Sync + Send>,
    kind: SourceErrorKind,
}

impl SourceError {
    /// Wrap an error under an explicit kind.
    pub fn new(
        kind: SourceErrorKind,
        e: impl Into<Box<dyn std::error::Error + Sync + Send>>,
    ) -> Self {
        Self {
            inner: e.into(),
            kind,
        }
    }

    /// This operation failed on the wire or in the server.
    pub fn io(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(SourceErrorKind::Io, e)
    }

    /// The scanned data can not be interpreted.
    pub fn invalid_data(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(SourceErrorKind::InvalidData, e)
    }

    /// The implementation does not support the requested operation.
    pub fn unsupported(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(SourceErrorKind::Unsupported, e)
    }

    /// Returns the kind of error this was.
    pub fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    /// Returns the inner error.
    pub fn inner(&self) -> &dyn std::error::Error {
        self.inner.as_ref()
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceError({:?}): {}", self.kind, self.inner)
    }
}

impl std::error::Error for SourceError {}

impl From<sqlx::Error> for SourceError {
    fn from(e: sqlx::Error) -> Self {
        Self {
            inner: Box::new(e),
            kind: SourceErrorKind::Io,
        }
    }
}

impl From<data_types::RowError> for SourceError {
    fn from(e: data_types::RowError) -> Self {
        Self {
            inner: Box::new(e),
            kind: SourceErrorKind::InvalidData,
        }
    }
}

/// Classification of a [`SourceError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// This operation failed for an unknown reason.
    Unknown,
    /// Transient wire/server failure; the chunk is recorded as `error` and
    /// the run continues.
    Io,
    /// Scanned data can not be interpreted (e.g. unparsable key values).
    InvalidData,
    /// The implementation does not support the requested operation.
    Unsupported,
}

/// Convenient result alias.
pub type SourceResult<T, E = SourceError> = Result<T, E>;

/// Raw structural metadata of a table, before the engine chooses the
/// order key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// Columns in declared order.
    pub columns: Vec<Column>,
    /// Column names of the preferred unique key (primary key first
    /// preference), in index order, if the table has one.
    pub unique_key: Option<Vec<String>>,
}

/// One ordered range scan or range checksum over a single table.
///
/// The chunk predicate travels in both forms: rendered SQL with bound args
/// for the MySQL implementation, structured bounds for the in-memory one.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Schema (database) name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Columns to fetch, in declared order.
    pub projection: Vec<String>,
    /// Rendered chunk predicate.
    pub where_clause: String,
    /// Bound arguments of `where_clause`.
    pub args: Vec<String>,
    /// Structured form of the chunk predicate.
    pub bounds: RangeBounds,
    /// User range predicate, ANDed with the chunk predicate. `TRUE` when
    /// absent.
    pub range: String,
    /// Order-key column names for `ORDER BY`, in key order.
    pub order_by: Vec<String>,
    /// Optional collation applied to the ordering.
    pub collation: Option<String>,
    /// Include a read-only cache-bypass hint marker in the scan.
    pub read_hint: bool,
}

/// A handle to one physical endpoint, able to serve the three queries the
/// engine needs: structural metadata, ordered range scans and range
/// checksums.
#[async_trait]
pub trait TableSource: Send + Sync + Debug + 'static {
    /// Unique identifier of this endpoint.
    fn instance_id(&self) -> &str;

    /// Fetch the structural metadata of one table.
    async fn table_meta(&self, schema: &str, table: &str) -> SourceResult<TableMeta>;

    /// Scan the rows selected by `req`, in order-key order.
    async fn scan_rows(&self, req: &ScanRequest) -> SourceResult<Vec<RowRecord>>;

    /// CRC-style checksum of the rows selected by `req`.
    ///
    /// The checksum is an XOR fold over per-row CRCs, so checksums of
    /// disjoint ranges compose by XOR.
    async fn range_checksum(&self, req: &ScanRequest) -> SourceResult<u64>;
}
