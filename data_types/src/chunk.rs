//! The chunk model: a key-range slice of a table, the unit of verification
//! and checkpointing.

use crate::row::{key_part, KeyTuple, RowError};
use crate::{Column, ColumnValue};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Verification state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Not dispatched yet.
    New,
    /// Owned by a worker, verification in flight.
    Checking,
    /// Verified equal.
    Success,
    /// Verified unequal; corrective DML was emitted unless checksum-only
    /// mode suppressed it.
    Failed,
    /// Verification itself errored; counted as not-equal.
    Error,
    /// Excluded by sampling; never touched again.
    Ignore,
}

impl ChunkState {
    /// Terminal states are never re-verified on resume.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Error | Self::Ignore)
    }
}

impl Display for ChunkState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Ignore => "ignore",
        };
        f.write_str(s)
    }
}

/// Error parsing a persisted chunk state.
#[derive(Debug, Snafu)]
#[snafu(display("unknown chunk state `{}`", state))]
pub struct ChunkStateError {
    state: String,
}

impl FromStr for ChunkState {
    type Err = ChunkStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "checking" => Ok(Self::Checking),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            "ignore" => Ok(Self::Ignore),
            other => Err(ChunkStateError {
                state: other.to_string(),
            }),
        }
    }
}

/// One side of a key-space slice: boundary values for a prefix of the
/// order-key columns, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBound {
    /// Boundary values, textual form, one per order-key column prefix.
    pub values: Vec<String>,
    /// Whether a key equal to the boundary belongs to the chunk.
    pub inclusive: bool,
}

impl KeyBound {
    /// An exclusive bound.
    pub fn excluding(values: Vec<String>) -> Self {
        Self {
            values,
            inclusive: false,
        }
    }

    /// An inclusive bound.
    pub fn including(values: Vec<String>) -> Self {
        Self {
            values,
            inclusive: true,
        }
    }

    fn tuple(&self, key_columns: &[&Column]) -> Result<KeyTuple, RowError> {
        self.values
            .iter()
            .zip(key_columns)
            .map(|(value, col)| key_part(col, &ColumnValue::new(value.as_bytes())))
            .collect()
    }
}

/// The structured key-space slice of a chunk, from which the SQL predicate
/// is rendered. `None` on a side means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBounds {
    /// Lower boundary; rows strictly above it (or equal, when inclusive)
    /// belong to the chunk.
    pub lower: Option<KeyBound>,
    /// Upper boundary; rows strictly below it (or equal, when inclusive)
    /// belong to the chunk.
    pub upper: Option<KeyBound>,
}

impl RangeBounds {
    /// The unbounded range covering the whole table.
    pub fn all() -> Self {
        Self::default()
    }

    /// Does `key` fall inside this range?
    ///
    /// Boundary tuples cover a prefix of the order key; the comparison is
    /// lexicographic over that prefix, matching the rendered SQL.
    pub fn contains(&self, key: &KeyTuple, key_columns: &[&Column]) -> Result<bool, RowError> {
        if let Some(lower) = &self.lower {
            let bound = lower.tuple(key_columns)?;
            let prefix = &key[..bound.len().min(key.len())];
            let above = if lower.inclusive {
                prefix >= &bound[..]
            } else {
                prefix > &bound[..]
            };
            if !above {
                return Ok(false);
            }
        }
        if let Some(upper) = &self.upper {
            let bound = upper.tuple(key_columns)?;
            let prefix = &key[..bound.len().min(key.len())];
            let below = if upper.inclusive {
                prefix <= &bound[..]
            } else {
                prefix < &bound[..]
            };
            if !below {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy)]
enum BoundSide {
    Lower,
    Upper,
}

/// Render one bound into the expanded composite-key comparison
/// `(a > ?) OR (a = ? AND b > ?) ...` that range scans can drive an index
/// with.
fn render_bound(
    key_columns: &[&Column],
    bound: &KeyBound,
    side: BoundSide,
) -> (String, Vec<String>) {
    let n = bound.values.len().min(key_columns.len());
    let mut clauses = Vec::with_capacity(n);
    let mut args = Vec::new();

    for i in 0..n {
        let mut parts = Vec::with_capacity(i + 1);
        for col in key_columns.iter().take(i) {
            parts.push(format!("`{}` = ?", col.name));
        }
        let last = i == n - 1;
        let op = match (side, bound.inclusive && last) {
            (BoundSide::Lower, false) => ">",
            (BoundSide::Lower, true) => ">=",
            (BoundSide::Upper, false) => "<",
            (BoundSide::Upper, true) => "<=",
        };
        parts.push(format!("`{}` {} ?", key_columns[i].name, op));
        clauses.push(format!("({})", parts.join(" AND ")));
        args.extend(bound.values.iter().take(i + 1).cloned());
    }

    let clause = if clauses.len() == 1 {
        clauses.pop().unwrap_or_default()
    } else {
        format!("({})", clauses.join(" OR "))
    };
    (clause, args)
}

/// An inclusive key-space slice of a table with its verification state.
///
/// `where_clause`/`args` are rendered from `bounds` at construction and are
/// what the SQL layer binds; the in-memory layer filters on `bounds`
/// directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRange {
    /// Chunk id, stable within a run; dense from 0 in splitter output.
    pub id: u64,
    /// Structured key-space slice.
    pub bounds: RangeBounds,
    /// Rendered SQL predicate over the order-key columns.
    pub where_clause: String,
    /// Bound arguments of `where_clause`, in placeholder order.
    pub args: Vec<String>,
    /// Verification state.
    pub state: ChunkState,
}

impl ChunkRange {
    /// Create a fresh chunk in state [`ChunkState::New`], rendering the SQL
    /// predicate from `bounds`.
    pub fn new(id: u64, bounds: RangeBounds, key_columns: &[&Column]) -> Self {
        let (where_clause, args) = Self::render(&bounds, key_columns);
        Self {
            id,
            bounds,
            where_clause,
            args,
            state: ChunkState::New,
        }
    }

    /// Re-render the SQL predicate of `bounds`, e.g. after loading the
    /// structured form from the checkpoint store.
    pub fn render(bounds: &RangeBounds, key_columns: &[&Column]) -> (String, Vec<String>) {
        let lower = bounds
            .lower
            .as_ref()
            .map(|b| render_bound(key_columns, b, BoundSide::Lower));
        let upper = bounds
            .upper
            .as_ref()
            .map(|b| render_bound(key_columns, b, BoundSide::Upper));

        match (lower, upper) {
            (None, None) => ("TRUE".to_string(), Vec::new()),
            (Some((clause, args)), None) | (None, Some((clause, args))) => (clause, args),
            (Some((lc, mut la)), Some((uc, ua))) => {
                la.extend(ua);
                (format!("({} AND {})", lc, uc), la)
            }
        }
    }

    /// Whether this chunk reached a state that resume never re-verifies.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
