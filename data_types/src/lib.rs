//! Shared data types for the table verification engine: table addressing,
//! resolved schemas, scanned row values, order-key comparison and the chunk
//! model that the checkpoint store persists.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod chunk;
mod row;
mod table;

pub use chunk::{ChunkRange, ChunkState, ChunkStateError, KeyBound, RangeBounds};
pub use row::{key_tuple, rows_equal, ColumnValue, KeyPart, KeyTuple, RowError, RowRecord};
pub use table::{Column, ColumnKind, TableRef, TableSchema};
