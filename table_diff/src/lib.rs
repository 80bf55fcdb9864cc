//! Chunked verification of one target table against the union of N source
//! tables, emitting the REPLACE/DELETE statements that would bring the
//! target in line.
//!
//! A run splits the key space into chunks, fans the chunks out over a small
//! worker pool and checks each one with a cheap checksum comparison first,
//! falling back to a row-level k-way merge diff on mismatch. Per-chunk
//! progress is persisted under a configuration fingerprint, so an
//! interrupted run resumes by replaying only non-terminal chunks.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod checker;
mod checksum;
pub mod config;
mod dml;
mod fetch;
mod merge;
pub mod run;
pub mod sink;
pub mod splitter;

pub use config::{ConfigError, DiffConfig};
pub use run::{CheckResult, Error, TableDiff, TableInstance};
pub use sink::{PatchWriter, VecPatchWriter};
pub use splitter::{ChunkSplitter, WholeTableSplitter};
