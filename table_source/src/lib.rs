//! The query channel to a physical table: structural metadata, ordered
//! range scans and range checksums, with a MySQL-family implementation and
//! an in-memory implementation for tests.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod interface;
pub mod mem;
pub mod mysql;

pub use interface::{
    ScanRequest, SourceError, SourceErrorKind, SourceResult, TableMeta, TableSource,
};
