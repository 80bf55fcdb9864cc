//! This crate exists to add a level of indirection between the observability
//! dependencies and the rest of the workspace, so that the tracing version in
//! use is pinned in exactly one place.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub use tracing;
