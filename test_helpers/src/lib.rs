//! Helpers shared by the tests of the other workspace crates.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use observability_deps::tracing;
use std::sync::Once;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the RUST_LOG environment variable is set.
/// Does nothing otherwise.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Enables debug logging regardless of the value of RUST_LOG
/// environment variable. If RUST_LOG isn't specified, defaults to
/// "debug".
pub fn start_logging() {
    // ensure the global has been initialized
    LOG_SETUP.call_once(|| {
        // honor any existing RUST_LOG level
        if std::env::var("RUST_LOG").is_err() {
            std::env::set_var("RUST_LOG", "debug");
        }

        // send log events to tracing
        LogTracer::init().expect("can not install log tracer");

        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("can not set global tracing subscriber");
    })
}

/// Assert that `needle` is contained in `haystack`, rendering both when it
/// is not.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack_value: String = $haystack.to_string();
        let needle_value: String = $needle.to_string();
        assert!(
            haystack_value.contains(&needle_value),
            "Can not find \"{}\" in \"{}\"",
            needle_value,
            haystack_value
        );
    };
}

/// Assert that `needle` is NOT contained in `haystack`.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack_value: String = $haystack.to_string();
        let needle_value: String = $needle.to_string();
        assert!(
            !haystack_value.contains(&needle_value),
            "Found unexpected \"{}\" in \"{}\"",
            needle_value,
            haystack_value
        );
    };
}
