//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Take the filter from RUST_LOG, falling back to configuration
//!
//! # Design Decisions
//! - The proxy logs to stdout
//! - The offline replay tool logs to stderr; its stdout carries the response

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Log to stdout.
pub fn init(default_filter: &str) {
    init_with_writer(default_filter, std::io::stdout);
}

/// Log to stderr.
pub fn init_stderr(default_filter: &str) {
    init_with_writer(default_filter, std::io::stderr);
}

fn init_with_writer<W>(default_filter: &str, writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();
}
