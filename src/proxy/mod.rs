//! Transparent record/replay proxy.
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → server.rs (track, span, spawn)
//!     → DestinationResolver (original destination)
//!     → net::transport::open (both legs, TLS on port 443)
//!     → pipeline.rs (one cooperative dispatcher per connection)
//!     ↔ Archive (shared across connections)
//! ```
//!
//! # Design Decisions
//! - A failing connection is logged and torn down; the accept loop never
//!   sees its error
//! - Waiting on another connection's in-flight request happens on the
//!   blocking pool, never on a runtime worker

pub mod pipeline;
pub mod server;

use std::io;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::http::ParseError;
use crate::net::TransportError;

pub use pipeline::{ConnectionPipeline, PipelineSettings};
pub use server::ProxyServer;

/// Everything that can end a proxied connection early.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("socket I/O: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("original destination lookup: {0}")]
    Destination(#[source] io::Error),

    #[error("protocol: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("archive wait task failed: {0}")]
    Wait(#[from] tokio::task::JoinError),
}

impl ProxyError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Io(_) => "io",
            ProxyError::Transport(TransportError::TlsUnavailable) => "tls_unavailable",
            ProxyError::Transport(TransportError::ConnectTimeout { .. }) => "connect_timeout",
            ProxyError::Transport(TransportError::Connect { .. }) => "connect",
            ProxyError::Transport(TransportError::HandshakeTimeout { .. }) => "handshake_timeout",
            ProxyError::Transport(_) => "tls",
            ProxyError::Destination(_) => "destination",
            ProxyError::Parse(_) => "parse",
            ProxyError::Archive(_) => "archive",
            ProxyError::Wait(_) => "wait",
        }
    }
}
