//! Transparent record/replay HTTP proxy.
//!
//! The proxy answers duplicate requests from a shared in-memory archive;
//! `replay` answers a single request offline from recorded exchanges.

// Core subsystems
pub mod archive;
pub mod config;
pub mod http;
pub mod matching;
pub mod net;
pub mod proxy;
pub mod replay;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use archive::Archive;
pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use proxy::ProxyServer;
