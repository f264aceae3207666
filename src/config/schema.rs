//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy
//! and the offline replay tool. All types derive Serde traits for
//! deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::matching::HeaderAllowList;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-connection buffer sizes.
    pub buffers: BufferConfig,

    /// Certificates for intercepting port-443 connections.
    pub tls: Option<TlsConfig>,

    /// Live archive settings.
    pub archive: ArchiveConfig,

    /// Offline replay settings.
    pub replay: ReplayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// A connection with no readiness event for this long is closed.
    pub idle_secs: u64,

    /// Longest wait for an identical in-flight request to be answered.
    pub pending_wait_secs: u64,

    /// Grace period for open connections at shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            idle_secs: 60,
            pending_wait_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

/// Buffer sizes in bytes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Size of a single socket read.
    pub read_chunk_bytes: usize,

    /// Capacity of the outbound buffer towards the client.
    pub outbound_bytes: usize,

    /// Largest accepted message head.
    pub max_head_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: 16 * 1024,
            outbound_bytes: 1024 * 1024,
            max_head_bytes: 64 * 1024,
        }
    }
}

/// TLS configuration for intercepted HTTPS.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Certificate chain presented to clients (PEM).
    pub cert_path: String,

    /// Private key for `cert_path` (PEM).
    pub key_path: String,

    /// Extra trust anchors for origin servers (PEM).
    #[serde(default)]
    pub origin_ca_path: Option<String>,
}

/// Live archive configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Persist completed exchanges here, one file each.
    pub record_dir: Option<String>,
}

/// Offline replay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Directory of archived exchanges to answer from.
    pub archive_dir: String,

    /// Headers compared by the fuzzy matcher.
    pub match_headers: HeaderAllowList,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            archive_dir: "./archive".to_string(),
            match_headers: HeaderAllowList::default(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is unset.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "replay_proxy=info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
