//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffer sizes coherent)
//! - Check addresses parse and TLS settings are complete
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    BadAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("buffers.outbound_bytes must be at least buffers.read_chunk_bytes")]
    OutboundTooSmall,

    #[error("tls: {0} is empty")]
    MissingTlsPath(&'static str),

    #[error("replay.match_headers: {0:?} is not a valid header name")]
    BadHeaderName(String),
}

fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let addresses = [
        ("listener.bind_address", &config.listener.bind_address),
        ("observability.metrics_address", &config.observability.metrics_address),
    ];
    for (field, value) in addresses {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BadAddress {
                field,
                value: value.clone(),
            });
        }
    }

    let positive = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
        ("timeouts.pending_wait_secs", config.timeouts.pending_wait_secs),
        ("buffers.read_chunk_bytes", config.buffers.read_chunk_bytes as u64),
        ("buffers.max_head_bytes", config.buffers.max_head_bytes as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.buffers.outbound_bytes < config.buffers.read_chunk_bytes {
        errors.push(ValidationError::OutboundTooSmall);
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::MissingTlsPath("cert_path"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::MissingTlsPath("key_path"));
        }
    }

    for name in config.replay.match_headers.names() {
        if !is_token(name) {
            errors.push(ValidationError::BadHeaderName(name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
