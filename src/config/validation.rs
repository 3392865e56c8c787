//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (delays > 0, ports valid, thresholds plausible)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before a client is constructed

use thiserror::Error;

use crate::config::schema::ClientConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one server must be specified")]
    NoServers,

    #[error("server #{index} has an empty host")]
    EmptyHost { index: usize },

    #[error("server #{index} ({host}) has port 0")]
    ZeroPort { index: usize, host: String },

    #[error("reconnect.base_delay_ms must be greater than 0")]
    ZeroReconnectDelay,

    #[error("reconnect.max_delay_ms ({max}) is lower than reconnect.base_delay_ms ({base})")]
    MaxDelayBelowBase { base: u64, max: u64 },

    #[error("reconnect.max_connect_attempts must be greater than 0 when set")]
    ZeroConnectAttempts,

    #[error("response.error_status_threshold {0} is not a valid status code")]
    InvalidStatusThreshold(u16),

    #[error("transport.max_frame_bytes must be greater than 0")]
    ZeroFrameSize,

    #[error("tls.ca_path must not be empty")]
    EmptyCaPath,
}

/// Check `config` for semantic problems.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.servers.is_empty() {
        errors.push(ValidationError::NoServers);
    }

    for (index, server) in config.servers.iter().enumerate() {
        if server.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost { index });
        }
        if server.port == 0 {
            errors.push(ValidationError::ZeroPort {
                index,
                host: server.host.clone(),
            });
        }
    }

    let reconnect = &config.reconnect;
    if reconnect.base_delay_ms == 0 {
        errors.push(ValidationError::ZeroReconnectDelay);
    }
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        errors.push(ValidationError::MaxDelayBelowBase {
            base: reconnect.base_delay_ms,
            max: reconnect.max_delay_ms,
        });
    }
    if reconnect.max_connect_attempts == Some(0) {
        errors.push(ValidationError::ZeroConnectAttempts);
    }

    let threshold = config.response.error_status_threshold;
    if !(100..=999).contains(&threshold) {
        errors.push(ValidationError::InvalidStatusThreshold(threshold));
    }

    if config.transport.max_frame_bytes == 0 {
        errors.push(ValidationError::ZeroFrameSize);
    }

    if let Some(tls) = &config.tls {
        if tls.ca_path.trim().is_empty() {
            errors.push(ValidationError::EmptyCaPath);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
