//! Client error taxonomy.

use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::pool::NoAvailableConnection;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Bad construction input. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Bring-up failed: no configured server could be reached.
    #[error("no servers available")]
    NoServersAvailable,

    /// The ring is momentarily empty or has no writable member. Retryable.
    #[error("no available connection")]
    NoAvailableConnection,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The remote end processed the request and reported failure.
    #[error("server responded with status {status}")]
    Application { status: u16, body: String },

    #[error("malformed response body (status {status}): {source}")]
    MalformedResponse {
        status: u16,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("client is closed")]
    ClientClosed,
}

impl ClientError {
    /// Whether the same request may succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::NoAvailableConnection | ClientError::Transport(_))
    }
}

impl From<NoAvailableConnection> for ClientError {
    fn from(_: NoAvailableConnection) -> Self {
        ClientError::NoAvailableConnection
    }
}

impl From<Vec<ValidationError>> for ClientError {
    fn from(errors: Vec<ValidationError>) -> Self {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        ClientError::Configuration(messages.join("; "))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
