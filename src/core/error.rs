//! # Error Taxonomy
//!
//! Typed failures for the transport and the generative backend, kept
//! separate so callers can match on what actually went wrong. Rate limit
//! denial is deliberately not represented here: it is an outcome.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.3.0

use std::time::Duration;

use thiserror::Error;

/// Failures on the chat server connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A send was attempted outside the `Connected` state.
    #[error("not connected to the chat server")]
    NotConnected,

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The session or its channels are gone.
    #[error("connection closed")]
    Closed,

    /// The consecutive reconnect budget is spent; the connection is fatal.
    #[error("gave up after {0} failed reconnect attempts")]
    ReconnectExhausted(u32),
}

/// Failures from the generative backend. One request, one failure; the
/// backend never retries on its own.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("model {0:?} not available on the backend")]
    ModelNotFound(String),

    /// The service answered, but not with anything usable.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Stable short name for log lines and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Unreachable(_) => "unreachable",
            BackendError::Timeout(_) => "timeout",
            BackendError::ModelNotFound(_) => "model_not_found",
            BackendError::Malformed(_) => "malformed",
        }
    }
}

/// A configuration value that cannot be run with. Fatal at startup.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
