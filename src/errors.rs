//! Gateway error types.
//!
//! One taxonomy covers every layer: transports, sessions, the connection
//! registry, namespace dispatch and the API wrappers. Variants carry the
//! context needed for structured log entries; logging itself is the caller's
//! responsibility.

use thiserror::Error;

use crate::federation::registry::ConnectionStatus;

/// Errors that can occur during gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A required field is missing or invalid for a transport, backend,
    /// wrapper or endpoint.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// The transport could not be established, the handshake failed, or the
    /// channel broke while a request was in flight.
    #[error("connection error for '{name}': {reason}")]
    ConnectionError { name: String, reason: String },

    /// Unknown backend, wrapper, tool, prompt or endpoint.
    #[error("{kind} not found: '{name}'")]
    NotFound { kind: &'static str, name: String },

    /// The operation needs a connected backend.
    #[error("backend '{name}' is not connected (status: {status})")]
    InvalidState {
        name: String,
        status: ConnectionStatus,
    },

    /// The backend call itself failed after a successful connection.
    #[error("upstream error from '{name}'{}: {message}", .code.map(|c| format!(" [{c}]")).unwrap_or_default())]
    UpstreamError {
        name: String,
        code: Option<i32>,
        message: String,
    },

    /// A namespaced identifier or resource URI could not be parsed.
    #[error("malformed identifier '{name}': {reason}")]
    MalformedName { name: String, reason: String },

    /// An operation did not complete within its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl GatewayError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    pub(crate) fn connection(name: &str, reason: impl Into<String>) -> Self {
        Self::ConnectionError {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: &str) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn malformed(name: &str, reason: impl Into<String>) -> Self {
        Self::MalformedName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error was raised before any dispatch was attempted
    /// because the identifier itself was unusable.
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::MalformedName { .. })
    }

    /// Whether the referenced entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
