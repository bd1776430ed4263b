//! Error types for the tool broker.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type used throughout the broker.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by the broker.
///
/// Nothing here is retried by the broker itself; the caller decides whether a
/// fresh `call` (and therefore a fresh spawn) is worth attempting.
///
/// The enum is `Clone` so a single spawn outcome can be handed to every caller
/// that was waiting on the same in-flight spawn.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The integration name is not in the catalog.
    #[error("Unknown server: {name}")]
    UnknownServer { name: String },

    /// The worker process could not be started.
    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// `initialize` or `tools/list` failed; the child has been killed.
    #[error("Handshake with worker '{name}' failed: {reason}")]
    Handshake { name: String, reason: String },

    /// A single request exceeded its deadline. The worker keeps running.
    #[error("Request timeout: {method} (after {timeout:?})")]
    RequestTimeout { method: String, timeout: Duration },

    /// The worker exited while the request was outstanding.
    #[error("Worker '{name}' crashed")]
    WorkerCrashed { name: String },

    /// The worker answered with a JSON-RPC error object.
    #[error("Worker returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The broker has been shut down.
    #[error("Broker is shutting down")]
    ShuttingDown,

    /// Invalid configuration or catalog.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error outside of spawning.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),
}

impl BrokerError {
    pub(crate) fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            name: name.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn crashed(name: impl Into<String>) -> Self {
        Self::WorkerCrashed { name: name.into() }
    }

    /// Returns true for errors that mean the worker is gone, so a retry
    /// would go through a fresh spawn.
    pub fn is_worker_lost(&self) -> bool {
        matches!(self, Self::WorkerCrashed { .. } | Self::Handshake { .. })
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}
