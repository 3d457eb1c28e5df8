//! Error types for bulkq.

use thiserror::Error;

use crate::queue::TransportError;

/// Errors surfaced by the bulk queue and its configuration layer.
#[derive(Debug, Error)]
pub enum BulkError {
    /// Configuration could not be read, parsed, or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or parsing failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// YAML serialization or parsing failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The whole batch could not be submitted, even after retrying.
    #[error("Bulk submission failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Number of submission attempts made.
        attempts: u32,
        /// The last transport error observed.
        #[source]
        source: TransportError,
    },

    /// `start()` was called on a queue whose scheduler is already running.
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// The queue has been stopped and cannot be restarted.
    #[error("Queue has been stopped")]
    Stopped,
}

impl BulkError {
    /// Check whether this error came from the transport.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
