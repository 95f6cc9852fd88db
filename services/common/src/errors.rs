//! Common error types for services

use std::time::Duration;
use thiserror::Error;

/// Engine transport error types
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the engine could not be established
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// A single send or receive exceeded its deadline
    #[error("Timeout: {op} exceeded {after:?}")]
    Timeout {
        /// Which half of the exchange timed out
        op: &'static str,
        /// Deadline that was applied
        after: Duration,
    },

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection mid-exchange
    #[error("Connection closed by engine")]
    Closed,

    /// Request could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Response did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Every attempt in the retry budget failed
    #[error("Engine request failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last: String,
    },

    /// Engine answered but refused the request
    #[error("Engine rejected request: {0}")]
    EngineRejected(String),
}

impl TransportError {
    /// Whether the failure happened on the wire and warrants a reconnect
    #[must_use]
    pub const fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::Timeout { .. } | Self::Io(_) | Self::Closed
        )
    }
}

/// Result type for engine transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;
