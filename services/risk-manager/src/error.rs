//! Error types for the risk gateway

use services_common::TransportError;
use thiserror::Error;

/// Risk gateway error types
///
/// Risk rejections are not errors; they are returned as
/// [`crate::RiskDecision`] values.
#[derive(Error, Debug)]
pub enum RiskError {
    /// Engine could not be reached after the retry budget
    #[error("Engine transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Durable store read or write failed
    #[error("Durable store unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// Fast cache read or write failed
    #[error("Fast cache unavailable: {0:#}")]
    CacheUnavailable(#[source] anyhow::Error),

    /// No active breaker with this id
    #[error("Circuit breaker not found: {id}")]
    BreakerNotFound {
        /// Requested breaker id
        id: i64,
    },

    /// Order is malformed, independent of risk limits
    #[error("Invalid order: {reason}")]
    InvalidOrder {
        /// What is wrong with it
        reason: String,
    },

    /// Limits update carries values that cannot be enforced
    #[error("Invalid limits: {reason}")]
    InvalidLimits {
        /// Offending field and value
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Configuration {
        /// Details
        message: String,
    },
}

impl RiskError {
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            reason: reason.into(),
        }
    }
}

/// Result type for risk gateway operations
pub type RiskResult<T> = std::result::Result<T, RiskError>;
