//! Event kinds and the subscriber envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Kinds of state-change events fanned out to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    RiskAlert,
    PnlUpdate,
    CircuitBreaker,
    PositionUpdate,
}

impl EventKind {
    pub const ALL: [Self; 4] = [
        Self::RiskAlert,
        Self::PnlUpdate,
        Self::CircuitBreaker,
        Self::PositionUpdate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RiskAlert => "RISK_ALERT",
            Self::PnlUpdate => "PNL_UPDATE",
            Self::CircuitBreaker => "CIRCUIT_BREAKER",
            Self::PositionUpdate => "POSITION_UPDATE",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::RiskAlert => 0,
            Self::PnlUpdate => 1,
            Self::CircuitBreaker => 2,
            Self::PositionUpdate => 3,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope: `{type, data, timestamp}` with a unix-seconds timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: i64,
}

impl Envelope {
    /// Wrap a payload, stamping the current time
    pub fn new<T: Serialize>(kind: EventKind, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            data: serde_json::to_value(data)?,
            timestamp: chrono::Utc::now().timestamp(),
        })
    }
}

/// What a subscription yields to its writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Serialized envelope, shared between all subscribers
    Message(Arc<str>),
    /// Keep-alive tick
    Heartbeat,
}
