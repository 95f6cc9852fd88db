//! Broadcast hub for real-time risk and P&L events
//!
//! Fan-out of state changes to many live subscribers with:
//! - Single-owner subscriber table behind a command queue
//! - Bounded per-subscriber queues, slow subscribers are dropped
//! - Independent keep-alive heartbeats
//! - Counters for published events and dropped subscribers

pub mod bus;
pub mod message;
pub mod metrics;
pub mod pump;

pub use bus::{BroadcastHub, Subscription};
pub use message::{Envelope, EventKind, Frame};
pub use metrics::{HubMetrics, HubMetricsSnapshot};
pub use pump::{SubscriberSink, spawn_writer_pump};

/// Error types for hub operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Coordinator is no longer running
    #[error("Broadcast hub closed")]
    Closed,
}

/// Result type for hub operations
pub type BusResult<T> = std::result::Result<T, EventBusError>;
