//! Circuit breaker events
//!
//! Breaker activations are an append-only log. Any active event that has not
//! auto-expired halts admission. A zero duration means the event stays
//! active until explicitly reset.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Trigger type used by the P&L monitor
pub const DAILY_LOSS_TRIGGER: &str = "DAILY_LOSS";

/// One breaker activation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub id: i64,
    pub trigger_type: String,
    pub trigger_value: f64,
    pub threshold: f64,
    /// Auto-expiry in seconds, 0 for manual reset only
    pub duration_seconds: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerEvent {
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        (self.duration_seconds > 0)
            .then(|| self.created_at + Duration::seconds(self.duration_seconds))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// Active and not past its auto-expiry
    #[must_use]
    pub fn is_blocking(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }
}

/// Breaker activation about to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBreakerEvent {
    pub trigger_type: String,
    pub trigger_value: f64,
    pub threshold: f64,
    pub duration_seconds: i64,
}

impl NewBreakerEvent {
    pub fn manual_reset(trigger_type: impl Into<String>, trigger_value: f64, threshold: f64) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            trigger_value,
            threshold,
            duration_seconds: 0,
        }
    }

    #[must_use]
    pub const fn expiring_after(mut self, seconds: i64) -> Self {
        self.duration_seconds = seconds;
        self
    }
}

/// Breaker status as reported to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub active: bool,
    pub events: Vec<CircuitBreakerEvent>,
}
