//! Order-rate throttle
//!
//! Two algorithms keyed per caller identity:
//! - Fixed window: one counter per second. A burst straddling a boundary can
//!   admit up to twice the nominal rate.
//! - Sliding window: admitted timestamps kept in an ordered set, evicted as
//!   they age past the window.
//!
//! Both rely on atomic operations in the shared cache rather than a local
//! lock, so instances sharing one cache enforce one budget.

use crate::cache::FastCache;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const FIXED_WINDOW: Duration = Duration::from_secs(1);

/// Throttle algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ThrottleMode {
    FixedWindow,
    SlidingWindow { window_seconds: u64 },
}

impl Default for ThrottleMode {
    fn default() -> Self {
        Self::FixedWindow
    }
}

/// Result of a throttle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleOutcome {
    Admitted { count: u64 },
    Exceeded { count: u64, limit: u64 },
}

impl ThrottleOutcome {
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

impl fmt::Display for ThrottleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admitted { count } => write!(f, "admitted ({count} in window)"),
            Self::Exceeded { count, limit } => {
                write!(f, "rate limit exceeded: {count} orders in window (limit: {limit})")
            }
        }
    }
}

#[must_use]
pub fn fixed_key(identity: &str) -> String {
    format!("throttle:{identity}")
}

#[must_use]
pub fn sliding_key(identity: &str) -> String {
    format!("throttle:advanced:{identity}")
}

/// Rate gate over the fast cache
pub struct ThrottleGate {
    cache: Arc<dyn FastCache>,
    mode: ThrottleMode,
}

impl ThrottleGate {
    #[must_use]
    pub fn new(cache: Arc<dyn FastCache>, mode: ThrottleMode) -> Self {
        Self { cache, mode }
    }

    #[must_use]
    pub const fn mode(&self) -> ThrottleMode {
        self.mode
    }

    /// Record one request for `identity` and report whether it fits the budget.
    /// Store errors are returned to the caller, which fails closed.
    pub async fn check(&self, identity: &str, max_per_second: u32) -> Result<ThrottleOutcome> {
        let outcome = match self.mode {
            ThrottleMode::FixedWindow => {
                let limit = u64::from(max_per_second);
                let count = self
                    .cache
                    .incr_window(&fixed_key(identity), FIXED_WINDOW)
                    .await?;
                if count > limit {
                    ThrottleOutcome::Exceeded { count, limit }
                } else {
                    ThrottleOutcome::Admitted { count }
                }
            }
            ThrottleMode::SlidingWindow { window_seconds } => {
                let window_seconds = window_seconds.max(1);
                let limit = u64::from(max_per_second) * window_seconds;
                let hit = self
                    .cache
                    .sliding_window_hit(
                        &sliding_key(identity),
                        Duration::from_secs(window_seconds),
                        limit,
                    )
                    .await?;
                if hit.admitted {
                    ThrottleOutcome::Admitted { count: hit.count }
                } else {
                    ThrottleOutcome::Exceeded {
                        count: hit.count,
                        limit,
                    }
                }
            }
        };
        debug!(identity, %outcome, "Throttle check");
        Ok(outcome)
    }

    /// Requests counted in the current window
    pub async fn current_rate(&self, identity: &str) -> Result<u64> {
        match self.mode {
            ThrottleMode::FixedWindow => Ok(self
                .cache
                .get(&fixed_key(identity))
                .await?
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0)),
            ThrottleMode::SlidingWindow { window_seconds } => {
                self.cache
                    .sliding_window_count(
                        &sliding_key(identity),
                        Duration::from_secs(window_seconds.max(1)),
                    )
                    .await
            }
        }
    }

    /// Forget all history for `identity`
    pub async fn reset(&self, identity: &str) -> Result<()> {
        self.cache.del(&fixed_key(identity)).await?;
        self.cache.del(&sliding_key(identity)).await
    }
}
