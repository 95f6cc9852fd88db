//! Shared risk state
//!
//! Readers take an `Arc` to an immutable snapshot and decide against it
//! without holding any lock. Writers clone the current snapshot, modify the
//! clone and swap it in under the write lock, so a reader never sees a
//! half-applied change.

use crate::circuit_breaker::CircuitBreakerEvent;
use crate::limits::{EffectivePositionLimit, PositionLimit, RiskLimits};
use crate::pnl::DailyPnl;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Everything a risk decision reads
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub limits: RiskLimits,
    pub position_limits: FxHashMap<String, PositionLimit>,
    pub active_breakers: Vec<CircuitBreakerEvent>,
    pub daily: DailyPnl,
}

impl RiskSnapshot {
    #[must_use]
    pub fn new(limits: RiskLimits, today: NaiveDate) -> Self {
        Self {
            limits,
            position_limits: FxHashMap::default(),
            active_breakers: Vec::new(),
            daily: DailyPnl::empty(today),
        }
    }

    #[must_use]
    pub fn position_limit(&self, symbol: &str) -> EffectivePositionLimit {
        EffectivePositionLimit::resolve(symbol, &self.limits, self.position_limits.get(symbol))
    }

    #[must_use]
    pub fn breaker_active(&self, now: DateTime<Utc>) -> bool {
        self.active_breakers.iter().any(|b| b.is_blocking(now))
    }

    /// Active breakers past their auto-expiry
    #[must_use]
    pub fn expired_breakers(&self, now: DateTime<Utc>) -> Vec<i64> {
        self.active_breakers
            .iter()
            .filter(|b| b.active && b.is_expired(now))
            .map(|b| b.id)
            .collect()
    }

    /// The day's record, or a fresh one when the day has rolled over
    #[must_use]
    pub fn daily_for(&self, date: NaiveDate) -> DailyPnl {
        if self.daily.date == date {
            self.daily.clone()
        } else {
            DailyPnl::empty(date)
        }
    }
}

/// Handle to the shared risk snapshot
#[derive(Debug)]
pub struct RiskState {
    current: RwLock<Arc<RiskSnapshot>>,
}

impl RiskState {
    #[must_use]
    pub fn new(snapshot: RiskSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Consistent view for one decision
    #[must_use]
    pub fn snapshot(&self) -> Arc<RiskSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Apply `mutate` to a copy of the current snapshot and publish it.
    /// Returns the published snapshot together with the closure's result.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut RiskSnapshot) -> R) -> (Arc<RiskSnapshot>, R) {
        let mut guard = self.current.write();
        let mut next = RiskSnapshot::clone(&guard);
        let result = mutate(&mut next);
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        (next, result)
    }
}
