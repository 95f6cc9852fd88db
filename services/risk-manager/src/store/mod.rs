//! Durable store for limits, alerts, daily P&L and breaker events
//!
//! The durable store is the source of truth. Implementations:
//! - [`PgRiskStore`]: `PostgreSQL` via sqlx
//! - [`MemoryRiskStore`]: process-local, for tests and store-less runs

pub mod memory;
pub mod postgres;

use crate::alerts::{NewAlert, RiskAlert};
use crate::circuit_breaker::{CircuitBreakerEvent, NewBreakerEvent};
use crate::limits::{PositionLimit, RiskLimits};
use crate::pnl::DailyPnl;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub use memory::MemoryRiskStore;
pub use postgres::PgRiskStore;

/// Durable store operations
#[async_trait]
pub trait RiskStore: Send + Sync {
    /// Highest-id limits record
    async fn latest_limits(&self) -> Result<Option<RiskLimits>>;

    /// Append a new limits version, returning it with its id assigned
    async fn insert_limits(&self, limits: &RiskLimits) -> Result<RiskLimits>;

    async fn position_limits(&self) -> Result<Vec<PositionLimit>>;

    async fn upsert_position_limit(
        &self,
        symbol: &str,
        max_position: f64,
        max_concentration_pct: f64,
    ) -> Result<PositionLimit>;

    async fn insert_alert(&self, alert: &NewAlert) -> Result<RiskAlert>;

    /// Newest first
    async fn recent_alerts(&self, limit: usize) -> Result<Vec<RiskAlert>>;

    async fn daily_pnl(&self, date: NaiveDate) -> Result<Option<DailyPnl>>;

    /// Insert or update the day's record. A set breaker flag is never cleared.
    async fn upsert_daily_pnl(&self, pnl: &DailyPnl) -> Result<()>;

    async fn insert_breaker(&self, event: &NewBreakerEvent) -> Result<CircuitBreakerEvent>;

    async fn active_breakers(&self) -> Result<Vec<CircuitBreakerEvent>>;

    /// Deactivate an active breaker. `None` when no active breaker has this id.
    async fn reset_breaker(&self, id: i64, at: DateTime<Utc>) -> Result<Option<CircuitBreakerEvent>>;

    async fn ping(&self) -> Result<()>;
}
