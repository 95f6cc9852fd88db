//! In-memory durable store

use super::RiskStore;
use crate::alerts::{NewAlert, RiskAlert};
use crate::circuit_breaker::{CircuitBreakerEvent, NewBreakerEvent};
use crate::limits::{PositionLimit, RiskLimits};
use crate::pnl::DailyPnl;
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Tables {
    limits: Vec<RiskLimits>,
    position_limits: FxHashMap<String, PositionLimit>,
    alerts: Vec<RiskAlert>,
    daily: FxHashMap<NaiveDate, DailyPnl>,
    breakers: Vec<CircuitBreakerEvent>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store. Can be switched offline to exercise degraded paths.
#[derive(Default)]
pub struct MemoryRiskStore {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl MemoryRiskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Record a breaker with an explicit creation time
    pub fn insert_breaker_at(&self, event: &NewBreakerEvent, created_at: DateTime<Utc>) -> CircuitBreakerEvent {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        let stored = CircuitBreakerEvent {
            id,
            trigger_type: event.trigger_type.clone(),
            trigger_value: event.trigger_value,
            threshold: event.threshold,
            duration_seconds: event.duration_seconds,
            active: true,
            created_at,
            reset_at: None,
        };
        tables.breakers.push(stored.clone());
        stored
    }

    #[must_use]
    pub fn limits_versions(&self) -> usize {
        self.tables.lock().limits.len()
    }

    #[must_use]
    pub fn breaker_events(&self) -> Vec<CircuitBreakerEvent> {
        self.tables.lock().breakers.clone()
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("store offline");
        }
        Ok(())
    }
}

#[async_trait]
impl RiskStore for MemoryRiskStore {
    async fn latest_limits(&self) -> Result<Option<RiskLimits>> {
        self.check()?;
        Ok(self.tables.lock().limits.iter().max_by_key(|l| l.id).cloned())
    }

    async fn insert_limits(&self, limits: &RiskLimits) -> Result<RiskLimits> {
        self.check()?;
        let mut tables = self.tables.lock();
        let stored = RiskLimits {
            id: tables.next_id(),
            ..limits.clone()
        };
        tables.limits.push(stored.clone());
        Ok(stored)
    }

    async fn position_limits(&self) -> Result<Vec<PositionLimit>> {
        self.check()?;
        Ok(self.tables.lock().position_limits.values().cloned().collect())
    }

    async fn upsert_position_limit(
        &self,
        symbol: &str,
        max_position: f64,
        max_concentration_pct: f64,
    ) -> Result<PositionLimit> {
        self.check()?;
        let mut tables = self.tables.lock();
        let now = Utc::now();
        let id = match tables.position_limits.get(symbol) {
            Some(existing) => existing.id,
            None => tables.next_id(),
        };
        let created_at = tables
            .position_limits
            .get(symbol)
            .map_or(now, |existing| existing.created_at);
        let limit = PositionLimit {
            id,
            symbol: symbol.to_string(),
            max_position,
            max_concentration_pct,
            created_at,
            updated_at: now,
        };
        tables.position_limits.insert(symbol.to_string(), limit.clone());
        Ok(limit)
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<RiskAlert> {
        self.check()?;
        let mut tables = self.tables.lock();
        let stored = alert.clone().into_alert(tables.next_id(), Utc::now());
        tables.alerts.push(stored.clone());
        Ok(stored)
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<RiskAlert>> {
        self.check()?;
        Ok(self.tables.lock().alerts.iter().rev().take(limit).cloned().collect())
    }

    async fn daily_pnl(&self, date: NaiveDate) -> Result<Option<DailyPnl>> {
        self.check()?;
        Ok(self.tables.lock().daily.get(&date).cloned())
    }

    async fn upsert_daily_pnl(&self, pnl: &DailyPnl) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        let sticky = tables
            .daily
            .get(&pnl.date)
            .is_some_and(|existing| existing.circuit_breaker_triggered);
        let mut record = pnl.clone();
        record.circuit_breaker_triggered |= sticky;
        tables.daily.insert(pnl.date, record);
        Ok(())
    }

    async fn insert_breaker(&self, event: &NewBreakerEvent) -> Result<CircuitBreakerEvent> {
        self.check()?;
        Ok(self.insert_breaker_at(event, Utc::now()))
    }

    async fn active_breakers(&self) -> Result<Vec<CircuitBreakerEvent>> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .breakers
            .iter()
            .filter(|b| b.active)
            .cloned()
            .collect())
    }

    async fn reset_breaker(&self, id: i64, at: DateTime<Utc>) -> Result<Option<CircuitBreakerEvent>> {
        self.check()?;
        let mut tables = self.tables.lock();
        let Some(event) = tables.breakers.iter_mut().find(|b| b.id == id && b.active) else {
            return Ok(None);
        };
        event.active = false;
        event.reset_at = Some(at);
        Ok(Some(event.clone()))
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnl::trading_day;

    #[tokio::test]
    async fn test_latest_limits_wins() {
        let store = MemoryRiskStore::new();
        store.insert_limits(&RiskLimits::default()).await.unwrap();
        let second = RiskLimits {
            max_order_size: 77.0,
            ..RiskLimits::default()
        };
        let stored = store.insert_limits(&second).await.unwrap();

        let latest = store.latest_limits().await.unwrap().unwrap();
        assert_eq!(latest.id, stored.id);
        assert!((latest.max_order_size - 77.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_daily_flag_is_sticky() {
        let store = MemoryRiskStore::new();
        let mut day = DailyPnl::empty(trading_day(Utc::now()));
        day.circuit_breaker_triggered = true;
        store.upsert_daily_pnl(&day).await.unwrap();

        let mut recompute = day.with_values(1.0, 2.0);
        recompute.circuit_breaker_triggered = false;
        store.upsert_daily_pnl(&recompute).await.unwrap();

        let stored = store.daily_pnl(day.date).await.unwrap().unwrap();
        assert!(stored.circuit_breaker_triggered);
        assert!((stored.total_pnl - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reset_only_active() {
        let store = MemoryRiskStore::new();
        let event = store
            .insert_breaker(&NewBreakerEvent::manual_reset("MANUAL", 1.0, 1.0))
            .await
            .unwrap();
        assert!(store.reset_breaker(event.id, Utc::now()).await.unwrap().is_some());
        assert!(store.reset_breaker(event.id, Utc::now()).await.unwrap().is_none());
        assert!(store.active_breakers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = MemoryRiskStore::new();
        store.set_offline(true);
        assert!(store.ping().await.is_err());
        assert!(store.latest_limits().await.is_err());
    }
}
