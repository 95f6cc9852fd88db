//! Risk Manager Service
//!
//! Pre-trade risk control and order admission in front of the trading engine:
//! - Order validation against global and per-symbol limits
//! - Effective position tracking including in-flight orders
//! - Daily loss limit enforced through a circuit breaker
//! - Per-identity order rate throttling
//! - Real-time broadcast of alerts, P&L and breaker events

pub mod admission;
pub mod alerts;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod limits;
pub mod metrics;
pub mod monitor;
pub mod pnl;
pub mod position;
pub mod server;
pub mod state;
pub mod store;
pub mod throttle;

pub use admission::{OrderGateway, SubmitOutcome};
pub use error::{RiskError, RiskResult};
pub use limits::{EffectivePositionLimit, PositionLimit, PositionLimitUpdate, RiskLimits, RiskLimitsUpdate};
pub use position::{EffectivePosition, PositionLedger};
pub use state::{RiskSnapshot, RiskState};
pub use throttle::{ThrottleGate, ThrottleMode, ThrottleOutcome};

use crate::alerts::{AlertSeverity, AlertType, NewAlert, RiskAlert};
use crate::cache::FastCache;
use crate::circuit_breaker::{BreakerStatus, CircuitBreakerEvent, DAILY_LOSS_TRIGGER, NewBreakerEvent};
use crate::pnl::{DailyPnl, trading_day};
use crate::store::RiskStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use services_common::{BroadcastHub, EventKind, OrderRequest, SECS_PER_HOUR, Side};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const LIMITS_CACHE_KEY: &str = "risk_limits:active";
pub const DAILY_PNL_CACHE_KEY: &str = "daily_pnl:latest";
const MIRROR_TTL: Duration = Duration::from_secs(SECS_PER_HOUR);
pub const DEFAULT_ALERT_LIMIT: usize = 100;

/// Outcome of a risk validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub allowed: bool,
    pub rejection_reason: Option<String>,
    /// Alert messages raised while deciding
    pub alerts: Vec<String>,
}

impl RiskDecision {
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            rejection_reason: None,
            alerts: Vec::new(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            allowed: false,
            alerts: vec![reason.clone()],
            rejection_reason: Some(reason),
        }
    }
}

/// Risk manager
///
/// Owns the shared risk snapshot and every transition of it: limits reloads,
/// daily P&L updates, breaker trips and resets. Validation reads one snapshot
/// for the whole decision.
pub struct RiskManager {
    store: Arc<dyn RiskStore>,
    cache: Arc<dyn FastCache>,
    state: RiskState,
    throttle: ThrottleGate,
    hub: BroadcastHub,
    /// Provisional ids for breakers not yet recorded by the store
    local_breaker_ids: AtomicI64,
    /// Serialises breaker trips, resets and reloads
    breaker_gate: Mutex<()>,
}

impl RiskManager {
    /// Create a manager with default limits. Call [`Self::bootstrap`] to load
    /// the persisted state.
    pub fn new(
        store: Arc<dyn RiskStore>,
        cache: Arc<dyn FastCache>,
        throttle: ThrottleGate,
        hub: BroadcastHub,
    ) -> Self {
        let snapshot = RiskSnapshot::new(RiskLimits::default(), trading_day(Utc::now()));
        Self {
            store,
            cache,
            state: RiskState::new(snapshot),
            throttle,
            hub,
            local_breaker_ids: AtomicI64::new(0),
            breaker_gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn RiskStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn cache(&self) -> Arc<dyn FastCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub const fn throttle(&self) -> &ThrottleGate {
        &self.throttle
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<RiskSnapshot> {
        self.state.snapshot()
    }

    /// Load persisted limits, breakers and today's P&L.
    ///
    /// With no limits on record the defaults are seeded. With the store down
    /// the cached mirror is used, then the built-in defaults.
    pub async fn bootstrap(&self) {
        match self.reload_limits().await {
            Ok(snapshot) => info!(
                limits_id = snapshot.limits.id,
                active_breakers = snapshot.active_breakers.len(),
                "Risk state loaded"
            ),
            Err(e) => {
                warn!(error = %e, "Durable store unavailable at startup");
                match cache::get_json::<RiskLimits>(self.cache.as_ref(), LIMITS_CACHE_KEY).await {
                    Ok(Some(limits)) => {
                        info!(limits_id = limits.id, "Using cached risk limits");
                        self.state.update(|s| s.limits = limits);
                    }
                    _ => warn!("Using built-in default risk limits"),
                }
            }
        }
    }

    /// Decide whether an order may proceed.
    ///
    /// Checks run in a fixed order and the first failure wins: breaker,
    /// daily loss, order size, position limit, rate. A rejection is recorded
    /// as a WARNING alert.
    pub async fn validate(&self, order: &OrderRequest, effective_position: f64, identity: &str) -> RiskDecision {
        let snapshot = self.state.snapshot();
        let decision = self
            .decide(&snapshot, order, effective_position, identity, Utc::now())
            .await;

        if decision.allowed {
            metrics::record_risk_check("approved");
            debug!(symbol = %order.symbol, side = %order.side, quantity = order.quantity, "Order approved");
        } else {
            metrics::record_risk_check("rejected");
            let reason = decision.rejection_reason.clone().unwrap_or_default();
            warn!(symbol = %order.symbol, side = %order.side, quantity = order.quantity, %reason, "Order rejected");
            let alert = NewAlert::new(
                AlertType::OrderRejected,
                AlertSeverity::Warning,
                format!("Order rejected: {reason}"),
            )
            .with_symbol(order.symbol.clone())
            .with_metadata(json!({
                "client_order_id": order.client_order_id,
                "symbol": order.symbol,
                "side": order.side,
                "quantity": order.quantity,
                "price": order.price,
                "reason": reason,
            }));
            self.send_alert(alert).await;
        }
        decision
    }

    async fn decide(
        &self,
        snapshot: &RiskSnapshot,
        order: &OrderRequest,
        effective_position: f64,
        identity: &str,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let limits = &snapshot.limits;
        if !limits.enabled {
            return RiskDecision::allow();
        }

        if snapshot.breaker_active(now) {
            return RiskDecision::reject("circuit breaker active");
        }

        let daily = snapshot.daily_for(trading_day(now));
        if daily.breaches(limits.daily_loss_limit) && !daily.circuit_breaker_triggered {
            return RiskDecision::reject("daily loss limit reached");
        }

        let order_value = order.quantity * order.price;
        if order_value > limits.max_order_size {
            return RiskDecision::reject(format!(
                "order size exceeds limit: ${order_value:.2} > ${:.2}",
                limits.max_order_size
            ));
        }

        let new_position = match order.side {
            Side::Buy => effective_position + order.quantity,
            Side::Sell => effective_position - order.quantity,
        };
        let position_limit = snapshot.position_limit(&order.symbol);
        if new_position.abs() > position_limit.max_position {
            return RiskDecision::reject(format!(
                "position would exceed max position size: {:.2} > {:.2}",
                new_position.abs(),
                position_limit.max_position
            ));
        }

        match self.throttle.check(identity, limits.max_orders_per_second).await {
            Ok(outcome) if outcome.is_admitted() => RiskDecision::allow(),
            Ok(outcome) => RiskDecision::reject(outcome.to_string()),
            Err(e) => {
                error!(identity, error = %e, "Rate limit check failed, rejecting");
                RiskDecision::reject("rate limit check unavailable")
            }
        }
    }

    /// Activate a breaker that only an explicit reset clears.
    ///
    /// Not deduplicated: callers check [`Self::is_circuit_breaker_active`] first.
    pub async fn trigger_circuit_breaker(
        &self,
        trigger_type: &str,
        trigger_value: f64,
        threshold: f64,
    ) -> RiskResult<CircuitBreakerEvent> {
        self.trigger_breaker(NewBreakerEvent::manual_reset(trigger_type, trigger_value, threshold))
            .await
    }

    /// Activate a breaker described by `event`, including any auto-expiry
    pub async fn trigger_breaker(&self, event: NewBreakerEvent) -> RiskResult<CircuitBreakerEvent> {
        let guard = self.breaker_gate.lock().await;
        let (_, provisional) = self.state.update(|s| {
            let provisional = self.provisional_breaker(&event, Utc::now());
            s.active_breakers.push(provisional.clone());
            s.daily = s.daily_for(trading_day(provisional.created_at));
            s.daily.circuit_breaker_triggered = true;
            provisional
        });
        let breaker = self.persist_breaker(provisional, &event).await;
        drop(guard);
        self.announce_breaker(&breaker).await;
        Ok(breaker)
    }

    /// Breaker carrying a local id, blocking from the moment it is published
    fn provisional_breaker(&self, event: &NewBreakerEvent, now: DateTime<Utc>) -> CircuitBreakerEvent {
        CircuitBreakerEvent {
            id: self.local_breaker_ids.fetch_sub(1, Ordering::SeqCst) - 1,
            trigger_type: event.trigger_type.clone(),
            trigger_value: event.trigger_value,
            threshold: event.threshold,
            duration_seconds: event.duration_seconds,
            active: true,
            created_at: now,
            reset_at: None,
        }
    }

    /// Record a published breaker and swap in its stored id. Caller holds the breaker gate.
    async fn persist_breaker(&self, provisional: CircuitBreakerEvent, event: &NewBreakerEvent) -> CircuitBreakerEvent {
        let breaker = match self.store.insert_breaker(event).await {
            Ok(stored) => {
                self.state.update(|s| {
                    s.active_breakers.retain(|b| b.id != provisional.id);
                    s.active_breakers.push(stored.clone());
                });
                stored
            }
            Err(e) => {
                // Halt locally even when the event cannot be recorded
                error!(error = %e, breaker_id = provisional.id, "Could not persist circuit breaker, keeping it locally");
                provisional
            }
        };
        let daily = self.state.snapshot().daily_for(trading_day(breaker.created_at));
        if let Err(e) = self.store.upsert_daily_pnl(&daily).await {
            warn!(error = %e, "Could not persist daily breaker flag");
        }
        breaker
    }

    async fn announce_breaker(&self, breaker: &CircuitBreakerEvent) {
        metrics::record_breaker_trip();
        error!(
            breaker_id = breaker.id,
            trigger_type = %breaker.trigger_type,
            trigger_value = breaker.trigger_value,
            threshold = breaker.threshold,
            "CIRCUIT BREAKER TRIGGERED"
        );

        let alert = NewAlert::new(
            AlertType::CircuitBreaker,
            AlertSeverity::Critical,
            format!(
                "Circuit breaker triggered: {} (value: {:.2}, threshold: {:.2})",
                breaker.trigger_type, breaker.trigger_value, breaker.threshold
            ),
        )
        .with_metadata(json!({
            "breaker_id": breaker.id,
            "trigger_type": breaker.trigger_type,
            "trigger_value": breaker.trigger_value,
            "threshold": breaker.threshold,
            "duration_seconds": breaker.duration_seconds,
        }));
        self.send_alert(alert).await;
        self.broadcast(EventKind::CircuitBreaker, breaker).await;
    }

    /// Deactivate breaker `id`. The day's trip flag is left set.
    pub async fn reset_circuit_breaker(&self, id: i64) -> RiskResult<CircuitBreakerEvent> {
        let event = self.deactivate(id).await?;
        info!(breaker_id = id, trigger_type = %event.trigger_type, "Circuit breaker reset");
        let alert = NewAlert::new(
            AlertType::CircuitBreakerReset,
            AlertSeverity::Info,
            format!("Circuit breaker {id} reset"),
        )
        .with_metadata(json!({
            "breaker_id": id,
            "trigger_type": event.trigger_type,
        }));
        self.send_alert(alert).await;
        self.broadcast(EventKind::CircuitBreaker, &event).await;
        Ok(event)
    }

    async fn deactivate(&self, id: i64) -> RiskResult<CircuitBreakerEvent> {
        let _guard = self.breaker_gate.lock().await;
        let now = Utc::now();
        let event = if id < 0 {
            self.state
                .snapshot()
                .active_breakers
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .map(|mut b| {
                    b.active = false;
                    b.reset_at = Some(now);
                    b
                })
        } else {
            self.store
                .reset_breaker(id, now)
                .await
                .map_err(RiskError::StoreUnavailable)?
        };
        let event = event.ok_or(RiskError::BreakerNotFound { id })?;
        self.state.update(|s| s.active_breakers.retain(|b| b.id != id));
        Ok(event)
    }

    /// Whether any unexpired breaker blocks trading. Expired breakers are retired first.
    pub async fn is_circuit_breaker_active(&self) -> bool {
        self.expire_breakers().await;
        self.state.snapshot().breaker_active(Utc::now())
    }

    /// Retire breakers past their auto-expiry. Returns how many were retired.
    pub async fn expire_breakers(&self) -> usize {
        let expired = self.state.snapshot().expired_breakers(Utc::now());
        let mut retired = 0;
        for id in expired {
            match self.deactivate(id).await {
                Ok(event) => {
                    retired += 1;
                    info!(breaker_id = id, "Circuit breaker expired");
                    let alert = NewAlert::new(
                        AlertType::CircuitBreakerReset,
                        AlertSeverity::Info,
                        format!("Circuit breaker {id} expired"),
                    )
                    .with_metadata(json!({ "breaker_id": id, "expired": true }));
                    self.send_alert(alert).await;
                    self.broadcast(EventKind::CircuitBreaker, &event).await;
                }
                Err(RiskError::BreakerNotFound { .. }) => {
                    // Reset elsewhere in the meantime
                    self.state.update(|s| s.active_breakers.retain(|b| b.id != id));
                }
                Err(e) => warn!(breaker_id = id, error = %e, "Could not retire expired breaker"),
            }
        }
        retired
    }

    #[must_use]
    pub fn circuit_breaker_status(&self) -> BreakerStatus {
        let now = Utc::now();
        let snapshot = self.state.snapshot();
        BreakerStatus {
            active: snapshot.breaker_active(now),
            events: snapshot
                .active_breakers
                .iter()
                .filter(|b| b.is_blocking(now))
                .cloned()
                .collect(),
        }
    }

    /// Set today's realized and unrealized P&L.
    ///
    /// The returned record is exactly what was written, even when another
    /// caller updates the day concurrently.
    pub async fn update_daily_pnl(&self, realized: f64, unrealized: f64) -> DailyPnl {
        self.apply_daily(|day| day.with_values(realized, unrealized))
            .await
    }

    /// Replace today's unrealized P&L, keeping the realized figure as of the write
    pub async fn update_unrealized_pnl(&self, unrealized: f64) -> DailyPnl {
        self.apply_daily(|day| day.with_values(day.realized_pnl, unrealized))
            .await
    }

    /// Add a fill's realized P&L to today's figure
    pub async fn record_realized_pnl(&self, delta: f64) -> DailyPnl {
        self.apply_daily(|day| day.with_values(day.realized_pnl + delta, day.unrealized_pnl))
            .await
    }

    async fn apply_daily(&self, next: impl FnOnce(&DailyPnl) -> DailyPnl) -> DailyPnl {
        let today = trading_day(Utc::now());
        let (_, daily) = self.state.update(|s| {
            s.daily = next(&s.daily_for(today));
            s.daily.clone()
        });

        if let Err(e) = self.store.upsert_daily_pnl(&daily).await {
            warn!(error = %e, "Could not persist daily P&L, keeping in memory");
        }
        if let Err(e) = cache::set_json(self.cache.as_ref(), DAILY_PNL_CACHE_KEY, &daily, MIRROR_TTL).await {
            debug!(error = %e, "Could not mirror daily P&L");
        }
        metrics::set_daily_pnl(daily.total_pnl);
        self.broadcast(EventKind::PnlUpdate, &daily).await;
        daily
    }

    #[must_use]
    pub fn daily_pnl(&self) -> DailyPnl {
        self.state.snapshot().daily_for(trading_day(Utc::now()))
    }

    /// Trip the daily-loss breaker if `daily` breaches the limit and the day
    /// has not tripped yet. At most one caller trips per day.
    pub async fn evaluate_daily_loss(&self, daily: &DailyPnl) -> RiskResult<Option<CircuitBreakerEvent>> {
        let limit = self.state.snapshot().limits.daily_loss_limit;
        if !daily.breaches(limit) {
            return Ok(None);
        }
        let event = NewBreakerEvent::manual_reset(DAILY_LOSS_TRIGGER, daily.total_pnl, -limit);

        // Flag and breaker become visible in the same snapshot
        let guard = self.breaker_gate.lock().await;
        let (_, claimed) = self.state.update(|s| {
            let mut day = s.daily_for(daily.date);
            if day.circuit_breaker_triggered {
                return None;
            }
            day.circuit_breaker_triggered = true;
            s.daily = day;
            let provisional = self.provisional_breaker(&event, Utc::now());
            s.active_breakers.push(provisional.clone());
            Some(provisional)
        });
        let Some(provisional) = claimed else {
            return Ok(None);
        };
        warn!(total_pnl = daily.total_pnl, limit, "Daily loss limit breached");
        let breaker = self.persist_breaker(provisional, &event).await;
        drop(guard);
        self.announce_breaker(&breaker).await;
        Ok(Some(breaker))
    }

    /// Refresh limits, overrides, active breakers and today's record from the
    /// durable store and swap them in as one snapshot
    pub async fn reload_limits(&self) -> RiskResult<Arc<RiskSnapshot>> {
        let _guard = self.breaker_gate.lock().await;
        let limits = match self
            .store
            .latest_limits()
            .await
            .map_err(RiskError::StoreUnavailable)?
        {
            Some(limits) => limits,
            None => {
                warn!("No risk limits on record, seeding defaults");
                self.store
                    .insert_limits(&RiskLimits::default())
                    .await
                    .map_err(RiskError::StoreUnavailable)?
            }
        };
        let overrides = self
            .store
            .position_limits()
            .await
            .map_err(RiskError::StoreUnavailable)?;
        let breakers = self
            .store
            .active_breakers()
            .await
            .map_err(RiskError::StoreUnavailable)?;
        let today = trading_day(Utc::now());
        let stored_day = self
            .store
            .daily_pnl(today)
            .await
            .map_err(RiskError::StoreUnavailable)?;

        if let Err(e) = cache::set_json(self.cache.as_ref(), LIMITS_CACHE_KEY, &limits, MIRROR_TTL).await {
            debug!(error = %e, "Could not mirror risk limits");
        }

        let (snapshot, ()) = self.state.update(|s| {
            s.limits = limits;
            s.position_limits = overrides
                .into_iter()
                .map(|limit| (limit.symbol.clone(), limit))
                .collect();
            // Breakers tripped while the store was down only live here
            let local: Vec<_> = s.active_breakers.drain(..).filter(|b| b.id < 0).collect();
            s.active_breakers = breakers;
            s.active_breakers.extend(local);
            match stored_day {
                Some(stored) if s.daily.date != today => s.daily = stored,
                Some(stored) => s.daily.circuit_breaker_triggered |= stored.circuit_breaker_triggered,
                None => s.daily = s.daily_for(today),
            }
        });
        debug!(limits_id = snapshot.limits.id, "Risk limits reloaded");
        Ok(snapshot)
    }

    #[must_use]
    pub fn limits(&self) -> RiskLimits {
        self.state.snapshot().limits.clone()
    }

    /// Apply a partial update over the latest persisted limits as a new version
    pub async fn update_limits(&self, update: RiskLimitsUpdate) -> RiskResult<RiskLimits> {
        update
            .validate()
            .map_err(|reason| RiskError::InvalidLimits { reason })?;

        let base = self
            .store
            .latest_limits()
            .await
            .map_err(RiskError::StoreUnavailable)?
            .unwrap_or_else(|| self.limits());
        let saved = self
            .store
            .insert_limits(&update.apply(&base))
            .await
            .map_err(RiskError::StoreUnavailable)?;
        self.reload_limits().await?;

        info!(limits_id = saved.id, "Risk limits updated");
        let alert = NewAlert::new(AlertType::LimitsUpdated, AlertSeverity::Info, "Risk limits updated")
            .with_metadata(serde_json::to_value(&update).unwrap_or_default());
        self.send_alert(alert).await;
        Ok(saved)
    }

    #[must_use]
    pub fn position_limit(&self, symbol: &str) -> EffectivePositionLimit {
        self.state.snapshot().position_limit(symbol)
    }

    /// Create or change the override for `symbol`. Unset fields keep the
    /// current effective value.
    pub async fn set_position_limit(&self, symbol: &str, update: PositionLimitUpdate) -> RiskResult<PositionLimit> {
        let current = self.position_limit(symbol);
        let max_position = update.max_position.unwrap_or(current.max_position);
        let max_concentration_pct = update
            .max_concentration_pct
            .unwrap_or(current.max_concentration_pct);
        for (name, value) in [("max_position", max_position), ("max_concentration_pct", max_concentration_pct)] {
            if !value.is_finite() || value < 0.0 {
                return Err(RiskError::InvalidLimits {
                    reason: format!("{name} must be a non-negative number, got {value}"),
                });
            }
        }

        let saved = self
            .store
            .upsert_position_limit(symbol, max_position, max_concentration_pct)
            .await
            .map_err(RiskError::StoreUnavailable)?;
        self.state.update(|s| {
            s.position_limits.insert(saved.symbol.clone(), saved.clone());
        });

        info!(symbol, max_position, max_concentration_pct, "Position limit updated");
        let alert = NewAlert::new(
            AlertType::PositionLimitUpdated,
            AlertSeverity::Info,
            format!("Position limit updated for {symbol}"),
        )
        .with_symbol(symbol)
        .with_metadata(json!({
            "max_position": max_position,
            "max_concentration_pct": max_concentration_pct,
        }));
        self.send_alert(alert).await;
        Ok(saved)
    }

    /// Newest first
    pub async fn recent_alerts(&self, limit: Option<usize>) -> RiskResult<Vec<RiskAlert>> {
        self.store
            .recent_alerts(limit.unwrap_or(DEFAULT_ALERT_LIMIT))
            .await
            .map_err(RiskError::StoreUnavailable)
    }

    /// Record an alert and broadcast it. An alert that cannot be persisted
    /// is still broadcast.
    pub async fn send_alert(&self, alert: NewAlert) -> RiskAlert {
        let stored = match self.store.insert_alert(&alert).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(alert_type = alert.alert_type.as_str(), error = %e, "Could not persist alert");
                alert.into_alert(0, Utc::now())
            }
        };
        match stored.severity {
            AlertSeverity::Critical => error!(alert_type = stored.alert_type.as_str(), message = %stored.message, "Risk alert"),
            AlertSeverity::Warning => warn!(alert_type = stored.alert_type.as_str(), message = %stored.message, "Risk alert"),
            AlertSeverity::Info => info!(alert_type = stored.alert_type.as_str(), message = %stored.message, "Risk alert"),
        }
        self.broadcast(EventKind::RiskAlert, &stored).await;
        stored
    }

    /// Publish to subscribers. A stopped hub is logged, not an error.
    pub async fn broadcast<T: Serialize + Sync>(&self, kind: EventKind, data: &T) {
        if let Err(e) = self.hub.publish(kind, data).await {
            debug!(kind = kind.as_str(), error = %e, "Broadcast skipped");
        }
        metrics::set_subscribers(self.hub.subscriber_count());
    }
}
