//! Shared fixtures for risk manager integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mockall::mock;
use risk_manager::alerts::{NewAlert, RiskAlert};
use risk_manager::cache::MemoryCache;
use risk_manager::circuit_breaker::{CircuitBreakerEvent, NewBreakerEvent};
use risk_manager::pnl::DailyPnl;
use risk_manager::store::{MemoryRiskStore, RiskStore};
use risk_manager::{
    OrderGateway, PositionLimit, PositionLedger, RiskLimits, RiskLimitsUpdate, RiskManager, ThrottleGate,
    ThrottleMode,
};
use serde_json::Value;
use services_common::{
    AccountSnapshot, BroadcastHub, CancelAck, EngineApi, EnginePosition, HubConfig, Movers, OrderAck,
    OrderRequest, OrderStatus, OrderType, Side, Subscription, TransportError, TransportResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Notify;

static INIT: Once = Once::new();

/// Initialize test logging once
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("risk_manager=debug,services_common=debug")
            .with_test_writer()
            .try_init();
    });
}

mock! {
    pub Engine {}

    #[async_trait]
    impl EngineApi for Engine {
        async fn submit_order(&self, order: &OrderRequest) -> TransportResult<OrderAck>;
        async fn positions(&self) -> TransportResult<Vec<EnginePosition>>;
        async fn account(&self) -> TransportResult<AccountSnapshot>;
        async fn movers(&self) -> TransportResult<Movers>;
        async fn cancel_order(&self, order_id: &str) -> TransportResult<CancelAck>;
        async fn open_orders(&self) -> TransportResult<Vec<Value>>;
        fn is_connected(&self) -> bool;
    }
}

pub fn order(symbol: &str, side: Side, quantity: f64, price: f64) -> OrderRequest {
    OrderRequest {
        client_order_id: String::new(),
        symbol: symbol.to_string(),
        side,
        quantity,
        price,
        order_type: OrderType::Limit,
    }
}

pub fn position(symbol: &str, quantity: f64, avg_price: f64, unrealized_pnl: f64) -> EnginePosition {
    EnginePosition {
        symbol: symbol.to_string(),
        quantity,
        unrealized_pnl,
        avg_price,
    }
}

pub fn ack(order_id: &str, status: OrderStatus, fill_qty: f64, fill_price: f64, remaining_qty: f64) -> OrderAck {
    OrderAck {
        order_id: order_id.to_string(),
        client_order_id: order_id.to_string(),
        symbol: String::new(),
        status,
        fill_price,
        fill_qty,
        remaining_qty,
        message: None,
    }
}

pub fn link_down() -> TransportError {
    TransportError::Exhausted {
        attempts: 3,
        last: "connection refused".to_string(),
    }
}

/// Engine that owns no positions and refuses nothing it is not asked
pub fn flat_engine() -> MockEngine {
    let mut engine = MockEngine::new();
    engine.expect_positions().returning(|| Ok(Vec::new()));
    engine.expect_is_connected().return_const(true);
    engine
}

/// Limits generous enough that only the check under test can fire
pub fn permissive_limits() -> RiskLimitsUpdate {
    RiskLimitsUpdate {
        max_position_size: Some(1_000_000.0),
        max_order_size: Some(1_000_000.0),
        daily_loss_limit: Some(1_000_000.0),
        max_orders_per_second: Some(1_000_000),
        ..Default::default()
    }
}

/// Risk manager over in-memory store and cache
pub struct RiskFixture {
    pub risk: Arc<RiskManager>,
    pub store: Arc<MemoryRiskStore>,
    pub cache: Arc<MemoryCache>,
    pub hub: BroadcastHub,
}

impl RiskFixture {
    pub async fn new() -> Self {
        Self::with_mode(ThrottleMode::FixedWindow).await
    }

    pub async fn with_mode(mode: ThrottleMode) -> Self {
        let store = Arc::new(MemoryRiskStore::new());
        Self::assemble(store.clone(), store, mode).await
    }

    /// Fixture whose manager talks to the store through [`GatedStore`]
    pub async fn gated() -> (Self, Arc<GatedStore>) {
        let store = Arc::new(MemoryRiskStore::new());
        let gated = Arc::new(GatedStore::new(store.clone()));
        let fx = Self::assemble(store, gated.clone(), ThrottleMode::FixedWindow).await;
        (fx, gated)
    }

    async fn assemble(store: Arc<MemoryRiskStore>, backing: Arc<dyn RiskStore>, mode: ThrottleMode) -> Self {
        init_test_logging();
        let cache = Arc::new(MemoryCache::new());
        let hub = BroadcastHub::new(HubConfig::default());
        let throttle = ThrottleGate::new(cache.clone(), mode);
        let risk = Arc::new(RiskManager::new(backing, cache.clone(), throttle, hub.clone()));
        risk.bootstrap().await;
        Self {
            risk,
            store,
            cache,
            hub,
        }
    }

    pub async fn limits(self, update: RiskLimitsUpdate) -> Self {
        self.risk.update_limits(update).await.unwrap();
        self
    }

    pub async fn subscribe(&self) -> Subscription {
        let subscription = self.hub.subscribe().await.unwrap();
        settle(&self.hub, 1).await;
        subscription
    }
}

/// Full admission stack around a scripted engine
pub struct GatewayFixture {
    pub fx: RiskFixture,
    pub ledger: Arc<PositionLedger>,
    pub gateway: OrderGateway,
}

impl GatewayFixture {
    pub async fn new(engine: MockEngine, limits: RiskLimitsUpdate) -> Self {
        let fx = RiskFixture::new().await.limits(limits).await;
        let engine: Arc<dyn EngineApi> = Arc::new(engine);
        let ledger = Arc::new(PositionLedger::new(engine, fx.cache.clone()));
        let gateway = OrderGateway::new(Arc::clone(&fx.risk), Arc::clone(&ledger));
        Self { fx, ledger, gateway }
    }
}

/// Wait until the hub has registered `expected` subscribers
pub async fn settle(hub: &BroadcastHub, expected: usize) {
    for _ in 0..1000 {
        if hub.subscriber_count() == expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("hub never reached {expected} subscribers");
}

/// Next broadcast frame decoded as JSON
pub async fn next_event(subscription: &mut Subscription) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("no broadcast within 5s")
        .expect("subscription closed");
    serde_json::from_str(&frame).unwrap()
}

/// Skip frames until one of `kind` arrives
pub async fn next_event_of(subscription: &mut Subscription, kind: &str) -> Value {
    loop {
        let event = next_event(subscription).await;
        if event["type"] == kind {
            return event;
        }
    }
}

/// Parks the next call that passes through it until released
#[derive(Default)]
pub struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Wait until a call is parked here
    pub async fn entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("nothing reached the gate within 5s");
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

/// Memory store with gates on the calls that open race windows
pub struct GatedStore {
    inner: Arc<MemoryRiskStore>,
    pub daily_pnl: Gate,
    pub insert_breaker: Gate,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryRiskStore>) -> Self {
        Self {
            inner,
            daily_pnl: Gate::default(),
            insert_breaker: Gate::default(),
        }
    }
}

#[async_trait]
impl RiskStore for GatedStore {
    async fn latest_limits(&self) -> Result<Option<RiskLimits>> {
        self.inner.latest_limits().await
    }

    async fn insert_limits(&self, limits: &RiskLimits) -> Result<RiskLimits> {
        self.inner.insert_limits(limits).await
    }

    async fn position_limits(&self) -> Result<Vec<PositionLimit>> {
        self.inner.position_limits().await
    }

    async fn upsert_position_limit(
        &self,
        symbol: &str,
        max_position: f64,
        max_concentration_pct: f64,
    ) -> Result<PositionLimit> {
        self.inner
            .upsert_position_limit(symbol, max_position, max_concentration_pct)
            .await
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<RiskAlert> {
        self.inner.insert_alert(alert).await
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<RiskAlert>> {
        self.inner.recent_alerts(limit).await
    }

    async fn daily_pnl(&self, date: NaiveDate) -> Result<Option<DailyPnl>> {
        self.daily_pnl.pass().await;
        self.inner.daily_pnl(date).await
    }

    async fn upsert_daily_pnl(&self, pnl: &DailyPnl) -> Result<()> {
        self.inner.upsert_daily_pnl(pnl).await
    }

    async fn insert_breaker(&self, event: &NewBreakerEvent) -> Result<CircuitBreakerEvent> {
        self.insert_breaker.pass().await;
        self.inner.insert_breaker(event).await
    }

    async fn active_breakers(&self) -> Result<Vec<CircuitBreakerEvent>> {
        self.inner.active_breakers().await
    }

    async fn reset_breaker(&self, id: i64, at: DateTime<Utc>) -> Result<Option<CircuitBreakerEvent>> {
        self.inner.reset_breaker(id, at).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}
