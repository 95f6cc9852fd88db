//! Effective position and pending-order ledger tests

mod common;

use common::{MockEngine, init_test_logging, link_down, position};
use pretty_assertions::assert_eq;
use risk_manager::PositionLedger;
use risk_manager::cache::{FastCache, KeyTtl, MemoryCache};
use risk_manager::position::{PENDING_TTL, POSITIONS_CACHE_KEY, pending_key};
use services_common::{EngineApi, Side};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

fn ledger(engine: MockEngine) -> (PositionLedger, Arc<MemoryCache>) {
    init_test_logging();
    let cache = Arc::new(MemoryCache::new());
    let engine: Arc<dyn EngineApi> = Arc::new(engine);
    (PositionLedger::new(engine, cache.clone()), cache)
}

fn engine_holding(symbol: &'static str, quantity: f64, avg_price: f64) -> MockEngine {
    let mut engine = MockEngine::new();
    engine
        .expect_positions()
        .returning(move || Ok(vec![position(symbol, quantity, avg_price, 0.0)]));
    engine
}

/// Engine that answers until `down` is set
fn flaky_engine(down: Arc<AtomicBool>, symbol: &'static str, quantity: f64) -> MockEngine {
    let mut engine = MockEngine::new();
    engine.expect_positions().returning(move || {
        if down.load(Ordering::SeqCst) {
            Err(link_down())
        } else {
            Ok(vec![position(symbol, quantity, 100.0, 0.0)])
        }
    });
    engine
}

#[tokio::test]
async fn test_effective_position_sums_pending() {
    let (ledger, _) = ledger(engine_holding("AAPL", 100.0, 150.0));

    ledger.add_pending("AAPL", Side::Buy, "o-1", 20.0).await.unwrap();
    ledger.add_pending("AAPL", Side::Buy, "o-2", 5.0).await.unwrap();
    ledger.add_pending("AAPL", Side::Sell, "o-3", 30.0).await.unwrap();
    ledger.add_pending("MSFT", Side::Buy, "o-4", 999.0).await.unwrap();

    let effective = ledger.effective_position("AAPL").await;
    assert!((effective.filled - 100.0).abs() < f64::EPSILON);
    assert!((effective.avg_price - 150.0).abs() < f64::EPSILON);
    assert!((effective.pending_buys - 25.0).abs() < f64::EPSILON);
    assert!((effective.pending_sells - 30.0).abs() < f64::EPSILON);
    assert!((effective.total - 95.0).abs() < f64::EPSILON);
    assert!(effective.engine_error.is_none());

    assert!(ledger.remove_pending("AAPL", Side::Buy, "o-1").await.unwrap());
    let effective = ledger.effective_position("AAPL").await;
    assert!((effective.total - 75.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_remove_pending_is_idempotent() {
    let (ledger, _) = ledger(engine_holding("AAPL", 0.0, 0.0));
    ledger.add_pending("AAPL", Side::Sell, "o-1", 10.0).await.unwrap();

    assert!(ledger.remove_pending("AAPL", Side::Sell, "o-1").await.unwrap());
    assert!(!ledger.remove_pending("AAPL", Side::Sell, "o-1").await.unwrap());
    assert!(!ledger.remove_pending("AAPL", Side::Buy, "o-1").await.unwrap());

    let effective = ledger.effective_position("AAPL").await;
    assert!(effective.pending_sells.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_absent_symbol_is_flat() {
    let (ledger, _) = ledger(engine_holding("AAPL", 100.0, 150.0));
    let effective = ledger.effective_position("NVDA").await;
    assert!(effective.total.abs() < f64::EPSILON);
    assert!(effective.engine_error.is_none());
}

#[tokio::test]
async fn test_engine_failure_uses_last_known() {
    let down = Arc::new(AtomicBool::new(false));
    let (ledger, _) = ledger(flaky_engine(Arc::clone(&down), "AAPL", 40.0));

    assert!((ledger.effective_position("AAPL").await.total - 40.0).abs() < f64::EPSILON);
    down.store(true, Ordering::SeqCst);
    ledger.add_pending("AAPL", Side::Buy, "o-1", 2.0).await.unwrap();

    let effective = ledger.effective_position("AAPL").await;
    assert!((effective.filled - 40.0).abs() < f64::EPSILON);
    assert!((effective.total - 42.0).abs() < f64::EPSILON);
    assert!(effective.engine_error.is_some());
}

#[tokio::test]
async fn test_engine_failure_without_history_is_zero() {
    let mut engine = MockEngine::new();
    engine.expect_positions().returning(|| Err(link_down()));
    let (ledger, _) = ledger(engine);

    let effective = ledger.effective_position("AAPL").await;
    assert!(effective.filled.abs() < f64::EPSILON);
    assert!(
        effective
            .engine_error
            .as_deref()
            .is_some_and(|e| e.contains("connection refused"))
    );
}

#[tokio::test]
async fn test_unreadable_ledger_counts_zero() {
    let (ledger, cache) = ledger(engine_holding("AAPL", 10.0, 1.0));
    ledger.add_pending("AAPL", Side::Buy, "o-1", 5.0).await.unwrap();
    cache.set_offline(true);

    let effective = ledger.effective_position("AAPL").await;
    assert!((effective.total - 10.0).abs() < f64::EPSILON);
    assert!(ledger.add_pending("AAPL", Side::Buy, "o-2", 1.0).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pending_entries_expire_after_a_day() {
    let (ledger, cache) = ledger(engine_holding("AAPL", 0.0, 0.0));
    ledger.add_pending("AAPL", Side::Buy, "o-1", 7.0).await.unwrap();

    match cache.ttl(&pending_key("AAPL", Side::Buy)).await.unwrap() {
        KeyTtl::Expires(left) => assert_eq!(left, PENDING_TTL),
        other => panic!("unexpected ttl {other:?}"),
    }

    tokio::time::advance(PENDING_TTL - Duration::from_secs(1)).await;
    assert!((ledger.effective_position("AAPL").await.pending_buys - 7.0).abs() < f64::EPSILON);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(ledger.effective_position("AAPL").await.pending_buys.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_cleanup_removes_keys_without_expiry() {
    let (ledger, cache) = ledger(engine_holding("AAPL", 0.0, 0.0));
    ledger.add_pending("AAPL", Side::Buy, "o-1", 1.0).await.unwrap();
    ledger.add_pending("MSFT", Side::Sell, "o-2", 1.0).await.unwrap();
    cache.persist(&pending_key("AAPL", Side::Buy));

    assert_eq!(ledger.cleanup_expired_pending().await.unwrap(), 1);
    assert_eq!(ledger.cleanup_expired_pending().await.unwrap(), 0);

    let pending = ledger.all_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].symbol, "MSFT");
    assert_eq!(pending[0].side, Side::Sell);
    assert_eq!(pending[0].order_id, "o-2");
}

#[tokio::test]
async fn test_forget_order_clears_every_side() {
    let (ledger, _) = ledger(engine_holding("AAPL", 0.0, 0.0));
    ledger.add_pending("AAPL", Side::Buy, "o-1", 1.0).await.unwrap();
    ledger.add_pending("AAPL", Side::Buy, "o-2", 2.0).await.unwrap();

    assert_eq!(ledger.forget_order("o-1").await.unwrap(), 1);
    assert_eq!(ledger.forget_order("o-1").await.unwrap(), 0);
    assert!((ledger.effective_position("AAPL").await.pending_buys - 2.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_positions_view_is_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = MockEngine::new();
    let counter = Arc::clone(&calls);
    engine.expect_positions().returning(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![position("AAPL", 5.0, 10.0, 1.5)])
    });
    let (ledger, _) = ledger(engine);

    let first = ledger.positions_view().await;
    let second = ledger.positions_view().await;
    assert_eq!(first, second);
    assert!(!first.is_degraded());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    ledger.positions_view().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_positions_view_degrades_when_engine_down() {
    let mut engine = MockEngine::new();
    engine.expect_positions().returning(|| Err(link_down()));
    let (ledger, cache) = ledger(engine);

    let view = ledger.positions_view().await;
    assert!(view.is_degraded());
    assert_eq!(view.status, "disconnected");
    assert!(view.positions.is_empty());
    assert!(view.error.is_some());

    match cache.ttl(POSITIONS_CACHE_KEY).await.unwrap() {
        KeyTtl::Expires(left) => assert_eq!(left, Duration::from_secs(30)),
        other => panic!("unexpected ttl {other:?}"),
    }
}
