//! Order admission tests: validate, record pending, forward, settle

mod common;

use common::{GatewayFixture, MockEngine, ack, flat_engine, link_down, permissive_limits, position};
use pretty_assertions::assert_eq;
use risk_manager::admission::OrderTicket;
use risk_manager::circuit_breaker::DAILY_LOSS_TRIGGER;
use risk_manager::{RiskError, RiskLimitsUpdate, SubmitOutcome};
use services_common::{CancelAck, OrderStatus, OrderType, Side};

fn ticket(symbol: &str, side: Side, quantity: f64, price: f64) -> OrderTicket {
    OrderTicket {
        client_order_id: None,
        symbol: symbol.to_string(),
        side,
        quantity,
        price: Some(price),
        order_type: None,
    }
}

fn long_engine() -> MockEngine {
    let mut engine = MockEngine::new();
    engine
        .expect_positions()
        .returning(|| Ok(vec![position("AAPL", 100.0, 50.0, 0.0)]));
    engine
}

#[tokio::test]
async fn test_fill_books_realized_pnl() {
    let mut engine = long_engine();
    engine
        .expect_submit_order()
        .withf(|order| order.symbol == "AAPL" && order.side == Side::Sell && order.client_order_id.starts_with("ORD-"))
        .times(1)
        .returning(|order| Ok(ack(&order.client_order_id, OrderStatus::Filled, 40.0, 55.0, 0.0)));
    let gw = GatewayFixture::new(engine, permissive_limits()).await;

    let outcome = gw.gateway.submit(&ticket("AAPL", Side::Sell, 40.0, 55.0), "desk-a").await.unwrap();

    let SubmitOutcome::Accepted { order_id, ack, realized_pnl } = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };
    assert!(order_id.starts_with("ORD-"));
    assert_eq!(ack.status, OrderStatus::Filled);
    assert!((realized_pnl - 200.0).abs() < 1e-9);
    assert!((gw.fx.risk.daily_pnl().realized_pnl - 200.0).abs() < 1e-9);
    assert!(gw.ledger.all_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resting_order_stays_pending() {
    let mut engine = flat_engine();
    engine
        .expect_submit_order()
        .returning(|order| Ok(ack(&order.client_order_id, OrderStatus::New, 0.0, 0.0, order.quantity)));
    let gw = GatewayFixture::new(engine, permissive_limits()).await;

    let mut resting = ticket("MSFT", Side::Buy, 25.0, 300.0);
    resting.client_order_id = Some("client-1".to_string());
    let outcome = gw.gateway.submit(&resting, "desk-a").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted { ref order_id, .. } if order_id == "client-1"));

    let effective = gw.ledger.effective_position("MSFT").await;
    assert!((effective.pending_buys - 25.0).abs() < f64::EPSILON);
    assert!((effective.total - 25.0).abs() < f64::EPSILON);
    assert!(gw.fx.risk.daily_pnl().realized_pnl.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_pending_counts_toward_next_order() {
    let mut engine = flat_engine();
    engine
        .expect_submit_order()
        .times(1)
        .returning(|order| Ok(ack(&order.client_order_id, OrderStatus::New, 0.0, 0.0, order.quantity)));
    let gw = GatewayFixture::new(
        engine,
        RiskLimitsUpdate {
            max_position_size: Some(100.0),
            ..permissive_limits()
        },
    )
    .await;

    gw.gateway.submit(&ticket("AAPL", Side::Buy, 80.0, 1.0), "desk-a").await.unwrap();
    let outcome = gw.gateway.submit(&ticket("AAPL", Side::Buy, 30.0, 1.0), "desk-a").await.unwrap();

    let SubmitOutcome::Rejected(decision) = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert_eq!(
        decision.rejection_reason.as_deref(),
        Some("position would exceed max position size: 110.00 > 100.00")
    );
}

#[tokio::test]
async fn test_transport_failure_clears_pending() {
    let mut engine = flat_engine();
    engine.expect_submit_order().returning(|_| Err(link_down()));
    let gw = GatewayFixture::new(engine, permissive_limits()).await;

    let err = gw
        .gateway
        .submit(&ticket("AAPL", Side::Buy, 10.0, 100.0), "desk-a")
        .await
        .unwrap_err();

    assert!(matches!(err, RiskError::Transport(_)));
    assert!(gw.ledger.all_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_order_never_reaches_engine() {
    let mut engine = flat_engine();
    engine.expect_submit_order().never();
    let gw = GatewayFixture::new(
        engine,
        RiskLimitsUpdate {
            max_order_size: Some(100.0),
            ..permissive_limits()
        },
    )
    .await;

    let outcome = gw.gateway.submit(&ticket("AAPL", Side::Buy, 10.0, 100.0), "desk-a").await.unwrap();

    let SubmitOutcome::Rejected(decision) = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert!(!decision.allowed);
    assert!(gw.ledger.all_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_losing_fill_trips_daily_breaker() {
    let mut engine = long_engine();
    engine
        .expect_submit_order()
        .times(1)
        .returning(|order| Ok(ack(&order.client_order_id, OrderStatus::Filled, 100.0, 45.0, 0.0)));
    let gw = GatewayFixture::new(
        engine,
        RiskLimitsUpdate {
            daily_loss_limit: Some(100.0),
            ..permissive_limits()
        },
    )
    .await;

    gw.gateway.submit(&ticket("AAPL", Side::Sell, 100.0, 45.0), "desk-a").await.unwrap();

    let status = gw.fx.risk.circuit_breaker_status();
    assert!(status.active);
    assert_eq!(status.events[0].trigger_type, DAILY_LOSS_TRIGGER);
    assert!((status.events[0].trigger_value + 500.0).abs() < 1e-9);

    let outcome = gw.gateway.submit(&ticket("AAPL", Side::Sell, 1.0, 45.0), "desk-a").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Rejected(ref d) if d.rejection_reason.as_deref() == Some("circuit breaker active")));
}

#[tokio::test]
async fn test_market_order_without_price() {
    let mut engine = flat_engine();
    engine
        .expect_submit_order()
        .withf(|order| order.order_type == OrderType::Market && order.price.abs() < f64::EPSILON)
        .returning(|order| Ok(ack(&order.client_order_id, OrderStatus::New, 0.0, 0.0, order.quantity)));
    let gw = GatewayFixture::new(engine, permissive_limits()).await;

    let market = OrderTicket {
        price: None,
        order_type: Some(OrderType::Market),
        ..ticket("AAPL", Side::Buy, 5.0, 0.0)
    };
    let outcome = gw.gateway.submit(&market, "desk-a").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
}

#[tokio::test]
async fn test_invalid_ticket_is_refused_early() {
    let mut engine = MockEngine::new();
    engine.expect_submit_order().never();
    engine.expect_positions().never();
    let gw = GatewayFixture::new(engine, permissive_limits()).await;

    for bad in [
        ticket("AAPL", Side::Buy, 0.0, 10.0),
        ticket("  ", Side::Buy, 1.0, 10.0),
        ticket("AAPL", Side::Buy, 1.0, -1.0),
        OrderTicket {
            price: None,
            ..ticket("AAPL", Side::Buy, 1.0, 0.0)
        },
    ] {
        let err = gw.gateway.submit(&bad, "desk-a").await.unwrap_err();
        assert!(matches!(err, RiskError::InvalidOrder { .. }), "{bad:?} gave {err}");
    }
}

#[tokio::test]
async fn test_cancel_clears_pending() {
    let mut engine = flat_engine();
    engine
        .expect_submit_order()
        .returning(|order| Ok(ack(&order.client_order_id, OrderStatus::New, 0.0, 0.0, order.quantity)));
    engine.expect_cancel_order().times(1).returning(|id| {
        Ok(CancelAck {
            order_id: id.to_string(),
            message: Some("cancelled".to_string()),
        })
    });
    let gw = GatewayFixture::new(engine, permissive_limits()).await;

    let mut resting = ticket("AAPL", Side::Buy, 5.0, 10.0);
    resting.client_order_id = Some("client-9".to_string());
    gw.gateway.submit(&resting, "desk-a").await.unwrap();
    assert_eq!(gw.ledger.all_pending().await.unwrap().len(), 1);

    let cancelled = gw.gateway.cancel("client-9").await.unwrap();
    assert_eq!(cancelled.order_id, "client-9");
    assert!(gw.ledger.all_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_failure_keeps_pending() {
    let mut engine = flat_engine();
    engine
        .expect_submit_order()
        .returning(|order| Ok(ack(&order.client_order_id, OrderStatus::New, 0.0, 0.0, order.quantity)));
    engine.expect_cancel_order().returning(|_| Err(link_down()));
    let gw = GatewayFixture::new(engine, permissive_limits()).await;

    let mut resting = ticket("AAPL", Side::Buy, 5.0, 10.0);
    resting.client_order_id = Some("client-9".to_string());
    gw.gateway.submit(&resting, "desk-a").await.unwrap();

    assert!(matches!(gw.gateway.cancel("client-9").await, Err(RiskError::Transport(_))));
    assert_eq!(gw.ledger.all_pending().await.unwrap().len(), 1);
}
