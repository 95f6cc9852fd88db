//! Pre-trade validation tests
//!
//! Check ordering, per-symbol overrides, rate limiting and the alerts a
//! rejection leaves behind.

mod common;

use common::{RiskFixture, next_event_of, order, permissive_limits};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use risk_manager::alerts::{AlertSeverity, AlertType};
use risk_manager::{PositionLimitUpdate, RiskLimitsUpdate};
use rstest::*;
use services_common::Side;

#[tokio::test]
async fn test_order_size_checked_before_position() {
    let fx = RiskFixture::new()
        .await
        .limits(RiskLimitsUpdate {
            max_order_size: Some(1_000.0),
            max_position_size: Some(5_000.0),
            ..permissive_limits()
        })
        .await;

    let decision = fx
        .risk
        .validate(&order("XYZ", Side::Buy, 2_000.0, 1.0), 4_000.0, "desk-a")
        .await;

    assert!(!decision.allowed);
    assert_eq!(
        decision.rejection_reason.as_deref(),
        Some("order size exceeds limit: $2000.00 > $1000.00")
    );
}

#[tokio::test]
async fn test_position_limit_applies_to_effective_position() {
    let fx = RiskFixture::new()
        .await
        .limits(RiskLimitsUpdate {
            max_position_size: Some(5_000.0),
            ..permissive_limits()
        })
        .await;

    let decision = fx
        .risk
        .validate(&order("XYZ", Side::Buy, 2_000.0, 1.0), 4_000.0, "desk-a")
        .await;
    assert_eq!(
        decision.rejection_reason.as_deref(),
        Some("position would exceed max position size: 6000.00 > 5000.00")
    );

    // Selling out of a long reduces exposure
    let decision = fx
        .risk
        .validate(&order("XYZ", Side::Sell, 2_000.0, 1.0), 4_000.0, "desk-a")
        .await;
    assert!(decision.allowed, "{decision:?}");

    let decision = fx
        .risk
        .validate(&order("XYZ", Side::Sell, 2_000.0, 1.0), -4_000.0, "desk-a")
        .await;
    assert!(!decision.allowed);
}

#[rstest]
#[case::small_buy(Side::Buy, 1.0, 10.0)]
#[case::small_sell(Side::Sell, 1.0, 10.0)]
#[case::market_sized(Side::Buy, 5.0, 0.0)]
#[tokio::test]
async fn test_breaker_blocks_every_order(#[case] side: Side, #[case] quantity: f64, #[case] price: f64) {
    let fx = RiskFixture::new().await.limits(permissive_limits()).await;
    fx.risk.trigger_circuit_breaker("MANUAL", 0.0, 0.0).await.unwrap();

    let decision = fx.risk.validate(&order("AAPL", side, quantity, price), 0.0, "desk-a").await;

    assert!(!decision.allowed);
    assert_eq!(decision.rejection_reason.as_deref(), Some("circuit breaker active"));
    assert_eq!(decision.alerts, vec!["circuit breaker active".to_string()]);
}

#[tokio::test]
async fn test_disabled_limits_admit_everything() {
    let fx = RiskFixture::new()
        .await
        .limits(RiskLimitsUpdate {
            max_order_size: Some(1.0),
            max_position_size: Some(1.0),
            enabled: Some(false),
            ..Default::default()
        })
        .await;
    fx.risk.trigger_circuit_breaker("MANUAL", 0.0, 0.0).await.unwrap();

    let decision = fx
        .risk
        .validate(&order("AAPL", Side::Buy, 1e6, 1e3), 1e9, "desk-a")
        .await;

    assert!(decision.allowed);
    assert!(decision.rejection_reason.is_none());
}

#[tokio::test]
async fn test_daily_loss_then_breaker_then_reset() {
    let fx = RiskFixture::new()
        .await
        .limits(RiskLimitsUpdate {
            daily_loss_limit: Some(5_000.0),
            ..permissive_limits()
        })
        .await;
    let ticket = order("AAPL", Side::Buy, 1.0, 10.0);

    let daily = fx.risk.update_daily_pnl(-3_000.0, -2_500.0).await;
    let decision = fx.risk.validate(&ticket, 0.0, "desk-a").await;
    assert_eq!(decision.rejection_reason.as_deref(), Some("daily loss limit reached"));

    let breaker = fx.risk.evaluate_daily_loss(&daily).await.unwrap().unwrap();
    let decision = fx.risk.validate(&ticket, 0.0, "desk-a").await;
    assert_eq!(decision.rejection_reason.as_deref(), Some("circuit breaker active"));

    // The day stays flagged, so the loss check does not re-block after a reset
    fx.risk.reset_circuit_breaker(breaker.id).await.unwrap();
    let decision = fx.risk.validate(&ticket, 0.0, "desk-a").await;
    assert!(decision.allowed, "{decision:?}");
}

#[tokio::test]
async fn test_symbol_override_replaces_global_limit() {
    let fx = RiskFixture::new()
        .await
        .limits(RiskLimitsUpdate {
            max_position_size: Some(1_000.0),
            ..permissive_limits()
        })
        .await;

    fx.risk
        .set_position_limit(
            "TSLA",
            PositionLimitUpdate {
                max_position: Some(50.0),
                max_concentration_pct: None,
            },
        )
        .await
        .unwrap();

    let tsla = fx.risk.validate(&order("TSLA", Side::Buy, 60.0, 1.0), 0.0, "desk-a").await;
    assert_eq!(
        tsla.rejection_reason.as_deref(),
        Some("position would exceed max position size: 60.00 > 50.00")
    );

    let aapl = fx.risk.validate(&order("AAPL", Side::Buy, 60.0, 1.0), 0.0, "desk-a").await;
    assert!(aapl.allowed);

    let limit = fx.risk.position_limit("TSLA");
    assert!(!limit.is_default);
    assert!((limit.max_concentration_pct - 25.0).abs() < f64::EPSILON);
    assert!(fx.risk.position_limit("AAPL").is_default);
}

#[tokio::test]
async fn test_rejection_is_recorded_and_broadcast() {
    let fx = RiskFixture::new()
        .await
        .limits(RiskLimitsUpdate {
            max_order_size: Some(100.0),
            ..permissive_limits()
        })
        .await;
    let mut subscription = fx.subscribe().await;

    let mut ticket = order("MSFT", Side::Sell, 10.0, 50.0);
    ticket.client_order_id = "client-7".to_string();
    let decision = fx.risk.validate(&ticket, 0.0, "desk-a").await;
    assert!(!decision.allowed);

    let alerts = fx.risk.recent_alerts(Some(1)).await.unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.alert_type, AlertType::OrderRejected);
    assert_eq!(alert.severity, AlertSeverity::Warning);
    assert_eq!(alert.symbol.as_deref(), Some("MSFT"));
    assert_eq!(alert.metadata["client_order_id"], "client-7");
    assert_eq!(alert.metadata["side"], "SELL");
    assert_eq!(alert.metadata["reason"], "order size exceeds limit: $500.00 > $100.00");

    let event = next_event_of(&mut subscription, "RISK_ALERT").await;
    assert_eq!(event["data"]["alert_type"], "ORDER_REJECTED");
    assert_eq!(event["data"]["id"], alert.id);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_rejects_past_budget() {
    let fx = RiskFixture::new()
        .await
        .limits(RiskLimitsUpdate {
            max_orders_per_second: Some(2),
            ..permissive_limits()
        })
        .await;
    let ticket = order("AAPL", Side::Buy, 1.0, 1.0);

    assert!(fx.risk.validate(&ticket, 0.0, "desk-a").await.allowed);
    assert!(fx.risk.validate(&ticket, 0.0, "desk-a").await.allowed);
    let third = fx.risk.validate(&ticket, 0.0, "desk-a").await;
    assert_eq!(
        third.rejection_reason.as_deref(),
        Some("rate limit exceeded: 3 orders in window (limit: 2)")
    );

    // Budgets are per identity
    assert!(fx.risk.validate(&ticket, 0.0, "desk-b").await.allowed);
}

#[tokio::test]
async fn test_rate_check_fails_closed_without_cache() {
    let fx = RiskFixture::new().await.limits(permissive_limits()).await;
    fx.cache.set_offline(true);

    let decision = fx.risk.validate(&order("AAPL", Side::Buy, 1.0, 1.0), 0.0, "desk-a").await;

    assert!(!decision.allowed);
    assert_eq!(decision.rejection_reason.as_deref(), Some("rate limit check unavailable"));
}

#[tokio::test]
async fn test_invalid_limits_are_refused() {
    let fx = RiskFixture::new().await;
    let versions = fx.store.limits_versions();

    let result = fx
        .risk
        .update_limits(RiskLimitsUpdate {
            max_order_size: Some(-5.0),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(risk_manager::RiskError::InvalidLimits { .. })));
    assert_eq!(fx.store.limits_versions(), versions);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_position_check_matches_limit(
        current in -2_000.0f64..2_000.0,
        quantity in 0.01f64..2_000.0,
        buy in any::<bool>(),
    ) {
        let side = if buy { Side::Buy } else { Side::Sell };
        let decision = tokio_test::block_on(async {
            let fx = RiskFixture::new()
                .await
                .limits(RiskLimitsUpdate {
                    max_position_size: Some(1_500.0),
                    ..permissive_limits()
                })
                .await;
            fx.risk.validate(&order("PROP", side, quantity, 0.01), current, "prop").await
        });

        let next = if buy { current + quantity } else { current - quantity };
        prop_assert_eq!(decision.allowed, next.abs() <= 1_500.0);
    }
}
