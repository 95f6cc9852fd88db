//! Order admission
//!
//! The path every client order takes: normalise, validate against the risk
//! snapshot, record as pending, forward to the engine, then settle the
//! pending entry and book any fill.

use crate::error::{RiskError, RiskResult};
use crate::metrics;
use crate::pnl::realized_pnl;
use crate::position::PositionLedger;
use crate::{RiskDecision, RiskManager};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use services_common::{CancelAck, OrderAck, OrderRequest, OrderType, Side};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Order as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub order_type: Option<OrderType>,
}

impl OrderTicket {
    /// Check the ticket is well formed and turn it into an engine request.
    /// The order id is left empty when the client supplied none.
    pub fn normalise(&self) -> RiskResult<OrderRequest> {
        let symbol = self.symbol.trim();
        if symbol.is_empty() {
            return Err(RiskError::invalid_order("symbol is required"));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(RiskError::invalid_order("quantity must be positive"));
        }
        let order_type = self.order_type.unwrap_or_default();
        let price = self.price.unwrap_or(0.0);
        if !price.is_finite() || price < 0.0 {
            return Err(RiskError::invalid_order("price must be a non-negative number"));
        }
        if order_type == OrderType::Limit && price <= 0.0 {
            return Err(RiskError::invalid_order("limit orders require a positive price"));
        }
        Ok(OrderRequest {
            client_order_id: self.client_order_id.clone().unwrap_or_default(),
            symbol: symbol.to_string(),
            side: self.side,
            quantity: self.quantity,
            price,
            order_type,
        })
    }
}

/// Result of an admission attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Forwarded to the engine, which acknowledged it
    Accepted {
        order_id: String,
        ack: OrderAck,
        realized_pnl: f64,
    },
    /// Refused by a risk check before reaching the engine
    Rejected(RiskDecision),
}

fn generate_order_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("ORD-{nanos}")
}

/// Order admission in front of the engine
pub struct OrderGateway {
    risk: Arc<RiskManager>,
    ledger: Arc<PositionLedger>,
}

impl OrderGateway {
    pub fn new(risk: Arc<RiskManager>, ledger: Arc<PositionLedger>) -> Self {
        Self { risk, ledger }
    }

    /// Validate and forward one order on behalf of `identity`.
    ///
    /// A risk rejection is `Ok(Rejected)`. A malformed ticket or an
    /// unreachable engine is an error.
    pub async fn submit(&self, ticket: &OrderTicket, identity: &str) -> RiskResult<SubmitOutcome> {
        let mut order = ticket.normalise()?;

        let position = self.ledger.effective_position(&order.symbol).await;
        if let Some(engine_error) = &position.engine_error {
            debug!(symbol = %order.symbol, %engine_error, "Validating against last known position");
        }

        let decision = self.risk.validate(&order, position.total, identity).await;
        if !decision.allowed {
            return Ok(SubmitOutcome::Rejected(decision));
        }

        if order.client_order_id.is_empty() {
            order.client_order_id = generate_order_id();
        }
        let order_id = order.client_order_id.clone();

        if let Err(e) = self
            .ledger
            .add_pending(&order.symbol, order.side, &order_id, order.quantity)
            .await
        {
            warn!(order_id, error = %e, "Could not record pending order");
        }

        let started = Instant::now();
        let result = self.ledger.engine().submit_order(&order).await;
        metrics::observe_engine_latency("order", started.elapsed().as_secs_f64());

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                error!(order_id, symbol = %order.symbol, error = %e, "Order submission failed");
                metrics::record_submission("failed");
                self.settle(&order, &order_id).await;
                return Err(RiskError::Transport(e));
            }
        };

        metrics::record_submission(ack.status.as_str());
        info!(
            order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            status = ack.status.as_str(),
            fill_qty = ack.fill_qty,
            "Order submitted"
        );

        if ack.status.clears_pending() {
            self.settle(&order, &order_id).await;
        }

        let mut realized = 0.0;
        if ack.fill_qty > 0.0 {
            realized = realized_pnl(
                position.filled,
                position.avg_price,
                order.side,
                ack.fill_qty,
                ack.fill_price,
            );
            let daily = self.risk.record_realized_pnl(realized).await;
            if let Err(e) = self.risk.evaluate_daily_loss(&daily).await {
                error!(error = %e, "Daily loss evaluation failed");
            }
        }

        Ok(SubmitOutcome::Accepted {
            order_id,
            ack,
            realized_pnl: realized,
        })
    }

    async fn settle(&self, order: &OrderRequest, order_id: &str) {
        if let Err(e) = self
            .ledger
            .remove_pending(&order.symbol, order.side, order_id)
            .await
        {
            warn!(order_id, error = %e, "Could not clear pending order");
        }
    }

    /// Cancel an order at the engine and drop it from the pending ledger
    pub async fn cancel(&self, order_id: &str) -> RiskResult<CancelAck> {
        let ack = self.ledger.engine().cancel_order(order_id).await?;
        match self.ledger.forget_order(order_id).await {
            Ok(removed) => debug!(order_id, removed, "Cancelled order cleared from ledger"),
            Err(e) => warn!(order_id, error = %e, "Could not clear cancelled order from ledger"),
        }
        info!(order_id, "Order cancelled");
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(order_type: Option<OrderType>, price: Option<f64>) -> OrderTicket {
        OrderTicket {
            client_order_id: None,
            symbol: " AAPL ".to_string(),
            side: Side::Buy,
            quantity: 10.0,
            price,
            order_type,
        }
    }

    #[test]
    fn test_limit_is_default_and_needs_price() {
        let err = ticket(None, None).normalise().unwrap_err();
        assert!(matches!(err, RiskError::InvalidOrder { .. }));

        let order = ticket(None, Some(150.0)).normalise().unwrap();
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.symbol, "AAPL");
    }

    #[test]
    fn test_market_order_without_price() {
        let order = ticket(Some(OrderType::Market), None).normalise().unwrap();
        assert_eq!(order.order_type, OrderType::Market);
        assert!(order.price.abs() < f64::EPSILON);
    }

    #[test]
    fn test_generated_ids_are_prefixed() {
        assert!(generate_order_id().starts_with("ORD-"));
    }
}
