//! Daily P&L tracking and realized P&L by cost basis

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use services_common::Side;

/// Calendar day used for P&L tracking (UTC)
#[must_use]
pub fn trading_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// One record per calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
    /// Sticky for the day once set
    pub circuit_breaker_triggered: bool,
    pub updated_at: DateTime<Utc>,
}

impl DailyPnl {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            total_pnl: 0.0,
            circuit_breaker_triggered: false,
            updated_at: Utc::now(),
        }
    }

    /// New figures for the same day. The breaker flag is carried over.
    #[must_use]
    pub fn with_values(&self, realized_pnl: f64, unrealized_pnl: f64) -> Self {
        Self {
            date: self.date,
            realized_pnl,
            unrealized_pnl,
            total_pnl: realized_pnl + unrealized_pnl,
            circuit_breaker_triggered: self.circuit_breaker_triggered,
            updated_at: Utc::now(),
        }
    }

    /// Whether the total loss has reached the daily limit
    #[must_use]
    pub fn breaches(&self, daily_loss_limit: f64) -> bool {
        self.total_pnl <= -daily_loss_limit
    }
}

/// Realized P&L of a fill against the position held before it.
///
/// `prior_qty` is signed (negative for short). Only the quantity that closes
/// existing exposure realizes P&L; fills that open or extend realize zero.
#[must_use]
pub fn realized_pnl(prior_qty: f64, avg_price: f64, side: Side, fill_qty: f64, fill_price: f64) -> f64 {
    if fill_qty <= 0.0 {
        return 0.0;
    }
    match side {
        Side::Sell if prior_qty > 0.0 => fill_qty.min(prior_qty) * (fill_price - avg_price),
        Side::Buy if prior_qty < 0.0 => fill_qty.min(-prior_qty) * (avg_price - fill_price),
        _ => 0.0,
    }
}
