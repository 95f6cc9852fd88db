//! Risk limits
//!
//! Global limits are versioned: every update appends a new record and the
//! highest id is the active one. Per-symbol position limits override the
//! global position size.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Global risk limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Version id, 0 for the built-in defaults
    pub id: i64,
    /// Maximum absolute position per symbol (units)
    pub max_position_size: f64,
    /// Maximum single order value (quantity x price)
    pub max_order_size: f64,
    /// Daily loss that trips the breaker (positive number)
    pub daily_loss_limit: f64,
    /// Maximum portfolio concentration in percent
    pub max_portfolio_concentration: f64,
    pub max_leverage: f64,
    pub max_orders_per_second: u32,
    /// When false every order is admitted
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            max_position_size: 10_000.0,
            max_order_size: 1_000.0,
            daily_loss_limit: 5_000.0,
            max_portfolio_concentration: 25.0,
            max_leverage: 2.0,
            max_orders_per_second: 10,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of the global limits. Only present fields change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskLimitsUpdate {
    pub max_position_size: Option<f64>,
    pub max_order_size: Option<f64>,
    pub daily_loss_limit: Option<f64>,
    pub max_portfolio_concentration: Option<f64>,
    pub max_leverage: Option<f64>,
    pub max_orders_per_second: Option<u32>,
    pub enabled: Option<bool>,
}

impl RiskLimitsUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max_position_size.is_none()
            && self.max_order_size.is_none()
            && self.daily_loss_limit.is_none()
            && self.max_portfolio_concentration.is_none()
            && self.max_leverage.is_none()
            && self.max_orders_per_second.is_none()
            && self.enabled.is_none()
    }

    /// Reject negative or non-finite figures
    pub fn validate(&self) -> Result<(), String> {
        let figures = [
            ("max_position_size", self.max_position_size),
            ("max_order_size", self.max_order_size),
            ("daily_loss_limit", self.daily_loss_limit),
            ("max_portfolio_concentration", self.max_portfolio_concentration),
            ("max_leverage", self.max_leverage),
        ];
        for (name, value) in figures {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("{name} must be a non-negative number, got {v}"));
                }
            }
        }
        Ok(())
    }

    /// Overlay onto `base`. The result is a new version, id unassigned.
    #[must_use]
    pub fn apply(&self, base: &RiskLimits) -> RiskLimits {
        let now = Utc::now();
        RiskLimits {
            id: 0,
            max_position_size: self.max_position_size.unwrap_or(base.max_position_size),
            max_order_size: self.max_order_size.unwrap_or(base.max_order_size),
            daily_loss_limit: self.daily_loss_limit.unwrap_or(base.daily_loss_limit),
            max_portfolio_concentration: self
                .max_portfolio_concentration
                .unwrap_or(base.max_portfolio_concentration),
            max_leverage: self.max_leverage.unwrap_or(base.max_leverage),
            max_orders_per_second: self
                .max_orders_per_second
                .unwrap_or(base.max_orders_per_second),
            enabled: self.enabled.unwrap_or(base.enabled),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-symbol position limit override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLimit {
    pub id: i64,
    pub symbol: String,
    pub max_position: f64,
    pub max_concentration_pct: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionLimitUpdate {
    pub max_position: Option<f64>,
    pub max_concentration_pct: Option<f64>,
}

/// Limit that applies to a symbol, flagged when it comes from the global limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePositionLimit {
    pub symbol: String,
    pub max_position: f64,
    pub max_concentration_pct: f64,
    pub is_default: bool,
}

impl EffectivePositionLimit {
    #[must_use]
    pub fn resolve(symbol: &str, limits: &RiskLimits, override_: Option<&PositionLimit>) -> Self {
        match override_ {
            Some(limit) => Self {
                symbol: limit.symbol.clone(),
                max_position: limit.max_position,
                max_concentration_pct: limit.max_concentration_pct,
                is_default: false,
            },
            None => Self {
                symbol: symbol.to_string(),
                max_position: limits.max_position_size,
                max_concentration_pct: limits.max_portfolio_concentration,
                is_default: true,
            },
        }
    }
}
