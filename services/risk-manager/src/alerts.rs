//! Risk alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "CRITICAL" => Self::Critical,
            "WARNING" => Self::Warning,
            _ => Self::Info,
        }
    }
}

/// What raised the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    OrderRejected,
    CircuitBreaker,
    CircuitBreakerReset,
    LimitsUpdated,
    PositionLimitUpdated,
    #[serde(other)]
    Other,
}

impl AlertType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderRejected => "ORDER_REJECTED",
            Self::CircuitBreaker => "CIRCUIT_BREAKER",
            Self::CircuitBreakerReset => "CIRCUIT_BREAKER_RESET",
            Self::LimitsUpdated => "LIMITS_UPDATED",
            Self::PositionLimitUpdated => "POSITION_LIMIT_UPDATED",
            Self::Other => "OTHER",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        serde_json::from_value(Value::String(s.to_string())).unwrap_or(Self::Other)
    }
}

/// Persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: i64,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub symbol: Option<String>,
    pub message: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Alert about to be recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub symbol: Option<String>,
    pub message: String,
    pub metadata: Value,
}

impl NewAlert {
    pub fn new(alert_type: AlertType, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            severity,
            symbol: None,
            message: message.into(),
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Materialize without a store round trip
    #[must_use]
    pub fn into_alert(self, id: i64, created_at: DateTime<Utc>) -> RiskAlert {
        RiskAlert {
            id,
            alert_type: self.alert_type,
            severity: self.severity,
            symbol: self.symbol,
            message: self.message,
            metadata: self.metadata,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_round_trip() {
        for t in [
            AlertType::OrderRejected,
            AlertType::CircuitBreaker,
            AlertType::CircuitBreakerReset,
            AlertType::LimitsUpdated,
            AlertType::PositionLimitUpdated,
        ] {
            assert_eq!(AlertType::parse(t.as_str()), t);
        }
        assert_eq!(AlertType::parse("SOMETHING_NEW"), AlertType::Other);
        assert_eq!(AlertSeverity::parse("WARNING"), AlertSeverity::Warning);
    }
}
