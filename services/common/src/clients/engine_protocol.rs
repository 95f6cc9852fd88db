//! Typed request and response shapes for the engine wire protocol
//!
//! Each request is one JSON object with a `type` discriminator. Every reply
//! may carry `success`/`error`; replies are decoded once here so the rest of
//! the service never probes untyped maps.

use crate::errors::{TransportError, TransportResult};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
}

impl Side {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// +1 for buys, -1 for sells
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Limit,
    Market,
    Stop,
}

/// Order status reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Rejected,
    #[serde(alias = "CANCELLED")]
    Canceled,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Rejected => "REJECTED",
            Self::Canceled => "CANCELED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Statuses after which the order no longer counts as pending exposure
    #[must_use]
    pub const fn clears_pending(self) -> bool {
        matches!(
            self,
            Self::PartiallyFilled | Self::Filled | Self::Rejected | Self::Canceled
        )
    }
}

/// Order submission payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub order_type: OrderType,
}

/// Requests understood by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum EngineRequest {
    #[serde(rename = "order")]
    Order(OrderRequest),
    #[serde(rename = "positions")]
    Positions,
    #[serde(rename = "account")]
    Account,
    #[serde(rename = "movers")]
    Movers,
    #[serde(rename = "CANCEL_ORDER")]
    CancelOrder { order_id: String },
    #[serde(rename = "GET_OPEN_ORDERS")]
    OpenOrders,
}

impl EngineRequest {
    /// Wire name of the request kind, used for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Order(_) => "order",
            Self::Positions => "positions",
            Self::Account => "account",
            Self::Movers => "movers",
            Self::CancelOrder { .. } => "CANCEL_ORDER",
            Self::OpenOrders => "GET_OPEN_ORDERS",
        }
    }
}

/// Engine acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub fill_price: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub fill_qty: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub remaining_qty: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// One confirmed position held by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnginePosition {
    pub symbol: String,
    #[serde(default, alias = "qty", deserialize_with = "flexible_f64")]
    pub quantity: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub unrealized_pnl: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub avg_price: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PositionsReply {
    #[serde(default)]
    positions: Vec<EnginePosition>,
}

/// Account summary. Money figures arrive as numbers or decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(default, deserialize_with = "flexible_f64")]
    pub cash: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub equity: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub buying_power: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AccountReply {
    #[serde(default)]
    account: AccountSnapshot,
}

/// Top gainers and losers as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Movers {
    #[serde(default)]
    pub gainers: Vec<Value>,
    #[serde(default)]
    pub losers: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MoversReply {
    #[serde(default)]
    movers: Movers,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OrdersReply {
    #[serde(default)]
    orders: Vec<Value>,
}

/// Outcome of a cancel request the engine accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Fail the reply if the engine flagged it unsuccessful
fn ensure_success(reply: &Value) -> TransportResult<()> {
    if reply.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = reply
            .get("error")
            .or_else(|| reply.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unspecified engine error");
        return Err(TransportError::EngineRejected(reason.to_string()));
    }
    Ok(())
}

fn decode<T: for<'de> Deserialize<'de>>(reply: Value) -> TransportResult<T> {
    serde_json::from_value(reply).map_err(TransportError::Decode)
}

/// Decode an order reply. A reply that carries a `status` is an
/// acknowledgement even when `success` is false (engine-side REJECTED).
pub fn decode_order_ack(reply: Value) -> TransportResult<OrderAck> {
    if reply.get("status").is_none() {
        ensure_success(&reply)?;
    }
    decode(reply)
}

pub fn decode_positions(reply: Value) -> TransportResult<Vec<EnginePosition>> {
    ensure_success(&reply)?;
    Ok(decode::<PositionsReply>(reply)?.positions)
}

pub fn decode_account(reply: Value) -> TransportResult<AccountSnapshot> {
    ensure_success(&reply)?;
    Ok(decode::<AccountReply>(reply)?.account)
}

pub fn decode_movers(reply: Value) -> TransportResult<Movers> {
    ensure_success(&reply)?;
    Ok(decode::<MoversReply>(reply)?.movers)
}

pub fn decode_orders(reply: Value) -> TransportResult<Vec<Value>> {
    ensure_success(&reply)?;
    Ok(decode::<OrdersReply>(reply)?.orders)
}

pub fn decode_cancel(reply: Value) -> TransportResult<CancelAck> {
    ensure_success(&reply)?;
    decode(reply)
}

/// Accepts a JSON number, a numeric string, or null (as zero)
fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s.trim().parse::<f64>().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected number, got {other}"))),
    }
}
