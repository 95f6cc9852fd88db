//! Position ledger
//!
//! Effective exposure per symbol is the engine's filled position plus the
//! quantities of orders sent but not yet known to be terminal. Pending
//! quantities live in the fast cache as one hash per (symbol, side), field
//! per order id, so several instances share one ledger and hash mutations
//! stay atomic.

use crate::cache::{self, FastCache, KeyTtl};
use crate::metrics;
use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use services_common::{EngineApi, EnginePosition, SECS_PER_DAY, Side};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const PENDING_PREFIX: &str = "pending:";
/// Lifetime of a pending hash after its last write
pub const PENDING_TTL: Duration = Duration::from_secs(SECS_PER_DAY);
pub const POSITIONS_CACHE_KEY: &str = "positions_cache";
pub const POSITIONS_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEGRADED_POSITIONS_TTL: Duration = Duration::from_secs(30);

#[must_use]
pub fn pending_key(symbol: &str, side: Side) -> String {
    format!("{PENDING_PREFIX}{symbol}:{side}")
}

fn parse_pending_key(key: &str) -> Option<(String, Side)> {
    let rest = key.strip_prefix(PENDING_PREFIX)?;
    let (symbol, side) = rest.rsplit_once(':')?;
    Some((symbol.to_string(), side.parse().ok()?))
}

/// Exposure for one symbol at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePosition {
    pub symbol: String,
    /// Confirmed position, signed
    pub filled: f64,
    /// Average entry price of the filled position
    pub avg_price: f64,
    pub pending_buys: f64,
    pub pending_sells: f64,
    /// `filled + pending_buys - pending_sells`
    pub total: f64,
    /// Set when the engine read failed and `filled` is the last known value
    pub engine_error: Option<String>,
}

/// One in-flight order as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry {
    pub symbol: String,
    pub side: Side,
    pub order_id: String,
    pub quantity: f64,
}

/// Engine positions as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionsView {
    /// "connected" or "disconnected"
    pub status: String,
    pub positions: Vec<EnginePosition>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PositionsView {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.status != "connected"
    }
}

pub struct PositionLedger {
    engine: Arc<dyn EngineApi>,
    cache: Arc<dyn FastCache>,
    last_known: DashMap<String, EnginePosition>,
}

impl PositionLedger {
    pub fn new(engine: Arc<dyn EngineApi>, cache: Arc<dyn FastCache>) -> Self {
        Self {
            engine,
            cache,
            last_known: DashMap::new(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> Arc<dyn EngineApi> {
        Arc::clone(&self.engine)
    }

    /// Fetch every engine position and refresh the last-known table
    pub async fn engine_positions(&self) -> Result<Vec<EnginePosition>, services_common::TransportError> {
        let started = Instant::now();
        let result = self.engine.positions().await;
        metrics::observe_engine_latency("positions", started.elapsed().as_secs_f64());
        let positions = result?;
        self.last_known
            .retain(|symbol, _| positions.iter().any(|p| &p.symbol == symbol));
        for position in &positions {
            self.last_known
                .insert(position.symbol.clone(), position.clone());
        }
        Ok(positions)
    }

    async fn filled(&self, symbol: &str) -> (f64, f64, Option<String>) {
        match self.engine_positions().await {
            Ok(positions) => positions
                .iter()
                .find(|p| p.symbol == symbol)
                .map_or((0.0, 0.0, None), |p| (p.quantity, p.avg_price, None)),
            Err(e) => {
                let fallback = self
                    .last_known
                    .get(symbol)
                    .map_or((0.0, 0.0), |p| (p.quantity, p.avg_price));
                warn!(symbol, error = %e, filled = fallback.0, "Engine position read failed, using last known");
                (fallback.0, fallback.1, Some(e.to_string()))
            }
        }
    }

    /// Sum of pending quantities for one side. Unreadable ledger counts as zero.
    async fn pending_total(&self, symbol: &str, side: Side) -> f64 {
        match self.cache.hgetall(&pending_key(symbol, side)).await {
            Ok(fields) => fields
                .iter()
                .filter_map(|(_, qty)| qty.parse::<f64>().ok())
                .sum(),
            Err(e) => {
                warn!(symbol, %side, error = %e, "Pending ledger unreadable, counting as zero");
                0.0
            }
        }
    }

    /// Filled position plus net pending quantity. Never fails; an engine
    /// error is reported in the result and the last known fill is used.
    pub async fn effective_position(&self, symbol: &str) -> EffectivePosition {
        let (filled, avg_price, engine_error) = self.filled(symbol).await;
        let pending_buys = self.pending_total(symbol, Side::Buy).await;
        let pending_sells = self.pending_total(symbol, Side::Sell).await;
        EffectivePosition {
            symbol: symbol.to_string(),
            filled,
            avg_price,
            pending_buys,
            pending_sells,
            total: filled + pending_buys - pending_sells,
            engine_error,
        }
    }

    /// Record an in-flight order and (re)start the key's 24h expiry
    pub async fn add_pending(&self, symbol: &str, side: Side, order_id: &str, quantity: f64) -> Result<()> {
        self.cache
            .hset_ex(
                &pending_key(symbol, side),
                order_id,
                &format!("{quantity:.8}"),
                PENDING_TTL,
            )
            .await?;
        debug!(symbol, %side, order_id, quantity, "Pending order added");
        Ok(())
    }

    /// Drop one order from the ledger. Removing an unknown id is a no-op.
    pub async fn remove_pending(&self, symbol: &str, side: Side, order_id: &str) -> Result<bool> {
        let removed = self.cache.hdel(&pending_key(symbol, side), order_id).await?;
        debug!(symbol, %side, order_id, removed, "Pending order removed");
        Ok(removed)
    }

    /// Remove an order id from every ledger key, for callers that only know the id
    pub async fn forget_order(&self, order_id: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.cache.scan_prefix(PENDING_PREFIX).await? {
            if self.cache.hdel(&key, order_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn all_pending(&self) -> Result<Vec<PendingEntry>> {
        let mut entries = Vec::new();
        for key in self.cache.scan_prefix(PENDING_PREFIX).await? {
            let Some((symbol, side)) = parse_pending_key(&key) else {
                continue;
            };
            for (order_id, qty) in self.cache.hgetall(&key).await? {
                entries.push(PendingEntry {
                    symbol: symbol.clone(),
                    side,
                    order_id,
                    quantity: qty.parse().unwrap_or(0.0),
                });
            }
        }
        Ok(entries)
    }

    /// Delete ledger keys whose expiry has lapsed or was never set.
    /// Returns how many keys were removed.
    pub async fn cleanup_expired_pending(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.cache.scan_prefix(PENDING_PREFIX).await? {
            let stale = match self.cache.ttl(&key).await? {
                KeyTtl::Missing => false,
                KeyTtl::Persistent => true,
                KeyTtl::Expires(left) => left.is_zero(),
            };
            if stale {
                self.cache.del(&key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Removed stale pending ledger keys");
        }
        Ok(removed)
    }

    /// Engine positions through the cache. On engine failure a
    /// "disconnected" view is served and cached briefly instead of an error.
    pub async fn positions_view(&self) -> PositionsView {
        match cache::get_json::<PositionsView>(self.cache.as_ref(), POSITIONS_CACHE_KEY).await {
            Ok(Some(view)) => return view,
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Positions cache unavailable"),
        }

        let (view, ttl) = match self.engine_positions().await {
            Ok(positions) => (
                PositionsView {
                    status: "connected".to_string(),
                    positions,
                    error: None,
                },
                POSITIONS_CACHE_TTL,
            ),
            Err(e) => {
                warn!(error = %e, "Engine positions unavailable, serving degraded view");
                (
                    PositionsView {
                        status: "disconnected".to_string(),
                        positions: Vec::new(),
                        error: Some(e.to_string()),
                    },
                    DEGRADED_POSITIONS_TTL,
                )
            }
        };

        if let Err(e) = cache::set_json(self.cache.as_ref(), POSITIONS_CACHE_KEY, &view, ttl).await {
            debug!(error = %e, "Could not cache positions view");
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_key_round_trip() {
        let key = pending_key("BTC:USD", Side::Sell);
        assert_eq!(key, "pending:BTC:USD:SELL");
        assert_eq!(parse_pending_key(&key), Some(("BTC:USD".to_string(), Side::Sell)));
        assert_eq!(parse_pending_key("pending:garbage"), None);
    }
}
