//! Counters for the broadcast hub

use super::message::EventKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Hub counters, updated only by the coordinator task
#[derive(Debug, Default)]
pub struct HubMetrics {
    published: [AtomicU64; 4],
    deliveries: AtomicU64,
    dropped_subscribers: AtomicU64,
    subscribers: AtomicUsize,
}

/// Point-in-time copy of the hub counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubMetricsSnapshot {
    pub risk_alerts: u64,
    pub pnl_updates: u64,
    pub circuit_breaker_events: u64,
    pub position_updates: u64,
    pub deliveries: u64,
    pub dropped_subscribers: u64,
    pub subscribers: usize,
}

impl HubMetrics {
    pub(crate) fn record_publish(&self, kind: EventKind, delivered: usize) {
        self.published[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_subscribers(&self, count: usize) {
        self.subscribers.store(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn subscribers(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn published(&self, kind: EventKind) -> u64 {
        self.published[kind.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            risk_alerts: self.published(EventKind::RiskAlert),
            pnl_updates: self.published(EventKind::PnlUpdate),
            circuit_breaker_events: self.published(EventKind::CircuitBreaker),
            position_updates: self.published(EventKind::PositionUpdate),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped_subscribers: self.dropped_subscribers.load(Ordering::Relaxed),
            subscribers: self.subscribers(),
        }
    }
}
