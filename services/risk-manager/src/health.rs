//! Service health
//!
//! Every dependency is probed independently. A failed probe degrades the
//! report; it never turns into an error.

use crate::RiskManager;
use serde::Serialize;
use services_common::EngineApi;
use std::sync::Arc;
use std::time::Instant;

/// State of one dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    /// "connected" or "disconnected"
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_probe<E: std::fmt::Display>(result: Result<(), E>, started: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "connected",
                latency_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
                error: None,
            },
            Err(e) => Self {
                status: "disconnected",
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    #[must_use]
    pub fn is_up(&self) -> bool {
        self.status == "connected"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// "ok" when every dependency is reachable, else "degraded"
    pub status: &'static str,
    pub engine: ComponentHealth,
    pub store: ComponentHealth,
    pub cache: ComponentHealth,
    pub circuit_breaker_active: bool,
    pub limits_enabled: bool,
    pub subscribers: usize,
    pub uptime_secs: u64,
}

impl HealthReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub struct HealthProbe {
    risk: Arc<RiskManager>,
    engine: Arc<dyn EngineApi>,
    started: Instant,
}

impl HealthProbe {
    pub fn new(risk: Arc<RiskManager>, engine: Arc<dyn EngineApi>) -> Self {
        Self {
            risk,
            engine,
            started: Instant::now(),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let t = Instant::now();
        let engine = ComponentHealth::from_probe(self.engine.account().await.map(|_| ()), t);

        let t = Instant::now();
        let store = ComponentHealth::from_probe(self.risk.store().ping().await, t);

        let t = Instant::now();
        let cache = ComponentHealth::from_probe(self.risk.cache().ping().await, t);

        let all_up = engine.is_up() && store.is_up() && cache.is_up();
        HealthReport {
            status: if all_up { "ok" } else { "degraded" },
            engine,
            store,
            cache,
            circuit_breaker_active: self.risk.circuit_breaker_status().active,
            limits_enabled: self.risk.limits().enabled,
            subscribers: self.risk.hub().subscriber_count(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}
