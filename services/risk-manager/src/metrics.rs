//! Prometheus metrics
//!
//! Registered once in the default registry. Registration failure is logged
//! and leaves the metrics disabled rather than failing the service.

use prometheus::{
    CounterVec, Gauge, HistogramVec, IntCounter, IntGauge, register_counter_vec, register_gauge,
    register_histogram_vec, register_int_counter, register_int_gauge,
};

pub(crate) struct Metrics {
    pub(crate) risk_checks: CounterVec,
    pub(crate) order_submissions: CounterVec,
    pub(crate) engine_latency: HistogramVec,
    pub(crate) breaker_trips: IntCounter,
    pub(crate) subscribers: IntGauge,
    pub(crate) daily_pnl: Gauge,
}

lazy_static::lazy_static! {
    pub(crate) static ref METRICS: Option<Metrics> = init_metrics_internal();
}

fn init_metrics_internal() -> Option<Metrics> {
    let risk_checks = match register_counter_vec!(
        "risk_checks_total",
        "Risk validation outcomes",
        &["result"]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to create RISK_CHECKS metric: {}", e);
            return None;
        }
    };

    let order_submissions = match register_counter_vec!(
        "risk_order_submissions_total",
        "Orders forwarded to the engine by outcome",
        &["status"]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to create ORDER_SUBMISSIONS metric: {}", e);
            return None;
        }
    };

    let engine_latency = match register_histogram_vec!(
        "risk_engine_request_duration_seconds",
        "Engine round trip latency including retries",
        &["request"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to create ENGINE_LATENCY metric: {}", e);
            return None;
        }
    };

    let breaker_trips = match register_int_counter!(
        "risk_circuit_breaker_trips_total",
        "Circuit breaker activations"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to create BREAKER_TRIPS metric: {}", e);
            return None;
        }
    };

    let subscribers = match register_int_gauge!(
        "risk_broadcast_subscribers",
        "Live broadcast subscribers"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to create SUBSCRIBERS metric: {}", e);
            return None;
        }
    };

    let daily_pnl = match register_gauge!("risk_daily_pnl_total", "Today's total P&L") {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to create DAILY_PNL metric: {}", e);
            return None;
        }
    };

    Some(Metrics {
        risk_checks,
        order_submissions,
        engine_latency,
        breaker_trips,
        subscribers,
        daily_pnl,
    })
}

pub(crate) fn record_risk_check(result: &str) {
    if let Some(m) = METRICS.as_ref() {
        m.risk_checks.with_label_values(&[result]).inc();
    }
}

pub(crate) fn record_submission(status: &str) {
    if let Some(m) = METRICS.as_ref() {
        m.order_submissions.with_label_values(&[status]).inc();
    }
}

pub(crate) fn observe_engine_latency(request: &str, seconds: f64) {
    if let Some(m) = METRICS.as_ref() {
        m.engine_latency.with_label_values(&[request]).observe(seconds);
    }
}

pub(crate) fn record_breaker_trip() {
    if let Some(m) = METRICS.as_ref() {
        m.breaker_trips.inc();
    }
}

pub(crate) fn set_subscribers(count: usize) {
    if let Some(m) = METRICS.as_ref() {
        m.subscribers.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

pub(crate) fn set_daily_pnl(total: f64) {
    if let Some(m) = METRICS.as_ref() {
        m.daily_pnl.set(total);
    }
}

/// Render the default registry in the text exposition format
#[must_use]
pub fn render() -> String {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_else(|_| "Error encoding metrics".to_string()),
        Err(_) => "Error gathering metrics".to_string(),
    }
}
