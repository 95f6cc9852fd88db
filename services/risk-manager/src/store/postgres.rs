//! `PostgreSQL` durable store

use super::RiskStore;
use crate::alerts::{AlertSeverity, AlertType, NewAlert, RiskAlert};
use crate::circuit_breaker::{CircuitBreakerEvent, NewBreakerEvent};
use crate::limits::{PositionLimit, RiskLimits};
use crate::pnl::DailyPnl;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS risk_limits (
        id BIGSERIAL PRIMARY KEY,
        max_position_size DOUBLE PRECISION NOT NULL,
        max_order_size DOUBLE PRECISION NOT NULL,
        daily_loss_limit DOUBLE PRECISION NOT NULL,
        max_portfolio_concentration DOUBLE PRECISION NOT NULL,
        max_leverage DOUBLE PRECISION NOT NULL,
        max_orders_per_second INTEGER NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS position_limits (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL UNIQUE,
        max_position DOUBLE PRECISION NOT NULL,
        max_concentration_pct DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS risk_alerts (
        id BIGSERIAL PRIMARY KEY,
        alert_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        symbol TEXT,
        message TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS daily_pnl_tracking (
        date DATE PRIMARY KEY,
        realized_pnl DOUBLE PRECISION NOT NULL DEFAULT 0,
        unrealized_pnl DOUBLE PRECISION NOT NULL DEFAULT 0,
        total_pnl DOUBLE PRECISION NOT NULL DEFAULT 0,
        circuit_breaker_triggered BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS circuit_breaker_events (
        id BIGSERIAL PRIMARY KEY,
        trigger_type TEXT NOT NULL,
        trigger_value DOUBLE PRECISION NOT NULL,
        threshold DOUBLE PRECISION NOT NULL,
        duration_seconds BIGINT NOT NULL DEFAULT 0,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        reset_at TIMESTAMPTZ
    )
    ",
    r"CREATE INDEX IF NOT EXISTS idx_risk_alerts_created ON risk_alerts (created_at DESC)",
    r"CREATE INDEX IF NOT EXISTS idx_breaker_active ON circuit_breaker_events (active) WHERE active",
];

/// sqlx-backed store
#[derive(Debug, Clone)]
pub struct PgRiskStore {
    pool: PgPool,
}

impl PgRiskStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the tables exist
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .context("connecting to durable store")?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        info!("Durable store ready");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("applying risk schema")?;
        }
        Ok(())
    }
}

fn limits_from_row(row: &PgRow) -> Result<RiskLimits> {
    let per_second: i32 = row.try_get("max_orders_per_second")?;
    Ok(RiskLimits {
        id: row.try_get("id")?,
        max_position_size: row.try_get("max_position_size")?,
        max_order_size: row.try_get("max_order_size")?,
        daily_loss_limit: row.try_get("daily_loss_limit")?,
        max_portfolio_concentration: row.try_get("max_portfolio_concentration")?,
        max_leverage: row.try_get("max_leverage")?,
        max_orders_per_second: u32::try_from(per_second).unwrap_or(0),
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn position_limit_from_row(row: &PgRow) -> Result<PositionLimit> {
    Ok(PositionLimit {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        max_position: row.try_get("max_position")?,
        max_concentration_pct: row.try_get("max_concentration_pct")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<RiskAlert> {
    let alert_type: String = row.try_get("alert_type")?;
    let severity: String = row.try_get("severity")?;
    let Json(metadata): Json<serde_json::Value> = row.try_get("metadata")?;
    Ok(RiskAlert {
        id: row.try_get("id")?,
        alert_type: AlertType::parse(&alert_type),
        severity: AlertSeverity::parse(&severity),
        symbol: row.try_get("symbol")?,
        message: row.try_get("message")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

fn breaker_from_row(row: &PgRow) -> Result<CircuitBreakerEvent> {
    Ok(CircuitBreakerEvent {
        id: row.try_get("id")?,
        trigger_type: row.try_get("trigger_type")?,
        trigger_value: row.try_get("trigger_value")?,
        threshold: row.try_get("threshold")?,
        duration_seconds: row.try_get("duration_seconds")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        reset_at: row.try_get("reset_at")?,
    })
}

fn daily_from_row(row: &PgRow) -> Result<DailyPnl> {
    Ok(DailyPnl {
        date: row.try_get("date")?,
        realized_pnl: row.try_get("realized_pnl")?,
        unrealized_pnl: row.try_get("unrealized_pnl")?,
        total_pnl: row.try_get("total_pnl")?,
        circuit_breaker_triggered: row.try_get("circuit_breaker_triggered")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RiskStore for PgRiskStore {
    async fn latest_limits(&self) -> Result<Option<RiskLimits>> {
        let row = sqlx::query(r"SELECT * FROM risk_limits ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(limits_from_row).transpose()
    }

    async fn insert_limits(&self, limits: &RiskLimits) -> Result<RiskLimits> {
        let row = sqlx::query(
            r"
            INSERT INTO risk_limits (
                max_position_size, max_order_size, daily_loss_limit,
                max_portfolio_concentration, max_leverage, max_orders_per_second, enabled
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            ",
        )
        .bind(limits.max_position_size)
        .bind(limits.max_order_size)
        .bind(limits.daily_loss_limit)
        .bind(limits.max_portfolio_concentration)
        .bind(limits.max_leverage)
        .bind(i32::try_from(limits.max_orders_per_second).unwrap_or(i32::MAX))
        .bind(limits.enabled)
        .fetch_one(&self.pool)
        .await?;
        limits_from_row(&row)
    }

    async fn position_limits(&self) -> Result<Vec<PositionLimit>> {
        let rows = sqlx::query(r"SELECT * FROM position_limits ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(position_limit_from_row).collect()
    }

    async fn upsert_position_limit(
        &self,
        symbol: &str,
        max_position: f64,
        max_concentration_pct: f64,
    ) -> Result<PositionLimit> {
        let row = sqlx::query(
            r"
            INSERT INTO position_limits (symbol, max_position, max_concentration_pct)
            VALUES ($1, $2, $3)
            ON CONFLICT (symbol) DO UPDATE SET
                max_position = EXCLUDED.max_position,
                max_concentration_pct = EXCLUDED.max_concentration_pct,
                updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(symbol)
        .bind(max_position)
        .bind(max_concentration_pct)
        .fetch_one(&self.pool)
        .await?;
        position_limit_from_row(&row)
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<RiskAlert> {
        let row = sqlx::query(
            r"
            INSERT INTO risk_alerts (alert_type, severity, symbol, message, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            ",
        )
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.symbol.as_deref())
        .bind(&alert.message)
        .bind(Json(&alert.metadata))
        .fetch_one(&self.pool)
        .await?;
        alert_from_row(&row)
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<RiskAlert>> {
        let rows = sqlx::query(r"SELECT * FROM risk_alerts ORDER BY created_at DESC, id DESC LIMIT $1")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn daily_pnl(&self, date: NaiveDate) -> Result<Option<DailyPnl>> {
        let row = sqlx::query(r"SELECT * FROM daily_pnl_tracking WHERE date = $1")
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(daily_from_row).transpose()
    }

    async fn upsert_daily_pnl(&self, pnl: &DailyPnl) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO daily_pnl_tracking (
                date, realized_pnl, unrealized_pnl, total_pnl, circuit_breaker_triggered, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (date) DO UPDATE SET
                realized_pnl = EXCLUDED.realized_pnl,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                total_pnl = EXCLUDED.total_pnl,
                circuit_breaker_triggered =
                    daily_pnl_tracking.circuit_breaker_triggered OR EXCLUDED.circuit_breaker_triggered,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(pnl.date)
        .bind(pnl.realized_pnl)
        .bind(pnl.unrealized_pnl)
        .bind(pnl.total_pnl)
        .bind(pnl.circuit_breaker_triggered)
        .bind(pnl.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_breaker(&self, event: &NewBreakerEvent) -> Result<CircuitBreakerEvent> {
        let row = sqlx::query(
            r"
            INSERT INTO circuit_breaker_events (trigger_type, trigger_value, threshold, duration_seconds)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(&event.trigger_type)
        .bind(event.trigger_value)
        .bind(event.threshold)
        .bind(event.duration_seconds)
        .fetch_one(&self.pool)
        .await?;
        breaker_from_row(&row)
    }

    async fn active_breakers(&self) -> Result<Vec<CircuitBreakerEvent>> {
        let rows = sqlx::query(
            r"SELECT * FROM circuit_breaker_events WHERE active = TRUE ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(breaker_from_row).collect()
    }

    async fn reset_breaker(&self, id: i64, at: DateTime<Utc>) -> Result<Option<CircuitBreakerEvent>> {
        let row = sqlx::query(
            r"
            UPDATE circuit_breaker_events
            SET active = FALSE, reset_at = $2
            WHERE id = $1 AND active = TRUE
            RETURNING *
            ",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(breaker_from_row).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
