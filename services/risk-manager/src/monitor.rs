//! Background control loops
//!
//! - P&L monitor: recompute today's P&L from engine positions and trip the
//!   daily-loss breaker
//! - Limits reloader: refresh risk state from the durable store and retire
//!   expired breakers
//! - Pending sweeper: drop pending-ledger keys that lost their expiry
//!
//! Each loop runs under [`ControlLoops`], which stops them together. A failed
//! or panicking tick is logged and the loop carries on with the next one.

use crate::circuit_breaker::CircuitBreakerEvent;
use crate::position::PositionLedger;
use crate::RiskManager;
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use services_common::EventKind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// One periodic unit of work
#[async_trait]
pub trait ControlTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn tick(&self) -> Result<()>;
}

/// Recomputes today's P&L from engine positions
pub struct PnlMonitor {
    risk: Arc<RiskManager>,
    ledger: Arc<PositionLedger>,
}

impl PnlMonitor {
    pub fn new(risk: Arc<RiskManager>, ledger: Arc<PositionLedger>) -> Self {
        Self { risk, ledger }
    }

    /// One recompute. Returns the breaker tripped by it, if any.
    pub async fn run_once(&self) -> Result<Option<CircuitBreakerEvent>> {
        let positions = self.ledger.engine_positions().await?;
        self.risk
            .broadcast(EventKind::PositionUpdate, &positions)
            .await;

        let unrealized: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
        let daily = self.risk.update_unrealized_pnl(unrealized).await;
        debug!(
            realized = daily.realized_pnl,
            unrealized,
            total = daily.total_pnl,
            positions = positions.len(),
            "Daily P&L recomputed"
        );

        Ok(self.risk.evaluate_daily_loss(&daily).await?)
    }
}

#[async_trait]
impl ControlTask for PnlMonitor {
    fn name(&self) -> &'static str {
        "pnl-monitor"
    }

    async fn tick(&self) -> Result<()> {
        self.run_once().await.map(|_| ())
    }
}

/// Refreshes limits and breakers from the durable store
pub struct LimitsReloader {
    risk: Arc<RiskManager>,
}

impl LimitsReloader {
    pub fn new(risk: Arc<RiskManager>) -> Self {
        Self { risk }
    }
}

#[async_trait]
impl ControlTask for LimitsReloader {
    fn name(&self) -> &'static str {
        "limits-reloader"
    }

    async fn tick(&self) -> Result<()> {
        self.risk.reload_limits().await?;
        let retired = self.risk.expire_breakers().await;
        if retired > 0 {
            info!(retired, "Expired circuit breakers retired");
        }
        Ok(())
    }
}

/// Clears pending-ledger keys without a live expiry
pub struct PendingSweeper {
    ledger: Arc<PositionLedger>,
}

impl PendingSweeper {
    pub fn new(ledger: Arc<PositionLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ControlTask for PendingSweeper {
    fn name(&self) -> &'static str {
        "pending-sweeper"
    }

    async fn tick(&self) -> Result<()> {
        self.ledger.cleanup_expired_pending().await?;
        Ok(())
    }
}

/// Owns the background loops and stops them together
pub struct ControlLoops {
    shutdown: broadcast::Sender<()>,
    tasks: JoinSet<()>,
}

impl Default for ControlLoops {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlLoops {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    /// Run `task` every `period`, first tick one period from now
    pub fn spawn(&mut self, task: Arc<dyn ControlTask>, period: Duration) {
        let stop = self.shutdown.subscribe();
        info!(task = task.name(), period_ms = period.as_millis(), "Starting control loop");
        self.tasks.spawn(run_loop(task, period, stop));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every loop to stop, let in-flight ticks finish within `grace`,
    /// then abort whatever is left
    pub async fn shutdown(mut self, grace: Duration) {
        let _ = self.shutdown.send(());
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Control loop ended abnormally");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = self.tasks.len(), "Control loops did not stop in time, aborting");
            self.tasks.shutdown().await;
        }
        info!("Control loops stopped");
    }
}

async fn run_loop(task: Arc<dyn ControlTask>, period: Duration, mut stop: broadcast::Receiver<()>) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => break,
            _ = ticker.tick() => {
                match AssertUnwindSafe(task.tick()).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(task = task.name(), error = %e, "Control loop tick failed"),
                    Err(_) => error!(task = task.name(), "Control loop tick panicked"),
                }
            }
        }
    }
    debug!(task = task.name(), "Control loop stopped");
}
