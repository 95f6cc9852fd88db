//! Broadcast hub
//!
//! A single coordinator task owns the subscriber table. Register, unregister
//! and publish all arrive on one command queue, so membership changes never
//! race with fan-out. Each subscriber has its own bounded queue; a full queue
//! gets the subscriber dropped instead of stalling the publisher.

use super::message::{Envelope, EventKind, Frame};
use super::metrics::HubMetrics;
use super::{BusResult, EventBusError};
use crate::config::HubConfig;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

enum Command {
    Register {
        id: u64,
        tx: mpsc::Sender<Arc<str>>,
    },
    Unregister {
        id: u64,
    },
    Publish {
        kind: EventKind,
        frame: Arc<str>,
    },
    Shutdown,
}

/// Handle to the broadcast hub. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    metrics: Arc<HubMetrics>,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create a hub and spawn its coordinator on the current runtime
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::spawn(config).0
    }

    /// Create a hub, returning the coordinator's join handle as well
    #[must_use]
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let metrics = Arc::new(HubMetrics::default());
        let coordinator = tokio::spawn(run_coordinator(rx, Arc::clone(&metrics)));
        let hub = Self {
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
            metrics,
            config,
        };
        (hub, coordinator)
    }

    /// Subscribe with the configured queue capacity
    pub async fn subscribe(&self) -> BusResult<Subscription> {
        self.subscribe_with_capacity(self.config.subscriber_capacity)
            .await
    }

    /// Subscribe with an explicit outbound queue capacity
    pub async fn subscribe_with_capacity(&self, capacity: usize) -> BusResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.commands
            .send(Command::Register { id, tx })
            .await
            .map_err(|_| EventBusError::Closed)?;

        let period = self.config.heartbeat();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Subscription {
            id,
            rx,
            heartbeat,
            commands: self.commands.clone(),
        })
    }

    /// Serialize once and fan out to every live subscriber
    pub async fn publish<T: Serialize>(&self, kind: EventKind, data: &T) -> BusResult<()> {
        let envelope = Envelope::new(kind, data)?;
        let frame: Arc<str> = Arc::from(serde_json::to_string(&envelope)?);
        self.commands
            .send(Command::Publish { kind, frame })
            .await
            .map_err(|_| EventBusError::Closed)
    }

    /// Number of live subscribers as last recorded by the coordinator
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.metrics.subscribers()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<HubMetrics> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub const fn heartbeat_period(&self) -> Duration {
        self.config.heartbeat()
    }

    /// Disconnect every subscriber and stop the coordinator
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Broadcast hub already stopped");
        }
    }
}

async fn run_coordinator(mut commands: mpsc::Receiver<Command>, metrics: Arc<HubMetrics>) {
    let mut subscribers: FxHashMap<u64, mpsc::Sender<Arc<str>>> = FxHashMap::default();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register { id, tx } => {
                subscribers.insert(id, tx);
                debug!(subscriber = id, total = subscribers.len(), "Subscriber registered");
            }
            Command::Unregister { id } => {
                if subscribers.remove(&id).is_some() {
                    debug!(subscriber = id, total = subscribers.len(), "Subscriber unregistered");
                }
            }
            Command::Publish { kind, frame } => {
                let mut delivered = 0usize;
                subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&frame)) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(subscriber = *id, kind = %kind, "Subscriber queue full, disconnecting");
                        metrics.record_dropped();
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(subscriber = *id, "Subscriber gone, removing");
                        false
                    }
                });
                metrics.record_publish(kind, delivered);
            }
            Command::Shutdown => {
                info!(subscribers = subscribers.len(), "Broadcast hub shutting down");
                subscribers.clear();
                metrics.set_subscribers(0);
                return;
            }
        }
        metrics.set_subscribers(subscribers.len());
    }
}

/// A live subscription. Dropping it unregisters from the hub.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<str>>,
    heartbeat: Interval,
    commands: mpsc::Sender<Command>,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Next data message or heartbeat. `None` once the hub has dropped this
    /// subscriber and its queue is drained.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            message = self.rx.recv() => message.map(Frame::Message),
            _ = self.heartbeat.tick() => Some(Frame::Heartbeat),
        }
    }

    /// Next data message, ignoring heartbeats
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<str>, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best effort; a full command queue means the coordinator will see
        // the closed channel on the next publish anyway.
        let _ = self.commands.try_send(Command::Unregister { id: self.id });
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}
