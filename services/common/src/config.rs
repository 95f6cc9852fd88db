//! Service configuration

use crate::constants::{
    DEFAULT_ENGINE_ADDRESS, DEFAULT_MAX_RETRIES, ENGINE_CONNECT_TIMEOUT, ENGINE_RECV_TIMEOUT,
    ENGINE_SEND_TIMEOUT, HEARTBEAT_INTERVAL, HUB_COMMAND_CAPACITY, SUBSCRIBER_QUEUE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service endpoints configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    /// Engine address, `tcp://host:port`
    pub engine_address: String,
    /// Durable store. In-memory store is used when absent.
    pub database_url: Option<String>,
    /// Fast cache. In-memory cache is used when absent.
    pub redis_url: Option<String>,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            engine_address: DEFAULT_ENGINE_ADDRESS.to_string(),
            database_url: None,
            redis_url: None,
        }
    }
}

/// Engine link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLinkConfig {
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub recv_timeout_ms: u64,
    /// Total attempts per request, including the first
    pub max_attempts: u32,
}

impl EngineLinkConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    #[must_use]
    pub const fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

impl Default for EngineLinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: duration_ms(ENGINE_CONNECT_TIMEOUT),
            send_timeout_ms: duration_ms(ENGINE_SEND_TIMEOUT),
            recv_timeout_ms: duration_ms(ENGINE_RECV_TIMEOUT),
            max_attempts: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Broadcast hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound queue depth per subscriber
    pub subscriber_capacity: usize,
    /// Coordinator command queue depth
    pub command_capacity: usize,
    pub heartbeat_secs: u64,
}

impl HubConfig {
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: SUBSCRIBER_QUEUE_CAPACITY,
            command_capacity: HUB_COMMAND_CAPACITY,
            heartbeat_secs: HEARTBEAT_INTERVAL.as_secs(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
