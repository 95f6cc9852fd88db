//! Risk manager configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then environment
//! variables such as `RISK_GATE_ENDPOINTS__REDIS_URL`.

use crate::throttle::ThrottleMode;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use services_common::{EngineLinkConfig, HubConfig, ServiceEndpoints};
use std::path::Path;
use std::time::Duration;

/// Risk manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskGateConfig {
    pub server: ServerConfig,
    pub endpoints: ServiceEndpoints,
    pub engine: EngineLinkConfig,
    pub store: StoreConfig,
    pub loops: LoopConfig,
    pub throttle: ThrottleConfig,
    pub broadcast: HubConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Durable store pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_connections: 10 }
    }
}

/// Background task periods
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub pnl_interval_secs: u64,
    pub limits_reload_secs: u64,
    pub pending_sweep_secs: u64,
    /// How long shutdown waits for an in-flight tick
    pub shutdown_grace_secs: u64,
}

impl LoopConfig {
    #[must_use]
    pub const fn pnl_interval(&self) -> Duration {
        Duration::from_secs(self.pnl_interval_secs)
    }

    #[must_use]
    pub const fn limits_reload(&self) -> Duration {
        Duration::from_secs(self.limits_reload_secs)
    }

    #[must_use]
    pub const fn pending_sweep(&self) -> Duration {
        Duration::from_secs(self.pending_sweep_secs)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            pnl_interval_secs: 5,
            limits_reload_secs: 10,
            pending_sweep_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleAlgorithm {
    #[default]
    Fixed,
    Sliding,
}

/// Order rate throttle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub algorithm: ThrottleAlgorithm,
    /// Sliding window length
    pub window_seconds: u64,
    /// Identity used when a request carries none
    pub default_identity: String,
}

impl ThrottleConfig {
    #[must_use]
    pub const fn mode(&self) -> ThrottleMode {
        match self.algorithm {
            ThrottleAlgorithm::Fixed => ThrottleMode::FixedWindow,
            ThrottleAlgorithm::Sliding => ThrottleMode::SlidingWindow {
                window_seconds: self.window_seconds,
            },
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            algorithm: ThrottleAlgorithm::Fixed,
            window_seconds: 1,
            default_identity: "default".to_string(),
        }
    }
}

impl RiskGateConfig {
    /// Load defaults, the optional file at `path`, then `RISK_GATE_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("RISK_GATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
