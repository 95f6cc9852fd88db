//! Common constants used across all services
//!
//! Single source of truth for timing and sizing magic numbers

use std::time::Duration;

// Time constants
pub const SECS_PER_MIN: u64 = 60;
pub const MINS_PER_HOUR: u64 = 60;
pub const HOURS_PER_DAY: u64 = 24;
pub const SECS_PER_HOUR: u64 = SECS_PER_MIN * MINS_PER_HOUR;
pub const SECS_PER_DAY: u64 = SECS_PER_HOUR * HOURS_PER_DAY;

// Retry constants
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// Engine link
pub const DEFAULT_ENGINE_ADDRESS: &str = "tcp://127.0.0.1:5555";
pub const ENGINE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const ENGINE_SEND_TIMEOUT: Duration = Duration::from_secs(10);
pub const ENGINE_RECV_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on a single engine frame (newline-delimited JSON)
pub const MAX_ENGINE_FRAME_BYTES: usize = 4 * 1024 * 1024;

// Broadcast hub
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;
pub const HUB_COMMAND_CAPACITY: usize = 256;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(54);
pub const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
