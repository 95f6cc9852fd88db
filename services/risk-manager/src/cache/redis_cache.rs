//! Redis fast cache
//!
//! Counters run as Lua scripts so increment-plus-expire and
//! evict-count-add are single atomic steps on the server. The sliding
//! window reads the server clock, so every instance shares one timeline.

use super::{FastCache, KeyTtl, WindowHit};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

const FIXED_WINDOW_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

const SLIDING_WINDOW_SCRIPT: &str = r"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000000 + tonumber(t[2])
local window = tonumber(ARGV[1])
local max = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count >= max then
    return {0, count}
end
redis.call('ZADD', KEYS[1], now, ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return {1, count + 1}
";

const SLIDING_COUNT_SCRIPT: &str = r"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000000 + tonumber(t[2])
return redis.call('ZCOUNT', KEYS[1], '(' .. (now - tonumber(ARGV[1])), '+inf')
";

const SCAN_BATCH: usize = 200;

/// Redis-backed cache
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    fixed_window: redis::Script,
    sliding_window: redis::Script,
    sliding_count: redis::Script,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("parsing redis url")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("connecting to fast cache")?;
        info!("Fast cache ready");
        Ok(Self {
            manager,
            fixed_window: redis::Script::new(FIXED_WINDOW_SCRIPT),
            sliding_window: redis::Script::new(SLIDING_WINDOW_SCRIPT),
            sliding_count: redis::Script::new(SLIDING_COUNT_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}

#[async_trait]
impl FastCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let (): () = conn.set_ex(key, value, whole_seconds(ttl)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64> {
        let mut conn = self.conn();
        let count: u64 = self
            .fixed_window
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn sliding_window_hit(&self, key: &str, window: Duration, max: u64) -> Result<WindowHit> {
        let mut conn = self.conn();
        let member = uuid::Uuid::new_v4().to_string();
        let expiry = window + Duration::from_secs(1);
        let (admitted, count): (i64, u64) = self
            .sliding_window
            .key(key)
            .arg(micros(window))
            .arg(max)
            .arg(member)
            .arg(millis(expiry))
            .invoke_async(&mut conn)
            .await?;
        Ok(WindowHit {
            admitted: admitted == 1,
            count,
        })
    }

    async fn sliding_window_count(&self, key: &str, window: Duration) -> Result<u64> {
        let mut conn = self.conn();
        let count: u64 = self
            .sliding_count
            .key(key)
            .arg(micros(window))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn hset_ex(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let (): () = redis::pipe()
            .atomic()
            .hset(key, field, value)
            .ignore()
            .expire(key, i64::try_from(whole_seconds(ttl)).unwrap_or(i64::MAX))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields.into_iter().collect())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.conn();
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(match pttl {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(u64::try_from(ms).unwrap_or(0))),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
