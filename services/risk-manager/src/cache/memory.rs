//! In-memory fast cache
//!
//! Expiry runs on the tokio clock so paused-time tests can step through
//! windows. Each operation holds the table lock for its whole duration,
//! which gives the same atomicity the shared cache provides.

use super::{FastCache, KeyTtl, WindowHit};
use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Slot {
    Text(String),
    Hash(FxHashMap<String, String>),
    Window(VecDeque<Instant>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<String, Entry>>,
    offline: AtomicBool,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop a key's expiry, as if the expire call had been lost
    pub fn persist(&self, key: &str) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.expires_at = None;
        }
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("cache offline");
        }
        Ok(())
    }

    /// Run `f` against the live entry table, purging `key` first if expired
    fn with_live<R>(&self, key: &str, f: impl FnOnce(&mut FxHashMap<String, Entry>, Instant) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        f(&mut entries, now)
    }
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.with_live(key, |entries, _| match entries.get(key) {
            Some(Entry {
                slot: Slot::Text(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.with_live(key, |entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Text(value.to_string()),
                    expires_at: Some(now + ttl),
                },
            );
        });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64> {
        self.check()?;
        self.with_live(key, |entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::Text("0".to_string()),
                expires_at: None,
            });
            let current = match &entry.slot {
                Slot::Text(raw) => raw.parse::<u64>().unwrap_or(0),
                _ => bail!("WRONGTYPE {key} is not a counter"),
            };
            let next = current + 1;
            entry.slot = Slot::Text(next.to_string());
            if entry.expires_at.is_none() {
                entry.expires_at = Some(now + window);
            }
            Ok(next)
        })
    }

    async fn sliding_window_hit(&self, key: &str, window: Duration, max: u64) -> Result<WindowHit> {
        self.check()?;
        self.with_live(key, |entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::Window(VecDeque::new()),
                expires_at: None,
            });
            let Slot::Window(hits) = &mut entry.slot else {
                bail!("WRONGTYPE {key} is not a window");
            };
            while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
                hits.pop_front();
            }
            let count = hits.len() as u64;
            if count >= max {
                return Ok(WindowHit {
                    admitted: false,
                    count,
                });
            }
            hits.push_back(now);
            entry.expires_at = Some(now + window + Duration::from_secs(1));
            Ok(WindowHit {
                admitted: true,
                count: count + 1,
            })
        })
    }

    async fn sliding_window_count(&self, key: &str, window: Duration) -> Result<u64> {
        self.check()?;
        Ok(self.with_live(key, |entries, now| match entries.get(key) {
            Some(Entry {
                slot: Slot::Window(hits),
                ..
            }) => hits
                .iter()
                .filter(|t| now.duration_since(**t) < window)
                .count() as u64,
            _ => 0,
        }))
    }

    async fn hset_ex(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.with_live(key, |entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::Hash(FxHashMap::default()),
                expires_at: None,
            });
            let Slot::Hash(fields) = &mut entry.slot else {
                bail!("WRONGTYPE {key} is not a hash");
            };
            fields.insert(field.to_string(), value.to_string());
            entry.expires_at = Some(now + ttl);
            Ok(())
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        self.check()?;
        Ok(self.with_live(key, |entries, _| {
            let Some(Entry {
                slot: Slot::Hash(fields),
                ..
            }) = entries.get_mut(key)
            else {
                return false;
            };
            let removed = fields.remove(field).is_some();
            if fields.is_empty() {
                entries.remove(key);
            }
            removed
        }))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.check()?;
        Ok(self.with_live(key, |entries, _| match entries.get(key) {
            Some(Entry {
                slot: Slot::Hash(fields),
                ..
            }) => fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check()?;
        Ok(self.with_live(key, |entries, now| match entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
