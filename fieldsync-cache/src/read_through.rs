//! Two-tier read-through response cache.
//!
//! Reads check the in-process tier first and fall back to the durable tier,
//! promoting durable hits into memory. Writes go to both tiers. The durable
//! tier is best effort: faults are logged and the cache behaves as if the
//! entry were absent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::durable::{CacheFault, DurableStore, MemoryStore};

const DURABLE_PREFIX: &str = "cache_";

/// Namespaced key used in the durable tier.
pub fn durable_key(key: &str) -> String {
    format!("{}{}", DURABLE_PREFIX, key)
}

/// Durable representation: `{"data": ..., "expiry": millis | null}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    data: Value,
    expiry: Option<i64>,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now_ms)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    /// Entries found but past their expiry.
    pub expired: u64,
    /// Durable-tier faults swallowed.
    pub faults: u64,
    pub memory_entries: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0), counting expired reads as misses.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.durable_hits;
        let total = hits + self.misses + self.expired;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    faults: AtomicU64,
}

pub struct ReadThroughCache {
    memory: DashMap<String, StoredEntry>,
    durable: Box<dyn DurableStore>,
    counters: Counters,
}

impl ReadThroughCache {
    pub fn new<D: DurableStore + 'static>(durable: D) -> Self {
        Self {
            memory: DashMap::new(),
            durable: Box::new(durable),
            counters: Counters::default(),
        }
    }

    /// Cache whose durable tier only lives as long as the process.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = now_millis();

        if let Some(entry) = self.memory.get(key) {
            if !entry.is_expired(now) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
            drop(entry);
            self.memory.remove(key);
            self.purge_durable(key);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache entry expired in memory tier");
            return None;
        }

        let contents = match self.durable.read(&durable_key(key)) {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(fault) => {
                self.record_fault(key, &fault);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let entry = match serde_json::from_str::<StoredEntry>(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                self.record_fault(key, &CacheFault::Serialization(e.to_string()));
                self.purge_durable(key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if entry.is_expired(now) {
            self.purge_durable(key);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache entry expired in durable tier");
            return None;
        }

        self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
        let value = entry.data.clone();
        self.memory.insert(key.to_string(), entry);
        Some(value)
    }

    /// Write-through to both tiers. `ttl` of `None` never expires.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let expiry = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now_millis().saturating_add(ttl_ms)
        });
        let entry = StoredEntry {
            data: value,
            expiry,
        };

        match serde_json::to_string(&entry) {
            Ok(contents) => {
                if let Err(fault) = self.durable.write(&durable_key(key), &contents) {
                    self.record_fault(key, &fault);
                }
            }
            Err(e) => self.record_fault(key, &CacheFault::Serialization(e.to_string())),
        }

        self.memory.insert(key.to_string(), entry);
    }

    pub fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        self.purge_durable(key);
    }

    /// Drop every entry in both tiers.
    pub fn clear(&self) {
        self.memory.clear();
        if let Err(fault) = self.durable.clear_prefix(DURABLE_PREFIX) {
            self.record_fault("*", &fault);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
            memory_entries: self.memory.len() as u64,
        }
    }

    fn purge_durable(&self, key: &str) {
        if let Err(fault) = self.durable.remove(&durable_key(key)) {
            self.record_fault(key, &fault);
        }
    }

    fn record_fault(&self, key: &str, fault: &CacheFault) {
        self.counters.faults.fetch_add(1, Ordering::Relaxed);
        warn!(key, error = %fault, "Durable cache fault ignored");
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
