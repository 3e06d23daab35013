//! Durable cache tier abstraction.
//!
//! Stores text values under namespaced keys. Every failure is a
//! [`CacheFault`]; callers treat faults as misses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CacheFault {
    #[error("Cache quota exceeded: {0}")]
    Quota(String),
    #[error("Cache serialization error: {0}")]
    Serialization(String),
    #[error("Cache storage error: {0}")]
    Storage(String),
}

/// Text key/value store that survives process restarts.
pub trait DurableStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, CacheFault>;

    fn write(&self, key: &str, contents: &str) -> Result<(), CacheFault>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), CacheFault>;

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheFault>;
}

impl<T: DurableStore + ?Sized> DurableStore for Arc<T> {
    fn read(&self, key: &str) -> Result<Option<String>, CacheFault> {
        (**self).read(key)
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), CacheFault> {
        (**self).write(key, contents)
    }

    fn remove(&self, key: &str) -> Result<(), CacheFault> {
        (**self).remove(key)
    }

    fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheFault> {
        (**self).clear_prefix(prefix)
    }
}

/// In-process durable tier with an optional byte quota.
///
/// Used when no durable path is configured, and in tests to exercise quota
/// faults.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }
}

fn poisoned() -> CacheFault {
    CacheFault::Storage("memory store lock poisoned".to_string())
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, CacheFault> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), CacheFault> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + contents.len();
            if needed > quota {
                return Err(CacheFault::Quota(format!(
                    "{} bytes needed, quota is {}",
                    needed, quota
                )));
            }
        }
        entries.insert(key.to_string(), contents.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheFault> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheFault> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryStore::with_quota(16);
        assert!(store.write("a", "12345").is_ok());
        let err = store.write("b", "1234567890123").unwrap_err();
        assert!(matches!(err, CacheFault::Quota(_)));
        // Overwriting an existing key only counts the new value.
        assert!(store.write("a", "1234567890").is_ok());
    }

    #[test]
    fn test_clear_prefix_leaves_other_keys() {
        let store = MemoryStore::new();
        store.write("cache_a", "1").unwrap();
        store.write("cache_b", "2").unwrap();
        store.write("session", "3").unwrap();
        assert_eq!(store.clear_prefix("cache_").unwrap(), 2);
        assert!(store.contains("session"));
        assert_eq!(store.len(), 1);
    }
}
