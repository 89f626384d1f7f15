use crate::domain::CacheEntry;
use crate::ports::Clock;
use crate::subscription::SubscriptionRegistry;
use dashmap::DashMap;
use serde_json::Value;
use shared::TtlMs;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Process-local key/value map with lazy TTL expiration
///
/// Expired entries are only discovered on `get`/`has`; nothing sweeps in the background.
pub struct MemoryCacheStore {
    name: &'static str,
    entries: DashMap<String, CacheEntry<Value>>,
    registry: SubscriptionRegistry,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new(name: &'static str, registry: SubscriptionRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            registry,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        self.expire(key, now);
        None
    }

    /// Overwrite `key` and notify its subscribers before returning
    pub fn set(&self, key: &str, value: Value, ttl: Option<TtlMs>) {
        let entry = CacheEntry::new(value, ttl, self.clock.now_ms());
        self.entries.insert(key.to_string(), entry);
        debug!("Updated {} cache for key '{}'", self.name, key);
        self.registry.notify(key);
    }

    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            self.expire(key, now);
        }
        !expired
    }

    /// Whether a live entry for `key` carries an expiry
    pub fn has_ttl(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .map(|entry| entry.has_ttl() && !entry.is_expired(now))
            .unwrap_or(false)
    }

    pub fn delete(&self, key: &str) -> bool {
        if self.entries.remove(key).is_none() {
            debug!("Skipped {} cache delete for key '{}' - not present", self.name, key);
            return false;
        }
        debug!("Deleted {} cache key '{}'", self.name, key);
        self.registry.notify(key);
        true
    }

    /// Keys of all live entries
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of stored entries, including expired ones not yet read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry without notifying; used at teardown
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn expire(&self, key: &str, now: u64) {
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            debug!("Expired {} cache key '{}'", self.name, key);
            self.registry.notify(key);
        }
    }
}

impl fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("name", &self.name)
            .field("entry_count", &self.entries.len())
            .finish()
    }
}
