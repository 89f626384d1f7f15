use crate::events::{CacheScope, CacheSyncBatchMessage, CacheSyncMessage, SyncEntry, SyncPayload};
use crate::planes::data::shared::SyncPublisher;
use crate::ports::DurableStorage;
use crate::schema::PersistSchema;
use crate::subscription::SubscriptionRegistry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use shared::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Durable, schema-checked cache relayed like the shared layer
///
/// Values never expire. Only the window that writes a value saves it to
/// storage; windows receiving the relayed value update memory only.
/// Once closed, every local read and write fails with [`Error::Internal`].
pub struct PersistentCacheStore {
    schema: Arc<PersistSchema>,
    values: DashMap<String, Value>,
    registry: SubscriptionRegistry,
    publisher: SyncPublisher,
    storage: Arc<dyn DurableStorage>,
    storage_key: String,
    warn_bytes: usize,
    // set by local writes and default fallbacks, cleared by a successful save
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl PersistentCacheStore {
    /// Build the store and hydrate it from `storage`
    pub fn open(
        schema: Arc<PersistSchema>,
        registry: SubscriptionRegistry,
        publisher: SyncPublisher,
        storage: Arc<dyn DurableStorage>,
        storage_key: impl Into<String>,
        warn_bytes: usize,
    ) -> Self {
        let store = Self {
            schema,
            values: DashMap::new(),
            registry,
            publisher,
            storage,
            storage_key: storage_key.into(),
            warn_bytes,
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        store.hydrate();
        store
    }

    pub fn schema(&self) -> &PersistSchema {
        &self.schema
    }

    /// Current value of a declared key, falling back to its default
    pub fn get_persist(&self, key: &str) -> Result<Value> {
        self.ensure_open()?;
        let field = self.schema.require(key)?;
        if let Some(value) = self.values.get(key) {
            return Ok(value.clone());
        }

        warn!("Missing persist cache key '{}', using default value", key);
        self.values.insert(key.to_string(), field.default.clone());
        self.dirty.store(true, Ordering::Release);
        Ok(field.default.clone())
    }

    pub fn has_persist(&self, key: &str) -> bool {
        self.schema.contains(key) && self.values.contains_key(key)
    }

    /// Validate, apply, relay, then write through to storage.
    ///
    /// A schema violation leaves every layer untouched.
    pub fn set_persist(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        self.schema.validate(key, &value)?;

        let unchanged = self
            .values
            .get(key)
            .map(|current| *current == value)
            .unwrap_or(false);
        if unchanged {
            debug!("Skipped persist cache update for key '{}' - value unchanged", key);
            return Ok(());
        }

        self.values.insert(key.to_string(), value.clone());
        self.dirty.store(true, Ordering::Release);
        self.registry.notify(key);

        let published = self.publisher.publish(SyncPayload::Single(CacheSyncMessage::set(
            CacheScope::Persist,
            key,
            value,
            None,
        )));
        let saved = self.save();
        debug!("Updated persist cache for key '{}'", key);
        published.and(saved)
    }

    /// Validate every entry first, then apply all of them in order
    pub fn set_persist_batch(&self, entries: Vec<(String, Value)>) -> Result<()> {
        self.ensure_open()?;
        for (key, value) in &entries {
            self.schema.validate(key, value)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        for (key, value) in &entries {
            self.values.insert(key.clone(), value.clone());
            self.registry.notify(key);
        }
        self.dirty.store(true, Ordering::Release);

        let published = self.publisher.publish(SyncPayload::Batch(CacheSyncBatchMessage {
            scope: CacheScope::Persist,
            entries: entries
                .into_iter()
                .map(|(key, value)| SyncEntry::set(key, value, None))
                .collect(),
        }));
        published.and(self.save())
    }

    /// Apply a value relayed from another window, in memory only
    pub fn apply_remote(&self, message: CacheSyncMessage) {
        let Some(value) = message.value else {
            warn!(
                "Ignoring persist deletion for key '{}', persist keys cannot be deleted",
                message.key
            );
            return;
        };
        if let Err(e) = self.schema.validate(&message.key, &value) {
            warn!("Dropping relayed persist value: {}", e);
            return;
        }
        if message.ttl.is_some() {
            debug!("Ignoring ttl on relayed persist key '{}'", message.key);
        }

        self.values.insert(message.key.clone(), value);
        self.registry.notify(&message.key);
    }

    /// Write the current snapshot to storage if a local change has not been saved yet
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.load(Ordering::Acquire) {
            debug!("Persist cache is clean, nothing to flush");
            return Ok(());
        }
        self.save()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Drop the in-memory values and refuse further local access
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.values.clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Internal("persist cache is shut down".to_string()));
        }
        Ok(())
    }

    fn hydrate(&self) {
        for (key, field) in self.schema.fields() {
            self.values.insert(key.to_string(), field.default.clone());
        }

        let raw = match self.storage.get(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.save_or_log();
                debug!("Initialized persist cache with default values");
                return;
            }
            Err(e) => {
                error!("Failed to read persist cache, using defaults: {}", e);
                return;
            }
        };

        let stored: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to parse persist cache, falling back to defaults: {}", e);
                if let Err(e) = self.storage.remove(&self.storage_key) {
                    error!("Failed to discard corrupt persist cache: {}", e);
                }
                return;
            }
        };

        for (key, field) in self.schema.fields() {
            match stored.get(key) {
                Some(value) if field.kind.matches(value) => {
                    self.values.insert(key.to_string(), value.clone());
                }
                Some(_) => warn!(
                    "Stored persist value for '{}' does not match its schema, keeping default",
                    key
                ),
                None => {}
            }
        }

        let dropped = stored.keys().filter(|key| !self.schema.contains(key)).count();
        if dropped > 0 {
            debug!("Dropping {} undeclared key(s) from stored persist cache", dropped);
        }

        // Rewrite so storage only holds declared keys
        self.save_or_log();
        debug!("Loaded persist cache from storage with defaults");
    }

    fn save(&self) -> Result<()> {
        let snapshot: Map<String, Value> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let raw = serde_json::to_string(&snapshot)?;

        if raw.len() > self.warn_bytes {
            warn!(
                "Persist cache is too large ({:.2} MB), saves may be slow or fail",
                raw.len() as f64 / (1024.0 * 1024.0)
            );
        }

        self.storage.set(&self.storage_key, &raw).map_err(|e| {
            warn!("Failed to save persist cache, memory is ahead of storage: {}", e);
            e
        })?;
        self.dirty.store(false, Ordering::Release);
        debug!("Saved persist cache, {} bytes", raw.len());
        Ok(())
    }

    fn save_or_log(&self) {
        if let Err(e) = self.save() {
            error!("Failed to save persist cache: {}", e);
        }
    }
}

impl fmt::Debug for PersistentCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentCacheStore")
            .field("storage_key", &self.storage_key)
            .field("keys", &self.schema.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStorage;
    use crate::schema::ValueKind;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const KEY: &str = "cs_cache_persist";

    fn schema() -> Arc<PersistSchema> {
        Arc::new(
            PersistSchema::builder()
                .declare("example-1", ValueKind::String, json!("example-1"))
                .declare("example-2", ValueKind::Number, json!(1))
                .declare("example-3", ValueKind::Bool, json!(true))
                .build()
                .unwrap(),
        )
    }

    fn open(storage: Arc<InMemoryStorage>, registry: SubscriptionRegistry) -> PersistentCacheStore {
        PersistentCacheStore::open(
            schema(),
            registry,
            SyncPublisher::detached(),
            storage,
            KEY,
            2 * 1024 * 1024,
        )
    }

    fn stored(storage: &InMemoryStorage) -> Value {
        serde_json::from_str(&storage.get(KEY).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_fresh_store_is_seeded_with_defaults() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());

        assert_eq!(store.get_persist("example-2").unwrap(), json!(1));
        assert!(store.has_persist("example-3"));
        assert_eq!(
            stored(&storage),
            json!({"example-1": "example-1", "example-2": 1, "example-3": true})
        );
    }

    #[test]
    fn test_set_persist_writes_through() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());

        store.set_persist("example-1", json!("changed")).unwrap();

        assert_eq!(store.get_persist("example-1").unwrap(), json!("changed"));
        assert_eq!(stored(&storage)["example-1"], json!("changed"));
    }

    #[test]
    fn test_undeclared_key_mutates_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let registry = SubscriptionRegistry::new();
        let store = open(Arc::clone(&storage), registry.clone());
        let before = stored(&storage);

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let _sub = registry.subscribe("undeclared", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = store.set_persist("undeclared", json!("x"));

        assert!(matches!(result, Err(Error::SchemaViolation(_))));
        assert!(matches!(store.get_persist("undeclared"), Err(Error::SchemaViolation(_))));
        assert!(!store.has_persist("undeclared"));
        assert_eq!(stored(&storage), before);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_kind_is_a_schema_violation() {
        let store = open(Arc::new(InMemoryStorage::new()), SubscriptionRegistry::new());
        assert!(matches!(
            store.set_persist("example-3", json!("not a bool")),
            Err(Error::SchemaViolation(_))
        ));
        assert_eq!(store.get_persist("example-3").unwrap(), json!(true));
    }

    #[test]
    fn test_hydrate_overlays_declared_keys_and_drops_unknown() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .set(KEY, r#"{"example-2": 99, "example-3": "bad", "legacy": 1}"#)
            .unwrap();

        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());

        assert_eq!(store.get_persist("example-2").unwrap(), json!(99));
        assert_eq!(store.get_persist("example-3").unwrap(), json!(true));
        assert!(stored(&storage).get("legacy").is_none());
    }

    #[test]
    fn test_corrupt_storage_falls_back_to_defaults() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set(KEY, "{not json").unwrap();

        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());

        assert_eq!(store.get_persist("example-1").unwrap(), json!("example-1"));
        assert_eq!(storage.get(KEY).unwrap(), None);
    }

    #[test]
    fn test_storage_failure_is_reported_after_memory_update() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());
        storage.reject_writes(true);

        let result = store.set_persist("example-2", json!(5));

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(store.get_persist("example-2").unwrap(), json!(5));
    }

    #[test]
    fn test_unchanged_value_skips_notification() {
        let registry = SubscriptionRegistry::new();
        let store = open(Arc::new(InMemoryStorage::new()), registry.clone());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let _sub = registry.subscribe("example-2", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set_persist("example-2", json!(1)).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        store.set_persist("example-2", json!(2)).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batch_is_all_or_nothing_on_schema() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());

        let result = store.set_persist_batch(vec![
            ("example-2".to_string(), json!(7)),
            ("nope".to_string(), json!(1)),
        ]);
        assert!(matches!(result, Err(Error::SchemaViolation(_))));
        assert_eq!(store.get_persist("example-2").unwrap(), json!(1));

        store
            .set_persist_batch(vec![
                ("example-2".to_string(), json!(7)),
                ("example-1".to_string(), json!("b")),
            ])
            .unwrap();
        assert_eq!(stored(&storage)["example-2"], json!(7));
        assert_eq!(stored(&storage)["example-1"], json!("b"));
    }

    #[test]
    fn test_remote_values_skip_storage_and_respect_schema() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());

        store.apply_remote(CacheSyncMessage::set(
            CacheScope::Persist,
            "example-2",
            json!(3),
            None,
        ));
        store.apply_remote(CacheSyncMessage::set(CacheScope::Persist, "rogue", json!(3), None));
        store.apply_remote(CacheSyncMessage::delete(CacheScope::Persist, "example-2"));

        assert_eq!(store.get_persist("example-2").unwrap(), json!(3));
        assert!(!store.has_persist("rogue"));
        assert_eq!(stored(&storage)["example-2"], json!(1));
    }

    #[test]
    fn test_flush_skips_storage_without_local_writes() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());
        store.apply_remote(CacheSyncMessage::set(
            CacheScope::Persist,
            "example-2",
            json!(3),
            None,
        ));
        assert!(!store.is_dirty());

        // another window saved a newer blob meanwhile
        storage.set(KEY, r#"{"example-2": 42}"#).unwrap();
        store.flush().unwrap();

        assert_eq!(stored(&storage), json!({"example-2": 42}));
    }

    #[test]
    fn test_failed_save_stays_dirty_until_flushed() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());
        storage.reject_writes(true);

        assert!(store.set_persist("example-2", json!(5)).is_err());
        assert!(store.is_dirty());

        storage.reject_writes(false);
        store.flush().unwrap();
        assert!(!store.is_dirty());
        assert_eq!(stored(&storage)["example-2"], json!(5));
    }

    #[test]
    fn test_closed_store_rejects_local_access() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = open(Arc::clone(&storage), SubscriptionRegistry::new());
        store.set_persist("example-1", json!("keep")).unwrap();
        store.close();

        assert!(matches!(store.set_persist("example-2", json!(5)), Err(Error::Internal(_))));
        assert!(matches!(
            store.set_persist_batch(vec![("example-2".to_string(), json!(5))]),
            Err(Error::Internal(_))
        ));
        assert!(matches!(store.get_persist("example-1"), Err(Error::Internal(_))));
        assert_eq!(stored(&storage)["example-1"], json!("keep"));
        assert_eq!(stored(&storage)["example-2"], json!(1));
    }
}
