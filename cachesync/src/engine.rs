use crate::clock::SystemClock;
use crate::events::{CacheScope, SyncEntry, SyncPayload};
use crate::persistence::InMemoryStorage;
use crate::planes::control::Inbox;
use crate::planes::data::{MemoryCacheStore, PersistentCacheStore, SharedCacheRelay, SyncPublisher};
use crate::ports::{Clock, CoordinatorLink, DurableStorage};
use crate::schema::PersistSchema;
use crate::subscription::{Subscription, SubscriptionRegistry};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::config::Config;
use shared::{Result, TtlMs, WindowId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// One per process: owns the memory, shared and persist layers
///
/// Every local operation is synchronous. Relayed writes from other windows
/// are applied through [`CacheEngine::apply_inbound`], usually via
/// [`CacheEngine::drain`] or [`CacheEngine::run_inbox`].
pub struct CacheEngine {
    registry: SubscriptionRegistry,
    memory: MemoryCacheStore,
    shared: SharedCacheRelay,
    persist: PersistentCacheStore,
    window_id: Option<WindowId>,
    closed: AtomicBool,
}

impl CacheEngine {
    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder::default()
    }

    pub fn window_id(&self) -> Option<WindowId> {
        self.window_id
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn persist_schema(&self) -> &PersistSchema {
        self.persist.schema()
    }

    // ============ memory layer ============

    pub fn get(&self, key: &str) -> Option<Value> {
        self.memory.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key).map(decode::<T>).transpose()
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<TtlMs>) {
        self.memory.set(key, value, ttl)
    }

    pub fn set_from<T: Serialize>(&self, key: &str, value: &T, ttl: Option<TtlMs>) -> Result<()> {
        self.memory.set(key, serde_json::to_value(value)?, ttl);
        Ok(())
    }

    pub fn has(&self, key: &str) -> bool {
        self.memory.has(key)
    }

    pub fn has_ttl(&self, key: &str) -> bool {
        self.memory.has_ttl(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.log_hooked_delete(key);
        self.memory.delete(key)
    }

    // ============ shared layer ============

    pub fn get_shared(&self, key: &str) -> Option<Value> {
        self.shared.get_shared(key)
    }

    pub fn get_shared_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_shared(key).map(decode::<T>).transpose()
    }

    pub fn set_shared(&self, key: &str, value: Value, ttl: Option<TtlMs>) -> Result<()> {
        self.shared.set_shared(key, value, ttl)
    }

    pub fn set_shared_from<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<TtlMs>,
    ) -> Result<()> {
        self.shared.set_shared(key, serde_json::to_value(value)?, ttl)
    }

    pub fn set_shared_batch(&self, entries: Vec<SyncEntry>) -> Result<()> {
        self.shared.set_shared_batch(entries)
    }

    pub fn has_shared(&self, key: &str) -> bool {
        self.shared.has_shared(key)
    }

    pub fn has_shared_ttl(&self, key: &str) -> bool {
        self.shared.has_shared_ttl(key)
    }

    pub fn delete_shared(&self, key: &str) -> bool {
        self.log_hooked_delete(key);
        self.shared.delete_shared(key)
    }

    // ============ persist layer ============

    pub fn get_persist(&self, key: &str) -> Result<Value> {
        self.persist.get_persist(key)
    }

    pub fn get_persist_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        decode(self.persist.get_persist(key)?)
    }

    pub fn set_persist(&self, key: &str, value: Value) -> Result<()> {
        self.persist.set_persist(key, value)
    }

    pub fn set_persist_from<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.persist.set_persist(key, serde_json::to_value(value)?)
    }

    pub fn set_persist_batch(&self, entries: Vec<(String, Value)>) -> Result<()> {
        self.persist.set_persist_batch(entries)
    }

    pub fn has_persist(&self, key: &str) -> bool {
        self.persist.has_persist(key)
    }

    // ============ subscriptions & hooks ============

    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.registry.subscribe(key, callback)
    }

    pub fn register_hook(&self, key: &str) -> usize {
        self.registry.register_hook(key)
    }

    pub fn unregister_hook(&self, key: &str) -> usize {
        self.registry.unregister_hook(key)
    }

    // ============ inbound relay ============

    /// Apply one payload relayed by the coordinator
    pub fn apply_inbound(&self, payload: SyncPayload) {
        if self.closed.load(Ordering::Acquire) {
            debug!("Engine closed, dropping inbound {} sync", payload.scope().as_str());
            return;
        }
        for message in payload.into_messages() {
            match message.scope {
                CacheScope::Shared => self.shared.apply_remote(message),
                CacheScope::Persist => self.persist.apply_remote(message),
            }
        }
    }

    /// Apply everything already queued in `inbox`, returning how many payloads were handled
    pub fn drain(&self, inbox: &mut Inbox) -> usize {
        let mut applied = 0;
        while let Some(payload) = inbox.try_recv() {
            self.apply_inbound(payload);
            applied += 1;
        }
        applied
    }

    /// Apply payloads as they arrive until the inbox closes or the engine shuts down
    pub async fn run_inbox(self: Arc<Self>, mut inbox: Inbox) {
        while let Some(payload) = inbox.recv().await {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            self.apply_inbound(payload);
        }
        debug!("Inbox for {} closed", inbox.window_id());
    }

    /// Flush unsaved local persist writes, then clear every cache, subscription and hook.
    /// Persist reads and writes fail afterwards.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.persist.flush() {
            warn!("Failed to flush persist cache during shutdown: {}", e);
        }
        self.memory.clear();
        self.shared.clear();
        self.persist.close();
        self.registry.clear();
        debug!("CacheEngine cleanup completed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn log_hooked_delete(&self, key: &str) {
        let hooks = self.registry.hook_count(key);
        if hooks > 0 {
            debug!("Deleting key '{}' while {} consumer(s) are bound to it", key, hooks);
        }
    }
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("window_id", &self.window_id)
            .field("memory", &self.memory)
            .field("shared", &self.shared)
            .field("persist", &self.persist)
            .finish()
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Assembles a [`CacheEngine`] from its collaborators
#[derive(Default)]
pub struct CacheEngineBuilder {
    config: Option<Config>,
    clock: Option<Arc<dyn Clock>>,
    link: Option<Arc<dyn CoordinatorLink>>,
    storage: Option<Arc<dyn DurableStorage>>,
    schema: Option<PersistSchema>,
}

impl CacheEngineBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Connect the shared and persist layers to a coordinator
    pub fn link(mut self, link: Arc<dyn CoordinatorLink>) -> Self {
        self.link = Some(link);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn DurableStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn schema(mut self, schema: PersistSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn build(self) -> CacheEngine {
        let config = self.config.unwrap_or_default();
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()) as Arc<dyn DurableStorage>);
        let schema = Arc::new(self.schema.unwrap_or_default());
        let window_id = self.link.as_ref().map(|link| link.window_id());

        let registry = SubscriptionRegistry::new();
        let publisher = SyncPublisher::new(self.link, config.max_message_bytes);

        let memory = MemoryCacheStore::new("memory", registry.clone(), Arc::clone(&clock));
        let shared = SharedCacheRelay::new(
            MemoryCacheStore::new("shared", registry.clone(), clock),
            publisher.clone(),
        );
        let persist = PersistentCacheStore::open(
            schema,
            registry.clone(),
            publisher,
            storage,
            config.persist_storage_key,
            config.persist_warn_bytes,
        );

        debug!("CacheEngine initialized for {:?}", window_id);
        CacheEngine {
            registry,
            memory,
            shared,
            persist,
            window_id,
            closed: AtomicBool::new(false),
        }
    }
}
