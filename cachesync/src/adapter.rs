use crate::domain::Layer;
use crate::engine::CacheEngine;
use crate::subscription::Subscription;
use dashmap::DashSet;
use serde_json::Value;
use shared::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Synchronous snapshot + subscribe view of a [`CacheEngine`] for reactive consumers
///
/// Works the same behind a render loop, an actor mailbox or a UI binding:
/// `get_snapshot` never waits and `subscribe` only reports that something changed.
pub struct ExternalStoreAdapter {
    engine: Arc<CacheEngine>,
    // (layer, key) pairs this adapter already seeded with a default
    seeded: DashSet<(Layer, String)>,
    // (layer, key) pairs already warned about carrying a TTL
    ttl_warned: DashSet<(Layer, String)>,
}

impl ExternalStoreAdapter {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self {
            engine,
            seeded: DashSet::new(),
            ttl_warned: DashSet::new(),
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn get_snapshot(&self, layer: Layer, key: &str) -> Option<Value> {
        read(&self.engine, layer, key)
    }

    pub fn subscribe<F>(&self, key: &str, on_change: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.subscribe(key, on_change)
    }

    /// Mount a consumer of `key`.
    ///
    /// Seeds `default` if the key is absent (at most once per layer and key),
    /// registers a hook for the lifetime of the binding and warns once if the
    /// key carries a TTL.
    pub fn bind(&self, layer: Layer, key: &str, default: Option<Value>) -> Result<CacheBinding> {
        if layer == Layer::Persist {
            self.engine.persist_schema().require(key)?;
        }

        if let Some(default) = &default {
            self.seed_default(layer, key, default)?;
        }
        self.warn_if_ttl(layer, key);
        self.engine.register_hook(key);

        Ok(CacheBinding {
            engine: Arc::clone(&self.engine),
            layer,
            key: key.to_string(),
            default,
        })
    }

    fn seed_default(&self, layer: Layer, key: &str, default: &Value) -> Result<()> {
        let present = match layer {
            Layer::Memory => self.engine.has(key),
            Layer::Shared => self.engine.has_shared(key),
            // declared persist keys always have a value
            Layer::Persist => return Ok(()),
        };
        if present {
            return Ok(());
        }
        if !self.seeded.insert((layer, key.to_string())) {
            debug!("Default for {} key '{}' already seeded", layer.as_str(), key);
            return Ok(());
        }

        debug!("Seeding {} key '{}' with its default", layer.as_str(), key);
        match layer {
            Layer::Memory => {
                self.engine.set(key, default.clone(), None);
                Ok(())
            }
            Layer::Shared => self.engine.set_shared(key, default.clone(), None),
            Layer::Persist => Ok(()),
        }
    }

    fn warn_if_ttl(&self, layer: Layer, key: &str) {
        let has_ttl = match layer {
            Layer::Memory => self.engine.has_ttl(key),
            Layer::Shared => self.engine.has_shared_ttl(key),
            Layer::Persist => false,
        };
        if has_ttl && self.ttl_warned.insert((layer, key.to_string())) {
            warn!(
                "Consumer bound to {} key '{}' which has a TTL, expiry shows on the next read",
                layer.as_str(),
                key
            );
        }
    }
}

impl fmt::Debug for ExternalStoreAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalStoreAdapter")
            .field("seeded", &self.seeded.len())
            .finish()
    }
}

/// A mounted consumer of one key; releases its hook when dropped
pub struct CacheBinding {
    engine: Arc<CacheEngine>,
    layer: Layer,
    key: String,
    default: Option<Value>,
}

impl CacheBinding {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Current value, or the binding's default while the key is absent
    pub fn get_snapshot(&self) -> Option<Value> {
        read(&self.engine, self.layer, &self.key).or_else(|| self.default.clone())
    }

    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.subscribe(self.key.clone(), on_change)
    }

    pub fn set(&self, value: Value) -> Result<()> {
        match self.layer {
            Layer::Memory => {
                self.engine.set(&self.key, value, None);
                Ok(())
            }
            Layer::Shared => self.engine.set_shared(&self.key, value, None),
            Layer::Persist => self.engine.set_persist(&self.key, value),
        }
    }
}

impl Drop for CacheBinding {
    fn drop(&mut self) {
        self.engine.unregister_hook(&self.key);
    }
}

impl fmt::Debug for CacheBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBinding")
            .field("layer", &self.layer)
            .field("key", &self.key)
            .finish()
    }
}

fn read(engine: &CacheEngine, layer: Layer, key: &str) -> Option<Value> {
    match layer {
        Layer::Memory => engine.get(key),
        Layer::Shared => engine.get_shared(key),
        Layer::Persist => engine.get_persist(key).ok(),
    }
}
