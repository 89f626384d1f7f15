use crate::ports::DurableStorage;
use dashmap::DashMap;
use shared::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Volatile stand-in for durable storage
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: DashMap<String, String>,
    reject_writes: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise storage error paths
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

impl DurableStorage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.get(key).map(|value| value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("write to '{}' rejected", key)));
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }
}
