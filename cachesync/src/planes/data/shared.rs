use crate::events::{CacheScope, CacheSyncBatchMessage, CacheSyncMessage, SyncEntry, SyncPayload};
use crate::planes::data::memory::MemoryCacheStore;
use crate::ports::CoordinatorLink;
use serde_json::Value;
use shared::{Error, Result, TtlMs, WindowId};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outbound half of the relay, shared by the shared and persist layers
#[derive(Clone)]
pub struct SyncPublisher {
    link: Option<Arc<dyn CoordinatorLink>>,
    max_message_bytes: usize,
}

impl SyncPublisher {
    pub fn new(link: Option<Arc<dyn CoordinatorLink>>, max_message_bytes: usize) -> Self {
        Self {
            link,
            max_message_bytes,
        }
    }

    /// Publisher for a process with no coordinator; writes stay local
    pub fn detached() -> Self {
        Self::new(None, usize::MAX)
    }

    pub fn window_id(&self) -> Option<WindowId> {
        self.link.as_ref().map(|link| link.window_id())
    }

    /// Hand `payload` to the coordinator.
    ///
    /// Only a payload that cannot be carried by the transport is reported back.
    /// Coordinator failures are logged and swallowed.
    pub fn publish(&self, payload: SyncPayload) -> Result<()> {
        let Some(link) = &self.link else {
            debug!(
                "No coordinator link, {} sync for {:?} stays local",
                payload.scope().as_str(),
                payload.keys()
            );
            return Ok(());
        };

        let encoded_len = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                warn!(
                    "{} sync for {:?} is not serializable, local write kept: {}",
                    payload.scope().as_str(),
                    payload.keys(),
                    e
                );
                return Err(Error::Serialization(e.to_string()));
            }
        };

        if encoded_len > self.max_message_bytes {
            warn!(
                "{} sync for {:?} is {} bytes (limit {}), local write kept but not relayed",
                payload.scope().as_str(),
                payload.keys(),
                encoded_len,
                self.max_message_bytes
            );
            return Err(Error::Serialization(format!(
                "message of {} bytes exceeds limit of {} bytes",
                encoded_len, self.max_message_bytes
            )));
        }

        let scope = payload.scope();
        let entries = payload.len();
        match link.send_to_coordinator(payload) {
            Ok(()) => debug!(
                "{} queued {} sync with {} entries",
                link.window_id(),
                scope.as_str(),
                entries
            ),
            Err(e) => warn!(
                "{} could not reach coordinator, remote replicas may diverge: {}",
                link.window_id(),
                e
            ),
        }
        Ok(())
    }
}

impl fmt::Debug for SyncPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPublisher")
            .field("window_id", &self.window_id())
            .field("max_message_bytes", &self.max_message_bytes)
            .finish()
    }
}

/// Local replica of the shared layer plus its outbound relay
///
/// Writes land in the replica synchronously and are then queued for the
/// coordinator. Inbound messages go through the same `set`/`delete` path.
#[derive(Debug)]
pub struct SharedCacheRelay {
    replica: MemoryCacheStore,
    publisher: SyncPublisher,
}

impl SharedCacheRelay {
    pub fn new(replica: MemoryCacheStore, publisher: SyncPublisher) -> Self {
        Self { replica, publisher }
    }

    pub fn get_shared(&self, key: &str) -> Option<Value> {
        self.replica.get(key)
    }

    pub fn has_shared(&self, key: &str) -> bool {
        self.replica.has(key)
    }

    pub fn has_shared_ttl(&self, key: &str) -> bool {
        self.replica.has_ttl(key)
    }

    /// Apply locally, then relay. A relay error leaves the local write in place.
    pub fn set_shared(&self, key: &str, value: Value, ttl: Option<TtlMs>) -> Result<()> {
        self.replica.set(key, value.clone(), ttl);
        self.publisher.publish(SyncPayload::Single(CacheSyncMessage::set(
            CacheScope::Shared,
            key,
            value,
            ttl,
        )))
    }

    pub fn delete_shared(&self, key: &str) -> bool {
        if !self.replica.delete(key) {
            return false;
        }
        // A deletion carries no value, so only a pathological key can fail here
        if let Err(e) = self
            .publisher
            .publish(SyncPayload::Single(CacheSyncMessage::delete(CacheScope::Shared, key)))
        {
            warn!("Deletion of shared key '{}' was not relayed: {}", key, e);
        }
        true
    }

    /// Apply `entries` in order and relay them as one batch
    pub fn set_shared_batch(&self, entries: Vec<SyncEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &entries {
            match &entry.value {
                Some(value) => self.replica.set(&entry.key, value.clone(), entry.ttl),
                None => {
                    self.replica.delete(&entry.key);
                }
            }
        }
        self.publisher.publish(SyncPayload::Batch(CacheSyncBatchMessage {
            scope: CacheScope::Shared,
            entries,
        }))
    }

    /// Apply a message relayed from another window
    pub fn apply_remote(&self, message: CacheSyncMessage) {
        let action = if message.is_delete() { "delete" } else { "set" };
        debug!("Applying relayed {} for shared key '{}'", action, message.key);
        match message.value {
            Some(value) => self.replica.set(&message.key, value, message.ttl),
            None => {
                self.replica.delete(&message.key);
            }
        }
    }

    pub fn clear(&self) {
        self.replica.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::subscription::SubscriptionRegistry;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<SyncPayload>>,
        closed: bool,
    }

    impl CoordinatorLink for RecordingLink {
        fn window_id(&self) -> WindowId {
            WindowId(7)
        }

        fn send_to_coordinator(&self, payload: SyncPayload) -> Result<()> {
            if self.closed {
                return Err(Error::Transport("closed".to_string()));
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn relay(link: Arc<RecordingLink>, max_message_bytes: usize) -> SharedCacheRelay {
        let replica = MemoryCacheStore::new(
            "shared",
            SubscriptionRegistry::new(),
            Arc::new(ManualClock::new(0)),
        );
        let publisher =
            SyncPublisher::new(Some(link as Arc<dyn CoordinatorLink>), max_message_bytes);
        SharedCacheRelay::new(replica, publisher)
    }

    #[test]
    fn test_set_shared_applies_locally_then_publishes() {
        let link = Arc::new(RecordingLink::default());
        let relay = relay(Arc::clone(&link), 1024);

        relay.set_shared("theme", json!("dark"), None).unwrap();

        assert_eq!(relay.get_shared("theme"), Some(json!("dark")));
        let sent = link.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![SyncPayload::Single(CacheSyncMessage::set(
                CacheScope::Shared,
                "theme",
                json!("dark"),
                None
            ))]
        );
    }

    #[test]
    fn test_delete_shared_only_relays_existing_keys() {
        let link = Arc::new(RecordingLink::default());
        let relay = relay(Arc::clone(&link), 1024);

        assert!(!relay.delete_shared("ghost"));
        assert!(link.sent.lock().unwrap().is_empty());

        relay.set_shared("k", json!(1), None).unwrap();
        assert!(relay.delete_shared("k"));
        let sent = link.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            SyncPayload::Single(CacheSyncMessage::delete(CacheScope::Shared, "k"))
        );
    }

    #[test]
    fn test_oversized_message_keeps_local_write() {
        let link = Arc::new(RecordingLink::default());
        let relay = relay(Arc::clone(&link), 16);

        let result = relay.set_shared("big", json!("x".repeat(64)), None);

        assert!(matches!(result, Err(Error::Serialization(_))));
        assert_eq!(relay.get_shared("big"), Some(json!("x".repeat(64))));
        assert!(link.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_closed_link_is_not_surfaced() {
        let link = Arc::new(RecordingLink {
            closed: true,
            ..Default::default()
        });
        let relay = relay(link, 1024);

        assert!(relay.set_shared("k", json!(1), None).is_ok());
        assert_eq!(relay.get_shared("k"), Some(json!(1)));
    }

    #[test]
    fn test_batch_applies_in_order_and_sends_once() {
        let link = Arc::new(RecordingLink::default());
        let relay = relay(Arc::clone(&link), 1024);

        relay
            .set_shared_batch(vec![
                SyncEntry::set("a", json!(1), None),
                SyncEntry::set("a", json!(2), None),
                SyncEntry::set("b", json!(3), None),
                SyncEntry::delete("b"),
            ])
            .unwrap();

        assert_eq!(relay.get_shared("a"), Some(json!(2)));
        assert!(!relay.has_shared("b"));
        assert_eq!(link.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_apply_remote_uses_local_paths() {
        let relay = relay(Arc::new(RecordingLink::default()), 1024);

        relay.apply_remote(CacheSyncMessage::set(CacheScope::Shared, "k", json!(null), None));
        assert_eq!(relay.get_shared("k"), Some(Value::Null));

        relay.apply_remote(CacheSyncMessage::delete(CacheScope::Shared, "k"));
        assert!(!relay.has_shared("k"));
    }
}
