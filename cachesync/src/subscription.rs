use dashmap::DashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Callback fired when a key changes
pub type Subscriber = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    // key -> callbacks in registration order
    subscribers: DashMap<String, Vec<(u64, Subscriber)>>,
    // key -> number of mounted consumers
    hooks: DashMap<String, usize>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, key: &str, id: u64) {
        let emptied = match self.subscribers.get_mut(key) {
            Some(mut list) => {
                list.retain(|(subscriber_id, _)| *subscriber_id != id);
                list.is_empty()
            }
            None => false,
        };

        if emptied {
            self.subscribers.remove_if(key, |_, list| list.is_empty());
        }
    }
}

/// Per-key publish/subscribe shared by every cache layer of a process
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes to `key`
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .subscribers
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            key,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Invoke every callback registered for `key` at the time of the call
    pub fn notify(&self, key: &str) {
        // Snapshot first: callbacks may subscribe or unsubscribe while we iterate
        let snapshot: Vec<Subscriber> = match self.inner.subscribers.get(key) {
            Some(list) => list.iter().map(|(_, callback)| Arc::clone(callback)).collect(),
            None => return,
        };

        for callback in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!("Subscriber callback panicked for key '{}'", key);
            }
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .subscribers
            .get(key)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Record one more active consumer of `key`, returning the new count
    pub fn register_hook(&self, key: &str) -> usize {
        let mut count = self.inner.hooks.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Release one consumer of `key`, returning the remaining count
    pub fn unregister_hook(&self, key: &str) -> usize {
        let remaining = match self.inner.hooks.get_mut(key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => {
                debug!("unregister_hook for '{}' without a registration", key);
                return 0;
            }
        };

        if remaining == 0 {
            self.inner.hooks.remove_if(key, |_, count| *count == 0);
        }
        remaining
    }

    pub fn hook_count(&self, key: &str) -> usize {
        self.inner.hooks.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Drop all subscriptions and hook registrations
    pub fn clear(&self) {
        self.inner.subscribers.clear();
        self.inner.hooks.clear();
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &self.inner.subscribers.len())
            .field("hooks", &self.inner.hooks.len())
            .finish()
    }
}

/// Handle returned by [`SubscriptionRegistry::subscribe`]
///
/// Dropping the handle unsubscribes. `unsubscribe` may be called any number of times.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    key: String,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(&self.key, self.id);
        }
    }

    /// Keep the callback registered for as long as the registry lives
    pub fn detach(self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}
