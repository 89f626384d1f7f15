pub mod adapter;
pub mod clock;
pub mod domain;
pub mod engine;
pub mod events;
pub mod persistence;
pub mod planes;
pub mod ports;
pub mod schema;
pub mod subscription;

pub use adapter::{CacheBinding, ExternalStoreAdapter};
pub use domain::{CacheEntry, Layer};
pub use engine::{CacheEngine, CacheEngineBuilder};
pub use events::{CacheScope, CacheSyncBatchMessage, CacheSyncMessage, SyncEntry, SyncPayload};
pub use planes::control::{BroadcastReport, Coordinator, Inbox, LocalLink};
pub use ports::{Clock, CoordinatorLink, DurableStorage};
pub use schema::{PersistSchema, ValueKind};
pub use subscription::{Subscription, SubscriptionRegistry};
