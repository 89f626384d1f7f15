pub mod memory;
pub mod persist;
pub mod shared;

pub use memory::MemoryCacheStore;
pub use persist::PersistentCacheStore;
pub use shared::{SharedCacheRelay, SyncPublisher};
