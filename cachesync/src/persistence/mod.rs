pub mod memory_store;
pub mod sled_store;

pub use memory_store::InMemoryStorage;
pub use sled_store::SledStorage;
