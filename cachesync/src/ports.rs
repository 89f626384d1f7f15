use crate::events::SyncPayload;
use shared::{Result, WindowId};

// Ports are the pluggable seams between the engine and its collaborators

/// Source of wall-clock time in unix milliseconds
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

/// Window-side half of the channel to the coordinator
pub trait CoordinatorLink: Send + Sync + 'static {
    /// Identity the coordinator uses to exclude this window from its own broadcasts
    fn window_id(&self) -> WindowId;

    /// Queue a payload for the coordinator. Must return without waiting on the network.
    fn send_to_coordinator(&self, payload: SyncPayload) -> Result<()>;
}

/// Minimal durable string store backing the persist layer
pub trait DurableStorage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}
