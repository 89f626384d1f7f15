use serde::{Deserialize, Serialize};
use shared::TtlMs;

/// A cached value with an optional absolute expiry (unix millis).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<u64>,
}

impl<T> CacheEntry<T> {
    /// A zero TTL means the entry never expires.
    pub fn new(value: T, ttl: Option<TtlMs>, now_ms: u64) -> Self {
        Self {
            value,
            expire_at: ttl
                .filter(|ttl| ttl.0 > 0)
                .map(|ttl| now_ms.saturating_add(ttl.0)),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expire_at, Some(expire_at) if now_ms > expire_at)
    }

    pub fn has_ttl(&self) -> bool {
        self.expire_at.is_some()
    }
}

/// Which cache layer a consumer reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    Memory,
    Shared,
    Persist,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Memory => "memory",
            Layer::Shared => "shared",
            Layer::Persist => "persist",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry_is_strictly_after_deadline() {
        let entry = CacheEntry::new("v", Some(TtlMs(100)), 1_000);
        assert_eq!(entry.expire_at, Some(1_100));
        assert!(!entry.is_expired(1_100));
        assert!(entry.is_expired(1_101));
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new(1, None, 1_000);
        assert!(!entry.has_ttl());
        assert!(!entry.is_expired(u64::MAX));

        let zero = CacheEntry::new(1, Some(TtlMs(0)), 1_000);
        assert!(!zero.has_ttl());
    }
}
