use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use shared::TtlMs;

/// Layer a sync message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    Shared,
    Persist,
}

impl CacheScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheScope::Shared => "shared",
            CacheScope::Persist => "persist",
        }
    }
}

/// A single cache write crossing a process boundary.
///
/// A missing `value` field means the key was deleted. An explicit `null`
/// is an ordinary JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSyncMessage {
    pub scope: CacheScope,
    pub key: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<TtlMs>,
}

impl CacheSyncMessage {
    pub fn set(
        scope: CacheScope,
        key: impl Into<String>,
        value: Value,
        ttl: Option<TtlMs>,
    ) -> Self {
        Self {
            scope,
            key: key.into(),
            value: Some(value),
            ttl,
        }
    }

    pub fn delete(scope: CacheScope, key: impl Into<String>) -> Self {
        Self {
            scope,
            key: key.into(),
            value: None,
            ttl: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// One entry of a batch message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub key: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<TtlMs>,
}

impl SyncEntry {
    pub fn set(key: impl Into<String>, value: Value, ttl: Option<TtlMs>) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            ttl,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSyncBatchMessage {
    pub scope: CacheScope,
    pub entries: Vec<SyncEntry>,
}

/// Everything a window exchanges with the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncPayload {
    Single(CacheSyncMessage),
    Batch(CacheSyncBatchMessage),
}

impl SyncPayload {
    pub fn scope(&self) -> CacheScope {
        match self {
            SyncPayload::Single(message) => message.scope,
            SyncPayload::Batch(batch) => batch.scope,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SyncPayload::Single(_) => 1,
            SyncPayload::Batch(batch) => batch.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys touched by this payload, in application order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            SyncPayload::Single(message) => vec![message.key.as_str()],
            SyncPayload::Batch(batch) => batch.entries.iter().map(|e| e.key.as_str()).collect(),
        }
    }

    /// Flatten into single messages, preserving batch order.
    pub fn into_messages(self) -> Vec<CacheSyncMessage> {
        match self {
            SyncPayload::Single(message) => vec![message],
            SyncPayload::Batch(batch) => {
                let scope = batch.scope;
                batch
                    .entries
                    .into_iter()
                    .map(|entry| CacheSyncMessage {
                        scope,
                        key: entry.key,
                        value: entry.value,
                        ttl: entry.ttl,
                    })
                    .collect()
            }
        }
    }
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_matches_message_shape() {
        let message =
            CacheSyncMessage::set(CacheScope::Shared, "theme", json!("dark"), Some(TtlMs(500)));
        let encoded = serde_json::to_value(SyncPayload::Single(message)).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "single",
                "scope": "shared",
                "key": "theme",
                "value": "dark",
                "ttl": 500
            })
        );
    }

    #[test]
    fn test_missing_value_means_delete_but_null_is_a_value() {
        let deleted: CacheSyncMessage =
            serde_json::from_str(r#"{"scope":"shared","key":"a"}"#).unwrap();
        assert!(deleted.is_delete());

        let nulled: CacheSyncMessage =
            serde_json::from_str(r#"{"scope":"shared","key":"a","value":null}"#).unwrap();
        assert_eq!(nulled.value, Some(Value::Null));
    }

    #[test]
    fn test_batch_flattens_in_order() {
        let payload: SyncPayload = serde_json::from_value(json!({
            "type": "batch",
            "scope": "persist",
            "entries": [
                {"key": "a", "value": 1},
                {"key": "b"},
                {"key": "c", "value": 3, "ttl": 10}
            ]
        }))
        .unwrap();

        assert_eq!(payload.scope(), CacheScope::Persist);
        assert_eq!(payload.keys(), vec!["a", "b", "c"]);

        let messages = payload.into_messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[1].is_delete());
        assert_eq!(messages[2].ttl, Some(TtlMs(10)));
        assert!(messages.iter().all(|m| m.scope == CacheScope::Persist));
    }
}
