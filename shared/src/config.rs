use std::str::FromStr;
use tracing::warn;

/// Runtime settings shared by the coordinator and its windows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub persist_storage_key: String,
    pub max_message_bytes: usize,
    pub persist_warn_bytes: usize,
}

impl Config {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 5600;
    pub const DEFAULT_DATA_DIR: &str = "./data";
    pub const DEFAULT_PERSIST_KEY: &str = "cs_cache_persist";
    pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;
    pub const DEFAULT_PERSIST_WARN_BYTES: usize = 2 * 1024 * 1024;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            host: lookup("CACHE_SYNC_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "CACHE_SYNC_PORT", Self::DEFAULT_PORT),
            data_dir: lookup("CACHE_SYNC_DATA_DIR")
                .unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            persist_storage_key: lookup("CACHE_SYNC_PERSIST_KEY")
                .unwrap_or_else(|| Self::DEFAULT_PERSIST_KEY.to_string()),
            max_message_bytes: parse_or(
                &lookup,
                "CACHE_SYNC_MAX_MESSAGE_BYTES",
                Self::DEFAULT_MAX_MESSAGE_BYTES,
            ),
            persist_warn_bytes: parse_or(
                &lookup,
                "CACHE_SYNC_PERSIST_WARN_BYTES",
                Self::DEFAULT_PERSIST_WARN_BYTES,
            ),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5600);
        assert_eq!(config.persist_storage_key, "cs_cache_persist");
        assert_eq!(config.max_message_bytes, 8 * 1024 * 1024);
        assert_eq!(config.address(), "127.0.0.1:5600");
    }

    #[test]
    fn test_config_from_lookup() {
        let vars = HashMap::from([
            ("CACHE_SYNC_HOST", "0.0.0.0"),
            ("CACHE_SYNC_PORT", "7000"),
            ("CACHE_SYNC_PERSIST_WARN_BYTES", "1024"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.address(), "0.0.0.0:7000");
        assert_eq!(config.persist_warn_bytes, 1024);
        assert_eq!(config.data_dir, "./data");
    }

    #[test]
    fn test_config_invalid_number_falls_back() {
        let config = Config::from_lookup(|k| {
            (k == "CACHE_SYNC_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.port, Config::DEFAULT_PORT);
    }
}
