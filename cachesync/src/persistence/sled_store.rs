use crate::ports::DurableStorage;
use shared::config::Config;
use shared::{Error, Result};
use std::path::Path;

const DB_FILE: &str = "cachesync.sled";

/// Sled-backed durable storage for the persist layer
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    /// Open (or create) a Sled database at `path`
    /// Creates the parent directory if it doesn't exist
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open Sled database: {}", e)))?;

        Ok(Self { db })
    }

    /// Open the database under the configured data directory
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(Path::new(&config.data_dir).join(DB_FILE))
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

impl DurableStorage for SledStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to read '{}': {}", key, e)))?;

        match value {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    Error::Storage(format!("Stored value for '{}' is not UTF-8: {}", key, e))
                })?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to write '{}': {}", key, e)))?;
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to remove '{}': {}", key, e)))?;
        self.flush()
    }
}

impl std::fmt::Debug for SledStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStorage")
            .field("db", &"<sled::Db>")
            .finish()
    }
}
