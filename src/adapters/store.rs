//! Sled-backed object store handed to vectordb tasks

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::ObjectStore;
use crate::core::errors::{PipesError, Result};

/// A stored blob and its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub blob: Vec<u8>,
}

#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PipesError::io("create store directory", e))?;
            }
        }
        let db = sled::open(path).map_err(|e| PipesError::storage("open store", e))?;
        debug!("Object store opened at {}", path.display());
        Ok(Self { db })
    }

    /// In-memory store removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| PipesError::storage("open temporary store", e))?;
        Ok(Self { db })
    }
}

impl ObjectStore for SledStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.db
            .insert(key.as_bytes(), blob)
            .map_err(|e| PipesError::storage("save", e))?;
        self.db.flush().map_err(|e| PipesError::storage("flush", e))?;
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| PipesError::storage("fetch", e))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn query(&self, prefix: &str, query: &str) -> Result<Vec<StoredObject>> {
        let needle = query.as_bytes();
        let mut found = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry.map_err(|e| PipesError::storage("query", e))?;
            if needle.is_empty() || value.windows(needle.len()).any(|w| w == needle) {
                found.push(StoredObject {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    blob: value.to_vec(),
                });
            }
        }
        Ok(found)
    }
}
