//! Transform cache collaborators.
//!
//! The cache maps a [`FileKey`] to the last transform result for that file,
//! tagged with the stat key of the file when it was transformed. A hit is
//! only used when the file's current stat key matches bit-for-bit.
//!
//! Cache failures never fail a build: reads degrade to misses and write
//! errors are logged.

mod storage;

pub use storage::PersistentCache;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::keys::FileKey;
use crate::types::ImportTransformed;

/// Error types for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Cache database error.
    #[error("cache database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One cached transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `"<mtime-nanos>-<size>"` of the source file at transform time.
    pub stat_key: String,
    pub value: ImportTransformed,
}

pub trait TransformCache: Send + Sync {
    fn get(&self, key: &FileKey) -> Option<CacheEntry>;

    fn set(&self, key: &FileKey, entry: CacheEntry);

    fn remove(&self, key: &FileKey);

    /// Persist buffered writes. Called once per build or re-walk batch.
    fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Process-local cache, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<FileKey, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn TransformCache> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TransformCache for MemoryCache {
    fn get(&self, key: &FileKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    fn set(&self, key: &FileKey, entry: CacheEntry) {
        self.entries.insert(key.clone(), entry);
    }

    fn remove(&self, key: &FileKey) {
        self.entries.remove(key);
    }
}
