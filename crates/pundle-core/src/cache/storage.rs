//! redb-backed transform cache.
//!
//! A single database file at `<cache_dir>/transform.redb` holds bincode
//! encoded [`CacheEntry`] values keyed by [`FileKey`]. The metadata table
//! records the cache epoch; opening with a different epoch (the config file
//! changed) or with `reset` drops every entry.

use std::path::Path;

use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use rustc_hash::FxHashMap;

use super::{CacheEntry, CacheError, TransformCache};
use crate::keys::FileKey;

/// Cache table: maps file keys to serialized entries.
const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("transform");

/// Metadata table: stores cache-wide metadata.
const METADATA_TABLE: TableDefinition<&str, &str> = TableDefinition::new("metadata");

const EPOCH_KEY: &str = "epoch";

/// Database file name inside the cache directory.
pub const DATABASE_FILE: &str = "transform.redb";

impl From<redb::DatabaseError> for CacheError {
    fn from(err: redb::DatabaseError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::TableError> for CacheError {
    fn from(err: redb::TableError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for CacheError {
    fn from(err: redb::TransactionError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for CacheError {
    fn from(err: redb::StorageError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for CacheError {
    fn from(err: redb::CommitError) -> Self {
        CacheError::Database(err.to_string())
    }
}

/// Persistent transform cache.
///
/// Writes are buffered in memory (and served from the buffer) until
/// [`TransformCache::flush`] commits them in one transaction.
pub struct PersistentCache {
    db: Database,
    pending: Mutex<FxHashMap<String, Option<Vec<u8>>>>,
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl PersistentCache {
    /// Open or create the cache in `cache_dir`.
    ///
    /// Entries written under another epoch are discarded, as is everything
    /// when `reset` is set.
    pub fn open(cache_dir: &Path, epoch: &str, reset: bool) -> Result<Self, CacheError> {
        std::fs::create_dir_all(cache_dir)?;
        let db = Database::create(cache_dir.join(DATABASE_FILE))?;

        let stored_epoch = {
            let write_txn = db.begin_write()?;
            let stored = {
                let _ = write_txn.open_table(CACHE_TABLE)?;
                let meta = write_txn.open_table(METADATA_TABLE)?;
                let epoch = meta.get(EPOCH_KEY)?.map(|v| v.value().to_string());
                epoch
            };
            write_txn.commit()?;
            stored
        };

        let cache = Self {
            db,
            pending: Mutex::new(FxHashMap::default()),
        };

        if reset || stored_epoch.as_deref() != Some(epoch) {
            tracing::debug!(
                reset,
                previous = stored_epoch.as_deref().unwrap_or("<none>"),
                epoch,
                "Clearing transform cache"
            );
            cache.clear()?;
            cache.set_epoch(epoch)?;
        }

        Ok(cache)
    }

    /// Remove every entry, committed and pending.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.pending.lock().clear();
        let write_txn = self.db.begin_write()?;
        {
            write_txn.delete_table(CACHE_TABLE)?;
            let _ = write_txn.open_table(CACHE_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn epoch(&self) -> Result<Option<String>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(METADATA_TABLE)?;
        Ok(table.get(EPOCH_KEY)?.map(|v| v.value().to_string()))
    }

    fn set_epoch(&self, epoch: &str) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(METADATA_TABLE)?;
            table.insert(EPOCH_KEY, epoch)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Number of committed entries.
    pub fn len(&self) -> Result<usize, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        Ok(table.iter()?.count())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    fn read(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(pending) = self.pending.lock().get(key) {
            return pending.as_deref().map(decode).transpose();
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        let Some(value) = table.get(key)? else {
            return Ok(None);
        };
        decode(value.value()).map(Some)
    }
}

fn decode(bytes: &[u8]) -> Result<CacheEntry, CacheError> {
    bincode::deserialize(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
}

impl TransformCache for PersistentCache {
    fn get(&self, key: &FileKey) -> Option<CacheEntry> {
        match self.read(key.as_str()) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Transform cache read failed, treating as miss");
                None
            }
        }
    }

    fn set(&self, key: &FileKey, entry: CacheEntry) {
        match bincode::serialize(&entry) {
            Ok(bytes) => {
                self.pending
                    .lock()
                    .insert(key.as_str().to_string(), Some(bytes));
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Failed to serialize transform cache entry");
            }
        }
    }

    fn remove(&self, key: &FileKey) {
        self.pending.lock().insert(key.as_str().to_string(), None);
    }

    fn flush(&self) -> Result<(), CacheError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(());
        }

        let count = pending.len();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            for (key, value) in &pending {
                match value {
                    Some(bytes) => {
                        table.insert(key.as_str(), bytes.as_slice())?;
                    }
                    None => {
                        table.remove(key.as_str())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        tracing::debug!(entries = count, "Flushed transform cache");
        Ok(())
    }
}
