//! LMDB-backed durable tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep records in a
//! memory-mapped key-value store that survives process restarts.
//!
//! # Value Layout
//!
//! `[cached_at millis: 8 bytes LE][serializer output]`. The record key is the
//! LMDB key (UTF-8). Field encoding is delegated to the context's
//! [`FieldSerializer`], so this tier never inspects field values itself.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `dump`
//! - One write transaction per `merge` (read-modify-write), `delete` and `clear`
//! - Statistics behind an `RwLock`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use graphcache_core::{
    CacheError, CacheResult, FieldSerializer, PersistentTierConfig, Record, StorageError,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::{debug, trace};

use super::factory::{CacheContext, CacheFactory};
use super::traits::{CacheStats, RecordStore, TierDump};

const TIER_NAME: &str = "lmdb";
const TIMESTAMP_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes do not follow the value layout.
    #[error("Corrupt entry for {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to CacheError.
impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::CorruptEntry { key, reason } => {
                CacheError::Storage(StorageError::CorruptEntry {
                    tier: TIER_NAME.to_string(),
                    key,
                    reason,
                })
            }
            LmdbCacheError::EnvOpen(_) | LmdbCacheError::DbOpen(_) | LmdbCacheError::Io(_) => {
                CacheError::Storage(StorageError::Unavailable {
                    tier: TIER_NAME.to_string(),
                    reason: e.to_string(),
                })
            }
            LmdbCacheError::Transaction(_) => {
                CacheError::Storage(StorageError::TransactionFailed {
                    tier: TIER_NAME.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed record store.
///
/// # Example
///
/// ```ignore
/// use graphcache_core::JsonFieldSerializer;
/// use graphcache_storage::cache::LmdbRecordStore;
///
/// let tier = LmdbRecordStore::open("/tmp/graphcache", 100, Arc::new(JsonFieldSerializer))?;
/// tier.merge(&Record::new("User:1").with_field("name", "Ada"))?;
/// let cached = tier.get("User:1")?;
/// ```
pub struct LmdbRecordStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Field encoding shared with the rest of the chain.
    serializer: Arc<dyn FieldSerializer>,
    /// Hit and miss counters.
    stats: RwLock<CacheStats>,
    path: PathBuf,
}

impl LmdbRecordStore {
    /// Open (or create) an LMDB tier.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `serializer` - Field encoding for stored values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        serializer: Arc<dyn FieldSerializer>,
    ) -> Result<Self, LmdbCacheError> {
        let map_size = max_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbCacheError::EnvOpen(format!("map size of {} MB overflows", max_size_mb))
        })?;
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        debug!(
            path = %path.as_ref().display(),
            max_size_mb,
            serializer = serializer.name(),
            "Opened LMDB cache tier"
        );

        Ok(Self {
            env,
            db,
            serializer,
            stats: RwLock::new(CacheStats::default()),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Directory holding the LMDB files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch a record together with the time it was last written.
    pub fn get_with_timestamp(&self, key: &str) -> CacheResult<Option<(Record, DateTime<Utc>)>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let found = self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)?;

        match found {
            Some(bytes) => {
                self.record_hit();
                trace!(key, "LMDB tier hit");
                Ok(Some(self.decode(key, bytes)?))
            }
            None => {
                self.record_miss();
                trace!(key, "LMDB tier miss");
                Ok(None)
            }
        }
    }

    /// Current statistics; the entry count is read from LMDB.
    pub fn stats(&self) -> CacheResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_error)?;
        let stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(CacheStats {
            entry_count,
            ..stats
        })
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn encode(&self, record: &Record, cached_at: DateTime<Utc>) -> CacheResult<Vec<u8>> {
        let value_bytes = self.serializer.to_storable(record)?;
        let mut full_bytes = Vec::with_capacity(TIMESTAMP_LEN + value_bytes.len());
        full_bytes.extend_from_slice(&cached_at.timestamp_millis().to_le_bytes());
        full_bytes.extend_from_slice(&value_bytes);
        Ok(full_bytes)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> CacheResult<(Record, DateTime<Utc>)> {
        if bytes.len() < TIMESTAMP_LEN {
            return Err(LmdbCacheError::CorruptEntry {
                key: key.to_string(),
                reason: format!("value is {} bytes, shorter than the timestamp", bytes.len()),
            }
            .into());
        }
        let (timestamp_bytes, value_bytes) = bytes.split_at(TIMESTAMP_LEN);
        let timestamp_bytes: [u8; TIMESTAMP_LEN] =
            timestamp_bytes
                .try_into()
                .map_err(|_| LmdbCacheError::CorruptEntry {
                    key: key.to_string(),
                    reason: "invalid timestamp".to_string(),
                })?;
        let cached_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))
            .ok_or_else(|| LmdbCacheError::CorruptEntry {
                key: key.to_string(),
                reason: "timestamp out of range".to_string(),
            })?;

        let record = self.serializer.from_storable(key, value_bytes)?;
        Ok((record, cached_at))
    }
}

impl RecordStore for LmdbRecordStore {
    fn name(&self) -> &str {
        TIER_NAME
    }

    fn get(&self, key: &str) -> CacheResult<Option<Record>> {
        Ok(self.get_with_timestamp(key)?.map(|(record, _)| record))
    }

    fn merge(&self, record: &Record) -> CacheResult<BTreeSet<String>> {
        let key = record.key().as_bytes();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let existing = self
            .db
            .get(&wtxn, key)
            .map_err(txn_error)?
            .map(|bytes| bytes.to_vec());
        let mut stored = match existing {
            Some(bytes) => self.decode(record.key(), &bytes)?.0,
            None => Record::new(record.key()),
        };

        let changed = stored.merge_from(record);
        let full_bytes = self.encode(&stored, Utc::now())?;

        self.db.put(&mut wtxn, key, &full_bytes).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        Ok(changed)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn clear(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn dump(&self) -> CacheResult<Vec<TierDump>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut records = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, bytes) = result.map_err(txn_error)?;
            let key = std::str::from_utf8(key).map_err(|e| LmdbCacheError::CorruptEntry {
                key: String::from_utf8_lossy(key).into_owned(),
                reason: e.to_string(),
            })?;
            records.push(self.decode(key, bytes)?.0);
        }
        Ok(vec![TierDump::new(TIER_NAME, records)])
    }
}

/// Opens an [`LmdbRecordStore`] per materialization, using the context's
/// serializer.
#[derive(Debug, Clone)]
pub struct LmdbCacheFactory {
    config: PersistentTierConfig,
}

impl LmdbCacheFactory {
    pub fn new(config: PersistentTierConfig) -> Self {
        Self { config }
    }
}

impl CacheFactory for LmdbCacheFactory {
    fn create(&self, context: &CacheContext) -> CacheResult<Arc<dyn RecordStore>> {
        self.config.validate()?;
        let tier = LmdbRecordStore::open(
            &self.config.path,
            self.config.max_size_mb,
            context.serializer(),
        )?;
        Ok(Arc::new(tier))
    }
}
