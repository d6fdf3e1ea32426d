//! Record store trait and shared tier types.
//!
//! This module defines the contract every cache tier implements. The
//! [`CacheChain`](super::chain::CacheChain) implements it as well, so a chain
//! can sit inside another chain as a single tier.

use std::collections::BTreeSet;

use graphcache_core::{CacheResult, Record};

/// Uniform capability contract for one cache tier.
///
/// Implementations own their storage and must make each operation safe to
/// call from several threads at once. Operations touch a single key (or, for
/// `clear`, this tier only) and never reach into another tier.
///
/// # Errors
///
/// A miss is `Ok(None)`, never an error. An `Err` means the tier could not
/// determine or apply the result (I/O, serialization, poisoned lock).
pub trait RecordStore: Send + Sync {
    /// Short label used in logs and dumps.
    fn name(&self) -> &str;

    /// Fetch the record stored under `key`.
    fn get(&self, key: &str) -> CacheResult<Option<Record>>;

    /// Merge `record` into the stored record with the same key, creating it
    /// when absent. Fields missing from `record` are preserved.
    ///
    /// Returns the names of fields whose stored value changed.
    fn merge(&self, record: &Record) -> CacheResult<BTreeSet<String>>;

    /// Remove the record under `key`, reporting whether it existed.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every record held by this tier.
    fn clear(&self) -> CacheResult<()>;

    /// Snapshot of the tier's contents, for debugging.
    fn dump(&self) -> CacheResult<Vec<TierDump>>;
}

/// Records held by one tier at the time of a [`RecordStore::dump`].
#[derive(Debug, Clone, PartialEq)]
pub struct TierDump {
    /// Name of the tier.
    pub tier: String,
    /// Records sorted by key.
    pub records: Vec<Record>,
}

impl TierDump {
    pub fn new(tier: impl Into<String>, mut records: Vec<Record>) -> Self {
        records.sort_by(|a, b| a.key().cmp(b.key()));
        Self {
            tier: tier.into(),
            records,
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.records.iter().map(Record::key).collect()
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped by a size bound or expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Qualify a field name with its record key, `"{key}.{field}"`.
pub fn qualified_field(key: &str, field: &str) -> String {
    format!("{}.{}", key, field)
}
