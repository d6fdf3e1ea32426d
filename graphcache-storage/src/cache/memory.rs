//! In-memory LRU tier.
//!
//! Holds records in an [`LruCache`] guarded by a mutex. Bounds come from an
//! [`EvictionPolicy`]: entry count, approximate byte size, and expiry after
//! write or after last access. Expired entries behave as misses and are
//! dropped when touched.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use graphcache_core::{CacheResult, EvictionPolicy, Record, StorageError};
use lru::LruCache;
use tracing::{debug, trace};

use super::factory::{CacheContext, CacheFactory};
use super::traits::{CacheStats, RecordStore, TierDump};

struct Entry {
    record: Record,
    size: u64,
    written_at: Instant,
    accessed_at: Instant,
}

struct LruState {
    entries: LruCache<String, Entry>,
    total_bytes: u64,
    stats: CacheStats,
}

impl LruState {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        Some(entry)
    }

    fn insert(&mut self, key: String, entry: Entry) {
        self.total_bytes += entry.size;
        if let Some(old) = self.entries.put(key, entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size);
        }
    }
}

/// LRU-bounded in-memory record store.
///
/// # Example
///
/// ```ignore
/// let tier = LruRecordStore::new(EvictionPolicy::unbounded().with_max_entries(1_000))?;
/// tier.merge(&Record::new("User:1").with_field("name", "Ada"))?;
/// assert!(tier.get("User:1")?.is_some());
/// ```
pub struct LruRecordStore {
    policy: EvictionPolicy,
    state: Mutex<LruState>,
}

impl LruRecordStore {
    /// Create an empty tier. Fails when the policy holds a zero bound.
    pub fn new(policy: EvictionPolicy) -> CacheResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                stats: CacheStats::default(),
            }),
        })
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheResult<CacheStats> {
        let state = self.lock_state()?;
        Ok(CacheStats {
            entry_count: state.entries.len() as u64,
            memory_bytes: state.total_bytes,
            ..state.stats.clone()
        })
    }

    fn lock_state(&self) -> CacheResult<MutexGuard<'_, LruState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        let written = self
            .policy
            .expire_after_write()
            .is_some_and(|ttl| now.duration_since(entry.written_at) >= ttl);
        let accessed = self
            .policy
            .expire_after_access()
            .is_some_and(|ttl| now.duration_since(entry.accessed_at) >= ttl);
        written || accessed
    }

    fn over_bounds(&self, state: &LruState) -> bool {
        let too_many = self
            .policy
            .max_entries
            .is_some_and(|max| state.entries.len() > max);
        let too_big = self
            .policy
            .max_size_bytes
            .is_some_and(|max| state.total_bytes > max);
        too_many || too_big
    }

    /// Drop least recently used entries until the policy holds.
    ///
    /// `keep` is never evicted: an entry larger than the byte bound stays
    /// cached on its own.
    fn evict_over_bounds(&self, state: &mut LruState, keep: &str) {
        while self.over_bounds(state) {
            match state.entries.peek_lru() {
                Some((key, _)) if key.as_str() != keep => {}
                _ => break,
            }
            let Some((key, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(entry.size);
            state.stats.evictions += 1;
            debug!(key = %key, size = entry.size, "Evicted record from memory tier");
        }
    }
}

impl RecordStore for LruRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> CacheResult<Option<Record>> {
        let now = Instant::now();
        let mut state = self.lock_state()?;

        match state.entries.peek(key).map(|e| self.is_expired(e, now)) {
            None => {
                state.stats.misses += 1;
                trace!(key, "Memory tier miss");
                Ok(None)
            }
            Some(true) => {
                state.remove(key);
                state.stats.evictions += 1;
                state.stats.misses += 1;
                trace!(key, "Memory tier entry expired");
                Ok(None)
            }
            Some(false) => {
                let record = state.entries.get_mut(key).map(|entry| {
                    entry.accessed_at = now;
                    entry.record.clone()
                });
                state.stats.hits += 1;
                Ok(record)
            }
        }
    }

    fn merge(&self, record: &Record) -> CacheResult<BTreeSet<String>> {
        record.ensure_finite()?;
        let now = Instant::now();
        let mut state = self.lock_state()?;

        let mut stored = match state.remove(record.key()) {
            Some(entry) if !self.is_expired(&entry, now) => entry.record,
            _ => Record::new(record.key()),
        };
        let changed = stored.merge_from(record);

        let size = stored.size_estimate_bytes();
        state.insert(
            record.key().to_string(),
            Entry {
                record: stored,
                size,
                written_at: now,
                accessed_at: now,
            },
        );
        self.evict_over_bounds(&mut state, record.key());
        Ok(changed)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut state = self.lock_state()?;
        Ok(state
            .remove(key)
            .is_some_and(|entry| !self.is_expired(&entry, now)))
    }

    fn clear(&self) -> CacheResult<()> {
        let mut state = self.lock_state()?;
        state.entries.clear();
        state.total_bytes = 0;
        Ok(())
    }

    fn dump(&self) -> CacheResult<Vec<TierDump>> {
        let now = Instant::now();
        let state = self.lock_state()?;
        let records = state
            .entries
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .map(|(_, entry)| entry.record.clone())
            .collect();
        Ok(vec![TierDump::new(self.name(), records)])
    }
}

/// Builds an [`LruRecordStore`] per materialization.
#[derive(Debug, Clone, Default)]
pub struct LruCacheFactory {
    policy: EvictionPolicy,
}

impl LruCacheFactory {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self { policy }
    }
}

impl CacheFactory for LruCacheFactory {
    fn create(&self, _context: &CacheContext) -> CacheResult<Arc<dyn RecordStore>> {
        Ok(Arc::new(LruRecordStore::new(self.policy.clone())?))
    }
}
