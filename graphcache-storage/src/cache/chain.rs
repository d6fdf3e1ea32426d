//! Multi-tier cache chain.
//!
//! Routes reads front to back until a tier hits, promoting back-tier hits
//! into the tiers in front of them, and fans every write out to all tiers.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use graphcache_core::{CacheHeaders, CacheResult, ConfigError, Record};
use tracing::{debug, trace, warn};

use super::traits::{qualified_field, RecordStore, TierDump};

/// Ordered tiers presented as a single [`RecordStore`].
///
/// Tier 0 is nearest to the caller (fast, volatile); the last tier is the
/// most durable. Order is fixed at construction and only grows by appending.
///
/// # Consistency
///
/// - `get` trusts tier 0 once it hits; later tiers are not consulted.
/// - A hit in tier `i > 0` is merged into tiers `i-1` down to `0` before it
///   is returned.
/// - `merge`, `delete` and `clear` are applied to every tier, front first.
///
/// Fan-out is not atomic across tiers. A tier failure stops the operation
/// where it is: tiers already written keep the write, later tiers never see
/// it. Errors are returned unchanged; the chain never turns a failure into a
/// miss.
///
/// # Example
///
/// ```ignore
/// let chain = CacheChain::new(vec![memory_tier, lmdb_tier])?;
/// chain.merge(&record)?;                 // written to both tiers
/// let hit = chain.get(record.key())?;    // served from memory
/// ```
#[derive(Clone)]
pub struct CacheChain {
    tiers: Vec<Arc<dyn RecordStore>>,
}

impl CacheChain {
    /// Create a chain over `tiers`, front first. An empty list is a
    /// configuration error.
    pub fn new(tiers: Vec<Arc<dyn RecordStore>>) -> CacheResult<Self> {
        if tiers.is_empty() {
            return Err(ConfigError::EmptyChain.into());
        }
        Ok(Self { tiers })
    }

    /// Chain of one tier; behaves exactly like the tier.
    pub fn single(tier: Arc<dyn RecordStore>) -> Self {
        Self { tiers: vec![tier] }
    }

    /// Append `tier` behind the current last tier.
    pub fn chain(&mut self, tier: Arc<dyn RecordStore>) -> &mut Self {
        self.tiers.push(tier);
        self
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false; a chain holds at least one tier.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn tiers(&self) -> &[Arc<dyn RecordStore>] {
        &self.tiers
    }

    pub fn tier(&self, index: usize) -> Option<&Arc<dyn RecordStore>> {
        self.tiers.get(index)
    }

    /// Read `key`, honoring `headers`.
    ///
    /// `EVICT_AFTER_READ` removes the key from every tier after a hit
    /// instead of promoting it. `DO_NOT_STORE` suppresses promotion.
    pub fn get_with(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            let Some(record) = tier.get(key)? else {
                trace!(tier = tier.name(), key, "Cache tier miss");
                continue;
            };
            trace!(tier = tier.name(), index, key, "Cache tier hit");

            if headers.evict_after_read() {
                self.delete(key)?;
            } else if index > 0 && !headers.do_not_store() {
                self.promote(&record, index)?;
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Merge `record` into every tier, honoring `headers`.
    ///
    /// Returns the union of field names changed in any tier. With
    /// `DO_NOT_STORE` nothing is written and the set is empty.
    pub fn merge_with(
        &self,
        record: &Record,
        headers: &CacheHeaders,
    ) -> CacheResult<BTreeSet<String>> {
        if headers.do_not_store() {
            return Ok(BTreeSet::new());
        }

        let mut changed = BTreeSet::new();
        for (index, tier) in self.tiers.iter().enumerate() {
            let tier_changed = tier.merge(record).map_err(|e| {
                if index > 0 {
                    warn!(
                        tier = tier.name(),
                        index,
                        key = record.key(),
                        error = %e,
                        "Fan-out merge aborted after earlier tiers were written"
                    );
                }
                e
            })?;
            changed.extend(tier_changed);
        }
        Ok(changed)
    }

    /// Read several keys; missing keys are skipped. Each key is read with
    /// the same cascade and promotion as [`CacheChain::get_with`].
    pub fn get_many<'k, I>(&self, keys: I, headers: &CacheHeaders) -> CacheResult<Vec<Record>>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut found = Vec::new();
        for key in keys {
            if let Some(record) = self.get_with(key, headers)? {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// Merge several records one at a time.
    ///
    /// Changed fields are reported as `"{record_key}.{field}"`.
    pub fn merge_many<'r, I>(
        &self,
        records: I,
        headers: &CacheHeaders,
    ) -> CacheResult<BTreeSet<String>>
    where
        I: IntoIterator<Item = &'r Record>,
    {
        let mut changed = BTreeSet::new();
        for record in records {
            for field in self.merge_with(record, headers)? {
                changed.insert(qualified_field(record.key(), &field));
            }
        }
        Ok(changed)
    }

    /// Delete `key` and every record reachable from it through references.
    ///
    /// References are gathered from every tier that holds a record, so a
    /// stale copy in one tier cannot hide a link present in another. Cycles
    /// are visited once. Returns how many keys were removed from at least
    /// one tier.
    pub fn delete_cascade(&self, key: &str) -> CacheResult<usize> {
        let mut visited = HashSet::new();
        let mut pending = vec![key.to_string()];
        let mut removed = 0;

        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for tier in &self.tiers {
                if let Some(record) = tier.get(&current)? {
                    pending.extend(
                        record
                            .references()
                            .into_iter()
                            .map(|r| r.key().to_string())
                            .filter(|k| !visited.contains(k)),
                    );
                }
            }
            if self.delete(&current)? {
                removed += 1;
            }
        }

        debug!(key, removed, "Cascading delete finished");
        Ok(removed)
    }

    /// Write a record found in tier `found_at` into every tier in front of it,
    /// nearest first.
    fn promote(&self, record: &Record, found_at: usize) -> CacheResult<()> {
        for tier in self.tiers[..found_at].iter().rev() {
            tier.merge(record)?;
        }
        debug!(key = record.key(), from = found_at, "Promoted record to front tiers");
        Ok(())
    }
}

impl RecordStore for CacheChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn get(&self, key: &str) -> CacheResult<Option<Record>> {
        self.get_with(key, &CacheHeaders::none())
    }

    fn merge(&self, record: &Record) -> CacheResult<BTreeSet<String>> {
        self.merge_with(record, &CacheHeaders::none())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut existed = false;
        for tier in &self.tiers {
            existed |= tier.delete(key)?;
        }
        Ok(existed)
    }

    fn clear(&self) -> CacheResult<()> {
        for tier in &self.tiers {
            tier.clear()?;
        }
        Ok(())
    }

    fn dump(&self) -> CacheResult<Vec<TierDump>> {
        let mut dumps = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            dumps.extend(tier.dump()?);
        }
        Ok(dumps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::LruRecordStore;
    use graphcache_core::{
        CacheError, EvictionPolicy, FieldValue, StorageError, DO_NOT_STORE, EVICT_AFTER_READ,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    fn memory() -> Arc<LruRecordStore> {
        Arc::new(
            LruRecordStore::new(EvictionPolicy::unbounded())
                .expect("tier creation should succeed"),
        )
    }

    fn two_tier() -> (CacheChain, Arc<LruRecordStore>, Arc<LruRecordStore>) {
        let front = memory();
        let back = memory();
        let chain = CacheChain::new(vec![front.clone(), back.clone()])
            .expect("chain creation should succeed");
        (chain, front, back)
    }

    fn user(id: u32) -> Record {
        Record::new(format!("User:{}", id)).with_field("name", format!("user-{}", id))
    }

    /// Tier that can be switched into a failing state.
    struct FlakyTier {
        inner: LruRecordStore,
        failing: AtomicBool,
    }

    impl FlakyTier {
        fn new() -> Self {
            Self {
                inner: LruRecordStore::new(EvictionPolicy::unbounded())
                    .expect("tier creation should succeed"),
                failing: AtomicBool::new(false),
            }
        }

        fn check(&self) -> CacheResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable {
                    tier: "flaky".to_string(),
                    reason: "disk gone".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    impl RecordStore for FlakyTier {
        fn name(&self) -> &str {
            "flaky"
        }

        fn get(&self, key: &str) -> CacheResult<Option<Record>> {
            self.check()?;
            self.inner.get(key)
        }

        fn merge(&self, record: &Record) -> CacheResult<BTreeSet<String>> {
            self.check()?;
            self.inner.merge(record)
        }

        fn delete(&self, key: &str) -> CacheResult<bool> {
            self.check()?;
            self.inner.delete(key)
        }

        fn clear(&self) -> CacheResult<()> {
            self.check()?;
            self.inner.clear()
        }

        fn dump(&self) -> CacheResult<Vec<TierDump>> {
            self.inner.dump()
        }
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        let result = CacheChain::new(Vec::new());
        assert!(matches!(
            result,
            Err(CacheError::Config(ConfigError::EmptyChain))
        ));
    }

    #[test]
    fn test_read_after_write() {
        let (chain, _, _) = two_tier();
        chain.merge(&user(1)).expect("merge should succeed");

        let record = chain
            .get("User:1")
            .expect("get should succeed")
            .expect("record should be present");
        assert_eq!(record.field("name"), Some(&FieldValue::from("user-1")));
    }

    #[test]
    fn test_back_tier_hit_is_promoted() {
        let (chain, front, back) = two_tier();
        back.merge(&user(1)).expect("merge should succeed");
        assert!(front.get("User:1").expect("get should succeed").is_none());

        let record = chain.get("User:1").expect("get should succeed");
        assert_eq!(record, Some(user(1)));
        assert_eq!(front.get("User:1").expect("get should succeed"), Some(user(1)));
    }

    #[test]
    fn test_front_hit_does_not_consult_back() {
        let (chain, front, back) = two_tier();
        front.merge(&user(1)).expect("merge should succeed");
        back.merge(&user(1).with_field("name", "stale"))
            .expect("merge should succeed");

        let record = chain
            .get("User:1")
            .expect("get should succeed")
            .expect("record should be present");
        assert_eq!(record.field("name"), Some(&FieldValue::from("user-1")));
        assert_eq!(back.stats().expect("stats should succeed").hits, 0);
    }

    #[test]
    fn test_promotion_reaches_every_front_tier() {
        let tiers = [memory(), memory(), memory()];
        let chain = CacheChain::new(
            tiers
                .iter()
                .map(|t| Arc::clone(t) as Arc<dyn RecordStore>)
                .collect(),
        )
        .expect("chain creation should succeed");
        tiers[2].merge(&user(9)).expect("merge should succeed");

        chain.get("User:9").expect("get should succeed");
        assert!(tiers[0].get("User:9").expect("get should succeed").is_some());
        assert!(tiers[1].get("User:9").expect("get should succeed").is_some());
    }

    #[test]
    fn test_all_tiers_miss() {
        let (chain, _, _) = two_tier();
        assert_eq!(chain.get("User:404").expect("get should succeed"), None);
    }

    #[test]
    fn test_merge_fans_out_and_unions_changes() {
        let (chain, front, back) = two_tier();
        front.merge(&Record::new("User:1").with_field("name", "Ada"))
            .expect("merge should succeed");
        back.merge(&Record::new("User:1").with_field("age", 36))
            .expect("merge should succeed");

        let changed = chain
            .merge(
                &Record::new("User:1")
                    .with_field("name", "Ada")
                    .with_field("age", 36),
            )
            .expect("merge should succeed");
        // name changed only in back, age only in front
        assert_eq!(
            changed,
            BTreeSet::from(["age".to_string(), "name".to_string()])
        );

        for tier in [&front, &back] {
            let record = tier
                .get("User:1")
                .expect("get should succeed")
                .expect("record should be present");
            assert_eq!(record.len(), 2);
        }
    }

    #[test]
    fn test_delete_from_back_only() {
        let (chain, front, back) = two_tier();
        back.merge(&user(1)).expect("merge should succeed");

        assert!(chain.delete("User:1").expect("delete should succeed"));
        assert!(front.get("User:1").expect("get should succeed").is_none());
        assert!(back.get("User:1").expect("get should succeed").is_none());
        assert!(!chain.delete("User:1").expect("delete should succeed"));
    }

    #[test]
    fn test_clear_empties_every_tier() {
        let (chain, front, back) = two_tier();
        chain.merge(&user(1)).expect("merge should succeed");
        back.merge(&user(2)).expect("merge should succeed");

        chain.clear().expect("clear should succeed");
        for key in ["User:1", "User:2"] {
            assert!(front.get(key).expect("get should succeed").is_none());
            assert!(back.get(key).expect("get should succeed").is_none());
        }
    }

    #[test]
    fn test_do_not_store_header() {
        let (chain, front, back) = two_tier();
        let headers = CacheHeaders::none().with_header(DO_NOT_STORE, "true");

        let changed = chain
            .merge_with(&user(1), &headers)
            .expect("merge should succeed");
        assert!(changed.is_empty());
        assert!(chain.get("User:1").expect("get should succeed").is_none());

        back.merge(&user(2)).expect("merge should succeed");
        assert!(chain
            .get_with("User:2", &headers)
            .expect("get should succeed")
            .is_some());
        assert!(front.get("User:2").expect("get should succeed").is_none());
    }

    #[test]
    fn test_evict_after_read_header() {
        let (chain, front, back) = two_tier();
        back.merge(&user(1)).expect("merge should succeed");
        let headers = CacheHeaders::none().with_header(EVICT_AFTER_READ, "true");

        let record = chain
            .get_with("User:1", &headers)
            .expect("get should succeed");
        assert_eq!(record, Some(user(1)));
        assert!(front.get("User:1").expect("get should succeed").is_none());
        assert!(back.get("User:1").expect("get should succeed").is_none());
    }

    #[test]
    fn test_batch_operations() {
        let (chain, front, back) = two_tier();
        back.merge(&user(2)).expect("merge should succeed");

        let changed = chain
            .merge_many([&user(1), &user(3)], &CacheHeaders::none())
            .expect("merge should succeed");
        assert_eq!(
            changed,
            BTreeSet::from(["User:1.name".to_string(), "User:3.name".to_string()])
        );

        let found = chain
            .get_many(["User:1", "User:2", "User:404", "User:3"], &CacheHeaders::none())
            .expect("get should succeed");
        let keys: Vec<&str> = found.iter().map(Record::key).collect();
        assert_eq!(keys, vec!["User:1", "User:2", "User:3"]);
        // Batch reads promote like single reads.
        assert!(front.get("User:2").expect("get should succeed").is_some());
    }

    #[test]
    fn test_delete_cascade_follows_references() {
        let (chain, front, back) = two_tier();
        chain
            .merge(
                &Record::new("Post:1")
                    .with_field("author", FieldValue::reference("User:1"))
                    .with_field(
                        "comments",
                        vec![
                            FieldValue::reference("Comment:1"),
                            FieldValue::reference("Comment:2"),
                        ],
                    ),
            )
            .expect("merge should succeed");
        // Cycle back to the post.
        chain
            .merge(&user(1).with_field("latest", FieldValue::reference("Post:1")))
            .expect("merge should succeed");
        chain
            .merge(&Record::new("Comment:1").with_field("body", "hi"))
            .expect("merge should succeed");
        // Only in the back tier.
        back.merge(&Record::new("Comment:2").with_field("body", "yo"))
            .expect("merge should succeed");
        chain.merge(&user(2)).expect("merge should succeed");

        let removed = chain.delete_cascade("Post:1").expect("cascade should succeed");
        assert_eq!(removed, 4);

        let remaining = chain.dump().expect("dump should succeed");
        assert_eq!(remaining[0].keys(), vec!["User:2"]);
        assert_eq!(remaining[1].keys(), vec!["User:2"]);
        assert!(front.get("Comment:2").expect("get should succeed").is_none());
    }

    #[test]
    fn test_dump_concatenates_tiers() {
        let (chain, _, back) = two_tier();
        chain.merge(&user(1)).expect("merge should succeed");
        back.merge(&user(2)).expect("merge should succeed");

        let dump = chain.dump().expect("dump should succeed");
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[0].keys(), vec!["User:1"]);
        assert_eq!(dump[1].keys(), vec!["User:1", "User:2"]);
    }

    #[test]
    fn test_front_failure_aborts_fan_out() {
        let front = Arc::new(FlakyTier::new());
        let back = memory();
        let chain = CacheChain::new(vec![front.clone(), back.clone()])
            .expect("chain creation should succeed");
        front.failing.store(true, Ordering::SeqCst);

        let result = chain.merge(&user(1));
        assert!(matches!(result, Err(CacheError::Storage(_))));
        assert!(back.get("User:1").expect("get should succeed").is_none());
    }

    #[test]
    fn test_back_failure_leaves_front_written() {
        let front = memory();
        let back = Arc::new(FlakyTier::new());
        let chain = CacheChain::new(vec![front.clone(), back.clone()])
            .expect("chain creation should succeed");
        back.failing.store(true, Ordering::SeqCst);

        assert!(chain.merge(&user(1)).is_err());
        assert!(front.get("User:1").expect("get should succeed").is_some());
    }

    #[test]
    fn test_cascade_failure_is_not_a_miss() {
        let front = memory();
        let back = Arc::new(FlakyTier::new());
        let chain = CacheChain::new(vec![front.clone(), back.clone()])
            .expect("chain creation should succeed");
        back.failing.store(true, Ordering::SeqCst);

        let result = chain.get("User:1");
        assert!(matches!(
            result,
            Err(CacheError::Storage(StorageError::Unavailable { .. }))
        ));
    }

    #[test]
    fn test_chain_of_chains() {
        let (inner, inner_front, inner_back) = two_tier();
        let outer_front = memory();
        let mut outer = CacheChain::single(outer_front.clone());
        outer.chain(Arc::new(inner));
        assert_eq!(outer.len(), 2);

        inner_back.merge(&user(5)).expect("merge should succeed");
        assert_eq!(outer.get("User:5").expect("get should succeed"), Some(user(5)));
        assert!(inner_front.get("User:5").expect("get should succeed").is_some());
        assert!(outer_front.get("User:5").expect("get should succeed").is_some());

        outer.merge(&user(6)).expect("merge should succeed");
        assert!(inner_back.get("User:6").expect("get should succeed").is_some());
        assert_eq!(outer.dump().expect("dump should succeed").len(), 3);
    }
}
