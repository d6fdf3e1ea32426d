//! graphcache Test Utilities
//!
//! Centralized test infrastructure for the graphcache workspace:
//! - Proptest generators for keys, field values and records
//! - Mock tiers and factories that count calls and inject failures
//! - Test fixtures for common record graphs
//! - Custom assertions for cache-specific validation

// Re-export core types for convenience
pub use graphcache_core::{
    CacheConfig, CacheError, CacheHeaders, CacheReference, CacheResult, ConfigError,
    EvictionPolicy, FieldValue, Fields, JsonFieldSerializer, PersistentTierConfig, Record,
    SerializationError, StorageError,
};
pub use graphcache_storage::{
    CacheChain, CacheChainBuilder, CacheContext, CacheFactory, LruCacheFactory, LruRecordStore,
    RecordStore, TierDump,
};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process, filtered by `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// MOCK TIERS
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};

    /// Tier operation, for call counting and failure injection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Operation {
        Get,
        Merge,
        Delete,
        Clear,
    }

    #[derive(Debug, Default)]
    struct CallCounts {
        get: AtomicUsize,
        merge: AtomicUsize,
        delete: AtomicUsize,
        clear: AtomicUsize,
    }

    impl CallCounts {
        fn counter(&self, op: Operation) -> &AtomicUsize {
            match op {
                Operation::Get => &self.get,
                Operation::Merge => &self.merge,
                Operation::Delete => &self.delete,
                Operation::Clear => &self.clear,
            }
        }
    }

    /// Map-backed tier that counts every call and can be told to fail.
    ///
    /// `seed`, `contains` and `snapshot` bypass the counters so tests can
    /// arrange and inspect state without disturbing the counts.
    #[derive(Debug)]
    pub struct CountingStore {
        name: String,
        records: Mutex<BTreeMap<String, Record>>,
        calls: CallCounts,
        failing: Mutex<Option<Operation>>,
    }

    impl CountingStore {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                records: Mutex::new(BTreeMap::new()),
                calls: CallCounts::default(),
                failing: Mutex::new(None),
            }
        }

        pub fn shared(name: impl Into<String>) -> Arc<Self> {
            Arc::new(Self::new(name))
        }

        /// Calls made so far for `op`.
        pub fn calls(&self, op: Operation) -> usize {
            self.calls.counter(op).load(Ordering::SeqCst)
        }

        pub fn total_calls(&self) -> usize {
            [
                Operation::Get,
                Operation::Merge,
                Operation::Delete,
                Operation::Clear,
            ]
            .into_iter()
            .map(|op| self.calls(op))
            .sum()
        }

        /// Make every later `op` call fail with `StorageError::Unavailable`.
        pub fn fail_on(&self, op: Operation) {
            *self.lock_failing() = Some(op);
        }

        pub fn heal(&self) {
            *self.lock_failing() = None;
        }

        /// Store a record without counting a merge.
        pub fn seed(&self, record: Record) {
            self.lock_records().insert(record.key().to_string(), record);
        }

        pub fn contains(&self, key: &str) -> bool {
            self.lock_records().contains_key(key)
        }

        pub fn peek(&self, key: &str) -> Option<Record> {
            self.lock_records().get(key).cloned()
        }

        pub fn snapshot(&self) -> Vec<Record> {
            self.lock_records().values().cloned().collect()
        }

        fn lock_records(&self) -> MutexGuard<'_, BTreeMap<String, Record>> {
            self.records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        fn lock_failing(&self) -> MutexGuard<'_, Option<Operation>> {
            self.failing
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        fn enter(&self, op: Operation) -> CacheResult<()> {
            self.calls.counter(op).fetch_add(1, Ordering::SeqCst);
            if *self.lock_failing() == Some(op) {
                return Err(StorageError::Unavailable {
                    tier: self.name.clone(),
                    reason: format!("injected {:?} failure", op),
                }
                .into());
            }
            Ok(())
        }
    }

    impl RecordStore for CountingStore {
        fn name(&self) -> &str {
            &self.name
        }

        fn get(&self, key: &str) -> CacheResult<Option<Record>> {
            self.enter(Operation::Get)?;
            Ok(self.peek(key))
        }

        fn merge(&self, record: &Record) -> CacheResult<BTreeSet<String>> {
            self.enter(Operation::Merge)?;
            let mut records = self.lock_records();
            let stored = records
                .entry(record.key().to_string())
                .or_insert_with(|| Record::new(record.key()));
            Ok(stored.merge_from(record))
        }

        fn delete(&self, key: &str) -> CacheResult<bool> {
            self.enter(Operation::Delete)?;
            Ok(self.lock_records().remove(key).is_some())
        }

        fn clear(&self) -> CacheResult<()> {
            self.enter(Operation::Clear)?;
            self.lock_records().clear();
            Ok(())
        }

        fn dump(&self) -> CacheResult<Vec<TierDump>> {
            Ok(vec![TierDump::new(self.name.clone(), self.snapshot())])
        }
    }

    /// Factory producing a fresh [`CountingStore`] per materialization.
    ///
    /// Every store it creates is kept so tests can inspect the tiers inside
    /// a materialized chain.
    #[derive(Debug, Clone)]
    pub struct CountingFactory {
        name: String,
        created: Arc<Mutex<Vec<Arc<CountingStore>>>>,
    }

    impl CountingFactory {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                created: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Stores created so far, oldest first.
        pub fn created(&self) -> Vec<Arc<CountingStore>> {
            self.created
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
        }

        pub fn created_count(&self) -> usize {
            self.created().len()
        }

        /// Builder wrapping a clone of this factory.
        pub fn builder(&self) -> CacheChainBuilder {
            CacheChainBuilder::new(self.clone())
        }
    }

    impl CacheFactory for CountingFactory {
        fn create(&self, _context: &CacheContext) -> CacheResult<Arc<dyn RecordStore>> {
            let store = CountingStore::shared(self.name.clone());
            self.created
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(Arc::clone(&store));
            Ok(store)
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a cache key such as `User:42`.
    pub fn arb_key() -> impl Strategy<Value = String> {
        ("[A-Z][a-z]{2,6}", 0u32..50).prop_map(|(typename, id)| format!("{}:{}", typename, id))
    }

    /// Generate a field name.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z]{0,7}"
    }

    /// Generate a scalar or reference value. Floats are finite.
    pub fn arb_leaf_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i64>().prop_map(FieldValue::Int),
            (-1.0e9f64..1.0e9f64).prop_map(FieldValue::Float),
            "[ -~]{0,16}".prop_map(FieldValue::String),
            arb_key().prop_map(FieldValue::reference),
        ]
    }

    /// Generate any field value, nesting lists and objects a few levels deep.
    pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        arb_leaf_value().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(FieldValue::List),
                prop::collection::btree_map(arb_field_name(), inner, 0..4)
                    .prop_map(FieldValue::Object),
            ]
        })
    }

    /// Generate a field map.
    pub fn arb_fields() -> impl Strategy<Value = Fields> {
        prop::collection::btree_map(arb_field_name(), arb_field_value(), 1..6)
    }

    /// Generate a record under the given key.
    pub fn arb_record_for(key: String) -> impl Strategy<Value = Record> {
        arb_fields().prop_map(move |fields| Record::from_fields(key.clone(), fields))
    }

    /// Generate a record with a random key.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (arb_key(), arb_fields()).prop_map(|(key, fields)| Record::from_fields(key, fields))
    }

    /// Generate records whose keys are pairwise distinct.
    pub fn arb_distinct_records(max: usize) -> impl Strategy<Value = Vec<Record>> {
        prop::collection::btree_map(arb_key(), arb_fields(), 1..max.max(2)).prop_map(|map| {
            map.into_iter()
                .map(|(key, fields)| Record::from_fields(key, fields))
                .collect()
        })
    }

    /// Generate a memory eviction policy that never evicts during a test.
    pub fn arb_unbounded_policy() -> impl Strategy<Value = EvictionPolicy> {
        prop_oneof![
            Just(EvictionPolicy::unbounded()),
            (10_000usize..100_000)
                .prop_map(|max| EvictionPolicy::unbounded().with_max_entries(max)),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::sync::Arc;

    /// A user record with a reference to its best friend.
    pub fn user(id: u32, name: &str) -> Record {
        Record::new(format!("User:{}", id))
            .with_field("__typename", "User")
            .with_field("id", i64::from(id))
            .with_field("name", name)
            .with_field("bestFriend", FieldValue::reference(format!("User:{}", id + 1)))
    }

    /// A post authored by `author_id` with the given comment ids.
    pub fn post(id: u32, author_id: u32, comment_ids: &[u32]) -> Record {
        Record::new(format!("Post:{}", id))
            .with_field("__typename", "Post")
            .with_field("title", format!("Post {}", id))
            .with_field("author", FieldValue::reference(format!("User:{}", author_id)))
            .with_field(
                "comments",
                comment_ids
                    .iter()
                    .map(|c| FieldValue::reference(format!("Comment:{}", c)))
                    .collect::<Vec<_>>(),
            )
    }

    /// A comment record with no outgoing references.
    pub fn comment(id: u32, body: &str) -> Record {
        Record::new(format!("Comment:{}", id))
            .with_field("__typename", "Comment")
            .with_field("body", body)
    }

    /// Unbounded in-memory tier.
    pub fn memory_tier() -> Arc<LruRecordStore> {
        Arc::new(
            LruRecordStore::new(EvictionPolicy::unbounded())
                .expect("unbounded policy is always valid"),
        )
    }

    /// Chain over the given tiers, front first.
    pub fn chain_of(tiers: Vec<Arc<dyn RecordStore>>) -> CacheChain {
        CacheChain::new(tiers).expect("fixture chains are never empty")
    }

    /// Context with the JSON field serializer.
    pub fn json_context() -> CacheContext {
        CacheContext::default()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result is Ok.
    pub fn assert_ok<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got {:?}", result);
    }

    /// Assert that a result is a configuration error.
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Config(_)) => {}
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    /// Assert that a result is a storage error.
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Storage(_)) => {}
            other => panic!("Expected Storage error, got {:?}", other),
        }
    }

    /// Assert that `stored` holds every field of `written` with the same value.
    pub fn assert_contains_fields(stored: &Record, written: &Record) {
        assert_eq!(stored.key(), written.key(), "record keys differ");
        for (name, value) in written.fields() {
            assert_eq!(
                stored.field(name),
                Some(value),
                "field {} of {} does not match",
                name,
                written.key()
            );
        }
    }

    /// Assert that `tier` holds a record under `key`.
    pub fn assert_present(tier: &dyn RecordStore, key: &str) -> Record {
        match tier.get(key) {
            Ok(Some(record)) => record,
            other => panic!("Expected {} in tier {}, got {:?}", key, tier.name(), other),
        }
    }

    /// Assert that `tier` holds nothing under `key`.
    pub fn assert_absent(tier: &dyn RecordStore, key: &str) {
        match tier.get(key) {
            Ok(None) => {}
            other => panic!("Expected {} absent from tier {}, got {:?}", key, tier.name(), other),
        }
    }
}
