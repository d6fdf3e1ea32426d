//! graphcache Storage - Tiers and Chains
//!
//! Normalized record storage for a GraphQL client: an in-memory LRU tier,
//! a durable LMDB tier, and the chain that presents them as one cache.

pub mod cache;

// Re-export cache types for client integration
pub use cache::{
    qualified_field, CacheChain, CacheChainBuilder, CacheContext, CacheFactory, CacheStats,
    LmdbCacheError, LmdbCacheFactory, LmdbRecordStore, LruCacheFactory, LruRecordStore,
    RecordStore, TierDump,
};

pub use graphcache_core::{
    CacheConfig, CacheError, CacheHeaders, CacheReference, CacheResult, EvictionPolicy,
    FieldSerializer, FieldValue, JsonFieldSerializer, PersistentTierConfig, Record,
};
