//! Cache tiers and the chain that links them.
//!
//! Every tier implements [`RecordStore`]. A [`CacheChain`] strings tiers
//! together front to back and is itself a [`RecordStore`], so chains nest.
//!
//! # Read and Write Policy
//!
//! Reads cascade: the first tier that holds the key answers, and if it is
//! not the front tier the record is copied forward so the next read is
//! served from memory. Writes fan out to every tier, front first. There is
//! no cross-tier transaction; see [`CacheChain`] for what a mid-fan-out
//! failure leaves behind.
//!
//! # Construction
//!
//! Chains are declared with a [`CacheChainBuilder`] and materialized with a
//! [`CacheContext`] that carries the field serializer:
//!
//! ```ignore
//! let mut builder = CacheChainBuilder::new(LruCacheFactory::new(policy));
//! builder.chain(Some(CacheChainBuilder::new(LmdbCacheFactory::new(disk))))?;
//!
//! let chain = builder.create_chain(&CacheContext::default())?;
//! chain.merge(&Record::new("User:1").with_field("name", "Ada"))?;
//! ```

pub mod chain;
pub mod factory;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use chain::CacheChain;
pub use factory::{CacheChainBuilder, CacheContext, CacheFactory};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheFactory, LmdbRecordStore};
pub use memory::{LruCacheFactory, LruRecordStore};
pub use traits::{qualified_field, CacheStats, RecordStore, TierDump};
