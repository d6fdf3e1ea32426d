//! Lazy construction of cache chains.
//!
//! A [`CacheChainBuilder`] declares which tiers a chain has, in order,
//! without allocating any storage. [`CacheChainBuilder::create_chain`] turns
//! the declaration into a live [`CacheChain`], asking each [`CacheFactory`]
//! for one tier.

use std::fmt;
use std::sync::Arc;

use graphcache_core::{
    CacheConfig, CacheResult, ConfigError, FieldSerializer, JsonFieldSerializer,
};
use tracing::debug;

use super::chain::CacheChain;
use super::lmdb_backend::LmdbCacheFactory;
use super::memory::LruCacheFactory;
use super::traits::RecordStore;

/// Shared construction context handed to every factory.
///
/// Tier-specific settings (paths, bounds) belong to the factory itself.
#[derive(Clone)]
pub struct CacheContext {
    serializer: Arc<dyn FieldSerializer>,
}

impl CacheContext {
    pub fn new(serializer: Arc<dyn FieldSerializer>) -> Self {
        Self { serializer }
    }

    /// Field serializer for tiers that store bytes.
    pub fn serializer(&self) -> Arc<dyn FieldSerializer> {
        Arc::clone(&self.serializer)
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new(Arc::new(JsonFieldSerializer::new()))
    }
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

/// Produces one materialized tier per call.
pub trait CacheFactory: Send + Sync {
    fn create(&self, context: &CacheContext) -> CacheResult<Arc<dyn RecordStore>>;
}

/// Ordered declaration of a chain's tiers.
///
/// `chain` always appends at the tail, however many builders were appended
/// before. The appended builder is taken by value, so a builder cannot be
/// linked into two chains or into itself.
///
/// # Example
///
/// ```ignore
/// let mut builder = CacheChainBuilder::new(LruCacheFactory::new(policy));
/// builder.chain(durable_builder)?;   // Option<CacheChainBuilder>
/// let chain = builder.create_chain(&CacheContext::default())?;
/// ```
#[derive(Clone)]
pub struct CacheChainBuilder {
    factories: Vec<Arc<dyn CacheFactory>>,
}

impl CacheChainBuilder {
    /// Builder for a single tier.
    pub fn new<F: CacheFactory + 'static>(factory: F) -> Self {
        Self::from_factory(Arc::new(factory))
    }

    pub fn from_factory(factory: Arc<dyn CacheFactory>) -> Self {
        Self {
            factories: vec![factory],
        }
    }

    /// Memory tier from `config.memory`, followed by the LMDB tier when
    /// `config.persistent` is set.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let mut builder = Self::new(LruCacheFactory::new(config.memory.clone()));
        if let Some(persistent) = &config.persistent {
            builder.chain(Some(Self::new(LmdbCacheFactory::new(persistent.clone()))))?;
        }
        Ok(builder)
    }

    /// Append `next` (and everything already chained onto it) at the tail.
    ///
    /// `None` is a configuration error and leaves this builder unchanged.
    pub fn chain(&mut self, next: Option<CacheChainBuilder>) -> CacheResult<&mut Self> {
        let next = next.ok_or(ConfigError::MissingFactory)?;
        self.factories.extend(next.factories);
        Ok(self)
    }

    /// Number of tiers a materialized chain will have.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Always false; a builder starts with one factory.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Materialize every tier, in order, into a chain.
    ///
    /// Each call asks the factories again, so tiers are fresh unless a
    /// factory hands out shared instances. The first factory failure is
    /// returned and no chain is built.
    pub fn create_chain(&self, context: &CacheContext) -> CacheResult<CacheChain> {
        let mut tiers = Vec::with_capacity(self.factories.len());
        for factory in &self.factories {
            tiers.push(factory.create(context)?);
        }
        debug!(
            tiers = ?tiers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "Materialized cache chain"
        );
        CacheChain::new(tiers)
    }
}

/// A builder is itself a factory whose product is a whole chain, which lets
/// one chain sit as a single tier of another.
impl CacheFactory for CacheChainBuilder {
    fn create(&self, context: &CacheContext) -> CacheResult<Arc<dyn RecordStore>> {
        Ok(Arc::new(self.create_chain(context)?))
    }
}

impl fmt::Debug for CacheChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheChainBuilder")
            .field("tiers", &self.factories.len())
            .finish()
    }
}
