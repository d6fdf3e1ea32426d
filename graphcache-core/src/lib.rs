//! graphcache Core - Record Types
//!
//! The record model, errors, per-call headers, field serializer and
//! configuration shared by every graphcache tier. No storage lives here.

pub mod config;
pub mod error;
pub mod headers;
pub mod record;
pub mod serializer;

pub use config::{CacheConfig, EvictionPolicy, PersistentTierConfig};
pub use error::{CacheError, CacheResult, ConfigError, SerializationError, StorageError};
pub use headers::{CacheHeaders, DO_NOT_STORE, EVICT_AFTER_READ};
pub use record::{CacheReference, FieldValue, Fields, Record};
pub use serializer::{FieldSerializer, JsonFieldSerializer};
