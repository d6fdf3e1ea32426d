//! Error types for graphcache operations

use thiserror::Error;

/// Storage layer errors raised by a cache tier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed in {tier}: {reason}")]
    TransactionFailed { tier: String, reason: String },

    #[error("Corrupt entry for key {key} in {tier}: {reason}")]
    CorruptEntry {
        tier: String,
        key: String,
        reason: String,
    },

    #[error("Tier {tier} unavailable: {reason}")]
    Unavailable { tier: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Field serialization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Failed to encode fields of record {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode stored fields: {reason}")]
    Decode { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cannot chain an absent cache factory")]
    MissingFactory,

    #[error("A cache chain needs at least one tier")]
    EmptyChain,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all graphcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// True for errors raised while declaring a chain, before any tier exists.
    pub fn is_config(&self) -> bool {
        matches!(self, CacheError::Config(_))
    }
}

/// Result type alias for graphcache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_transaction_failed() {
        let err = StorageError::TransactionFailed {
            tier: "lmdb".to_string(),
            reason: "map full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Transaction failed"));
        assert!(msg.contains("lmdb"));
        assert!(msg.contains("map full"));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let msg = format!("{}", StorageError::LockPoisoned);
        assert!(msg.contains("lock poisoned"));
    }

    #[test]
    fn test_serialization_error_display_encode() {
        let err = SerializationError::Encode {
            key: "User:1".to_string(),
            reason: "NaN".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("User:1"));
        assert!(msg.contains("NaN"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "memory.max_entries".to_string(),
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("memory.max_entries"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_cache_error_from_variants() {
        let storage = CacheError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, CacheError::Storage(_)));
        assert!(!storage.is_config());

        let serialization = CacheError::from(SerializationError::Decode {
            reason: "eof".to_string(),
        });
        assert!(matches!(serialization, CacheError::Serialization(_)));

        let config = CacheError::from(ConfigError::MissingFactory);
        assert!(matches!(config, CacheError::Config(_)));
        assert!(config.is_config());
    }
}
