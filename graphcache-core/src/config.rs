//! Cache configuration.
//!
//! Loaded from TOML. The memory tier section is required; the persistent
//! tier is optional and, when present, is chained behind the memory tier.

use crate::{CacheResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Bounds applied by the in-memory tier. Unset bounds are unlimited.
///
/// `max_size_bytes` never evicts the record just written, so a single record
/// larger than the bound stays cached alone and exceeds the bound by itself.
/// Expiry is tracked in whole milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvictionPolicy {
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
    #[serde(default)]
    pub expire_after_write_ms: Option<u64>,
    #[serde(default)]
    pub expire_after_access_ms: Option<u64>,
}

impl EvictionPolicy {
    /// A policy with no bounds at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn with_max_size_bytes(mut self, max: u64) -> Self {
        self.max_size_bytes = Some(max);
        self
    }

    /// Expire entries `ttl` after their last write, rounded up to the next
    /// millisecond.
    pub fn with_expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write_ms = Some(ceil_millis(ttl));
        self
    }

    /// Expire entries `ttl` after their last read or write, rounded up to
    /// the next millisecond.
    pub fn with_expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access_ms = Some(ceil_millis(ttl));
        self
    }

    pub fn expire_after_write(&self) -> Option<Duration> {
        self.expire_after_write_ms.map(Duration::from_millis)
    }

    pub fn expire_after_access(&self) -> Option<Duration> {
        self.expire_after_access_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.max_entries == Some(0) {
            return Err(invalid("memory.max_entries", "must be > 0"));
        }
        if self.max_size_bytes == Some(0) {
            return Err(invalid("memory.max_size_bytes", "must be > 0"));
        }
        if self.expire_after_write_ms == Some(0) {
            return Err(invalid("memory.expire_after_write_ms", "must be > 0"));
        }
        if self.expire_after_access_ms == Some(0) {
            return Err(invalid("memory.expire_after_access_ms", "must be > 0"));
        }
        Ok(())
    }
}

/// Location and size bound of the LMDB tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistentTierConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

impl PersistentTierConfig {
    pub fn new(path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        Self {
            path: path.into(),
            max_size_mb,
        }
    }

    /// LMDB map size in bytes. Fails when `max_size_mb` does not fit in
    /// `usize` once converted to bytes.
    pub fn map_size_bytes(&self) -> CacheResult<usize> {
        self.max_size_mb
            .checked_mul(BYTES_PER_MB)
            .ok_or_else(|| invalid("persistent.max_size_mb", "too large for this platform"))
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(invalid("persistent.path", "must not be empty"));
        }
        if self.max_size_mb == 0 {
            return Err(invalid("persistent.max_size_mb", "must be > 0"));
        }
        self.map_size_bytes()?;
        Ok(())
    }
}

/// Top-level cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub memory: EvictionPolicy,
    #[serde(default)]
    pub persistent: Option<PersistentTierConfig>,
}

impl CacheConfig {
    /// Memory-only configuration.
    pub fn memory_only(memory: EvictionPolicy) -> Self {
        Self {
            memory,
            persistent: None,
        }
    }

    pub fn with_persistent(mut self, persistent: PersistentTierConfig) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Read, parse and validate a TOML config file.
    pub fn from_path(path: &Path) -> CacheResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> CacheResult<Self> {
        let config: CacheConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CacheResult<()> {
        self.memory.validate()?;
        if let Some(persistent) = &self.persistent {
            persistent.validate()?;
        }
        Ok(())
    }
}

fn ceil_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn invalid(field: &str, reason: &str) -> crate::CacheError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
