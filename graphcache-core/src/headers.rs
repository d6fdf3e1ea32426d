//! Per-call cache hints.

use std::collections::BTreeMap;

/// Skip every write: merges become no-ops and reads do not promote.
pub const DO_NOT_STORE: &str = "do-not-store";

/// Remove a record from every tier once it has been read.
pub const EVICT_AFTER_READ: &str = "evict-after-read";

/// String headers attached to a single cache operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHeaders {
    headers: BTreeMap<String, String>,
}

impl CacheHeaders {
    /// Headers with nothing set.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// A header counts as set when present with any value other than "false".
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some_and(|v| v != "false")
    }

    pub fn do_not_store(&self) -> bool {
        self.has_header(DO_NOT_STORE)
    }

    pub fn evict_after_read(&self) -> bool {
        self.has_header(EVICT_AFTER_READ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_headers() {
        let headers = CacheHeaders::none();
        assert!(!headers.do_not_store());
        assert!(!headers.evict_after_read());
        assert_eq!(headers.header(DO_NOT_STORE), None);
    }

    #[test]
    fn test_flags() {
        let headers = CacheHeaders::none()
            .with_header(DO_NOT_STORE, "true")
            .with_header(EVICT_AFTER_READ, "false");
        assert!(headers.do_not_store());
        assert!(!headers.evict_after_read());
    }
}
