//! Cache Entry Module
//!
//! A stored value together with its version and TTL metadata.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::expiry::EntryTtlState;

// == Cache Entry ==
/// Represents a single stored copy of a key on one replica.
///
/// Value, version and TTL are always replaced together.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Version drawn by the primary for the mutation that produced this copy
    pub version: u64,
    /// Expiration metadata
    pub ttl: EntryTtlState,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    pub fn new(value: V, version: u64, ttl: EntryTtlState) -> Self {
        Self {
            value,
            version,
            ttl,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.ttl.is_expired_at(now_ms)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
