//! Replica Store Module
//!
//! One node's local copies of keys (primary, backup or near) with their TTL
//! metadata, kept in lock-step with the eager expiration index.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cache::{CacheEntry, CacheKey, CacheStats, CacheValue, StatsCounters};
use crate::expiry::{EagerExpirationIndex, EntryTtlState};

// == Write ==
/// What an atomic read-modify-write decided to do with the slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Write<V> {
    Keep,
    Put(CacheEntry<V>),
    Remove,
}

// == Replica Store ==
/// Concurrent map of local copies.
///
/// Value, version and TTL are mutated under the same per-shard guard, and
/// the expiration index is updated before that guard is released.
#[derive(Debug)]
pub struct ReplicaStore<K: CacheKey, V> {
    entries: DashMap<K, CacheEntry<V>>,
    /// `None` when eager reclamation is disabled
    index: Option<EagerExpirationIndex<K>>,
    stats: StatsCounters,
}

impl<K: CacheKey, V: CacheValue> ReplicaStore<K, V> {
    // == Constructor ==
    pub fn new(eager_ttl: bool) -> Self {
        Self {
            entries: DashMap::new(),
            index: eager_ttl.then(EagerExpirationIndex::new),
            stats: StatsCounters::new(),
        }
    }

    // == Update ==
    /// Atomically reads the current copy of `key`, lets `f` decide, and
    /// applies the decision together with the index change.
    pub fn update<R>(
        &self,
        key: K,
        f: impl FnOnce(Option<&CacheEntry<V>>) -> (Write<V>, R),
    ) -> R {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let (write, result) = f(Some(occupied.get()));
                match write {
                    Write::Keep => {}
                    Write::Put(entry) => {
                        self.reindex(occupied.key(), &entry.ttl);
                        *occupied.get_mut() = entry;
                        self.stats.record_put();
                    }
                    Write::Remove => {
                        self.unindex(occupied.key());
                        occupied.remove();
                    }
                }
                result
            }
            Entry::Vacant(vacant) => {
                let (write, result) = f(None);
                if let Write::Put(entry) = write {
                    self.reindex(vacant.key(), &entry.ttl);
                    vacant.insert(entry);
                    self.stats.record_put();
                }
                result
            }
        }
    }

    fn reindex(&self, key: &K, ttl: &EntryTtlState) {
        if let Some(index) = &self.index {
            index.upsert(key.clone(), ttl.expire_time_ms);
        }
    }

    fn unindex(&self, key: &K) {
        if let Some(index) = &self.index {
            index.remove(key);
        }
    }

    // == Peek ==
    /// Returns the stored copy, expired or not, without side effects.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Returns the TTL metadata of the stored copy.
    pub fn peek_ttl(&self, key: &K) -> Option<EntryTtlState> {
        self.entries.get(key).map(|e| e.ttl)
    }

    // == Read Live ==
    /// Returns the copy if it is live at `now_ms`.
    ///
    /// A copy found expired is compare-and-deleted and counted as a miss.
    pub fn read_live(&self, key: &K, now_ms: u64) -> Option<CacheEntry<V>> {
        let found = self.peek(key);
        match found {
            Some(entry) if !entry.is_expired_at(now_ms) => {
                self.stats.record_hit();
                Some(entry)
            }
            Some(entry) => {
                if self.remove_if_expire_time(key, entry.ttl.expire_time_ms, now_ms) {
                    self.stats.record_expired();
                }
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Install ==
    /// Applies a copy shipped by the primary. Older versions are ignored.
    pub fn install(&self, key: K, entry: CacheEntry<V>) -> bool {
        self.update(key, |current| match current {
            Some(existing) if existing.version > entry.version => (Write::Keep, false),
            _ => (Write::Put(entry), true),
        })
    }

    // == Remove ==
    /// Removes the copy if it is not newer than `version`.
    pub fn remove_versioned(&self, key: K, version: u64) -> bool {
        let removed = self.update(key, |current| match current {
            Some(existing) if existing.version <= version => (Write::Remove, true),
            _ => (Write::Keep, false),
        });
        if removed {
            self.stats.record_removal();
        }
        removed
    }

    /// Removes the copy unconditionally.
    pub fn remove_now(&self, key: &K) -> Option<CacheEntry<V>> {
        let removed = self.update(key.clone(), |current| match current {
            Some(existing) => (Write::Remove, Some(existing.clone())),
            None => (Write::Keep, None),
        });
        if removed.is_some() {
            self.stats.record_removal();
        }
        removed
    }

    /// Compare-and-delete: removes the copy only if it still carries
    /// `expire_time_ms` and has expired at `now_ms`.
    pub fn remove_if_expire_time(&self, key: &K, expire_time_ms: u64, now_ms: u64) -> bool {
        self.update(key.clone(), |current| match current {
            Some(existing)
                if existing.ttl.expire_time_ms == expire_time_ms
                    && existing.is_expired_at(now_ms) =>
            {
                (Write::Remove, true)
            }
            _ => (Write::Keep, false),
        })
    }

    // == Accessors ==
    /// Expiration index, present when eager reclamation is enabled.
    pub fn index(&self) -> Option<&EagerExpirationIndex<K>> {
        self.index.as_ref()
    }

    pub fn counters(&self) -> &StatsCounters {
        &self.stats
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_000_000;

    fn entry(value: &str, version: u64, ttl_ms: u64) -> CacheEntry<String> {
        CacheEntry::new(value.to_string(), version, EntryTtlState::with_ttl(ttl_ms, NOW))
    }

    #[test]
    fn test_store_new() {
        let store: ReplicaStore<String, String> = ReplicaStore::new(true);
        assert!(store.is_empty());
        assert!(store.index().is_some());
        assert!(ReplicaStore::<String, String>::new(false).index().is_none());
    }

    #[test]
    fn test_install_indexes_finite_ttl() {
        let store = ReplicaStore::new(true);
        assert!(store.install("k".to_string(), entry("v", 1, 100)));

        assert_eq!(store.len(), 1);
        let index = store.index().unwrap();
        assert_eq!(index.expire_time(&"k".to_string()), Some(NOW + 100));

        // Eternal copies leave the index.
        store.install("k".to_string(), entry("v", 2, 0));
        assert!(index.is_empty());
    }

    #[test]
    fn test_install_ignores_stale_version() {
        let store = ReplicaStore::new(true);
        store.install("k".to_string(), entry("new", 5, 100));

        assert!(!store.install("k".to_string(), entry("old", 4, 200)));
        assert_eq!(store.peek(&"k".to_string()).unwrap().value, "new");
    }

    #[test]
    fn test_remove_versioned() {
        let store = ReplicaStore::new(true);
        store.install("k".to_string(), entry("v", 5, 100));

        assert!(!store.remove_versioned("k".to_string(), 4));
        assert!(store.remove_versioned("k".to_string(), 5));
        assert!(store.is_empty());
        assert!(store.index().unwrap().is_empty());
        assert_eq!(store.stats().removals, 1);
    }

    #[test]
    fn test_read_live_drops_expired_copy() {
        let store = ReplicaStore::new(true);
        store.install("k".to_string(), entry("v", 1, 100));

        assert!(store.read_live(&"k".to_string(), NOW + 50).is_some());
        assert!(store.read_live(&"k".to_string(), NOW + 100).is_none());
        assert!(store.is_empty());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }

    #[test]
    fn test_compare_and_delete_skips_updated_entry() {
        let store = ReplicaStore::new(true);
        store.install("k".to_string(), entry("v", 1, 100));
        // Concurrent update moved the expire time.
        store.install("k".to_string(), entry("v", 2, 500));

        assert!(!store.remove_if_expire_time(&"k".to_string(), NOW + 100, NOW + 200));
        assert_eq!(store.len(), 1);
        assert!(store.remove_if_expire_time(&"k".to_string(), NOW + 500, NOW + 500));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_keep_leaves_slot_untouched() {
        let store: ReplicaStore<String, String> = ReplicaStore::new(false);
        let seen = store.update("k".to_string(), |current| (Write::Keep, current.is_some()));

        assert!(!seen);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_now() {
        let store = ReplicaStore::new(true);
        store.install("k".to_string(), entry("v", 1, 100));

        assert_eq!(store.remove_now(&"k".to_string()).unwrap().value, "v");
        assert!(store.remove_now(&"k".to_string()).is_none());
        assert!(store.index().unwrap().is_empty());
    }
}
