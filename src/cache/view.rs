//! Cache View Module
//!
//! The client-facing cache API as seen from one node, optionally scoped to
//! an expiry policy that replaces the cache default for every call made
//! through the view.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::mutation::Intent;
use crate::cache::{
    current_timestamp_ms, CacheEntry, CacheKey, CacheValue, Cluster, NodeId, Role,
};
use crate::error::{CacheError, Result};
use crate::expiry::{EntryTtlState, OpKind, Policy, PolicyResolver};
use crate::replication::PendingAcks;
use crate::transaction::Transaction;

// == Mutable Entry ==
/// Entry handed to an `invoke` processor.
#[derive(Debug)]
pub struct MutableEntry<V> {
    value: Option<V>,
    action: EntryAction<V>,
}

#[derive(Debug)]
enum EntryAction<V> {
    None,
    Read,
    Set(V),
    Remove,
}

impl<V: Clone> MutableEntry<V> {
    pub(crate) fn new(value: Option<V>) -> Self {
        Self {
            value,
            action: EntryAction::None,
        }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Reads the current value. Counts as an access unless the processor
    /// later writes or removes the entry.
    pub fn value(&mut self) -> Option<&V> {
        if matches!(self.action, EntryAction::None) {
            self.action = EntryAction::Read;
        }
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: V) {
        self.value = Some(value.clone());
        self.action = EntryAction::Set(value);
    }

    pub fn remove(&mut self) {
        self.value = None;
        self.action = EntryAction::Remove;
    }

    pub(crate) fn into_intent(self, existed: bool) -> Intent<V> {
        match self.action {
            EntryAction::None => Intent::Ignore,
            EntryAction::Read => Intent::Read,
            EntryAction::Set(value) => Intent::Write(value),
            EntryAction::Remove if existed => Intent::Remove,
            EntryAction::Remove => Intent::Ignore,
        }
    }
}

// == Cache ==
/// Handle to the cache through a given node.
#[derive(Clone)]
pub struct Cache<K: CacheKey, V: CacheValue> {
    cluster: Arc<Cluster<K, V>>,
    local: NodeId,
    policy: Option<Policy>,
}

impl<K: CacheKey, V: CacheValue> Cache<K, V> {
    /// Creates a view of `cluster` through node `local`.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidRequest` if the node does not exist.
    pub fn new(cluster: Arc<Cluster<K, V>>, local: NodeId) -> Result<Self> {
        if cluster.node(local).is_none() {
            return Err(CacheError::InvalidRequest(format!(
                "node {} is not part of the cluster",
                local
            )));
        }
        Ok(Self {
            cluster,
            local,
            policy: None,
        })
    }

    /// Returns a view whose calls all use `policy` instead of the cache default.
    pub fn with_expiry_policy(&self, policy: impl Into<Policy>) -> Self {
        Self {
            cluster: Arc::clone(&self.cluster),
            local: self.local,
            policy: Some(policy.into()),
        }
    }

    pub fn effective_policy(&self) -> &Policy {
        PolicyResolver::effective(&self.cluster.config().default_policy, self.policy.as_ref())
    }

    pub fn local_node(&self) -> NodeId {
        self.local
    }

    pub fn cluster(&self) -> &Arc<Cluster<K, V>> {
        &self.cluster
    }

    // == Execution ==
    /// Runs `f` on the primary of `key` and returns its result.
    fn execute<R>(
        &self,
        key: K,
        policy: &Policy,
        now_ms: u64,
        pending: &mut PendingAcks,
        f: impl FnOnce(Option<&V>) -> (Intent<V>, R),
    ) -> R {
        let reader = self.cluster.near_reader(self.local, &key);
        self.cluster
            .execute_on_primary(key, policy, reader, now_ms, pending, f)
    }

    fn get_with(&self, key: &K, policy: &Policy, now_ms: u64, pending: &mut PendingAcks) -> Option<V> {
        // Without an access duration a read never changes the TTL, so any
        // live local copy may answer.
        if policy.duration_for(OpKind::Access).is_none() {
            if let Some(entry) = self.cluster.read_local(self.local, key, now_ms) {
                return Some(entry.value);
            }
        }
        self.execute(key.clone(), policy, now_ms, pending, |current| {
            (Intent::Read, current.cloned())
        })
    }

    // == Put ==
    pub async fn put(&self, key: K, value: V) {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let now = current_timestamp_ms();
        self.execute(key, self.effective_policy(), now, &mut pending, |_| {
            (Intent::Write(value), ())
        });
        pending.wait().await;
    }

    /// Stores every pair with one resolved policy for the whole call.
    pub async fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let policy = self.effective_policy();
        let now = current_timestamp_ms();
        for (key, value) in entries {
            self.execute(key, policy, now, &mut pending, |_| (Intent::Write(value), ()));
        }
        pending.wait().await;
    }

    /// Stores `value` only if no live entry exists. Finding one counts as an
    /// access of that entry.
    pub async fn put_if_absent(&self, key: K, value: V) -> bool {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let now = current_timestamp_ms();
        let stored = self.execute(key, self.effective_policy(), now, &mut pending, |current| {
            match current {
                Some(_) => (Intent::Read, false),
                None => (Intent::Write(value), true),
            }
        });
        pending.wait().await;
        stored
    }

    // == Get ==
    pub async fn get(&self, key: &K) -> Option<V> {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let value = self.get_with(key, self.effective_policy(), current_timestamp_ms(), &mut pending);
        pending.wait().await;
        value
    }

    /// Reads every key with one resolved policy for the whole call. Absent
    /// keys are left out of the result.
    pub async fn get_all<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> HashMap<K, V>
    where
        K: 'a,
    {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let policy = self.effective_policy();
        let now = current_timestamp_ms();
        let found = keys
            .into_iter()
            .filter_map(|key| {
                self.get_with(key, policy, now, &mut pending)
                    .map(|value| (key.clone(), value))
            })
            .collect();
        pending.wait().await;
        found
    }

    // == Remove ==
    pub async fn remove(&self, key: &K) -> bool {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let now = current_timestamp_ms();
        let removed = self.execute(key.clone(), self.effective_policy(), now, &mut pending, |current| {
            match current {
                Some(_) => (Intent::Remove, true),
                None => (Intent::Ignore, false),
            }
        });
        pending.wait().await;
        removed
    }

    /// Removes every key, returning how many live entries were removed.
    pub async fn remove_all<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> usize
    where
        K: 'a,
    {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let policy = self.effective_policy();
        let now = current_timestamp_ms();
        let mut removed = 0;
        for key in keys {
            let hit = self.execute(key.clone(), policy, now, &mut pending, |current| match current {
                Some(_) => (Intent::Remove, true),
                None => (Intent::Ignore, false),
            });
            removed += usize::from(hit);
        }
        pending.wait().await;
        removed
    }

    /// Removes the entry only if it holds `expected`. A mismatch counts as
    /// an access.
    pub async fn remove_if_equals(&self, key: &K, expected: &V) -> bool
    where
        V: PartialEq,
    {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let now = current_timestamp_ms();
        let removed = self.execute(key.clone(), self.effective_policy(), now, &mut pending, |current| {
            match current {
                Some(value) if value == expected => (Intent::Remove, true),
                Some(_) => (Intent::Read, false),
                None => (Intent::Ignore, false),
            }
        });
        pending.wait().await;
        removed
    }

    // == Replace ==
    /// Overwrites the value only if a live entry exists.
    pub async fn replace(&self, key: K, value: V) -> bool {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let now = current_timestamp_ms();
        let replaced = self.execute(key, self.effective_policy(), now, &mut pending, |current| {
            match current {
                Some(_) => (Intent::Write(value), true),
                None => (Intent::Ignore, false),
            }
        });
        pending.wait().await;
        replaced
    }

    /// Overwrites the value only if it currently equals `expected`. A
    /// mismatch counts as an access.
    pub async fn replace_if_equals(&self, key: K, expected: &V, value: V) -> bool
    where
        V: PartialEq,
    {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let now = current_timestamp_ms();
        let replaced = self.execute(key, self.effective_policy(), now, &mut pending, |current| {
            match current {
                Some(current) if current == expected => (Intent::Write(value), true),
                Some(_) => (Intent::Read, false),
                None => (Intent::Ignore, false),
            }
        });
        pending.wait().await;
        replaced
    }

    // == Invoke ==
    /// Runs `processor` against the entry atomically on the key's primary.
    ///
    /// Reading the value counts as an access, setting it as a create or
    /// update, removing it as a removal.
    pub async fn invoke<R>(&self, key: K, processor: impl FnOnce(&mut MutableEntry<V>) -> R) -> R {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let now = current_timestamp_ms();
        let result = self.execute(key, self.effective_policy(), now, &mut pending, |current| {
            let mut entry = MutableEntry::new(current.cloned());
            let result = processor(&mut entry);
            (entry.into_intent(current.is_some()), result)
        });
        pending.wait().await;
        result
    }

    // == Iteration ==
    /// Every live entry of the cache, ordered by key. Each yielded entry
    /// counts as an access.
    pub async fn entries(&self) -> Vec<(K, V)> {
        let _gate = self.cluster.commit_gate().read().await;
        let mut pending = PendingAcks::new();
        let policy = self.effective_policy();
        let now = current_timestamp_ms();

        let mut keys: Vec<K> = self
            .cluster
            .nodes()
            .iter()
            .flat_map(|node| {
                node.dht()
                    .keys()
                    .into_iter()
                    .filter(move |key| self.cluster.affinity().primary(key) == node.id())
            })
            .collect();
        keys.sort();

        let entries = keys
            .into_iter()
            .filter_map(|key| {
                let value = self
                    .cluster
                    .execute_on_primary(key.clone(), policy, None, now, &mut pending, |current| {
                        (Intent::Read, current.cloned())
                    });
                value.map(|value| (key, value))
            })
            .collect();
        pending.wait().await;
        entries
    }

    // == Peek ==
    fn local_copy(&self, key: &K) -> Option<CacheEntry<V>> {
        let node = self.cluster.node(self.local)?;
        match self.cluster.affinity().role(self.local, key) {
            Role::Primary | Role::Backup => node.dht().peek(key),
            Role::None => node.near().peek(key),
        }
    }

    /// Live value held by this node, without touching TTL or statistics.
    pub fn local_peek(&self, key: &K) -> Option<V> {
        let now = current_timestamp_ms();
        self.local_copy(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value)
    }

    /// TTL metadata of this node's copy of `key`.
    pub fn peek_ttl(&self, key: &K) -> Option<EntryTtlState> {
        self.local_copy(key).map(|entry| entry.ttl)
    }

    /// TTL metadata of the authoritative copy on the key's primary.
    pub fn ttl(&self, key: &K) -> Option<EntryTtlState> {
        self.cluster
            .read_primary(key, current_timestamp_ms())
            .map(|entry| entry.ttl)
    }

    // == Transactions ==
    /// Starts a transaction whose operations default to this view's policy.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidRequest` on an atomic cache.
    pub fn begin_tx(&self) -> Result<Transaction<K, V>> {
        Transaction::begin(self.clone())
    }
}

impl<K: CacheKey, V: CacheValue> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("local", &self.local)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PartitionAffinity;
    use crate::config::{AtomicityMode, CacheConfig};
    use crate::expiry::{ExpiryDuration, ExpiryPolicy};

    fn start(config: CacheConfig) -> Arc<Cluster<u32, String>> {
        Cluster::start(config, 3, Arc::new(PartitionAffinity::new(32, 3, 1))).unwrap()
    }

    fn sync_config() -> CacheConfig {
        CacheConfig::default().with_atomicity(AtomicityMode::Transactional)
    }

    #[test]
    fn test_mutable_entry_intent() {
        let mut entry = MutableEntry::new(Some(1));
        assert_eq!(entry.value(), Some(&1));
        assert_eq!(entry.into_intent(true), Intent::Read);

        let mut entry = MutableEntry::new(Some(1));
        entry.value();
        entry.set_value(2);
        assert_eq!(entry.into_intent(true), Intent::Write(2));

        let mut entry: MutableEntry<i32> = MutableEntry::new(None);
        entry.remove();
        assert!(!entry.exists());
        assert_eq!(entry.into_intent(false), Intent::Ignore);

        assert_eq!(MutableEntry::new(Some(1)).into_intent(true), Intent::Ignore);
    }

    #[tokio::test]
    async fn test_new_rejects_unknown_node() {
        let cluster = start(CacheConfig::default());
        assert!(matches!(
            Cache::new(Arc::clone(&cluster), 9),
            Err(CacheError::InvalidRequest(_))
        ));
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let cluster = start(sync_config());
        let cache = Cache::new(Arc::clone(&cluster), 0).unwrap();

        cache.put(1, "a".to_string()).await;
        assert_eq!(cache.get(&1).await.as_deref(), Some("a"));
        assert!(cache.remove(&1).await);
        assert!(!cache.remove(&1).await);
        assert_eq!(cache.get(&1).await, None);
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_override_applies_to_scoped_view_only() {
        let cluster = start(sync_config().with_policy(ExpiryPolicy::created(
            std::time::Duration::from_secs(60),
        )));
        let cache = Cache::new(Arc::clone(&cluster), 0).unwrap();
        let scoped = cache.with_expiry_policy(ExpiryPolicy::touched(std::time::Duration::from_secs(5)));

        scoped.put(1, "a".to_string()).await;
        assert_eq!(cache.ttl(&1).unwrap().ttl_ms, 5_000);

        cache.put(2, "b".to_string()).await;
        assert_eq!(cache.ttl(&2).unwrap().ttl_ms, 60_000);
        assert_eq!(scoped.effective_policy().duration_for(OpKind::Access), Some(ExpiryDuration::Millis(5_000)));
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_failed_conditional_ops_count_as_access() {
        let policy = ExpiryPolicy::new(
            Some(ExpiryDuration::Millis(60_000)),
            Some(ExpiryDuration::Millis(61_000)),
            Some(ExpiryDuration::Millis(62_000)),
        );
        let cluster = start(sync_config().with_policy(policy));
        let cache = Cache::new(Arc::clone(&cluster), 0).unwrap();

        cache.put(1, "a".to_string()).await;
        assert!(!cache.remove_if_equals(&1, &"zzz".to_string()).await);
        assert_eq!(cache.ttl(&1).unwrap().ttl_ms, 62_000);

        cache.put(2, "a".to_string()).await;
        assert!(!cache.replace_if_equals(2, &"zzz".to_string(), "b".to_string()).await);
        assert_eq!(cache.ttl(&2).unwrap().ttl_ms, 62_000);

        cache.put(3, "a".to_string()).await;
        assert!(!cache.put_if_absent(3, "b".to_string()).await);
        assert_eq!(cache.ttl(&3).unwrap().ttl_ms, 62_000);

        assert!(cache.replace_if_equals(3, &"a".to_string(), "c".to_string()).await);
        assert_eq!(cache.ttl(&3).unwrap().ttl_ms, 61_000);
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_replace_on_absent_key_is_noop() {
        let cluster = start(sync_config());
        let cache = Cache::new(Arc::clone(&cluster), 1).unwrap();

        assert!(!cache.replace(4, "x".to_string()).await);
        assert_eq!(cache.get(&4).await, None);
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_invoke_read_and_write() {
        let cluster = start(sync_config().with_policy(ExpiryPolicy::new(
            None,
            Some(ExpiryDuration::Millis(30_000)),
            Some(ExpiryDuration::Millis(40_000)),
        )));
        let cache = Cache::new(Arc::clone(&cluster), 2).unwrap();
        cache.put(5, "v".to_string()).await;
        assert!(cache.ttl(&5).unwrap().is_eternal());

        let seen = cache.invoke(5, |entry| entry.value().cloned()).await;
        assert_eq!(seen.as_deref(), Some("v"));
        assert_eq!(cache.ttl(&5).unwrap().ttl_ms, 40_000);

        cache.invoke(5, |entry| entry.set_value("w".to_string())).await;
        assert_eq!(cache.ttl(&5).unwrap().ttl_ms, 30_000);
        assert_eq!(cache.local_peek(&5).is_some(), cluster.affinity().is_primary_or_backup(2, &5));
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_entries_are_sorted_and_accessed() {
        let cluster = start(sync_config());
        let cache = Cache::new(Arc::clone(&cluster), 0).unwrap();
        cache
            .put_all((0..20).map(|k| (k, format!("v{}", k))))
            .await;

        let scoped = cache.with_expiry_policy(ExpiryPolicy::accessed(std::time::Duration::from_secs(9)));
        let entries = scoped.entries().await;

        assert_eq!(entries.len(), 20);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        assert!((0..20).all(|k| cache.ttl(&k).unwrap().ttl_ms == 9_000));
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_begin_tx_rejected_on_atomic_cache() {
        let cluster = start(CacheConfig::default());
        let cache = Cache::new(Arc::clone(&cluster), 0).unwrap();
        assert!(matches!(cache.begin_tx(), Err(CacheError::InvalidRequest(_))));
        cluster.shutdown();
    }
}
