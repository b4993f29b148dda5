//! Node Module
//!
//! One cache-serving node: its owned copies (primary and backup), its near
//! copies, and the near readers it must notify for keys it is primary for.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::cache::{CacheKey, CacheStats, CacheValue, NodeId, ReplicaStore};
use crate::replication::ReplicaTarget;

#[derive(Debug)]
pub struct Node<K: CacheKey, V> {
    id: NodeId,
    /// Primary and backup copies
    dht: ReplicaStore<K, V>,
    /// Near copies of keys owned elsewhere
    near: ReplicaStore<K, V>,
    /// For keys this node is primary for: nodes holding near copies
    readers: DashMap<K, HashSet<NodeId>>,
}

impl<K: CacheKey, V: CacheValue> Node<K, V> {
    pub fn new(id: NodeId, eager_ttl: bool) -> Self {
        Self {
            id,
            dht: ReplicaStore::new(eager_ttl),
            near: ReplicaStore::new(eager_ttl),
            readers: DashMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn dht(&self) -> &ReplicaStore<K, V> {
        &self.dht
    }

    pub fn near(&self) -> &ReplicaStore<K, V> {
        &self.near
    }

    pub fn store(&self, target: ReplicaTarget) -> &ReplicaStore<K, V> {
        match target {
            ReplicaTarget::Dht => &self.dht,
            ReplicaTarget::Near => &self.near,
        }
    }

    // == Near Readers ==
    pub fn add_reader(&self, key: K, reader: NodeId) {
        self.readers.entry(key).or_default().insert(reader);
    }

    pub fn readers(&self, key: &K) -> Vec<NodeId> {
        self.readers
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forgets and returns the readers of `key`, used when the key is removed.
    pub fn take_readers(&self, key: &K) -> Vec<NodeId> {
        self.readers
            .remove(key)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// Combined statistics of owned and near copies.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.dht.stats();
        stats += self.near.stats();
        stats
    }
}
