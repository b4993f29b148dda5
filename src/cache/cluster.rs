//! Cluster Module
//!
//! The set of nodes serving one cache. Every TTL decision is taken on the
//! key's primary under the key's guard and then shipped, as a value, to the
//! backups and near readers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::cache::mutation::{plan, Intent, Plan};
use crate::cache::store::Write;
use crate::cache::{
    current_timestamp_ms, Affinity, CacheEntry, CacheKey, CacheStats, CacheValue, Node, NodeId,
    Role,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::expiry::Policy;
use crate::replication::{PendingAcks, ReplicaTarget, ReplicationSync, TtlUpdate};
use crate::tasks::spawn_sweeper;
use crate::transaction::CommitTtl;

// == Cluster ==
pub struct Cluster<K: CacheKey, V: CacheValue> {
    config: CacheConfig,
    affinity: Arc<dyn Affinity<K>>,
    nodes: Vec<Arc<Node<K, V>>>,
    replication: ReplicationSync<K, V>,
    versions: AtomicU64,
    /// Shared by every operation, taken exclusively by transaction commits
    commit_gate: RwLock<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<K: CacheKey, V: CacheValue> Cluster<K, V> {
    // == Start ==
    /// Starts `node_count` nodes with their replication inboxes and, when
    /// eager TTL is enabled, one sweeper per node.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidConfig` for an invalid configuration, an
    /// empty cluster, or an affinity laid out over a different node count.
    pub fn start(
        config: CacheConfig,
        node_count: usize,
        affinity: Arc<dyn Affinity<K>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if node_count == 0 {
            return Err(CacheError::InvalidConfig(
                "cluster needs at least one node".to_string(),
            ));
        }
        if affinity.node_count() != node_count {
            return Err(CacheError::InvalidConfig(format!(
                "affinity covers {} nodes, cluster has {}",
                affinity.node_count(),
                node_count
            )));
        }

        let nodes: Vec<_> = (0..node_count)
            .map(|id| Arc::new(Node::new(id, config.eager_ttl)))
            .collect();
        let (replication, mut tasks) = ReplicationSync::spawn(&nodes);
        let (shutdown_tx, _) = watch::channel(false);

        let cluster = Arc::new(Self {
            config,
            affinity,
            nodes,
            replication,
            versions: AtomicU64::new(0),
            commit_gate: RwLock::new(()),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        });

        if cluster.config.eager_ttl {
            for id in 0..node_count {
                tasks.push(spawn_sweeper(
                    Arc::downgrade(&cluster),
                    id,
                    cluster.config.sweep_interval,
                    cluster.shutdown_tx.subscribe(),
                ));
            }
        }
        *cluster.tasks.lock() = tasks;

        info!(
            nodes = node_count,
            atomicity = ?cluster.config.atomicity,
            eager_ttl = cluster.config.eager_ttl,
            near_cache = cluster.config.near_cache,
            "Cluster started"
        );
        Ok(cluster)
    }

    // == Shutdown ==
    /// Stops sweepers and replication inboxes. In-flight sweeps are abandoned.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        info!("Cluster stopped");
    }

    // == Accessors ==
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn affinity(&self) -> &dyn Affinity<K> {
        self.affinity.as_ref()
    }

    pub fn nodes(&self) -> &[Arc<Node<K, V>>] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<Node<K, V>>> {
        self.nodes.get(id)
    }

    pub fn stats(&self) -> CacheStats {
        self.nodes.iter().fold(CacheStats::default(), |mut total, node| {
            total += node.stats();
            total
        })
    }

    pub(crate) fn commit_gate(&self) -> &RwLock<()> {
        &self.commit_gate
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn primary_node(&self, key: &K) -> &Arc<Node<K, V>> {
        &self.nodes[self.affinity.primary(key)]
    }

    // == Peek ==
    /// Live authoritative copy on the primary, without side effects.
    pub fn read_primary(&self, key: &K, now_ms: u64) -> Option<CacheEntry<V>> {
        self.primary_node(key)
            .dht()
            .peek(key)
            .filter(|entry| !entry.is_expired_at(now_ms))
    }

    /// Live copy held by `node` itself, as a backup or near reader.
    ///
    /// An expired copy is dropped locally and reported as absent.
    pub(crate) fn read_local(&self, node: NodeId, key: &K, now_ms: u64) -> Option<CacheEntry<V>> {
        let local = self.nodes.get(node)?;
        match self.affinity.role(node, key) {
            Role::Backup => local.dht().read_live(key, now_ms),
            Role::None if self.config.near_cache => local.near().read_live(key, now_ms),
            _ => None,
        }
    }

    /// `node` when it would hold a near copy of `key`.
    pub(crate) fn near_reader(&self, node: NodeId, key: &K) -> Option<NodeId> {
        (self.config.near_cache && !self.affinity.is_primary_or_backup(node, key)).then_some(node)
    }

    // == Fan Out ==
    /// Ships a primary decision to every backup and near reader of `key`.
    fn fan_out(
        &self,
        primary: &Node<K, V>,
        key: &K,
        update: TtlUpdate<K, V>,
        await_ack: bool,
        pending: &mut PendingAcks,
    ) {
        let backups = self.affinity.backups(key);
        for &backup in &backups {
            self.replication
                .ship(backup, ReplicaTarget::Dht, update.clone(), await_ack, pending);
        }

        let readers = if update.is_remove() {
            primary.take_readers(key)
        } else {
            primary.readers(key)
        };
        for reader in readers {
            if reader != primary.id() && !backups.contains(&reader) {
                self.replication
                    .ship(reader, ReplicaTarget::Near, update.clone(), await_ack, pending);
            }
        }
    }

    // == Execute On Primary ==
    /// Runs one operation on the primary of `key` as an atomic unit.
    ///
    /// `f` sees the live value (expired copies are treated as absent and
    /// dropped) and returns its intent. The planned value and TTL change is
    /// applied under the key's guard and shipped to replicas before the
    /// guard is released. When `reader` is set the node is registered as a
    /// near reader of a key that stays visible.
    ///
    /// Callers hold the commit gate and wait on `pending` afterwards.
    pub(crate) fn execute_on_primary<R>(
        &self,
        key: K,
        policy: &Policy,
        reader: Option<NodeId>,
        now_ms: u64,
        pending: &mut PendingAcks,
        f: impl FnOnce(Option<&V>) -> (Intent<V>, R),
    ) -> R {
        let primary = self.primary_node(&key);
        let sync = self.config.sync_replication();

        primary.dht().update(key.clone(), |current| {
            let live = current.filter(|entry| !entry.is_expired_at(now_ms));
            let (intent, result) = f(live.map(|entry| &entry.value));

            if matches!(intent, Intent::Read) {
                let counters = primary.dht().counters();
                if live.is_some() {
                    counters.record_hit();
                } else {
                    counters.record_miss();
                }
            }

            let planned = plan(
                live.map(|entry| (&entry.value, &entry.ttl)),
                intent,
                policy,
                now_ms,
            );

            let write = match planned {
                Plan::Put { value, ttl, op } => {
                    let entry = CacheEntry::new(value, self.next_version(), ttl);
                    trace!(?key, ?op, ttl_ms = ttl.ttl_ms, "TTL decided on primary");
                    if let Some(reader) = reader {
                        primary.add_reader(key.clone(), reader);
                    }
                    self.fan_out(
                        primary,
                        &key,
                        TtlUpdate::Put {
                            key: key.clone(),
                            entry: entry.clone(),
                        },
                        sync,
                        pending,
                    );
                    Write::Put(entry)
                }
                Plan::Remove | Plan::Unchanged if live.is_none() && current.is_some() => {
                    // Expired copy found on access: drop it here and everywhere.
                    let version = current.map_or(0, |entry| entry.version);
                    primary.dht().counters().record_expired();
                    self.fan_out(primary, &key, TtlUpdate::Remove { key: key.clone(), version }, sync, pending);
                    Write::Remove
                }
                Plan::Remove => {
                    let version = live.map_or(0, |entry| entry.version);
                    primary.dht().counters().record_removal();
                    self.fan_out(primary, &key, TtlUpdate::Remove { key: key.clone(), version }, sync, pending);
                    Write::Remove
                }
                Plan::Unchanged => {
                    if let (Some(reader), Some(entry)) = (reader, live) {
                        primary.add_reader(key.clone(), reader);
                        self.replication.ship(
                            reader,
                            ReplicaTarget::Near,
                            TtlUpdate::Put {
                                key: key.clone(),
                                entry: entry.clone(),
                            },
                            sync,
                            pending,
                        );
                    }
                    Write::Keep
                }
            };

            (write, result)
        })
    }

    // == Apply Staged ==
    /// Installs a committed transaction binding on the primary and ships it.
    ///
    /// `staged` is `None` for a staged removal. The expire time is computed
    /// here, under the key's guard, from the commit time; replicas receive
    /// that exact pair.
    pub(crate) fn apply_staged(
        &self,
        key: K,
        staged: Option<(V, CommitTtl)>,
        pending: &mut PendingAcks,
    ) {
        let primary = self.primary_node(&key);
        let sync = self.config.sync_replication();

        primary.dht().update(key.clone(), |current| match staged {
            Some((value, commit_ttl)) => {
                let now_ms = current_timestamp_ms();
                let ttl = commit_ttl.resolve(current.map(|entry| &entry.ttl), now_ms);
                let entry = CacheEntry::new(value, self.next_version(), ttl);
                trace!(?key, ttl_ms = ttl.ttl_ms, "Staged TTL applied at commit");
                self.fan_out(
                    primary,
                    &key,
                    TtlUpdate::Put {
                        key: key.clone(),
                        entry: entry.clone(),
                    },
                    sync,
                    pending,
                );
                (Write::Put(entry), ())
            }
            None => match current {
                Some(existing) => {
                    primary.dht().counters().record_removal();
                    let update = TtlUpdate::Remove {
                        key: key.clone(),
                        version: existing.version,
                    };
                    self.fan_out(primary, &key, update, sync, pending);
                    (Write::Remove, ())
                }
                None => (Write::Keep, ()),
            },
        });
    }

    // == Sweep ==
    /// Reclaims every copy on `node` whose expire time has passed.
    ///
    /// Keys the node is primary for are compare-and-deleted and the removal
    /// is shipped without waiting for acknowledgment. Backup and near copies
    /// are compare-and-deleted locally. Returns the number of copies removed.
    pub async fn sweep_node(&self, node: NodeId) -> usize {
        let Some(local) = self.nodes.get(node) else {
            return 0;
        };
        let _gate = self.commit_gate.read().await;
        let now_ms = current_timestamp_ms();
        let mut swept = 0;

        if let Some(index) = local.dht().index() {
            for (key, expire_time) in index.expired_as_of(now_ms) {
                let removed = if self.affinity.primary(&key) == node {
                    self.sweep_primary(local, key, expire_time, now_ms)
                } else {
                    local.dht().remove_if_expire_time(&key, expire_time, now_ms)
                };
                if removed {
                    local.dht().counters().record_swept();
                    swept += 1;
                }
            }
        }

        if let Some(index) = local.near().index() {
            for (key, expire_time) in index.expired_as_of(now_ms) {
                if local.near().remove_if_expire_time(&key, expire_time, now_ms) {
                    local.near().counters().record_swept();
                    swept += 1;
                }
            }
        }

        if swept > 0 {
            debug!(node, swept, "Eager sweep reclaimed expired entries");
        }
        swept
    }

    fn sweep_primary(&self, primary: &Node<K, V>, key: K, expire_time: u64, now_ms: u64) -> bool {
        let mut unused = PendingAcks::new();
        primary.dht().update(key.clone(), |current| match current {
            Some(existing)
                if existing.ttl.expire_time_ms == expire_time && existing.is_expired_at(now_ms) =>
            {
                let update = TtlUpdate::Remove {
                    key: key.clone(),
                    version: existing.version,
                };
                self.fan_out(primary, &key, update, false, &mut unused);
                (Write::Remove, true)
            }
            _ => (Write::Keep, false),
        })
    }
}

impl<K: CacheKey, V: CacheValue> Drop for Cluster<K, V> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}
