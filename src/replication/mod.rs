//! Replication Module
//!
//! Ships the `(ttl, expire_time)` decided on a primary to backups and near
//! readers as a value, so no replica ever recomputes "now + duration".
//!
//! Each node owns one FIFO inbox drained by a background task. The primary
//! enqueues while it still holds the key's guard, so every replica receives
//! the updates for a key in the order the primary applied them. Value and
//! TTL travel in the same message and are installed as one unit.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, CacheValue, Node, NodeId};

// == Replica Target ==
/// Which store on the receiving node a message addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaTarget {
    /// Backup copy
    Dht,
    /// Near-cache copy
    Near,
}

// == TTL Update ==
/// A decided change of one key, carried across the replication boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TtlUpdate<K, V> {
    /// Install value, version and TTL state exactly as decided by the primary
    Put { key: K, entry: CacheEntry<V> },
    /// Drop the copy if it is not newer than `version`
    Remove { key: K, version: u64 },
}

impl<K, V> TtlUpdate<K, V> {
    pub fn is_remove(&self) -> bool {
        matches!(self, TtlUpdate::Remove { .. })
    }
}

#[derive(Debug)]
pub struct ReplicaMessage<K, V> {
    pub target: ReplicaTarget,
    pub update: TtlUpdate<K, V>,
    ack: Option<oneshot::Sender<()>>,
}

/// Applies one update to the addressed store of `node`.
pub fn apply_update<K: CacheKey, V: CacheValue>(
    node: &Node<K, V>,
    target: ReplicaTarget,
    update: TtlUpdate<K, V>,
) -> bool {
    let store = node.store(target);
    match update {
        TtlUpdate::Put { key, entry } => store.install(key, entry),
        TtlUpdate::Remove { key, version } => store.remove_versioned(key, version),
    }
}

// == Pending Acks ==
/// Acknowledgments a synchronous write waits for before it completes.
#[derive(Debug, Default)]
pub struct PendingAcks {
    receivers: Vec<(NodeId, oneshot::Receiver<()>)>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Waits for every acknowledgment and returns how many arrived.
    ///
    /// A lost acknowledgment is logged and otherwise ignored: each copy
    /// still honors its own expire time on access.
    pub async fn wait(self) -> usize {
        let mut acked = 0;
        for (node, receiver) in self.receivers {
            match receiver.await {
                Ok(()) => acked += 1,
                Err(_) => warn!(node, "Replica dropped update without acknowledging"),
            }
        }
        acked
    }
}

// == Replication Sync ==
#[derive(Debug)]
pub struct ReplicationSync<K, V> {
    inboxes: Vec<mpsc::UnboundedSender<ReplicaMessage<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> ReplicationSync<K, V> {
    /// Spawns one inbox task per node.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(nodes: &[Arc<Node<K, V>>]) -> (Self, Vec<JoinHandle<()>>) {
        let mut inboxes = Vec::with_capacity(nodes.len());
        let mut handles = Vec::with_capacity(nodes.len());

        for node in nodes {
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.push(tx);
            handles.push(tokio::spawn(replica_loop(Arc::clone(node), rx)));
        }

        (Self { inboxes }, handles)
    }

    // == Ship ==
    /// Enqueues `update` for `node`. When `await_ack` is set the
    /// acknowledgment receiver is pushed onto `pending`.
    ///
    /// Never blocks: callers hold the key's guard while shipping.
    pub fn ship(
        &self,
        node: NodeId,
        target: ReplicaTarget,
        update: TtlUpdate<K, V>,
        await_ack: bool,
        pending: &mut PendingAcks,
    ) {
        let Some(inbox) = self.inboxes.get(node) else {
            warn!(node, "No replication inbox for node");
            return;
        };

        let (ack, receiver) = if await_ack {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let message = ReplicaMessage {
            target,
            update,
            ack,
        };

        match inbox.send(message) {
            Ok(()) => {
                if let Some(receiver) = receiver {
                    pending.receivers.push((node, receiver));
                }
            }
            Err(_) => warn!(node, "Replication inbox closed, update dropped"),
        }
    }
}

/// Drains one node's inbox until every sender is gone.
async fn replica_loop<K: CacheKey, V: CacheValue>(
    node: Arc<Node<K, V>>,
    mut inbox: mpsc::UnboundedReceiver<ReplicaMessage<K, V>>,
) {
    while let Some(message) = inbox.recv().await {
        let applied = apply_update(&node, message.target, message.update);
        if !applied {
            debug!(node = node.id(), target = ?message.target, "Stale replica update ignored");
        }
        if let Some(ack) = message.ack {
            let _ = ack.send(());
        }
    }
    debug!(node = node.id(), "Replication inbox closed");
}
