//! Affinity Module
//!
//! The partition-to-node capability the engine consumes: "which node is
//! primary or backup for key K".

use std::hash::{DefaultHasher, Hash, Hasher};

/// Index of a node in the cluster.
pub type NodeId = usize;

// == Role ==
/// Role a node plays for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Backup,
    /// Neither owner: the node may only hold a near copy
    None,
}

// == Affinity ==
/// Injected ownership capability.
///
/// Every node id it returns is below `node_count()`.
pub trait Affinity<K>: Send + Sync {
    /// Number of nodes the ownership map is laid out over.
    fn node_count(&self) -> usize;

    /// Node holding the authoritative copy of `key`.
    fn primary(&self, key: &K) -> NodeId;

    /// Nodes holding redundant copies of `key`, excluding the primary.
    fn backups(&self, key: &K) -> Vec<NodeId>;

    fn role(&self, node: NodeId, key: &K) -> Role {
        if self.primary(key) == node {
            Role::Primary
        } else if self.backups(key).contains(&node) {
            Role::Backup
        } else {
            Role::None
        }
    }

    fn is_primary_or_backup(&self, node: NodeId, key: &K) -> bool {
        self.role(node, key) != Role::None
    }
}

// == Partition Affinity ==
/// Hash partitioning with round-robin partition ownership.
///
/// Partition `p` is owned by node `p % nodes` and backed up on the next
/// `backups` nodes.
#[derive(Debug, Clone)]
pub struct PartitionAffinity {
    partitions: u32,
    nodes: usize,
    backups: usize,
}

impl PartitionAffinity {
    pub fn new(partitions: u32, nodes: usize, backups: usize) -> Self {
        let nodes = nodes.max(1);
        Self {
            partitions: partitions.max(1),
            nodes,
            backups: backups.min(nodes - 1),
        }
    }

    pub fn partition<K: Hash>(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }
}

impl<K: Hash> Affinity<K> for PartitionAffinity {
    fn node_count(&self) -> usize {
        self.nodes
    }

    fn primary(&self, key: &K) -> NodeId {
        self.partition(key) as usize % self.nodes
    }

    fn backups(&self, key: &K) -> Vec<NodeId> {
        let primary = Affinity::<K>::primary(self, key);
        (1..=self.backups)
            .map(|offset| (primary + offset) % self.nodes)
            .collect()
    }
}
