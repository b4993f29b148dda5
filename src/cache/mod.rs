//! Cache Module
//!
//! Per-node storage of entries and their TTL metadata, the in-process
//! cluster that owns them, and the client-facing cache view.

mod affinity;
mod cluster;
mod entry;
pub(crate) mod mutation;
mod node;
mod stats;
mod store;
mod view;


use std::fmt::Debug;
use std::hash::Hash;

// Re-export public types
pub use affinity::{Affinity, NodeId, PartitionAffinity, Role};
pub use cluster::Cluster;
pub use entry::{current_timestamp_ms, CacheEntry};
pub use node::Node;
pub use stats::{CacheStats, StatsCounters};
pub use store::{ReplicaStore, Write};
pub use view::{Cache, MutableEntry};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

// == Key and Value Bounds ==
/// Bounds on a cache key: hashed for partitioning and striping,
/// ordered for the expiration index.
pub trait CacheKey: Eq + Hash + Ord + Clone + Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Ord + Clone + Debug + Send + Sync + 'static> CacheKey for T {}

/// Bounds on a cached value.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}
