//! Expiry Grid - TTL expiration engine for a partitioned in-process cache
//!
//! Resolves per-operation expiry policies into concrete TTLs, replicates the
//! decided `(ttl, expire_time)` to backup and near copies, reclaims expired
//! entries eagerly in the background and binds TTL changes to transaction
//! commit.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod expiry;
pub mod models;
pub mod replication;
pub mod tasks;
pub mod transaction;

pub use api::AppState;
pub use cache::{Cache, Cluster};
pub use config::{AtomicityMode, CacheConfig, Config};
pub use error::{CacheError, Result};
pub use expiry::{ExpiryDuration, ExpiryPolicy, Policy};
pub use tasks::spawn_sweeper;
pub use transaction::Transaction;
