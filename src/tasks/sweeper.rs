//! Eager Sweeper Task
//!
//! Background task that periodically drains one node's expiration index and
//! removes entries whose expire time has passed, independent of client
//! traffic.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::cache::{CacheKey, CacheValue, Cluster, NodeId};

/// Spawns the sweeper of `node`.
///
/// The task holds only a weak reference to the cluster and exits when the
/// cluster is dropped or `shutdown` flips to `true`. A sweep in progress when
/// shutdown arrives is abandoned; the next run would re-derive the same
/// candidates from the index.
///
/// # Example
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = spawn_sweeper(Arc::downgrade(&cluster), 0, interval, shutdown_rx);
/// // Later, during shutdown:
/// shutdown_tx.send(true).ok();
/// ```
pub fn spawn_sweeper<K: CacheKey, V: CacheValue>(
    cluster: Weak<Cluster<K, V>>,
    node: NodeId,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(node, interval_ms = interval.as_millis() as u64, "Starting eager sweeper");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let Some(cluster) = cluster.upgrade() else {
                break;
            };

            tokio::select! {
                swept = cluster.sweep_node(node) => {
                    if swept == 0 {
                        trace!(node, "Eager sweep found nothing to reclaim");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(node, "Sweep abandoned on shutdown");
                    break;
                }
            }
        }

        info!(node, "Eager sweeper stopped");
    })
}
