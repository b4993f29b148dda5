//! Transaction TTL Binding
//!
//! Per-transaction mapping from key to the value and TTL decision staged for
//! it. Created on first touch, overwritten on every later touch, consumed
//! once at commit and discarded on rollback.

use std::collections::HashMap;

use crate::cache::mutation::Plan;
use crate::cache::{CacheEntry, CacheKey};
use crate::expiry::{EntryTtlState, ExpiryDuration, OpKind, Policy};

// == Commit TTL ==
/// TTL a staged value takes when the transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitTtl {
    /// Keep the TTL state the key had before the transaction
    Keep,
    /// Restart from the commit time with this TTL, 0 = eternal
    Restart(u64),
}

impl CommitTtl {
    /// Outcome of an operation of kind `op` that kept the entry, given the
    /// duration `policy` resolves for it. `None` means the touch left the
    /// TTL alone.
    fn for_op(policy: &Policy, op: OpKind) -> Option<Self> {
        match policy.duration_for(op) {
            Some(ExpiryDuration::Millis(ttl_ms)) => Some(CommitTtl::Restart(ttl_ms)),
            Some(ExpiryDuration::Eternal) => Some(CommitTtl::Restart(0)),
            None if op == OpKind::Create => Some(CommitTtl::Restart(0)),
            None => None,
        }
    }

    /// Concrete state at commit time `now_ms`, given the primary's copy.
    pub fn resolve(self, current: Option<&EntryTtlState>, now_ms: u64) -> EntryTtlState {
        match self {
            CommitTtl::Restart(ttl_ms) => EntryTtlState::with_ttl(ttl_ms, now_ms),
            CommitTtl::Keep => current.copied().unwrap_or(EntryTtlState::ETERNAL),
        }
    }
}

// == Tx Binding ==
/// Staged state of one key inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxBinding<V> {
    /// Version of the live primary copy at first touch, `None` if absent
    base_version: Option<u64>,
    /// Value and TTL as the transaction sees them, `None` for absent
    staged: Option<(V, EntryTtlState)>,
    /// How the committed TTL is derived from the commit time
    commit_ttl: CommitTtl,
    /// Whether any touch changed value or TTL
    dirty: bool,
}

impl<V> TxBinding<V> {
    fn from_snapshot(snapshot: Option<CacheEntry<V>>) -> Self {
        Self {
            base_version: snapshot.as_ref().map(|entry| entry.version),
            staged: snapshot.map(|entry| (entry.value, entry.ttl)),
            commit_ttl: CommitTtl::Keep,
            dirty: false,
        }
    }

    pub fn base_version(&self) -> Option<u64> {
        self.base_version
    }

    /// Staged value and TTL as seen by the transaction at `now_ms`.
    ///
    /// A restarted TTL only starts running at commit, so such a value stays
    /// visible to the transaction however long it runs.
    pub fn live(&self, now_ms: u64) -> Option<(&V, &EntryTtlState)> {
        let restarted = matches!(self.commit_ttl, CommitTtl::Restart(_));
        self.staged
            .as_ref()
            .filter(|(_, ttl)| restarted || !ttl.is_expired_at(now_ms))
            .map(|(value, ttl)| (value, ttl))
    }

    /// Records the outcome of one more touch planned under `policy`. Last
    /// touch wins.
    pub fn stage(&mut self, plan: Plan<V>, policy: &Policy) {
        match plan {
            Plan::Unchanged => {}
            Plan::Put { value, ttl, op } => {
                if let Some(commit_ttl) = CommitTtl::for_op(policy, op) {
                    self.commit_ttl = commit_ttl;
                }
                self.staged = Some((value, ttl));
                self.dirty = true;
            }
            Plan::Remove => {
                self.staged = None;
                self.commit_ttl = CommitTtl::Keep;
                self.dirty = true;
            }
        }
    }

    /// TTL the key will carry after commit, with the expire time as of the
    /// last touch. A staged removal reports the tombstone state.
    pub fn staged_ttl(&self) -> Option<EntryTtlState> {
        match &self.staged {
            Some((_, ttl)) => Some(*ttl),
            None if self.dirty => Some(EntryTtlState::TOMBSTONE),
            None => None,
        }
    }

    /// Value and commit TTL to install, `None` for a staged removal.
    pub fn into_staged(self) -> Option<(V, CommitTtl)> {
        let commit_ttl = self.commit_ttl;
        self.staged.map(|(value, _)| (value, commit_ttl))
    }
}

// == Transaction TTL Binding ==
#[derive(Debug)]
pub struct TransactionTtlBinding<K, V> {
    bindings: HashMap<K, TxBinding<V>>,
}

impl<K, V> Default for TransactionTtlBinding<K, V> {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }
}

impl<K: CacheKey, V> TransactionTtlBinding<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding for `key`, created from `load` (the pre-transaction copy) on
    /// first touch.
    pub fn touch(
        &mut self,
        key: K,
        load: impl FnOnce() -> Option<CacheEntry<V>>,
    ) -> &mut TxBinding<V> {
        self.bindings
            .entry(key)
            .or_insert_with(|| TxBinding::from_snapshot(load()))
    }

    pub fn get(&self, key: &K) -> Option<&TxBinding<V>> {
        self.bindings.get(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings that must be applied at commit, in key order.
    pub fn into_dirty(self) -> Vec<(K, TxBinding<V>)> {
        let mut dirty: Vec<_> = self
            .bindings
            .into_iter()
            .filter(|(_, binding)| binding.dirty)
            .collect();
        dirty.sort_by(|a, b| a.0.cmp(&b.0));
        dirty
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::ExpiryPolicy;

    const NOW: u64 = 10_000;

    fn modified(ttl_ms: u64) -> Policy {
        Policy::Custom(ExpiryPolicy::new(
            Some(ExpiryDuration::Millis(ttl_ms)),
            Some(ExpiryDuration::Millis(ttl_ms)),
            None,
        ))
    }

    fn put(value: u32, ttl_ms: u64) -> Plan<u32> {
        Plan::Put {
            value,
            ttl: EntryTtlState::with_ttl(ttl_ms, NOW),
            op: OpKind::Update,
        }
    }

    #[test]
    fn test_first_touch_loads_once() {
        let mut bindings: TransactionTtlBinding<u32, u32> = TransactionTtlBinding::new();
        let mut loads = 0;

        bindings.touch(1, || {
            loads += 1;
            Some(CacheEntry::new(7, 3, EntryTtlState::ETERNAL))
        });
        bindings.touch(1, || {
            loads += 1;
            None
        });

        assert_eq!(loads, 1);
        let binding = bindings.get(&1).unwrap();
        assert_eq!(binding.base_version(), Some(3));
        assert_eq!(binding.live(NOW), Some((&7, &EntryTtlState::ETERNAL)));
        assert!(bindings.into_dirty().is_empty());
    }

    #[test]
    fn test_last_touch_wins() {
        let mut bindings = TransactionTtlBinding::new();
        bindings.touch(1u32, || None).stage(put(1, 1_000), &modified(1_000));
        bindings.touch(1u32, || None).stage(put(2, 5_000), &modified(5_000));

        let dirty = bindings.into_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].1.staged_ttl().unwrap().ttl_ms, 5_000);
        let (value, commit_ttl) = dirty[0].1.clone().into_staged().unwrap();
        assert_eq!(value, 2);
        assert_eq!(commit_ttl, CommitTtl::Restart(5_000));
    }

    #[test]
    fn test_unchanged_touch_is_not_dirty() {
        let mut bindings: TransactionTtlBinding<u32, u32> = TransactionTtlBinding::new();
        let policy = Policy::Eternal;
        bindings.touch(1, || None).stage(Plan::Unchanged, &policy);
        bindings.touch(2, || None).stage(Plan::Remove, &policy);

        let dirty = bindings.into_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].0, 2);
        assert_eq!(dirty[0].1.staged_ttl(), Some(EntryTtlState::TOMBSTONE));
        assert_eq!(dirty[0].1.clone().into_staged(), None);
    }

    #[test]
    fn test_snapshot_expiry_hides_value() {
        let mut bindings: TransactionTtlBinding<u32, u32> = TransactionTtlBinding::new();
        bindings.touch(1, || Some(CacheEntry::new(1, 1, EntryTtlState::with_ttl(100, NOW))));

        let binding = bindings.get(&1).unwrap();
        assert!(binding.live(NOW + 99).is_some());
        assert!(binding.live(NOW + 100).is_none());
    }

    #[test]
    fn test_restarted_ttl_runs_from_commit() {
        let mut bindings = TransactionTtlBinding::new();
        bindings.touch(1u32, || None).stage(put(1, 100), &modified(100));

        // Still visible to the transaction after the staged expire time.
        let binding = bindings.get(&1).unwrap();
        assert!(binding.live(NOW + 500).is_some());

        let (_, commit_ttl) = binding.clone().into_staged().unwrap();
        let committed = commit_ttl.resolve(None, NOW + 500);
        assert_eq!(committed, EntryTtlState::with_ttl(100, NOW + 500));
    }

    #[test]
    fn test_update_without_duration_keeps_prior_ttl() {
        let prior = EntryTtlState::with_ttl(60_000, NOW);
        let mut bindings = TransactionTtlBinding::new();
        let policy = Policy::Custom(ExpiryPolicy::new(None, None, None));
        bindings
            .touch(1u32, || Some(CacheEntry::new(1, 4, prior)))
            .stage(
                Plan::Put {
                    value: 2,
                    ttl: prior,
                    op: OpKind::Update,
                },
                &policy,
            );

        let (value, commit_ttl) = bindings.into_dirty().remove(0).1.into_staged().unwrap();
        assert_eq!(value, 2);
        assert_eq!(commit_ttl, CommitTtl::Keep);
        assert_eq!(commit_ttl.resolve(Some(&prior), NOW + 1_000), prior);
    }

    #[test]
    fn test_eternal_and_absent_create_restart_as_eternal() {
        let eternal = Policy::Custom(ExpiryPolicy::new(None, Some(ExpiryDuration::Eternal), None));
        assert_eq!(CommitTtl::for_op(&eternal, OpKind::Update), Some(CommitTtl::Restart(0)));
        assert_eq!(CommitTtl::for_op(&eternal, OpKind::Create), Some(CommitTtl::Restart(0)));
        assert_eq!(CommitTtl::for_op(&eternal, OpKind::Access), None);
        assert_eq!(CommitTtl::Restart(0).resolve(None, NOW), EntryTtlState::ETERNAL);
    }
}
