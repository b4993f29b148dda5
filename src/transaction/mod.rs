//! Transaction Module
//!
//! Optimistic transactions over a transactional cache. Every operation
//! resolves its policy and decides its TTL when it is staged; nothing is
//! written to shared entries until commit, which turns each decided TTL into
//! an expire time from the commit instant and applies every staged binding
//! behind the exclusive commit gate so readers see all of them or none.

mod binding;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::mutation::{plan, Intent};
use crate::cache::{current_timestamp_ms, Cache, CacheKey, CacheValue, MutableEntry};
use crate::config::AtomicityMode;
use crate::error::{CacheError, Result};
use crate::expiry::{EntryTtlState, Policy};
use crate::replication::PendingAcks;

pub use binding::{CommitTtl, TransactionTtlBinding, TxBinding};

// == Tx State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

// == Transaction ==
#[derive(Debug)]
pub struct Transaction<K: CacheKey, V: CacheValue> {
    cache: Cache<K, V>,
    bindings: TransactionTtlBinding<K, V>,
    state: TxState,
}

impl<K: CacheKey, V: CacheValue> Transaction<K, V> {
    pub(crate) fn begin(cache: Cache<K, V>) -> Result<Self> {
        if cache.cluster().config().atomicity != AtomicityMode::Transactional {
            return Err(CacheError::InvalidRequest(
                "transactions require a transactional cache".to_string(),
            ));
        }
        Ok(Self {
            cache,
            bindings: TransactionTtlBinding::new(),
            state: TxState::Active,
        })
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Operations staged through the returned scope use `policy` instead of
    /// the transaction's default.
    pub fn with_expiry_policy(&mut self, policy: impl Into<Policy>) -> TxScope<'_, K, V> {
        TxScope {
            tx: self,
            policy: policy.into(),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(CacheError::InvalidRequest(format!(
                "transaction is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    // == Staging ==
    /// Policy for one call: the scope's override, or the view's policy.
    fn resolve_policy(&self, scoped: Option<&Policy>) -> Policy {
        *scoped.unwrap_or(self.cache.effective_policy())
    }

    /// Runs `f` against the key's state as seen by this transaction and
    /// stages the resulting value and TTL decision.
    fn stage<R>(
        &mut self,
        key: K,
        policy: &Policy,
        now_ms: u64,
        f: impl FnOnce(Option<&V>) -> (Intent<V>, R),
    ) -> Result<R> {
        self.ensure_active()?;
        let cluster = Arc::clone(self.cache.cluster());

        let binding = self
            .bindings
            .touch(key.clone(), || cluster.read_primary(&key, now_ms));
        let live = binding.live(now_ms);
        let (intent, result) = f(live.map(|(value, _)| value));
        let planned = plan(live, intent, policy, now_ms);
        binding.stage(planned, policy);
        Ok(result)
    }

    fn stage_one<R>(
        &mut self,
        key: K,
        scoped: Option<&Policy>,
        f: impl FnOnce(Option<&V>) -> (Intent<V>, R),
    ) -> Result<R> {
        let policy = self.resolve_policy(scoped);
        self.stage(key, &policy, current_timestamp_ms(), f)
    }

    fn put_all_with(
        &mut self,
        scoped: Option<&Policy>,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()> {
        let policy = self.resolve_policy(scoped);
        let now = current_timestamp_ms();
        for (key, value) in entries {
            self.stage(key, &policy, now, |_| (Intent::Write(value), ()))?;
        }
        Ok(())
    }

    fn get_all_with<'a>(
        &mut self,
        scoped: Option<&Policy>,
        keys: impl IntoIterator<Item = &'a K>,
    ) -> Result<HashMap<K, V>>
    where
        K: 'a,
    {
        let policy = self.resolve_policy(scoped);
        let now = current_timestamp_ms();
        let mut found = HashMap::new();
        for key in keys {
            let value = self.stage(key.clone(), &policy, now, |current| {
                (Intent::Read, current.cloned())
            })?;
            if let Some(value) = value {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn remove_all_with<'a>(
        &mut self,
        scoped: Option<&Policy>,
        keys: impl IntoIterator<Item = &'a K>,
    ) -> Result<usize>
    where
        K: 'a,
    {
        let policy = self.resolve_policy(scoped);
        let now = current_timestamp_ms();
        let mut removed = 0;
        for key in keys {
            if self.stage(key.clone(), &policy, now, remove_intent)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // == Operations ==
    pub fn get(&mut self, key: &K) -> Result<Option<V>> {
        self.stage_one(key.clone(), None, |current| (Intent::Read, current.cloned()))
    }

    pub fn put(&mut self, key: K, value: V) -> Result<()> {
        self.stage_one(key, None, |_| (Intent::Write(value), ()))
    }

    pub fn remove(&mut self, key: &K) -> Result<bool> {
        self.stage_one(key.clone(), None, remove_intent)
    }

    pub fn invoke<R>(
        &mut self,
        key: K,
        processor: impl FnOnce(&mut MutableEntry<V>) -> R,
    ) -> Result<R> {
        self.stage_one(key, None, |current| invoke_intent(current, processor))
    }

    /// Stages every pair with one resolved policy for the whole call.
    pub fn put_all(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.put_all_with(None, entries)
    }

    /// Reads every key with one resolved policy. Absent keys are left out.
    pub fn get_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>) -> Result<HashMap<K, V>>
    where
        K: 'a,
    {
        self.get_all_with(None, keys)
    }

    /// Stages removal of every present key, returning how many were present.
    pub fn remove_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>) -> Result<usize>
    where
        K: 'a,
    {
        self.remove_all_with(None, keys)
    }

    /// TTL `key` will carry once this transaction commits, if touched.
    pub fn staged_ttl(&self, key: &K) -> Option<EntryTtlState> {
        self.bindings.get(key).and_then(TxBinding::staged_ttl)
    }

    // == Commit ==
    /// Applies every staged binding atomically.
    ///
    /// # Errors
    /// Returns `CacheError::TransactionConflict` if a written key changed on
    /// its primary since this transaction first read it. All bindings are
    /// discarded in that case.
    pub async fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        let bindings = std::mem::take(&mut self.bindings);
        let cluster = Arc::clone(self.cache.cluster());

        let _gate = cluster.commit_gate().write().await;
        let now = current_timestamp_ms();
        let dirty = bindings.into_dirty();

        for (key, binding) in &dirty {
            let current = cluster.read_primary(key, now).map(|entry| entry.version);
            if current != binding.base_version() {
                self.state = TxState::RolledBack;
                debug!(?key, "Transaction conflict, staged bindings discarded");
                return Err(CacheError::TransactionConflict(format!(
                    "key {:?} changed since it was first read",
                    key
                )));
            }
        }

        let mut pending = PendingAcks::new();
        let applied = dirty.len();
        for (key, binding) in dirty {
            cluster.apply_staged(key, binding.into_staged(), &mut pending);
        }
        pending.wait().await;

        self.state = TxState::Committed;
        info!(applied, "Transaction committed");
        Ok(())
    }

    // == Rollback ==
    pub fn rollback(mut self) {
        self.bindings.clear();
        self.state = TxState::RolledBack;
    }
}

impl<K: CacheKey, V: CacheValue> Drop for Transaction<K, V> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            if !self.bindings.is_empty() {
                debug!(keys = self.bindings.len(), "Transaction dropped, rolling back");
            }
            self.bindings.clear();
            self.state = TxState::RolledBack;
        }
    }
}

// == Tx Scope ==
/// Policy-scoped access to a transaction, see [`Transaction::with_expiry_policy`].
pub struct TxScope<'a, K: CacheKey, V: CacheValue> {
    tx: &'a mut Transaction<K, V>,
    policy: Policy,
}

impl<K: CacheKey, V: CacheValue> TxScope<'_, K, V> {
    pub fn get(&mut self, key: &K) -> Result<Option<V>> {
        self.tx
            .stage_one(key.clone(), Some(&self.policy), |current| (Intent::Read, current.cloned()))
    }

    pub fn put(&mut self, key: K, value: V) -> Result<()> {
        self.tx
            .stage_one(key, Some(&self.policy), |_| (Intent::Write(value), ()))
    }

    pub fn remove(&mut self, key: &K) -> Result<bool> {
        self.tx.stage_one(key.clone(), Some(&self.policy), remove_intent)
    }

    pub fn invoke<R>(
        &mut self,
        key: K,
        processor: impl FnOnce(&mut MutableEntry<V>) -> R,
    ) -> Result<R> {
        self.tx
            .stage_one(key, Some(&self.policy), |current| invoke_intent(current, processor))
    }

    pub fn put_all(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.tx.put_all_with(Some(&self.policy), entries)
    }

    pub fn get_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>) -> Result<HashMap<K, V>>
    where
        K: 'a,
    {
        self.tx.get_all_with(Some(&self.policy), keys)
    }

    pub fn remove_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>) -> Result<usize>
    where
        K: 'a,
    {
        self.tx.remove_all_with(Some(&self.policy), keys)
    }
}

fn remove_intent<V>(current: Option<&V>) -> (Intent<V>, bool) {
    match current {
        Some(_) => (Intent::Remove, true),
        None => (Intent::Ignore, false),
    }
}

fn invoke_intent<V: Clone, R>(
    current: Option<&V>,
    processor: impl FnOnce(&mut MutableEntry<V>) -> R,
) -> (Intent<V>, R) {
    let mut entry = MutableEntry::new(current.cloned());
    let result = processor(&mut entry);
    (entry.into_intent(current.is_some()), result)
}
