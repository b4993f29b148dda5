//! Eager Expiration Index
//!
//! Time-ordered index of `(expire_time, key)` pairs so the sweeper can ask
//! "what expired as of now" without scanning the keyspace.
//!
//! Keys are striped by hash across independently locked stripes. Each stripe
//! keeps a `BTreeSet` ordered by expire time plus a reverse map from key to
//! its indexed expire time, so a key is indexed at most once.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::hash::{BuildHasher, Hash};
use std::ops::Bound;

use parking_lot::Mutex;

/// Default number of lock stripes.
pub const DEFAULT_STRIPES: usize = 16;

#[derive(Debug)]
struct Stripe<K> {
    by_time: BTreeSet<(u64, K)>,
    by_key: HashMap<K, u64>,
}

impl<K: Hash + Ord + Clone> Stripe<K> {
    fn new() -> Self {
        Self {
            by_time: BTreeSet::new(),
            by_key: HashMap::new(),
        }
    }

    fn remove(&mut self, key: &K) -> Option<u64> {
        let expire_time = self.by_key.remove(key)?;
        self.by_time.remove(&(expire_time, key.clone()));
        Some(expire_time)
    }
}

// == Eager Expiration Index ==
#[derive(Debug)]
pub struct EagerExpirationIndex<K> {
    stripes: Box<[Mutex<Stripe<K>>]>,
    hasher: RandomState,
}

impl<K: Hash + Ord + Clone> EagerExpirationIndex<K> {
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(Stripe::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe(&self, key: &K) -> &Mutex<Stripe<K>> {
        let slot = self.hasher.hash_one(key) as usize % self.stripes.len();
        &self.stripes[slot]
    }

    // == Upsert ==
    /// Indexes `key` at `expire_time_ms`, replacing any prior position.
    ///
    /// An expire time of 0 (eternal) removes the key instead.
    pub fn upsert(&self, key: K, expire_time_ms: u64) {
        let mut stripe = self.stripe(&key).lock();
        stripe.remove(&key);
        if expire_time_ms != 0 {
            stripe.by_time.insert((expire_time_ms, key.clone()));
            stripe.by_key.insert(key, expire_time_ms);
        }
    }

    // == Remove ==
    /// Drops `key` from the index, returning the expire time it was indexed at.
    pub fn remove(&self, key: &K) -> Option<u64> {
        self.stripe(key).lock().remove(key)
    }

    /// Expire time `key` is currently indexed at.
    pub fn expire_time(&self, key: &K) -> Option<u64> {
        self.stripe(key).lock().by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.lock().by_key.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.iter().all(|s| s.lock().by_key.is_empty())
    }

    // == Expired As Of ==
    /// Lazily yields every `(key, expire_time)` with `expire_time <= now_ms`,
    /// ascending by expire time.
    ///
    /// The sequence holds no lock between items and resumes from a cursor,
    /// so concurrent upserts and removals are tolerated. Calling this again
    /// restarts from the beginning.
    pub fn expired_as_of(&self, now_ms: u64) -> ExpiredKeys<'_, K> {
        ExpiredKeys {
            index: self,
            now_ms,
            cursor: None,
        }
    }
}

impl<K: Hash + Ord + Clone> Default for EagerExpirationIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

// == Expired Keys ==
/// Lazy, ascending sequence returned by [`EagerExpirationIndex::expired_as_of`].
pub struct ExpiredKeys<'a, K> {
    index: &'a EagerExpirationIndex<K>,
    now_ms: u64,
    cursor: Option<(u64, K)>,
}

impl<K: Hash + Ord + Clone> Iterator for ExpiredKeys<'_, K> {
    type Item = (K, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let mut best: Option<(u64, K)> = None;

        for stripe in self.index.stripes.iter() {
            let stripe = stripe.lock();
            let head = match &self.cursor {
                Some(cursor) => stripe
                    .by_time
                    .range::<(u64, K), _>((Bound::Excluded(cursor), Bound::Unbounded))
                    .next(),
                None => stripe.by_time.iter().next(),
            };

            if let Some(candidate) = head {
                if candidate.0 <= self.now_ms
                    && best.as_ref().map_or(true, |current| candidate < current)
                {
                    best = Some(candidate.clone());
                }
            }
        }

        self.cursor = best.clone();
        best.map(|(expire_time, key)| (key, expire_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_prior_position() {
        let index = EagerExpirationIndex::new();
        index.upsert("a", 100);
        index.upsert("a", 300);

        assert_eq!(index.len(), 1);
        assert_eq!(index.expire_time(&"a"), Some(300));
        assert_eq!(index.expired_as_of(200).count(), 0);
        assert_eq!(index.expired_as_of(300).collect::<Vec<_>>(), vec![("a", 300)]);
    }

    #[test]
    fn test_upsert_zero_removes() {
        let index = EagerExpirationIndex::new();
        index.upsert("a", 100);
        index.upsert("a", 0);

        assert!(index.is_empty());
    }

    #[test]
    fn test_remove() {
        let index = EagerExpirationIndex::new();
        index.upsert(1, 100);
        index.upsert(2, 200);

        assert_eq!(index.remove(&1), Some(100));
        assert_eq!(index.remove(&1), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_expired_as_of_ascending_across_stripes() {
        let index = EagerExpirationIndex::with_stripes(4);
        for key in 0..100u64 {
            // Reverse the expire order relative to key order.
            index.upsert(key, 10_000 - key * 10);
        }

        let expired: Vec<_> = index.expired_as_of(9_500).collect();
        assert_eq!(expired.len(), 50);

        let times: Vec<u64> = expired.iter().map(|(_, t)| *t).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
        assert!(times.iter().all(|t| *t <= 9_500));
    }

    #[test]
    fn test_expired_as_of_tolerates_removal_while_iterating() {
        let index = EagerExpirationIndex::with_stripes(2);
        for key in 0..10u64 {
            index.upsert(key, 100 + key);
        }

        let mut seen = Vec::new();
        for (key, _) in index.expired_as_of(1_000) {
            index.remove(&key);
            seen.push(key);
        }

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(index.is_empty());
    }

    #[test]
    fn test_expired_as_of_is_restartable() {
        let index = EagerExpirationIndex::new();
        index.upsert("x", 5);
        index.upsert("y", 6);

        let mut first = index.expired_as_of(10);
        assert_eq!(first.next(), Some(("x", 5)));

        let again: Vec<_> = index.expired_as_of(10).collect();
        assert_eq!(again, vec![("x", 5), ("y", 6)]);
    }
}
