//! Mutation Planning Module
//!
//! Turns what an operation wants to do with a key into a concrete change of
//! value and TTL. Shared by the atomic path on the primary and by
//! transaction staging.

use crate::expiry::{EntryTtlState, OpKind, Policy, TtlComputer, TtlOutcome};

// == Intent ==
/// What an operation decided after looking at the current value.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent<V> {
    /// The value was read: counts as an access when present
    Read,
    /// Store a value: create when absent, update when present
    Write(V),
    /// Delete the entry
    Remove,
    /// Nothing happened to the entry (e.g. a conditional op on an absent key)
    Ignore,
}

// == Plan ==
/// Concrete change resulting from an intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan<V> {
    Unchanged,
    Put {
        value: V,
        ttl: EntryTtlState,
        op: OpKind,
    },
    Remove,
}

/// Plans the change for `intent` against the live entry (`None` if absent).
///
/// A zero create duration yields `Unchanged`: the value never becomes
/// visible. A zero update or access duration collapses into `Remove`.
pub fn plan<V: Clone>(
    current: Option<(&V, &EntryTtlState)>,
    intent: Intent<V>,
    policy: &Policy,
    now_ms: u64,
) -> Plan<V> {
    match (current, intent) {
        (None, Intent::Write(value)) => {
            let duration = policy.duration_for(OpKind::Create);
            match TtlComputer::apply(&EntryTtlState::default(), OpKind::Create, duration, now_ms) {
                TtlOutcome::Retain(ttl) => Plan::Put {
                    value,
                    ttl,
                    op: OpKind::Create,
                },
                TtlOutcome::Expire => Plan::Unchanged,
            }
        }
        (None, _) => Plan::Unchanged,
        (Some((_, ttl)), Intent::Write(value)) => {
            let duration = policy.duration_for(OpKind::Update);
            match TtlComputer::apply(ttl, OpKind::Update, duration, now_ms) {
                TtlOutcome::Retain(ttl) => Plan::Put {
                    value,
                    ttl,
                    op: OpKind::Update,
                },
                TtlOutcome::Expire => Plan::Remove,
            }
        }
        (Some(_), Intent::Remove) => Plan::Remove,
        (Some((value, ttl)), Intent::Read) => {
            let duration = policy.duration_for(OpKind::Access);
            match TtlComputer::apply(ttl, OpKind::Access, duration, now_ms) {
                TtlOutcome::Retain(next) if next == *ttl => Plan::Unchanged,
                TtlOutcome::Retain(next) => Plan::Put {
                    value: value.clone(),
                    ttl: next,
                    op: OpKind::Access,
                },
                TtlOutcome::Expire => Plan::Remove,
            }
        }
        (Some(_), Intent::Ignore) => Plan::Unchanged,
    }
}
