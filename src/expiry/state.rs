//! TTL State Module
//!
//! Per-entry expiration metadata and the computer that transitions it.

use serde::Serialize;

use crate::expiry::policy::{ExpiryDuration, OpKind};

// == Entry TTL State ==
/// Expiration metadata carried by every stored entry.
///
/// `expire_time_ms == 0` if and only if `ttl_ms == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EntryTtlState {
    /// Time to live in milliseconds, 0 = eternal
    pub ttl_ms: u64,
    /// Absolute expire time (Unix milliseconds), 0 = never
    pub expire_time_ms: u64,
    /// Set only on the state a transaction reports for a staged removal;
    /// stored copies never carry it
    pub deleted: bool,
}

impl EntryTtlState {
    pub const ETERNAL: EntryTtlState = EntryTtlState {
        ttl_ms: 0,
        expire_time_ms: 0,
        deleted: false,
    };

    pub const TOMBSTONE: EntryTtlState = EntryTtlState {
        ttl_ms: 0,
        expire_time_ms: 0,
        deleted: true,
    };

    /// State touched at `now_ms` with a positive TTL.
    pub fn with_ttl(ttl_ms: u64, now_ms: u64) -> Self {
        if ttl_ms == 0 {
            return Self::ETERNAL;
        }
        Self {
            ttl_ms,
            expire_time_ms: now_ms.saturating_add(ttl_ms),
            deleted: false,
        }
    }

    pub fn is_eternal(&self) -> bool {
        self.expire_time_ms == 0
    }

    /// Boundary condition: expired once `now_ms >= expire_time_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expire_time_ms != 0 && now_ms >= self.expire_time_ms
    }

    /// Remaining lifetime, `None` for eternal entries.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        if self.is_eternal() {
            None
        } else {
            Some(self.expire_time_ms.saturating_sub(now_ms))
        }
    }
}

// == TTL Outcome ==
/// Result of applying a duration to an entry's TTL state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlOutcome {
    /// The entry stays (or becomes) visible with this state
    Retain(EntryTtlState),
    /// The entry must disappear as part of the same atomic operation
    Expire,
}

// == TTL Computer ==
/// Applies a resolved duration to an entry transition.
pub struct TtlComputer;

impl TtlComputer {
    /// Computes the TTL state after an operation of kind `op` at `now_ms`.
    ///
    /// - absent duration: eternal on create, unchanged on update and access
    /// - zero: the create never becomes visible, the update or access removes
    /// - positive: TTL restarts from `now_ms`, overwriting the prior state
    /// - eternal: TTL reset to 0
    pub fn apply(
        state: &EntryTtlState,
        op: OpKind,
        duration: Option<ExpiryDuration>,
        now_ms: u64,
    ) -> TtlOutcome {
        match duration {
            None if op == OpKind::Create => TtlOutcome::Retain(EntryTtlState::ETERNAL),
            None => TtlOutcome::Retain(EntryTtlState {
                deleted: false,
                ..*state
            }),
            Some(ExpiryDuration::Eternal) => TtlOutcome::Retain(EntryTtlState::ETERNAL),
            Some(ExpiryDuration::Millis(0)) => TtlOutcome::Expire,
            Some(ExpiryDuration::Millis(ttl)) => {
                TtlOutcome::Retain(EntryTtlState::with_ttl(ttl, now_ms))
            }
        }
    }
}
