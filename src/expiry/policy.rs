//! Expiry Policy Module
//!
//! Immutable expiry policies and the resolver that picks the duration
//! relevant to one operation.

use std::time::Duration;

use crate::error::{CacheError, Result};

// == Operation Kind ==
/// Kind of operation a TTL decision is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// The key did not exist before the operation
    Create,
    /// The key existed and its value was replaced
    Update,
    /// The key was read (get, iteration, reading processor, failed conditional)
    Access,
}

// == Expiry Duration ==
/// A duration a policy reports for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDuration {
    /// Never expires (TTL 0)
    Eternal,
    /// Expires after the given number of milliseconds; zero expires immediately
    Millis(u64),
}

impl ExpiryDuration {
    /// Expire immediately, as if never stored.
    pub const ZERO: ExpiryDuration = ExpiryDuration::Millis(0);

    pub fn from_duration(duration: Duration) -> Self {
        ExpiryDuration::Millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Builds a duration from raw milliseconds, rejecting negative values.
    pub fn from_millis(millis: i64) -> Result<Self> {
        u64::try_from(millis)
            .map(ExpiryDuration::Millis)
            .map_err(|_| CacheError::InvalidPolicy(format!("negative duration: {}ms", millis)))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, ExpiryDuration::Millis(0))
    }
}

// == Expiry Policy ==
/// Three optional durations, one per operation kind.
///
/// A missing duration leaves the TTL unchanged on update and access; on
/// create it yields an eternal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpiryPolicy {
    for_creation: Option<ExpiryDuration>,
    for_update: Option<ExpiryDuration>,
    for_access: Option<ExpiryDuration>,
}

impl ExpiryPolicy {
    pub fn new(
        for_creation: Option<ExpiryDuration>,
        for_update: Option<ExpiryDuration>,
        for_access: Option<ExpiryDuration>,
    ) -> Self {
        Self {
            for_creation,
            for_update,
            for_access,
        }
    }

    /// Builds a policy from raw millisecond values.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidPolicy` if any duration is negative.
    pub fn from_millis(
        create: Option<i64>,
        update: Option<i64>,
        access: Option<i64>,
    ) -> Result<Self> {
        Ok(Self {
            for_creation: create.map(ExpiryDuration::from_millis).transpose()?,
            for_update: update.map(ExpiryDuration::from_millis).transpose()?,
            for_access: access.map(ExpiryDuration::from_millis).transpose()?,
        })
    }

    // == Factories ==
    /// Expires `duration` after creation; updates and reads keep the TTL.
    pub fn created(duration: Duration) -> Self {
        Self::new(Some(ExpiryDuration::from_duration(duration)), None, None)
    }

    /// Expires `duration` after creation or the last update.
    pub fn modified(duration: Duration) -> Self {
        let d = Some(ExpiryDuration::from_duration(duration));
        Self::new(d, d, None)
    }

    /// Expires `duration` after creation or the last read.
    pub fn accessed(duration: Duration) -> Self {
        let d = Some(ExpiryDuration::from_duration(duration));
        Self::new(d, None, d)
    }

    /// Expires `duration` after any touch.
    pub fn touched(duration: Duration) -> Self {
        let d = Some(ExpiryDuration::from_duration(duration));
        Self::new(d, d, d)
    }

    /// Entries never expire; later updates and reads keep their TTL.
    pub fn eternal() -> Self {
        Self::new(Some(ExpiryDuration::Eternal), None, None)
    }

    pub fn for_creation(&self) -> Option<ExpiryDuration> {
        self.for_creation
    }

    pub fn for_update(&self) -> Option<ExpiryDuration> {
        self.for_update
    }

    pub fn for_access(&self) -> Option<ExpiryDuration> {
        self.for_access
    }

    /// Returns the duration this policy reports for `op`.
    pub fn duration_for(&self, op: OpKind) -> Option<ExpiryDuration> {
        match op {
            OpKind::Create => self.for_creation,
            OpKind::Update => self.for_update,
            OpKind::Access => self.for_access,
        }
    }
}

// == Policy ==
/// The policy attached to a cache or to a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// No policy configured: nothing ever expires
    #[default]
    Eternal,
    Custom(ExpiryPolicy),
}

impl Policy {
    pub fn duration_for(&self, op: OpKind) -> Option<ExpiryDuration> {
        match self {
            Policy::Eternal => ExpiryPolicy::eternal().duration_for(op),
            Policy::Custom(policy) => policy.duration_for(op),
        }
    }
}

impl From<ExpiryPolicy> for Policy {
    fn from(policy: ExpiryPolicy) -> Self {
        Policy::Custom(policy)
    }
}

// == Policy Resolver ==
/// Picks the policy and duration that govern one operation.
pub struct PolicyResolver;

impl PolicyResolver {
    /// Returns the policy in effect: the override if present, else the default.
    ///
    /// Bulk operations call this once and reuse the result for every key.
    pub fn effective<'a>(default: &'a Policy, override_policy: Option<&'a Policy>) -> &'a Policy {
        override_policy.unwrap_or(default)
    }

    /// Returns the duration relevant to `op`. There is no per-field merging:
    /// an override replaces the default entirely.
    pub fn resolve(
        default: &Policy,
        override_policy: Option<&Policy>,
        op: OpKind,
    ) -> Option<ExpiryDuration> {
        Self::effective(default, override_policy).duration_for(op)
    }
}
