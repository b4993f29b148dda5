//! Expiry Module
//!
//! Policy resolution, per-entry TTL state, and the eager expiration index.

mod index;
mod policy;
mod state;

pub use index::{EagerExpirationIndex, ExpiredKeys, DEFAULT_STRIPES};
pub use policy::{ExpiryDuration, ExpiryPolicy, OpKind, Policy, PolicyResolver};
pub use state::{EntryTtlState, TtlComputer, TtlOutcome};
