//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Eager Sweeper: one per node, reclaims expired entries at the configured interval

mod sweeper;

pub use sweeper::spawn_sweeper;
