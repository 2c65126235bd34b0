//! Microsegmentation Common - Shared types for the packet filter core
//!
//! This crate provides the vocabulary shared by the policy tables and the
//! data plane:
//! - Flow keys and the Ethernet/IPv4/L4 flow key extractor
//! - Policy actions and the exact-match policy key
//! - Session and TCP state enumerations
//! - Flow events reported to the control plane
//! - Error taxonomy
//!
//! Nothing in here allocates on the per-packet path.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod flow;
pub mod policy;

pub use error::*;
pub use event::{EventType, FlowEvent};
pub use flow::*;
pub use policy::{Action, PolicyKey, UnknownAction};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of tracked sessions
pub const MAX_ENTRIES_SESSION: usize = 100_000;

/// Maximum number of exact-match policy rules
pub const MAX_ENTRIES_POLICY: usize = 10_000;

/// Maximum number of wildcard policy slots
pub const MAX_ENTRIES_WILDCARD_POLICY: usize = 1_000;

/// Nanosecond timestamp since the Unix epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Get current timestamp (nanoseconds since epoch)
    #[inline(always)]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self(nanos)
    }

    /// Build from a raw nanosecond value
    #[inline(always)]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get nanoseconds value
    #[inline(always)]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Nanoseconds elapsed between `earlier` and `self` (zero if `earlier` is later)
    #[inline(always)]
    pub const fn saturating_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Lock-free counter for approximate, contended statistics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add value and return previous
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Overwrite the value
    #[inline(always)]
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed)
    }
}

impl Clone for AtomicCounter {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}
