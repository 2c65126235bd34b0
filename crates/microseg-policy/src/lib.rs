//! Two-Tier Policy Resolution
//!
//! Invoked only on a session-cache miss (the cold path).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Policy Resolution                        │
//! │                                                               │
//! │  ┌──────────────┐   Miss   ┌────────────────────┐   Miss      │
//! │  │ Exact table  │────────►│  Wildcard slots     │────────►    │
//! │  │ (hash, O(1)) │         │ (bounded scan,      │  [ALLOW]    │
//! │  └──────────────┘         │  highest priority)  │  default    │
//! │        │ Hit               └────────────────────┘             │
//! │        ▼                          │ Best match                │
//! │   [rule action]              [rule action]                    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The control plane is the only writer of both tables. The data plane
//! only reads them and bumps exact-rule hit counters.

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod exact;
pub mod manager;
pub mod wildcard;

pub use engine::{MatchSource, PolicyResolver, Resolution};
pub use error::{PolicyError, PolicyResult};
pub use exact::ExactPolicyTable;
pub use manager::{LoadReport, Placement, PolicyManager, PolicySpec, PolicyStatus};
pub use wildcard::WildcardPolicyTable;

use microseg_common::{Action, AtomicCounter, FlowKey, PolicyKey};
use serde::{Deserialize, Serialize};

/// Exact 5-tuple policy rule
#[derive(Debug, Clone)]
pub struct ExactPolicyRule {
    /// Flow this rule applies to
    pub key: PolicyKey,
    /// Action to take
    pub action: Action,
    /// Report matches
    pub log_enabled: bool,
    /// Priority (informational for exact rules)
    pub priority: u16,
    /// Rule ID for tracking
    pub rule_id: u32,
    /// Times this rule decided a new flow (approximate under contention)
    pub hit_count: AtomicCounter,
}

impl ExactPolicyRule {
    /// Create rule with a zero hit count
    pub fn new(key: PolicyKey, action: Action, priority: u16, rule_id: u32) -> Self {
        Self {
            key,
            action,
            log_enabled: action == Action::Log,
            priority,
            rule_id,
            hit_count: AtomicCounter::new(0),
        }
    }

    /// Create allow rule
    pub fn allow(key: PolicyKey, rule_id: u32) -> Self {
        Self::new(key, Action::Allow, 0, rule_id)
    }

    /// Create deny rule
    pub fn deny(key: PolicyKey, rule_id: u32) -> Self {
        Self::new(key, Action::Deny, 0, rule_id)
    }
}

/// Masked / partial policy rule
///
/// IP fields match when `(flow & mask) == (rule & mask)`; a zero mask matches
/// anything. Zero ports and a zero protocol match anything. A zero `rule_id`
/// marks an empty slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildcardPolicyRule {
    /// Source address
    pub src_ip: u32,
    /// Source mask (`0xFFFF_FFFF` = exact, `0` = any)
    pub src_ip_mask: u32,
    /// Destination address
    pub dst_ip: u32,
    /// Destination mask (`0xFFFF_FFFF` = exact, `0` = any)
    pub dst_ip_mask: u32,
    /// Source port (0 = any)
    pub src_port: u16,
    /// Destination port (0 = any)
    pub dst_port: u16,
    /// IP protocol (0 = any)
    pub protocol: u8,
    /// Action to take
    pub action: Action,
    /// Report matches
    pub log_enabled: bool,
    /// Higher wins
    pub priority: u16,
    /// Rule ID (0 = empty slot)
    pub rule_id: u32,
}

impl WildcardPolicyRule {
    /// Rule matching every flow
    pub fn any(action: Action, priority: u16, rule_id: u32) -> Self {
        Self {
            action,
            log_enabled: action == Action::Log,
            priority,
            rule_id,
            ..Self::default()
        }
    }

    /// Empty slot
    pub const fn empty() -> Self {
        Self {
            src_ip: 0,
            src_ip_mask: 0,
            dst_ip: 0,
            dst_ip_mask: 0,
            src_port: 0,
            dst_port: 0,
            protocol: 0,
            action: Action::Allow,
            log_enabled: false,
            priority: 0,
            rule_id: 0,
        }
    }

    /// Whether this slot is unused
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.rule_id == 0
    }

    /// Restrict source to `ip/prefix_len`
    pub fn with_src(mut self, ip: u32, prefix_len: u8) -> Self {
        self.src_ip_mask = prefix_mask(prefix_len);
        self.src_ip = ip & self.src_ip_mask;
        self
    }

    /// Restrict destination to `ip/prefix_len`
    pub fn with_dst(mut self, ip: u32, prefix_len: u8) -> Self {
        self.dst_ip_mask = prefix_mask(prefix_len);
        self.dst_ip = ip & self.dst_ip_mask;
        self
    }

    /// Restrict ports (0 = any)
    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    /// Restrict protocol (0 = any)
    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    /// Match against a flow
    #[inline]
    pub fn matches(&self, key: &FlowKey) -> bool {
        (key.src_ip & self.src_ip_mask) == (self.src_ip & self.src_ip_mask)
            && (key.dst_ip & self.dst_ip_mask) == (self.dst_ip & self.dst_ip_mask)
            && (self.src_port == 0 || self.src_port == key.src_port)
            && (self.dst_port == 0 || self.dst_port == key.dst_port)
            && (self.protocol == 0 || self.protocol == key.protocol)
    }
}

/// Network mask for a prefix length (`0` → `0`, `>= 32` → all ones)
#[inline]
pub const fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= 32 {
        u32::MAX
    } else {
        u32::MAX << (32 - prefix_len)
    }
}
