//! Policy action and exact-match key

use crate::FlowKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Action {
    /// Allow traffic
    #[default]
    Allow = 0,
    /// Drop traffic
    Deny = 1,
    /// Allow traffic and report the flow
    Log = 2,
}

impl Action {
    /// Whether packets under this action are dropped
    #[inline(always)]
    pub const fn is_drop(&self) -> bool {
        matches!(self, Self::Deny)
    }

    /// Whether a new session under this action is reported to the control plane
    #[inline(always)]
    pub const fn is_reported(&self) -> bool {
        matches!(self, Self::Deny | Self::Log)
    }

    /// Lowercase name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised action name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            "log" => Ok(Self::Log),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// Key of the exact-match policy table
///
/// Built from a [`FlowKey`] through `From`, never by reinterpreting memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PolicyKey {
    /// Source IPv4 address
    pub src_ip: u32,
    /// Destination IPv4 address
    pub dst_ip: u32,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// IP protocol
    pub protocol: u8,
}

impl PolicyKey {
    /// Create key from IPv4 tuple
    #[inline(always)]
    pub const fn from_ipv4(
        src_ip: u32,
        dst_ip: u32,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }
}

impl From<FlowKey> for PolicyKey {
    #[inline(always)]
    fn from(key: FlowKey) -> Self {
        Self::from_ipv4(key.src_ip, key.dst_ip, key.src_port, key.dst_port, key.protocol)
    }
}

impl From<&FlowKey> for PolicyKey {
    #[inline(always)]
    fn from(key: &FlowKey) -> Self {
        Self::from(*key)
    }
}
