//! Flow lifecycle events reported to the control plane

use crate::{Action, FlowKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of flow event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EventType {
    /// Session created
    #[default]
    New = 0,
    /// Session counters changed
    Update = 1,
    /// Session ended
    Close = 2,
}

/// Flow event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Flow the event refers to
    pub key: FlowKey,
    /// Time of the event (nanoseconds since epoch)
    pub timestamp: u64,
    /// Packets seen on the flow so far
    pub packets: u64,
    /// Bytes seen on the flow so far
    pub bytes: u64,
    /// Cached decision
    pub action: Action,
    /// Rule that produced the decision (0 = default action)
    pub rule_id: u32,
    /// Event kind
    pub event_type: EventType,
}

impl FlowEvent {
    /// Event for a freshly created session holding its first packet
    pub fn new_session(key: FlowKey, at: Timestamp, bytes: u64, action: Action, rule_id: u32) -> Self {
        Self {
            key,
            timestamp: at.as_nanos(),
            packets: 1,
            bytes,
            action,
            rule_id,
            event_type: EventType::New,
        }
    }
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} action={}", self.key, self.action)
    }
}
