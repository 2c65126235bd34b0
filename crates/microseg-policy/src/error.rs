//! Policy ingestion errors

use thiserror::Error;

/// Error returned to the control plane on rule ingestion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Table has no room for a new rule
    #[error("{table} policy table is full (max {capacity} entries)")]
    TableFull {
        /// Which table
        table: &'static str,
        /// Its capacity
        capacity: usize,
    },

    /// Wildcard slot index beyond capacity
    #[error("wildcard slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange {
        /// Requested slot
        slot: usize,
        /// Table capacity
        capacity: usize,
    },

    /// Rule is structurally invalid
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// Address / prefix could not be parsed
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Unknown protocol name
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Unknown action name
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// No rule with this id
    #[error("policy not found: rule_id={0}")]
    NotFound(u32),
}

/// Result type for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;
