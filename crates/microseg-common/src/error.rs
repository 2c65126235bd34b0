//! Error types shared across the data plane

use thiserror::Error;

/// Failure to classify a packet into a flow.
///
/// The entry point treats both variants as "pass through unclassified".
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Not an Ethernet/IPv4 frame
    #[error("not an IPv4 packet")]
    NotIpv4,

    /// A header did not fit in the buffer
    #[error("truncated packet: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to read the next header
        needed: usize,
        /// Bytes actually present
        available: usize,
    },
}

/// Losing side of a concurrent session insert
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertRace {
    /// Another context already created the session for this flow
    #[error("session already exists")]
    AlreadyExists,
}

/// The event queue had no room; the event was dropped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("flow event queue full")]
pub struct EventQueueFull;

/// Engine configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value is out of its permitted range
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
