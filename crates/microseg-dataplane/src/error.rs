//! Data plane errors
//!
//! Only construction and background helpers can fail; packet processing
//! never returns an error.

use microseg_common::ConfigError;

/// Filter errors
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// Rejected configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Background thread could not start
    #[error("failed to spawn thread: {0}")]
    SpawnFailed(String),
}

/// Result type for filter setup
pub type FilterResult<T> = Result<T, FilterError>;
