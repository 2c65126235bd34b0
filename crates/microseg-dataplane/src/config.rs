//! Engine configuration

use microseg_common::{
    ConfigError, ConfigResult, MAX_ENTRIES_POLICY, MAX_ENTRIES_SESSION,
    MAX_ENTRIES_WILDCARD_POLICY,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default flow event queue depth
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 4096;

/// Upper bound on session cache shards
pub const MAX_SESSION_SHARDS: usize = 64;

/// Packet filter configuration
///
/// Every field has a default, so a JSON file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum live sessions across all shards
    pub session_capacity: usize,
    /// Session cache shards (power of two)
    ///
    /// The default of 1 is one exact LRU over `session_capacity`. More shards
    /// cut lock contention but give each shard a fixed slice of the capacity,
    /// so eviction becomes approximate LRU and can start before the cache as
    /// a whole is full.
    pub session_shards: usize,
    /// Maximum exact-match rules
    pub exact_policy_capacity: usize,
    /// Number of wildcard slots
    pub wildcard_policy_capacity: usize,
    /// Wildcard slots scanned per new flow
    pub wildcard_scan_limit: usize,
    /// Flow events buffered before new ones are dropped
    pub event_queue_capacity: usize,
    /// Statistics shards (one per processing context)
    pub stats_shards: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus();
        Self {
            session_capacity: MAX_ENTRIES_SESSION,
            session_shards: 1,
            exact_policy_capacity: MAX_ENTRIES_POLICY,
            wildcard_policy_capacity: MAX_ENTRIES_WILDCARD_POLICY,
            wildcard_scan_limit: MAX_ENTRIES_WILDCARD_POLICY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            stats_shards: cpus,
        }
    }
}

/// Get number of CPUs
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl EngineConfig {
    /// Load from a JSON file and validate
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), ?config, "engine config loaded");
        Ok(config)
    }

    /// Parse from JSON and validate
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> ConfigResult<()> {
        non_zero("session_capacity", self.session_capacity)?;
        non_zero("session_shards", self.session_shards)?;
        non_zero("exact_policy_capacity", self.exact_policy_capacity)?;
        non_zero("wildcard_policy_capacity", self.wildcard_policy_capacity)?;
        non_zero("event_queue_capacity", self.event_queue_capacity)?;
        non_zero("stats_shards", self.stats_shards)?;

        if !self.session_shards.is_power_of_two() || self.session_shards > MAX_SESSION_SHARDS {
            return Err(ConfigError::Invalid {
                field: "session_shards",
                reason: format!(
                    "{} is not a power of two up to {}",
                    self.session_shards, MAX_SESSION_SHARDS
                ),
            });
        }
        if self.session_shards > self.session_capacity {
            return Err(ConfigError::Invalid {
                field: "session_shards",
                reason: format!(
                    "{} shards exceed session capacity {}",
                    self.session_shards, self.session_capacity
                ),
            });
        }
        if self.wildcard_scan_limit > self.wildcard_policy_capacity {
            return Err(ConfigError::Invalid {
                field: "wildcard_scan_limit",
                reason: format!(
                    "{} exceeds wildcard capacity {}",
                    self.wildcard_scan_limit, self.wildcard_policy_capacity
                ),
            });
        }

        Ok(())
    }
}

fn non_zero(field: &'static str, value: usize) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionCache, SessionRecord};
    use microseg_common::{Action, FlowKey, Timestamp};

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();

        assert_eq!(config.session_capacity, 100_000);
        assert_eq!(config.exact_policy_capacity, 10_000);
        assert_eq!(config.wildcard_policy_capacity, 1_000);
        assert_eq!(config.session_shards, 1);
    }

    #[test]
    fn test_default_cache_is_global_lru() {
        let config = EngineConfig {
            session_capacity: 64,
            ..Default::default()
        };
        config.validate().unwrap();
        let cache = SessionCache::new(config.session_capacity, config.session_shards);

        // Filling to capacity never evicts, whatever shard the keys hash to
        for n in 0..64u32 {
            let key = FlowKey::new(0x0A000000 + n, 0x0A000101, 40000, 443, 6);
            let record = SessionRecord::new(Timestamp::from_nanos(1), 60, Action::Allow, 0);
            assert_eq!(cache.insert_if_absent(key, record), Ok(None));
        }
        assert_eq!(cache.len(), 64);

        // One past capacity evicts the least recently used entry
        let first = FlowKey::new(0x0A000000, 0x0A000101, 40000, 443, 6);
        let second = FlowKey::new(0x0A000001, 0x0A000101, 40000, 443, 6);
        assert!(cache.lookup(&first).is_some());
        let extra = FlowKey::new(0x0B000000, 0x0A000101, 40000, 443, 6);
        let record = SessionRecord::new(Timestamp::from_nanos(2), 60, Action::Allow, 0);
        assert_eq!(cache.insert_if_absent(extra, record), Ok(Some(second)));
        assert!(cache.contains(&first));
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(r#"{"session_capacity": 8, "session_shards": 1}"#).unwrap();
        assert_eq!(config.session_capacity, 8);
        assert_eq!(config.session_shards, 1);
        assert_eq!(config.event_queue_capacity, DEFAULT_EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_rejects_invalid() {
        let err = EngineConfig::from_json(r#"{"wildcard_scan_limit": 5000}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "wildcard_scan_limit",
                ..
            }
        ));

        let zero = EngineConfig {
            stats_shards: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let odd = EngineConfig {
            session_shards: 3,
            ..Default::default()
        };
        assert!(odd.validate().is_err());

        let too_many = EngineConfig {
            session_shards: MAX_SESSION_SHARDS * 2,
            ..Default::default()
        };
        assert!(too_many.validate().is_err());

        assert!(matches!(
            EngineConfig::from_json("{session_capacity}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/microseg.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
