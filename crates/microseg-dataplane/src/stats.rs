//! Filter Statistics
//!
//! Per-context counter shards, summed only when read.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Counter {
    /// Classified packets
    TotalPackets = 0,
    /// Packets passed
    AllowedPackets = 1,
    /// Packets dropped
    DeniedPackets = 2,
    /// Sessions created
    NewSessions = 3,
    /// Sessions evicted
    ClosedSessions = 4,
    /// Live sessions (gauge, filled in on read)
    ActiveSessions = 5,
    /// New flows decided by a rule
    PolicyHits = 6,
    /// New flows given the default action
    PolicyMisses = 7,
    /// Flow events lost to a full queue
    EventsDropped = 8,
}

impl Counter {
    /// Number of counters
    pub const COUNT: usize = 9;

    /// Every counter, in index order
    pub const ALL: [Counter; Self::COUNT] = [
        Counter::TotalPackets,
        Counter::AllowedPackets,
        Counter::DeniedPackets,
        Counter::NewSessions,
        Counter::ClosedSessions,
        Counter::ActiveSessions,
        Counter::PolicyHits,
        Counter::PolicyMisses,
        Counter::EventsDropped,
    ];

    /// Exported metric name
    pub const fn metric_name(&self) -> &'static str {
        match self {
            Counter::TotalPackets => "microseg_packets_total",
            Counter::AllowedPackets => "microseg_packets_allowed_total",
            Counter::DeniedPackets => "microseg_packets_denied_total",
            Counter::NewSessions => "microseg_sessions_new_total",
            Counter::ClosedSessions => "microseg_sessions_closed_total",
            Counter::ActiveSessions => "microseg_sessions_active",
            Counter::PolicyHits => "microseg_policy_hits_total",
            Counter::PolicyMisses => "microseg_policy_misses_total",
            Counter::EventsDropped => "microseg_events_dropped_total",
        }
    }
}

/// Per-context counters (cache-line aligned)
#[repr(C, align(64))]
pub struct CoreStats {
    counters: [AtomicU64; Counter::COUNT],
}

impl Default for CoreStats {
    fn default() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl CoreStats {
    #[inline(always)]
    pub fn inc(&self, counter: Counter) {
        self.counters[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }
}

/// Counters across all contexts
pub struct StatsRegistry {
    shards: Box<[CoreStats]>,
}

impl StatsRegistry {
    pub fn new(num_shards: usize) -> Self {
        Self {
            shards: (0..num_shards.max(1)).map(|_| CoreStats::default()).collect(),
        }
    }

    /// Shard for a context (wraps around)
    #[inline(always)]
    pub fn shard(&self, ctx: usize) -> &CoreStats {
        &self.shards[ctx % self.shards.len()]
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Sum of every shard
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for shard in self.shards.iter() {
            for counter in Counter::ALL {
                total.values[counter as usize] += shard.get(counter);
            }
        }
        total
    }
}

/// Point-in-time aggregate (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    values: [u64; Counter::COUNT],
}

impl StatsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter as usize]
    }

    pub fn set(&mut self, counter: Counter, value: u64) {
        self.values[counter as usize] = value;
    }

    pub fn total_packets(&self) -> u64 {
        self.get(Counter::TotalPackets)
    }

    pub fn allowed_packets(&self) -> u64 {
        self.get(Counter::AllowedPackets)
    }

    pub fn denied_packets(&self) -> u64 {
        self.get(Counter::DeniedPackets)
    }

    pub fn new_sessions(&self) -> u64 {
        self.get(Counter::NewSessions)
    }

    pub fn closed_sessions(&self) -> u64 {
        self.get(Counter::ClosedSessions)
    }

    pub fn active_sessions(&self) -> u64 {
        self.get(Counter::ActiveSessions)
    }

    pub fn policy_hits(&self) -> u64 {
        self.get(Counter::PolicyHits)
    }

    pub fn policy_misses(&self) -> u64 {
        self.get(Counter::PolicyMisses)
    }

    pub fn events_dropped(&self) -> u64 {
        self.get(Counter::EventsDropped)
    }

    pub fn policy_hit_rate(&self) -> f64 {
        let total = self.policy_hits() + self.policy_misses();
        if total == 0 { return 0.0; }
        self.policy_hits() as f64 / total as f64
    }

    /// Export through the `metrics` facade
    ///
    /// Counters are set to their absolute value; active sessions is a gauge.
    pub fn publish(&self) {
        for counter in Counter::ALL {
            let value = self.get(counter);
            if counter == Counter::ActiveSessions {
                metrics::gauge!(counter.metric_name()).set(value as f64);
            } else {
                metrics::counter!(counter.metric_name()).absolute(value);
            }
        }
    }
}

impl Serialize for StatsSnapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(Counter::COUNT))?;
        for counter in Counter::ALL {
            map.serialize_entry(counter.metric_name(), &self.get(counter))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_stats() {
        let stats = CoreStats::default();
        stats.inc(Counter::TotalPackets);
        stats.inc(Counter::TotalPackets);
        stats.add(Counter::DeniedPackets, 5);

        assert_eq!(stats.get(Counter::TotalPackets), 2);
        assert_eq!(stats.get(Counter::DeniedPackets), 5);
        assert_eq!(stats.get(Counter::PolicyHits), 0);
    }

    #[test]
    fn test_aggregate() {
        let registry = StatsRegistry::new(4);
        registry.shard(0).inc(Counter::PolicyHits);
        registry.shard(1).inc(Counter::PolicyHits);
        registry.shard(6).inc(Counter::PolicyMisses); // wraps to shard 2

        let total = registry.snapshot();
        assert_eq!(total.policy_hits(), 2);
        assert_eq!(total.policy_misses(), 1);
        assert!((total.policy_hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_counter_indices() {
        for (i, counter) in Counter::ALL.iter().enumerate() {
            assert_eq!(*counter as usize, i);
        }
        assert_eq!(std::mem::align_of::<CoreStats>(), 64);
    }

    #[test]
    fn test_snapshot_json() {
        let mut snap = StatsSnapshot::default();
        snap.set(Counter::ActiveSessions, 3);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["microseg_sessions_active"], 3);
        assert_eq!(json["microseg_packets_total"], 0);
    }

    #[test]
    fn test_publish_without_recorder() {
        let registry = StatsRegistry::new(1);
        registry.shard(0).inc(Counter::NewSessions);
        // No recorder installed: must be a no-op
        registry.snapshot().publish();
    }
}
