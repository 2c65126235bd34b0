//! Bounded LRU session cache
//!
//! # Design
//!
//! - Sharded by flow hash; each shard is an LRU behind its own mutex
//! - Lookup hands back a guard, so a record is mutated under exclusive access
//! - Insert is exactly-once: the first insert for a key wins, later ones
//!   get [`InsertRace::AlreadyExists`]
//! - Capacity pressure evicts the least recently used entry
//!
//! A cache built with one shard (the engine default) is a single exact LRU.
//! With more shards each one owns a fixed slice of the capacity and evicts
//! on its own, so recency is only approximate across shards.

use lru::LruCache;
use microseg_common::{
    Action, FlowKey, InsertRace, SessionState, TcpFlags, TcpState, Timestamp,
};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::Serialize;
use std::num::NonZeroUsize;

/// Cached decision and live counters of one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    /// First packet
    pub created_at: Timestamp,
    /// Most recent packet
    pub last_seen_at: Timestamp,
    /// Packets in the flow's direction
    pub packets_to_server: u64,
    /// Packets in the reverse direction (tracked by the reverse flow's session)
    pub packets_to_client: u64,
    /// Bytes in the flow's direction
    pub bytes_to_server: u64,
    /// Bytes in the reverse direction
    pub bytes_to_client: u64,
    /// Lifecycle state
    pub state: SessionState,
    /// Observed TCP state (never enforced)
    pub tcp_state: TcpState,
    /// Decision made on the first packet
    pub cached_action: Action,
    /// Rule behind the decision (0 = default)
    pub rule_id: u32,
}

impl SessionRecord {
    /// Session holding its first packet
    pub fn new(now: Timestamp, first_len: u64, action: Action, rule_id: u32) -> Self {
        Self {
            created_at: now,
            last_seen_at: now,
            packets_to_server: 1,
            packets_to_client: 0,
            bytes_to_server: first_len,
            bytes_to_client: 0,
            state: SessionState::New,
            tcp_state: TcpState::Closed,
            cached_action: action,
            rule_id,
        }
    }

    /// Account one more packet of the flow
    #[inline]
    pub fn record_packet(&mut self, now: Timestamp, len: u32, flags: Option<TcpFlags>) {
        self.last_seen_at = now;
        self.packets_to_server += 1;
        self.bytes_to_server += len as u64;
        if self.state == SessionState::New {
            self.state = SessionState::Established;
        }
        if let Some(flags) = flags {
            self.observe_tcp(flags);
        }
    }

    /// Advance TCP and session state from the packet's flags
    #[inline]
    pub fn observe_tcp(&mut self, flags: TcpFlags) {
        self.tcp_state = self.tcp_state.advance(flags);
        if flags.has(TcpFlags::RST) {
            self.state = SessionState::Closed;
        } else if flags.has(TcpFlags::FIN) && self.state != SessionState::Closed {
            self.state = SessionState::Closing;
        }
    }

    /// Nanoseconds since the last packet
    pub fn idle_nanos(&self, now: Timestamp) -> u64 {
        now.saturating_since(self.last_seen_at)
    }
}

/// Flow-keyed session store with LRU eviction
pub struct SessionCache {
    shards: Box<[Mutex<LruCache<FlowKey, SessionRecord>>]>,
    capacity: usize,
}

impl SessionCache {
    /// Create cache holding at most `capacity` sessions over `shards` shards
    ///
    /// Capacity is split evenly; the first `capacity % shards` shards get one
    /// extra slot.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shard_count = shards.clamp(1, capacity.max(1));
        let base = capacity / shard_count;
        let extra = capacity % shard_count;

        let shards = (0..shard_count)
            .map(|i| {
                let cap = base + usize::from(i < extra);
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN),
                ))
            })
            .collect();

        Self {
            shards,
            capacity: capacity.max(1),
        }
    }

    #[inline(always)]
    fn shard(&self, key: &FlowKey) -> &Mutex<LruCache<FlowKey, SessionRecord>> {
        let idx = (key.fnv_hash() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Find a session and mark it most recently used
    ///
    /// The shard stays locked while the guard lives; keep it short.
    #[inline]
    pub fn lookup(&self, key: &FlowKey) -> Option<MappedMutexGuard<'_, SessionRecord>> {
        let guard = self.shard(key).lock();
        MutexGuard::try_map(guard, |cache| cache.get_mut(key)).ok()
    }

    /// Insert a session unless one already exists for `key`
    ///
    /// On success returns the key evicted to make room, if any.
    pub fn insert_if_absent(
        &self,
        key: FlowKey,
        record: SessionRecord,
    ) -> Result<Option<FlowKey>, InsertRace> {
        let mut cache = self.shard(&key).lock();
        if cache.contains(&key) {
            return Err(InsertRace::AlreadyExists);
        }
        Ok(cache.push(key, record).map(|(evicted, _)| evicted))
    }

    /// Copy of a session without touching recency
    pub fn peek(&self, key: &FlowKey) -> Option<SessionRecord> {
        self.shard(key).lock().peek(key).copied()
    }

    /// Whether a session exists (no recency update)
    pub fn contains(&self, key: &FlowKey) -> bool {
        self.shard(key).lock().contains(key)
    }

    /// Live sessions
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Maximum live sessions
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Copy of every session, most recent first within each shard
    pub fn snapshot(&self) -> Vec<(FlowKey, SessionRecord)> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let cache = shard.lock();
            out.extend(cache.iter().map(|(k, v)| (*k, *v)));
        }
        out
    }
}
