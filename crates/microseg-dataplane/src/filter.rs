//! Packet Filter Entry Point
//!
//! Per packet: `extract → session lookup → (hit: cached action) |
//! (miss: resolve policy, create session, maybe report) → verdict`.
//!
//! Nothing here blocks or loops without bound, and every anomaly resolves
//! to [`Verdict::Allow`].

use crate::{
    CoreStats, Counter, EngineConfig, EventReporter, EventStream, FilterResult, SessionCache,
    SessionRecord, StatsRegistry, StatsSnapshot,
};
use microseg_common::{Action, FlowEvent, InsertRace, ParsedPacket, Timestamp};
use microseg_policy::{ExactPolicyTable, PolicyManager, PolicyResolver, WildcardPolicyTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Traffic-control action code: pass
pub const TC_ACT_OK: i32 = 0;
/// Traffic-control action code: drop
pub const TC_ACT_SHOT: i32 = 2;

/// Enforcement decision for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Pass the packet
    Allow,
    /// Drop the packet
    Deny,
}

impl Verdict {
    /// Whether the packet is dropped
    #[inline(always)]
    pub const fn is_drop(&self) -> bool {
        matches!(self, Verdict::Deny)
    }

    /// Return code for a traffic-control hook
    #[inline(always)]
    pub const fn as_tc_action(&self) -> i32 {
        match self {
            Verdict::Allow => TC_ACT_OK,
            Verdict::Deny => TC_ACT_SHOT,
        }
    }
}

impl From<Action> for Verdict {
    #[inline(always)]
    fn from(action: Action) -> Self {
        if action.is_drop() {
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }
}

static NEXT_CONTEXT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CONTEXT_ID: usize = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
}

/// Microsegmentation packet filter
///
/// Shared by reference across every processing thread.
pub struct PacketFilter {
    config: EngineConfig,
    sessions: SessionCache,
    resolver: PolicyResolver,
    policies: PolicyManager,
    stats: StatsRegistry,
    events: EventReporter,
}

impl PacketFilter {
    /// Create filter with empty policy tables
    pub fn new(config: EngineConfig) -> FilterResult<Self> {
        let exact = Arc::new(ExactPolicyTable::new(config.exact_policy_capacity));
        let wildcard = Arc::new(WildcardPolicyTable::new(config.wildcard_policy_capacity));
        Self::with_tables(config, exact, wildcard)
    }

    /// Create filter over existing policy tables
    pub fn with_tables(
        config: EngineConfig,
        exact: Arc<ExactPolicyTable>,
        wildcard: Arc<WildcardPolicyTable>,
    ) -> FilterResult<Self> {
        config.validate()?;

        let resolver = PolicyResolver::new(exact.clone(), wildcard.clone(), config.wildcard_scan_limit);
        let filter = Self {
            sessions: SessionCache::new(config.session_capacity, config.session_shards),
            policies: PolicyManager::new(exact, wildcard),
            stats: StatsRegistry::new(config.stats_shards),
            events: EventReporter::new(config.event_queue_capacity),
            resolver,
            config,
        };

        tracing::info!(
            sessions = filter.config.session_capacity,
            session_shards = filter.sessions.shard_count(),
            exact_rules = filter.config.exact_policy_capacity,
            wildcard_slots = filter.config.wildcard_policy_capacity,
            scan_limit = filter.resolver.scan_limit(),
            "packet filter initialised"
        );

        Ok(filter)
    }

    /// Process a packet on the calling thread's context
    #[inline]
    pub fn process(&self, packet: &[u8]) -> Verdict {
        let ctx = CONTEXT_ID.with(|id| *id);
        self.context(ctx).process(packet)
    }

    /// Processing context bound to a stats shard (e.g. one per core)
    #[inline]
    pub fn context(&self, core_id: usize) -> FilterContext<'_> {
        FilterContext {
            filter: self,
            stats: self.stats.shard(core_id),
        }
    }

    /// Control-plane handle to the policy tables
    pub fn policies(&self) -> &PolicyManager {
        &self.policies
    }

    /// Subscribe to flow events
    pub fn events(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Events lost to a full queue
    pub fn events_dropped(&self) -> u64 {
        self.events.dropped()
    }

    /// Aggregated counters
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.set(Counter::ActiveSessions, self.sessions.len() as u64);
        snapshot
    }

    /// Session cache, for inspection
    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Packet filter bound to one stats shard
pub struct FilterContext<'a> {
    filter: &'a PacketFilter,
    stats: &'a CoreStats,
}

impl FilterContext<'_> {
    /// Decide one packet
    #[inline]
    pub fn process(&self, data: &[u8]) -> Verdict {
        let packet = match ParsedPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::trace!(error = %e, "unclassified packet passed");
                return Verdict::Allow;
            }
        };

        self.stats.inc(Counter::TotalPackets);
        let now = Timestamp::now();

        let cached = self.filter.sessions.lookup(&packet.key).map(|mut session| {
            session.record_packet(now, packet.len, packet.tcp_flags);
            session.cached_action
        });
        let action = match cached {
            Some(action) => action,
            None => self.admit(&packet, now),
        };

        let verdict = Verdict::from(action);
        if verdict.is_drop() {
            self.stats.inc(Counter::DeniedPackets);
            tracing::trace!(flow = %packet.key, "packet denied");
        } else {
            self.stats.inc(Counter::AllowedPackets);
        }
        verdict
    }

    /// First packet of a flow: resolve, create the session, report
    #[cold]
    fn admit(&self, packet: &ParsedPacket, now: Timestamp) -> Action {
        let filter = self.filter;
        let resolution = filter.resolver.resolve(&packet.key);
        self.stats.inc(if resolution.is_hit() {
            Counter::PolicyHits
        } else {
            Counter::PolicyMisses
        });

        let mut record =
            SessionRecord::new(now, packet.len as u64, resolution.action, resolution.rule_id);
        if let Some(flags) = packet.tcp_flags {
            record.observe_tcp(flags);
        }

        match filter.sessions.insert_if_absent(packet.key, record) {
            Ok(evicted) => {
                self.stats.inc(Counter::NewSessions);
                if evicted.is_some() {
                    self.stats.inc(Counter::ClosedSessions);
                }

                if resolution.action.is_reported() {
                    let event = FlowEvent::new_session(
                        packet.key,
                        now,
                        packet.len as u64,
                        resolution.action,
                        resolution.rule_id,
                    );
                    if filter.events.publish(event).is_err() {
                        self.stats.inc(Counter::EventsDropped);
                    }
                }
                resolution.action
            }
            // Another context created the session first; its decision stands
            Err(InsertRace::AlreadyExists) => filter
                .sessions
                .lookup(&packet.key)
                .map(|mut session| {
                    session.record_packet(now, packet.len, packet.tcp_flags);
                    session.cached_action
                })
                .unwrap_or(resolution.action),
        }
    }
}
