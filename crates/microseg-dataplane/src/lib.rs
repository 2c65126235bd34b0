//! Microsegmentation Data Plane
//!
//! Per-packet enforcement: classify each frame into a flow, decide it once
//! against policy, and cache the decision so only the first packet of a flow
//! pays for policy resolution.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         PACKET FILTER                               │
//! │                                                                     │
//! │   packet ──► Flow Key Extractor ──(parse error)──────────► ALLOW    │
//! │                     │                                               │
//! │                     ▼                                               │
//! │              ┌──────────────┐   hit    ┌──────────────────┐         │
//! │              │Session Cache │────────►│ cached action     │──┐      │
//! │              │ (sharded LRU)│         │ + counters        │  │      │
//! │              └──────┬───────┘         └──────────────────┘  │      │
//! │                     │ miss                                  │      │
//! │                     ▼                                       │      │
//! │              ┌──────────────┐  ┌──────────────┐             │      │
//! │              │ Exact table  │─►│ Wildcard     │─► default   │      │
//! │              └──────┬───────┘  └──────┬───────┘   ALLOW     │      │
//! │                     └───────┬─────────┘                     │      │
//! │                             ▼                               ▼      │
//! │                    create session ──(deny/log)──► Event Reporter   │
//! │                             │                                      │
//! │                             ▼                                      │
//! │                     ALLOW / DENY ──► per-context stats shard       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! | Property | How |
//! |----------|-----|
//! | Never blocks | Bounded scans, `try_send` for events |
//! | Fail-open | Unparseable frames pass, no table touched |
//! | One session per flow | First insert wins, losers use its decision |
//! | Bounded memory | LRU eviction at `session_capacity` (exact with one shard) |

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod session;
#[allow(missing_docs)]
pub mod stats;

pub use config::EngineConfig;
pub use error::{FilterError, FilterResult};
pub use events::{EventReporter, EventStream};
pub use filter::{FilterContext, PacketFilter, Verdict, TC_ACT_OK, TC_ACT_SHOT};
pub use session::{SessionCache, SessionRecord};
pub use stats::{CoreStats, Counter, StatsRegistry, StatsSnapshot};

pub use microseg_common::{Action, FlowEvent, FlowKey};
pub use microseg_policy::{PolicyManager, PolicySpec};
