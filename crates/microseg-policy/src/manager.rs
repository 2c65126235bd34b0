//! Control-plane rule ingestion
//!
//! Turns human-oriented [`PolicySpec`]s into table entries. Fully specified
//! rules (host addresses, both ports, concrete protocol) go to the exact
//! table; anything with a wildcard field goes to the wildcard slots.

use crate::{
    ExactPolicyRule, ExactPolicyTable, PolicyError, PolicyResult, WildcardPolicyRule,
    WildcardPolicyTable,
};
use ipnetwork::Ipv4Network;
use microseg_common::{Action, PolicyKey, IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Address matching every host
pub const ANY_ADDR: &str = "0.0.0.0/0";

/// Policy rule as written by an operator
///
/// ```json
/// {"rule_id": 7, "src": "10.0.0.0/24", "dst": "10.0.1.5",
///  "dst_port": 443, "protocol": "tcp", "action": "deny", "priority": 10}
/// ```
///
/// Omitted addresses match anything, omitted ports are `0` (any) and an
/// omitted protocol is `any`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Rule ID (must be non-zero)
    pub rule_id: u32,
    /// Source address or CIDR (a bare address means `/32`)
    #[serde(default = "any_addr")]
    pub src: String,
    /// Destination address or CIDR
    #[serde(default = "any_addr")]
    pub dst: String,
    /// Source port (0 = any)
    #[serde(default)]
    pub src_port: u16,
    /// Destination port (0 = any)
    #[serde(default)]
    pub dst_port: u16,
    /// `tcp`, `udp`, `icmp`, `any` or a protocol number
    #[serde(default = "any_protocol")]
    pub protocol: String,
    /// `allow`, `deny` or `log`
    pub action: String,
    /// Higher wins among wildcard rules
    #[serde(default)]
    pub priority: u16,
}

fn any_addr() -> String {
    ANY_ADDR.to_string()
}

fn any_protocol() -> String {
    "any".to_string()
}

impl PolicySpec {
    /// Rule matching every flow
    pub fn new(rule_id: u32, action: Action) -> Self {
        Self {
            rule_id,
            src: any_addr(),
            dst: any_addr(),
            src_port: 0,
            dst_port: 0,
            protocol: any_protocol(),
            action: action.as_str().to_string(),
            priority: 0,
        }
    }

    /// Set source address / CIDR
    pub fn src(mut self, src: impl Into<String>) -> Self {
        self.src = src.into();
        self
    }

    /// Set destination address / CIDR
    pub fn dst(mut self, dst: impl Into<String>) -> Self {
        self.dst = dst.into();
        self
    }

    /// Set ports (0 = any)
    pub fn ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    /// Set protocol name or number
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set priority
    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    fn compile(&self) -> PolicyResult<CompiledRule> {
        if self.rule_id == 0 {
            return Err(PolicyError::InvalidRule("rule_id must be non-zero".into()));
        }

        let action = self
            .action
            .parse::<Action>()
            .map_err(|e| PolicyError::UnknownAction(e.0))?;
        let (src_ip, src_prefix) = parse_cidr(&self.src)?;
        let (dst_ip, dst_prefix) = parse_cidr(&self.dst)?;
        let protocol = parse_protocol(&self.protocol)?;

        Ok(CompiledRule {
            src_ip,
            src_prefix,
            dst_ip,
            dst_prefix,
            src_port: self.src_port,
            dst_port: self.dst_port,
            protocol,
            action,
            priority: self.priority,
            rule_id: self.rule_id,
        })
    }

    fn from_exact(rule: &ExactPolicyRule) -> Self {
        let key = rule.key;
        Self {
            rule_id: rule.rule_id,
            src: Ipv4Addr::from(key.src_ip).to_string(),
            dst: Ipv4Addr::from(key.dst_ip).to_string(),
            src_port: key.src_port,
            dst_port: key.dst_port,
            protocol: protocol_name(key.protocol),
            action: rule.action.as_str().to_string(),
            priority: rule.priority,
        }
    }

    fn from_wildcard(rule: &WildcardPolicyRule) -> Self {
        Self {
            rule_id: rule.rule_id,
            src: format_cidr(rule.src_ip, rule.src_ip_mask),
            dst: format_cidr(rule.dst_ip, rule.dst_ip_mask),
            src_port: rule.src_port,
            dst_port: rule.dst_port,
            protocol: protocol_name(rule.protocol),
            action: rule.action.as_str().to_string(),
            priority: rule.priority,
        }
    }
}

impl fmt::Display for PolicySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule_id={} {}:{} -> {}:{} proto={} action={} priority={}",
            self.rule_id,
            self.src,
            self.src_port,
            self.dst,
            self.dst_port,
            self.protocol,
            self.action,
            self.priority
        )
    }
}

/// Validated, numeric form of a [`PolicySpec`]
#[derive(Debug, Clone, Copy)]
struct CompiledRule {
    src_ip: u32,
    src_prefix: u8,
    dst_ip: u32,
    dst_prefix: u8,
    src_port: u16,
    dst_port: u16,
    protocol: u8,
    action: Action,
    priority: u16,
    rule_id: u32,
}

impl CompiledRule {
    fn is_exact(&self) -> bool {
        self.src_prefix == 32
            && self.dst_prefix == 32
            && self.src_port != 0
            && self.dst_port != 0
            && self.protocol != 0
    }

    fn exact_key(&self) -> PolicyKey {
        PolicyKey::from_ipv4(
            self.src_ip,
            self.dst_ip,
            self.src_port,
            self.dst_port,
            self.protocol,
        )
    }

    fn wildcard(&self) -> WildcardPolicyRule {
        WildcardPolicyRule::any(self.action, self.priority, self.rule_id)
            .with_src(self.src_ip, self.src_prefix)
            .with_dst(self.dst_ip, self.dst_prefix)
            .with_ports(self.src_port, self.dst_port)
            .with_protocol(self.protocol)
    }
}

/// Where a rule lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "table", content = "at")]
pub enum Placement {
    /// Exact table, under this key
    Exact(PolicyKey),
    /// Wildcard table, in this slot
    Wildcard(usize),
}

/// Installed rule as reported by [`PolicyManager::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyStatus {
    /// The rule
    #[serde(flatten)]
    pub spec: PolicySpec,
    /// Where it is installed
    pub placement: Placement,
    /// New flows decided by this rule (exact rules only)
    pub hit_count: Option<u64>,
}

/// Outcome of a bulk load
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Rules installed
    pub applied: usize,
    /// Rules rejected, with the reason
    pub failed: Vec<(u32, PolicyError)>,
}

impl LoadReport {
    /// Number of rules submitted
    pub fn total(&self) -> usize {
        self.applied + self.failed.len()
    }

    /// Whether every rule was installed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sole writer of the policy tables
///
/// A `rule_id` is installed at most once across both tables: re-applying it
/// with a different shape moves it.
pub struct PolicyManager {
    exact: Arc<ExactPolicyTable>,
    wildcard: Arc<WildcardPolicyTable>,
    /// `rule_id` -> placement; the lock also serialises table writes
    placements: Mutex<HashMap<u32, Placement>>,
}

impl PolicyManager {
    /// Create manager over shared tables
    ///
    /// Rules already present in the tables are indexed.
    pub fn new(exact: Arc<ExactPolicyTable>, wildcard: Arc<WildcardPolicyTable>) -> Self {
        let mut placements: HashMap<u32, Placement> = exact
            .rules()
            .into_iter()
            .map(|rule| (rule.rule_id, Placement::Exact(rule.key)))
            .collect();
        for (slot, rule) in wildcard.rules().iter().enumerate() {
            if !rule.is_empty() {
                placements.insert(rule.rule_id, Placement::Wildcard(slot));
            }
        }

        Self {
            exact,
            wildcard,
            placements: Mutex::new(placements),
        }
    }

    /// Install or update a rule
    pub fn apply(&self, spec: &PolicySpec) -> PolicyResult<Placement> {
        let rule = spec.compile()?;
        let mut placements = self.placements.lock();
        let previous = placements.get(&rule.rule_id).copied();

        let placement = if rule.is_exact() {
            let key = rule.exact_key();
            if let Some(displaced) = self.exact.get(&key).filter(|r| r.rule_id != rule.rule_id) {
                debug!(
                    rule_id = rule.rule_id,
                    displaced = displaced.rule_id,
                    "exact key already held by another rule, replacing"
                );
                placements.remove(&displaced.rule_id);
            }
            self.exact.upsert(ExactPolicyRule::new(
                key,
                rule.action,
                rule.priority,
                rule.rule_id,
            ))?;
            Placement::Exact(key)
        } else {
            Placement::Wildcard(self.wildcard.insert_first_free(rule.wildcard())?)
        };

        // Drop the old copy only once the new one is in place
        match previous {
            Some(old) if old != placement => self.evict(old)?,
            _ => {}
        }
        placements.insert(rule.rule_id, placement);

        info!(%spec, ?placement, "policy applied");
        Ok(placement)
    }

    /// Remove a rule by id
    pub fn remove(&self, rule_id: u32) -> PolicyResult<Placement> {
        let mut placements = self.placements.lock();
        let placement = placements
            .get(&rule_id)
            .copied()
            .ok_or(PolicyError::NotFound(rule_id))?;
        self.evict(placement)?;
        placements.remove(&rule_id);

        info!(rule_id, ?placement, "policy deleted");
        Ok(placement)
    }

    /// Where a rule is installed
    pub fn get(&self, rule_id: u32) -> Option<Placement> {
        self.placements.lock().get(&rule_id).copied()
    }

    /// Every installed rule, ordered by `rule_id`
    pub fn list(&self) -> Vec<PolicyStatus> {
        let exact = self.exact.rules().into_iter().map(|rule| PolicyStatus {
            spec: PolicySpec::from_exact(&rule),
            placement: Placement::Exact(rule.key),
            hit_count: Some(rule.hit_count.get()),
        });

        let wildcard = self
            .wildcard
            .rules()
            .iter()
            .enumerate()
            .filter(|(_, rule)| !rule.is_empty())
            .map(|(slot, rule)| PolicyStatus {
                spec: PolicySpec::from_wildcard(rule),
                placement: Placement::Wildcard(slot),
                hit_count: None,
            })
            .collect::<Vec<_>>();

        let mut all: Vec<_> = exact.chain(wildcard).collect();
        all.sort_by_key(|status| status.spec.rule_id);
        all
    }

    /// Install many rules, continuing past failures
    pub fn load_all<'a, I>(&self, specs: I) -> LoadReport
    where
        I: IntoIterator<Item = &'a PolicySpec>,
    {
        let mut report = LoadReport::default();

        for spec in specs {
            match self.apply(spec) {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    warn!(rule_id = spec.rule_id, error = %e, "failed to load policy");
                    report.failed.push((spec.rule_id, e));
                }
            }
        }

        info!(
            "Restored {}/{} policies",
            report.applied,
            report.total()
        );
        report
    }

    /// Install rules from a JSON array of [`PolicySpec`]
    pub fn load_json(&self, json: &str) -> PolicyResult<LoadReport> {
        let specs: Vec<PolicySpec> =
            serde_json::from_str(json).map_err(|e| PolicyError::InvalidRule(e.to_string()))?;
        Ok(self.load_all(&specs))
    }

    /// Exact table
    pub fn exact(&self) -> &Arc<ExactPolicyTable> {
        &self.exact
    }

    /// Wildcard table
    pub fn wildcard(&self) -> &Arc<WildcardPolicyTable> {
        &self.wildcard
    }

    fn evict(&self, placement: Placement) -> PolicyResult<()> {
        match placement {
            Placement::Exact(key) => {
                self.exact.remove(&key);
            }
            Placement::Wildcard(slot) => {
                self.wildcard.clear_slot(slot)?;
            }
        }
        Ok(())
    }
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new(
            Arc::new(ExactPolicyTable::default()),
            Arc::new(WildcardPolicyTable::default()),
        )
    }
}

/// Parse `a.b.c.d` or `a.b.c.d/len` into (network address, prefix length)
pub fn parse_cidr(s: &str) -> PolicyResult<(u32, u8)> {
    let s = s.trim();
    let network: Ipv4Network = if s.contains('/') {
        s.parse()
    } else {
        format!("{s}/32").parse()
    }
    .map_err(|e| PolicyError::InvalidCidr(format!("{s}: {e}")))?;

    Ok((u32::from(network.network()), network.prefix()))
}

/// Parse a protocol name or number (`any` and empty mean 0)
pub fn parse_protocol(s: &str) -> PolicyResult<u8> {
    match s.trim().to_ascii_lowercase().as_str() {
        "tcp" => Ok(IPPROTO_TCP),
        "udp" => Ok(IPPROTO_UDP),
        "icmp" => Ok(IPPROTO_ICMP),
        "any" | "" => Ok(0),
        other => other
            .parse::<u8>()
            .map_err(|_| PolicyError::UnknownProtocol(s.to_string())),
    }
}

/// Protocol name for display (`any` for 0, decimal if unnamed)
pub fn protocol_name(protocol: u8) -> String {
    match protocol {
        IPPROTO_TCP => "tcp".into(),
        IPPROTO_UDP => "udp".into(),
        IPPROTO_ICMP => "icmp".into(),
        0 => "any".into(),
        n => n.to_string(),
    }
}

fn format_cidr(ip: u32, mask: u32) -> String {
    let prefix = mask.leading_ones();
    if prefix == 32 {
        Ipv4Addr::from(ip).to_string()
    } else {
        format!("{}/{}", Ipv4Addr::from(ip), prefix)
    }
}
