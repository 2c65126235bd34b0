//! Tiered policy lookup for new flows

use crate::{ExactPolicyTable, WildcardPolicyTable};
use microseg_common::{Action, FlowKey, PolicyKey};
use std::sync::Arc;

/// Which tier decided a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchSource {
    /// Exact 5-tuple rule
    Exact,
    /// Best wildcard rule
    Wildcard,
    /// No rule matched
    Default,
}

/// Outcome of resolving a flow against both tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Action to cache for the session
    pub action: Action,
    /// Deciding rule (0 for the default action)
    pub rule_id: u32,
    /// Deciding tier
    pub source: MatchSource,
}

impl Resolution {
    /// Default decision for flows matching no rule
    pub const DEFAULT: Self = Self {
        action: Action::Allow,
        rule_id: 0,
        source: MatchSource::Default,
    };

    /// Whether a rule (of either tier) matched
    #[inline(always)]
    pub const fn is_hit(&self) -> bool {
        !matches!(self.source, MatchSource::Default)
    }
}

/// Resolves new flows: exact table, then wildcard slots, then allow
///
/// # Performance
///
/// - Exact hit: one hash lookup
/// - Wildcard: bounded linear scan of `scan_limit` slots
///
/// Neither table is locked against writers for the duration of a scan.
#[derive(Clone)]
pub struct PolicyResolver {
    exact: Arc<ExactPolicyTable>,
    wildcard: Arc<WildcardPolicyTable>,
    scan_limit: usize,
}

impl PolicyResolver {
    /// Create resolver over shared tables
    ///
    /// `scan_limit` is clamped to the wildcard table's capacity.
    pub fn new(
        exact: Arc<ExactPolicyTable>,
        wildcard: Arc<WildcardPolicyTable>,
        scan_limit: usize,
    ) -> Self {
        let scan_limit = scan_limit.min(wildcard.capacity());
        Self {
            exact,
            wildcard,
            scan_limit,
        }
    }

    /// Decide a flow
    #[inline]
    pub fn resolve(&self, key: &FlowKey) -> Resolution {
        if let Some((action, rule_id)) = self.exact.lookup(&PolicyKey::from(key)) {
            return Resolution {
                action,
                rule_id,
                source: MatchSource::Exact,
            };
        }

        match self.wildcard.best_match(key, self.scan_limit) {
            Some(rule) => Resolution {
                action: rule.action,
                rule_id: rule.rule_id,
                source: MatchSource::Wildcard,
            },
            None => Resolution::DEFAULT,
        }
    }

    /// Exact table
    pub fn exact(&self) -> &Arc<ExactPolicyTable> {
        &self.exact
    }

    /// Wildcard table
    pub fn wildcard(&self) -> &Arc<WildcardPolicyTable> {
        &self.wildcard
    }

    /// Number of wildcard slots scanned per resolution
    pub fn scan_limit(&self) -> usize {
        self.scan_limit
    }
}

impl Default for PolicyResolver {
    fn default() -> Self {
        let wildcard = Arc::new(WildcardPolicyTable::default());
        let scan_limit = wildcard.capacity();
        Self::new(Arc::new(ExactPolicyTable::default()), wildcard, scan_limit)
    }
}
