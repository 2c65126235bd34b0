//! Exact-match policy table

use crate::{ExactPolicyRule, PolicyError, PolicyResult};
use dashmap::DashMap;
use microseg_common::{Action, PolicyKey, MAX_ENTRIES_POLICY};
use parking_lot::Mutex;

/// Hash table of exact 5-tuple rules
///
/// Readers take a shard read lock only; writers are serialised so the
/// capacity check and the insert are atomic with respect to each other.
pub struct ExactPolicyTable {
    rules: DashMap<PolicyKey, ExactPolicyRule>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl ExactPolicyTable {
    /// Create table with capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            rules: DashMap::with_capacity(capacity.min(MAX_ENTRIES_POLICY)),
            capacity,
            write_lock: Mutex::new(()),
        }
    }

    /// Insert or replace the rule for `rule.key`
    pub fn upsert(&self, rule: ExactPolicyRule) -> PolicyResult<()> {
        let _guard = self.write_lock.lock();

        if !self.rules.contains_key(&rule.key) && self.rules.len() >= self.capacity {
            return Err(PolicyError::TableFull {
                table: "exact",
                capacity: self.capacity,
            });
        }

        self.rules.insert(rule.key, rule);
        Ok(())
    }

    /// Remove the rule for `key`
    pub fn remove(&self, key: &PolicyKey) -> Option<ExactPolicyRule> {
        let _guard = self.write_lock.lock();
        self.rules.remove(key).map(|(_, rule)| rule)
    }

    /// Look up a flow and count the hit
    ///
    /// Returns `(action, rule_id)`.
    #[inline]
    pub fn lookup(&self, key: &PolicyKey) -> Option<(Action, u32)> {
        self.rules.get(key).map(|rule| {
            rule.hit_count.inc();
            (rule.action, rule.rule_id)
        })
    }

    /// Copy of the rule for `key` (no hit counted)
    pub fn get(&self, key: &PolicyKey) -> Option<ExactPolicyRule> {
        self.rules.get(key).map(|rule| rule.clone())
    }

    /// Snapshot of all rules
    pub fn rules(&self) -> Vec<ExactPolicyRule> {
        self.rules.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Remove every rule
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.rules.clear();
    }

    /// Get number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Maximum number of rules
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ExactPolicyTable {
    fn default() -> Self {
        Self::new(MAX_ENTRIES_POLICY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(dst_port: u16) -> PolicyKey {
        PolicyKey::from_ipv4(0x01010101, 0x02020202, 80, dst_port, 6)
    }

    #[test]
    fn test_lookup_counts_hits() {
        let table = ExactPolicyTable::new(16);
        table.upsert(ExactPolicyRule::deny(key(443), 7)).unwrap();

        assert_eq!(table.lookup(&key(443)), Some((Action::Deny, 7)));
        assert_eq!(table.lookup(&key(443)), Some((Action::Deny, 7)));
        assert_eq!(table.lookup(&key(80)), None);

        assert_eq!(table.get(&key(443)).unwrap().hit_count.get(), 2);
    }

    #[test]
    fn test_capacity() {
        let table = ExactPolicyTable::new(2);
        table.upsert(ExactPolicyRule::allow(key(1), 1)).unwrap();
        table.upsert(ExactPolicyRule::allow(key(2), 2)).unwrap();

        assert_eq!(
            table.upsert(ExactPolicyRule::allow(key(3), 3)),
            Err(PolicyError::TableFull {
                table: "exact",
                capacity: 2
            })
        );

        // Replacing an existing key is always allowed
        table.upsert(ExactPolicyRule::deny(key(2), 22)).unwrap();
        assert_eq!(table.lookup(&key(2)), Some((Action::Deny, 22)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove() {
        let table = ExactPolicyTable::default();
        table.upsert(ExactPolicyRule::deny(key(443), 1)).unwrap();

        assert_eq!(table.remove(&key(443)).map(|r| r.rule_id), Some(1));
        assert!(table.remove(&key(443)).is_none());
        assert!(table.is_empty());
        assert_eq!(table.capacity(), MAX_ENTRIES_POLICY);
    }

    #[test]
    fn test_concurrent_hits() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(ExactPolicyTable::new(16));
        table.upsert(ExactPolicyRule::allow(key(443), 1)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        table.lookup(&key(443));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let hits = table.get(&key(443)).unwrap().hit_count.get();
        assert!(hits > 0 && hits <= 4000);
    }
}
