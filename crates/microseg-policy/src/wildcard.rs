//! Fixed-capacity wildcard rule slots with lock-free reads

use crate::{PolicyError, PolicyResult, WildcardPolicyRule};
use arc_swap::ArcSwap;
use microseg_common::{FlowKey, MAX_ENTRIES_WILDCARD_POLICY};
use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered, fixed-capacity collection of wildcard rules
///
/// Slots are addressed by index. Writes copy the slot array and swap it in
/// atomically, so a scan always sees one consistent generation.
pub struct WildcardPolicyTable {
    slots: ArcSwap<Vec<WildcardPolicyRule>>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl WildcardPolicyTable {
    /// Create table with `capacity` empty slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: ArcSwap::from_pointee(vec![WildcardPolicyRule::empty(); capacity]),
            capacity,
            write_lock: Mutex::new(()),
        }
    }

    /// Write a rule into `slot`
    ///
    /// Writing a rule with `rule_id == 0` tombstones the slot.
    pub fn set_slot(&self, slot: usize, rule: WildcardPolicyRule) -> PolicyResult<()> {
        self.check_slot(slot)?;
        let _guard = self.write_lock.lock();
        self.write(slot, rule);
        Ok(())
    }

    /// Tombstone `slot`, returning what it held
    pub fn clear_slot(&self, slot: usize) -> PolicyResult<Option<WildcardPolicyRule>> {
        self.check_slot(slot)?;
        let _guard = self.write_lock.lock();
        let previous = self.slots.load()[slot];
        self.write(slot, WildcardPolicyRule::empty());
        Ok((!previous.is_empty()).then_some(previous))
    }

    /// Store `rule` in the slot already holding its `rule_id`, or else the
    /// first empty slot. Returns the slot used.
    pub fn insert_first_free(&self, rule: WildcardPolicyRule) -> PolicyResult<usize> {
        if rule.is_empty() {
            return Err(PolicyError::InvalidRule("rule_id 0 is reserved for empty slots".into()));
        }

        let _guard = self.write_lock.lock();
        let slots = self.slots.load();

        let existing = slots.iter().position(|r| r.rule_id == rule.rule_id);
        let slot = existing
            .or_else(|| slots.iter().position(|r| r.is_empty()))
            .ok_or(PolicyError::TableFull {
                table: "wildcard",
                capacity: self.capacity,
            })?;

        tracing::debug!(
            slot,
            rule_id = rule.rule_id,
            update = existing.is_some(),
            "wildcard slot assigned"
        );
        self.write(slot, rule);
        Ok(slot)
    }

    /// Slot holding `rule_id`, if any
    pub fn find(&self, rule_id: u32) -> Option<usize> {
        if rule_id == 0 {
            return None;
        }
        self.slots.load().iter().position(|r| r.rule_id == rule_id)
    }

    /// Rule in `slot` (empty slots yield `None`)
    pub fn get_slot(&self, slot: usize) -> Option<WildcardPolicyRule> {
        self.slots
            .load()
            .get(slot)
            .copied()
            .filter(|rule| !rule.is_empty())
    }

    /// Highest-priority matching rule among the first `scan_limit` slots
    ///
    /// Empty slots are skipped. A later rule replaces the current best only
    /// on strictly greater priority, so ties go to the lowest slot.
    #[inline]
    pub fn best_match(&self, key: &FlowKey, scan_limit: usize) -> Option<WildcardPolicyRule> {
        let slots = self.slots.load();
        let mut best: Option<&WildcardPolicyRule> = None;

        for rule in slots.iter().take(scan_limit) {
            if rule.is_empty() || !rule.matches(key) {
                continue;
            }
            if best.map_or(true, |b| rule.priority > b.priority) {
                best = Some(rule);
            }
        }

        best.copied()
    }

    /// Snapshot of all slots, including empty ones
    pub fn rules(&self) -> Arc<Vec<WildcardPolicyRule>> {
        self.slots.load_full()
    }

    /// Number of non-empty slots
    pub fn occupied(&self) -> usize {
        self.slots.load().iter().filter(|r| !r.is_empty()).count()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_slot(&self, slot: usize) -> PolicyResult<()> {
        if slot >= self.capacity {
            return Err(PolicyError::SlotOutOfRange {
                slot,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    // Caller holds `write_lock`.
    fn write(&self, slot: usize, rule: WildcardPolicyRule) {
        let mut next = Vec::clone(&self.slots.load());
        next[slot] = rule;
        self.slots.store(Arc::new(next));
    }
}

impl Default for WildcardPolicyTable {
    fn default() -> Self {
        Self::new(MAX_ENTRIES_WILDCARD_POLICY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microseg_common::Action;
    use proptest::prelude::*;

    fn flow() -> FlowKey {
        FlowKey::new(0x0A000005, 0x0A000105, 40000, 443, 6)
    }

    #[test]
    fn test_priority_wins_regardless_of_order() {
        let low = WildcardPolicyRule::any(Action::Allow, 10, 1);
        let high = WildcardPolicyRule::any(Action::Deny, 20, 2);

        let table = WildcardPolicyTable::new(8);
        table.set_slot(0, low).unwrap();
        table.set_slot(1, high).unwrap();
        assert_eq!(table.best_match(&flow(), 8).unwrap().action, Action::Deny);

        let table = WildcardPolicyTable::new(8);
        table.set_slot(0, high).unwrap();
        table.set_slot(1, low).unwrap();
        assert_eq!(table.best_match(&flow(), 8).unwrap().action, Action::Deny);
    }

    #[test]
    fn test_tie_goes_to_first_slot() {
        let table = WildcardPolicyTable::new(8);
        table.set_slot(3, WildcardPolicyRule::any(Action::Deny, 5, 30)).unwrap();
        table.set_slot(5, WildcardPolicyRule::any(Action::Log, 5, 50)).unwrap();

        assert_eq!(table.best_match(&flow(), 8).unwrap().rule_id, 30);
    }

    #[test]
    fn test_scan_limit_bounds_search() {
        let table = WildcardPolicyTable::new(8);
        table.set_slot(6, WildcardPolicyRule::any(Action::Deny, 1, 6)).unwrap();

        assert!(table.best_match(&flow(), 6).is_none());
        assert!(table.best_match(&flow(), 7).is_some());
    }

    #[test]
    fn test_empty_slot_is_skipped() {
        let table = WildcardPolicyTable::new(4);
        // A zero-id rule would match everything if it were considered
        table.set_slot(0, WildcardPolicyRule::any(Action::Deny, 100, 0)).unwrap();
        assert!(table.best_match(&flow(), 4).is_none());
        assert_eq!(table.occupied(), 0);
    }

    #[test]
    fn test_insert_first_free_reuses_rule_slot() {
        let table = WildcardPolicyTable::new(2);
        assert_eq!(table.insert_first_free(WildcardPolicyRule::any(Action::Allow, 1, 11)), Ok(0));
        assert_eq!(table.insert_first_free(WildcardPolicyRule::any(Action::Allow, 1, 12)), Ok(1));
        // Same rule_id updates in place
        assert_eq!(table.insert_first_free(WildcardPolicyRule::any(Action::Deny, 1, 11)), Ok(0));
        assert_eq!(table.get_slot(0).unwrap().action, Action::Deny);

        assert_eq!(
            table.insert_first_free(WildcardPolicyRule::any(Action::Allow, 1, 13)),
            Err(PolicyError::TableFull {
                table: "wildcard",
                capacity: 2
            })
        );

        assert_eq!(table.clear_slot(0).unwrap().map(|r| r.rule_id), Some(11));
        assert_eq!(table.find(11), None);
        assert_eq!(table.insert_first_free(WildcardPolicyRule::any(Action::Allow, 1, 13)), Ok(0));
    }

    #[test]
    fn test_slot_bounds() {
        let table = WildcardPolicyTable::new(2);
        assert_eq!(
            table.set_slot(2, WildcardPolicyRule::any(Action::Allow, 0, 1)),
            Err(PolicyError::SlotOutOfRange { slot: 2, capacity: 2 })
        );
        assert!(table.clear_slot(5).is_err());
        assert!(table.get_slot(9).is_none());
    }

    proptest! {
        #[test]
        fn highest_priority_always_wins(
            priorities in proptest::collection::vec(0u16..50, 1..32),
        ) {
            let table = WildcardPolicyTable::new(32);
            for (slot, &priority) in priorities.iter().enumerate() {
                let rule = WildcardPolicyRule::any(Action::Allow, priority, slot as u32 + 1);
                table.set_slot(slot, rule).unwrap();
            }

            let max = *priorities.iter().max().unwrap();
            let first = priorities.iter().position(|&p| p == max).unwrap();

            let best = table.best_match(&flow(), 32).unwrap();
            prop_assert_eq!(best.priority, max);
            prop_assert_eq!(best.rule_id, first as u32 + 1);
        }
    }
}
