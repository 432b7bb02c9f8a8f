//! Outstanding attestation duties of protocol validators.

use crate::primitives::{CommitteeIndex, Slot, ValidatorIndex};
use std::collections::{BTreeMap, HashMap};

/// A duty awaiting an attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDuty {
    /// The slot the validator had to attest to.
    pub slot: Slot,
    /// The committee within `slot`.
    pub committee_index: CommitteeIndex,
    /// Position of the validator within the committee (its aggregation bit).
    pub position: usize,
    /// The validator owing the attestation.
    pub validator: ValidatorIndex,
}

/// Pending duties keyed by slot, committee and committee position.
///
/// Entries are removed when a matching attestation is found. Whatever is left
/// after the late-inclusion pass is a missed attestation.
#[derive(Debug, Default)]
pub struct DutyLedger {
    duties: BTreeMap<Slot, HashMap<CommitteeIndex, HashMap<usize, ValidatorIndex>>>,
    len: usize,
}

impl DutyLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a duty. Re-registering the same position overwrites it.
    pub fn register(&mut self, duty: PendingDuty) {
        let previous = self
            .duties
            .entry(duty.slot)
            .or_default()
            .entry(duty.committee_index)
            .or_default()
            .insert(duty.position, duty.validator);
        if previous.is_none() {
            self.len += 1;
        }
    }

    /// Whether any duty is registered for the committee.
    pub fn has_committee(&self, slot: Slot, committee_index: CommitteeIndex) -> bool {
        self.duties.get(&slot).is_some_and(|slot| slot.contains_key(&committee_index))
    }

    /// Positions with pending duties in the committee, in ascending order.
    pub fn positions(&self, slot: Slot, committee_index: CommitteeIndex) -> Vec<usize> {
        let mut positions: Vec<usize> = self
            .duties
            .get(&slot)
            .and_then(|slot| slot.get(&committee_index))
            .map(|committee| committee.keys().copied().collect())
            .unwrap_or_default();
        positions.sort_unstable();
        positions
    }

    /// Remove and return the duty at `position`, if any.
    pub fn take(
        &mut self,
        slot: Slot,
        committee_index: CommitteeIndex,
        position: usize,
    ) -> Option<PendingDuty> {
        let committees = self.duties.get_mut(&slot)?;
        let committee = committees.get_mut(&committee_index)?;
        let validator = committee.remove(&position)?;
        self.len -= 1;

        if committee.is_empty() {
            committees.remove(&committee_index);
            if committees.is_empty() {
                self.duties.remove(&slot);
            }
        }
        Some(PendingDuty { slot, committee_index, position, validator })
    }

    /// Drop duties for slots before `slot`.
    pub fn prune_before(&mut self, slot: Slot) {
        let kept = self.duties.split_off(&slot);
        let dropped = std::mem::replace(&mut self.duties, kept);
        for committees in dropped.values() {
            self.len -= committees.values().map(HashMap::len).sum::<usize>();
        }
    }

    /// Drop every pending duty.
    pub fn clear(&mut self) {
        self.duties.clear();
        self.len = 0;
    }

    /// Number of pending duties.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no duty is pending.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duty(slot: Slot, committee_index: CommitteeIndex, position: usize) -> PendingDuty {
        PendingDuty { slot, committee_index, position, validator: 100 + position as u64 }
    }

    #[test]
    fn test_register_and_take() {
        let mut ledger = DutyLedger::new();
        ledger.register(duty(10, 0, 3));
        ledger.register(duty(10, 0, 1));
        ledger.register(duty(11, 2, 0));
        // duplicate registration does not double count
        ledger.register(duty(10, 0, 1));

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.positions(10, 0), vec![1, 3]);
        assert!(ledger.has_committee(11, 2));
        assert!(!ledger.has_committee(11, 0));

        assert_eq!(ledger.take(10, 0, 1), Some(duty(10, 0, 1)));
        assert_eq!(ledger.take(10, 0, 1), None);
        assert_eq!(ledger.len(), 2);

        assert_eq!(ledger.take(11, 2, 0).map(|d| d.validator), Some(100));
        assert!(!ledger.has_committee(11, 2));
    }

    #[test]
    fn test_prune_before() {
        let mut ledger = DutyLedger::new();
        ledger.register(duty(5, 0, 0));
        ledger.register(duty(5, 1, 0));
        ledger.register(duty(9, 0, 0));
        ledger.prune_before(9);

        assert_eq!(ledger.len(), 1);
        assert!(!ledger.has_committee(5, 0));
        assert!(ledger.has_committee(9, 0));
    }

    #[test]
    fn test_clear() {
        let mut ledger = DutyLedger::new();
        ledger.register(duty(1, 0, 0));
        ledger.register(duty(2, 0, 0));
        ledger.clear();

        assert!(ledger.is_empty());
        assert!(ledger.positions(1, 0).is_empty());
    }
}
