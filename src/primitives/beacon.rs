//! Consensus-layer data consumed by the attestation scorer.
//!
//! These are the narrow views of beacon data the reward engine needs, not
//! full beacon chain containers.
//!
//! ```text
//! EpochCommittees
//! └── committees: Vec<Committee>
//!     ├── slot
//!     ├── index
//!     └── validators: [ValidatorIndex]   (position = aggregation bit)
//!
//! BeaconBlock
//! ├── slot
//! ├── execution_block_number
//! ├── attestations: Vec<Attestation>
//! │   ├── slot, committee_index
//! │   └── aggregation_bits: [bool]
//! └── withdrawals: Vec<Withdrawal>
//! ```

use super::{network::BlsPubkey, CommitteeIndex, Epoch, Gwei, Slot, ValidatorIndex, FAR_FUTURE_EPOCH};
use serde::{Deserialize, Serialize};

/// A single beacon committee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Committee {
    /// The slot the committee attests to.
    pub slot: Slot,
    /// The index of this committee within the committees in `slot`.
    pub index: CommitteeIndex,
    /// Validator indices in committee order.
    pub validators: Vec<ValidatorIndex>,
}

/// All committees of one epoch.
///
/// Returned by value from the chain port; dropping it releases the memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochCommittees {
    /// The epoch these committees belong to.
    pub epoch: Epoch,
    /// Committees in arbitrary order.
    pub committees: Vec<Committee>,
}

impl EpochCommittees {
    /// Create a committee set for `epoch`.
    pub fn new(epoch: Epoch, committees: Vec<Committee>) -> Self {
        Self { epoch, committees }
    }

    /// Number of committees in the epoch.
    pub fn len(&self) -> usize {
        self.committees.len()
    }

    /// Whether the epoch has no committees.
    pub fn is_empty(&self) -> bool {
        self.committees.is_empty()
    }
}

/// An aggregated attestation included in a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// The slot being attested to.
    pub slot: Slot,
    /// The committee that produced the attestation.
    pub committee_index: CommitteeIndex,
    /// One bit per committee position.
    pub aggregation_bits: Vec<bool>,
}

impl Attestation {
    /// Whether the committee member at `position` took part.
    pub fn has_participant(&self, position: usize) -> bool {
        self.aggregation_bits.get(position).copied().unwrap_or(false)
    }
}

/// A consensus-layer withdrawal processed in a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    /// The withdrawing validator.
    pub validator_index: ValidatorIndex,
    /// Amount withdrawn, in gwei.
    pub amount: Gwei,
}

/// The subset of a beacon block used for scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconBlock {
    /// Slot of the block.
    pub slot: Slot,
    /// Execution payload block number, when the block carries a payload.
    pub execution_block_number: Option<u64>,
    /// Attestations included in the block.
    pub attestations: Vec<Attestation>,
    /// Withdrawals processed by the block.
    pub withdrawals: Vec<Withdrawal>,
}

/// Current head of the beacon chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconHead {
    /// Head epoch.
    pub epoch: Epoch,
    /// Latest finalized epoch.
    pub finalized_epoch: Epoch,
}

/// Beacon registry status of a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStatus {
    pub index: ValidatorIndex,
    pub pubkey: BlsPubkey,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
}

impl Default for ValidatorStatus {
    fn default() -> Self {
        Self {
            index: 0,
            pubkey: BlsPubkey::ZERO,
            activation_epoch: FAR_FUTURE_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        }
    }
}

impl ValidatorStatus {
    /// Returns `true` if the validator is considered active at some epoch.
    pub fn is_active_at(&self, epoch: Epoch) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }

    /// Whether the validator was active at any point in `[start_slot, end_slot]`.
    pub fn was_active_during(&self, start_slot: Slot, end_slot: Slot, slots_per_epoch: u64) -> bool {
        if self.activation_epoch == FAR_FUTURE_EPOCH {
            return false;
        }
        let activation_slot = self.activation_epoch.saturating_mul(slots_per_epoch);
        if activation_slot > end_slot {
            return false;
        }
        if self.exit_epoch != FAR_FUTURE_EPOCH {
            let exit_slot = self.exit_epoch.saturating_mul(slots_per_epoch);
            if exit_slot < start_slot {
                return false;
            }
        }
        true
    }

    /// Whether a withdrawal at `slot` is a full exit payout.
    pub fn is_withdrawable_at(&self, slot: Slot, slots_per_epoch: u64) -> bool {
        self.withdrawable_epoch != FAR_FUTURE_EPOCH
            && slot >= self.withdrawable_epoch.saturating_mul(slots_per_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(activation: Epoch, exit: Epoch) -> ValidatorStatus {
        ValidatorStatus { activation_epoch: activation, exit_epoch: exit, ..Default::default() }
    }

    #[test]
    fn test_attestation_participants() {
        let attestation = Attestation {
            slot: 10,
            committee_index: 0,
            aggregation_bits: vec![true, false, true],
        };
        assert!(attestation.has_participant(0));
        assert!(!attestation.has_participant(1));
        assert!(attestation.has_participant(2));
        assert!(!attestation.has_participant(3));
    }

    #[test]
    fn test_was_active_during() {
        // never activated
        assert!(!ValidatorStatus::default().was_active_during(0, 1000, 32));
        // activates after the interval
        assert!(!status(100, FAR_FUTURE_EPOCH).was_active_during(0, 3199, 32));
        // exited before the interval
        assert!(!status(1, 10).was_active_during(400, 1000, 32));
        assert!(status(1, 20).was_active_during(400, 1000, 32));
        assert!(status(0, FAR_FUTURE_EPOCH).was_active_during(400, 1000, 32));
    }

    #[test]
    fn test_withdrawable_at() {
        let mut validator = status(0, 10);
        assert!(!validator.is_withdrawable_at(1_000_000, 32));
        validator.withdrawable_epoch = 12;
        assert!(!validator.is_withdrawable_at(383, 32));
        assert!(validator.is_withdrawable_at(384, 32));
    }
}
