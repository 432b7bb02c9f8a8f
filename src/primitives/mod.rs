//! Shared primitive types for reward generation.
//!
//! # Modules
//!
//! - [`beacon`]: Consensus-layer data (committees, blocks, attestations, withdrawals)
//! - [`network`]: Execution-layer snapshot data (nodes, minipools, megapools, oDAO)
//! - [`safe_arith`]: Checked arithmetic used for every wei computation
//!
//! # Units
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  wei          U256, 1 ETH = 1e18 wei                         │
//! │  percentages  U256 fixed point, 100% = 1e18                  │
//! │  scores       U256 fixed point, one full attestation ≈ 1e18  │
//! │  time         unix seconds (u64)                             │
//! │  slots/epochs u64                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod beacon;
pub mod network;
pub mod safe_arith;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

pub use beacon::{
    Attestation, BeaconBlock, BeaconHead, Committee, EpochCommittees, ValidatorStatus, Withdrawal,
};
pub use network::{
    BlsPubkey, BondHistory, ExecutionHeader, MegapoolDetails, MegapoolValidator,
    MinipoolDetails, MinipoolStatus, NetworkDetails, NetworkSnapshot, NodeDetails, OptInWindow,
    OracleDaoMember, RevenueSplit, RewardsEvent,
};
pub use safe_arith::{ArithError, SafeArith, SafeArithIter};

/// Beacon chain slot number.
pub type Slot = u64;
/// Beacon chain epoch number.
pub type Epoch = u64;
/// Index of a validator in the beacon state registry.
pub type ValidatorIndex = u64;
/// Index of a committee within a slot.
pub type CommitteeIndex = u64;
/// Unix timestamp in seconds.
pub type Timestamp = u64;
/// Beacon chain amount in gwei.
pub type Gwei = u64;

/// Epoch value used for "never" (activation, exit, withdrawable).
pub const FAR_FUTURE_EPOCH: Epoch = u64::MAX;

/// Default number of slots in an epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Default slot duration in seconds.
pub const SECONDS_PER_SLOT: u64 = 12;

/// Wei per gwei.
pub const WEI_PER_GWEI: u64 = 1_000_000_000;

/// 1 ETH (also 100% in 1e18 fixed point).
pub const ONE_ETH: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Returns `n` ETH in wei.
pub fn eth(n: u64) -> U256 {
    U256::from(n) * ONE_ETH
}

/// Returns `numerator / denominator` ETH in wei (e.g. `fraction_eth(14, 100)` is 14%).
pub fn fraction_eth(numerator: u64, denominator: u64) -> U256 {
    eth(numerator) / U256::from(denominator)
}

/// Consensus-layer timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconConfig {
    /// Unix time of slot 0.
    pub genesis_time: Timestamp,
    /// Slot duration in seconds.
    pub seconds_per_slot: u64,
    /// Slots per epoch.
    pub slots_per_epoch: u64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            genesis_time: 1_606_824_023,
            seconds_per_slot: SECONDS_PER_SLOT,
            slots_per_epoch: SLOTS_PER_EPOCH,
        }
    }
}

impl BeaconConfig {
    /// Wall-clock time at the start of `slot`.
    pub fn slot_time(&self, slot: Slot) -> Timestamp {
        self.genesis_time.saturating_add(slot.saturating_mul(self.seconds_per_slot))
    }

    /// Epoch containing `slot`.
    pub fn epoch_of(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    /// First slot of `epoch`.
    pub fn epoch_start_slot(&self, epoch: Epoch) -> Slot {
        epoch.saturating_mul(self.slots_per_epoch)
    }

    /// Last slot of `epoch`.
    pub fn epoch_end_slot(&self, epoch: Epoch) -> Slot {
        self.epoch_start_slot(epoch).saturating_add(self.slots_per_epoch - 1)
    }
}

/// One reward period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    /// Monotonic interval index.
    pub index: u64,
    /// First consensus slot of the interval.
    pub start_slot: Slot,
    /// Last consensus slot covered by the interval (the snapshot slot).
    pub end_slot: Slot,
    /// First execution block of the interval.
    pub execution_start_block: u64,
    /// Execution block the snapshot is pinned to.
    pub execution_end_block: u64,
    /// Wall-clock time of the interval start.
    pub start_time: Timestamp,
    /// Wall-clock time of the snapshot.
    pub end_time: Timestamp,
    /// Number of intervals elapsed since the previous rewards event.
    pub intervals_passed: u64,
}

impl Interval {
    /// Duration of the interval in seconds.
    pub fn duration(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eth_constants() {
        assert_eq!(ONE_ETH, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(eth(32), U256::from(32u64) * ONE_ETH);
        assert_eq!(fraction_eth(14, 100), U256::from(140_000_000_000_000_000u64));
        assert_eq!(fraction_eth(3, 2), U256::from(1_500_000_000_000_000_000u64));
    }

    #[test]
    fn test_beacon_config_slots() {
        let config = BeaconConfig { genesis_time: 1000, ..Default::default() };

        assert_eq!(config.slot_time(0), 1000);
        assert_eq!(config.slot_time(10), 1120);
        assert_eq!(config.epoch_of(63), 1);
        assert_eq!(config.epoch_of(64), 2);
        assert_eq!(config.epoch_start_slot(2), 64);
        assert_eq!(config.epoch_end_slot(2), 95);
    }
}
