//! Execution-layer snapshot types.
//!
//! A [`NetworkSnapshot`] is every piece of contract state one interval run
//! reads, pinned to a single execution block. Nothing here is mutated once
//! the snapshot is taken.

use super::{fraction_eth, BeaconConfig, Slot, Timestamp, ValidatorStatus};
use alloy_primitives::{Address, FixedBytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// BLS public key of a beacon validator.
pub type BlsPubkey = FixedBytes<48>;

/// Lifecycle status of a minipool contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MinipoolStatus {
    #[default]
    Initialized,
    Prelaunch,
    Staking,
    Withdrawable,
    Dissolved,
}

/// Bond and commission of a minipool, including the last bond reduction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BondHistory {
    /// Node deposit after the last reduction.
    pub bond: U256,
    /// Commission after the last reduction (1e18 = 100%).
    pub fee: U256,
    /// Node deposit before the last reduction.
    pub previous_bond: U256,
    /// Commission before the last reduction. Zero on minipools created before it was recorded.
    pub previous_fee: U256,
    /// Time of the last reduction, zero if never reduced.
    pub reduction_time: Timestamp,
}

impl BondHistory {
    /// A minipool that never had its bond reduced.
    pub fn fixed(bond: U256, fee: U256) -> Self {
        Self { bond, fee, ..Default::default() }
    }

    /// Bond and fee in force at `time`.
    pub fn bond_and_fee_at(&self, time: Timestamp) -> (U256, U256) {
        if self.reduction_time == 0 || time >= self.reduction_time {
            return (self.bond, self.fee);
        }
        if self.previous_fee.is_zero() {
            return (self.previous_bond, self.fee);
        }
        (self.previous_bond, self.previous_fee)
    }
}

/// A minipool validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolDetails {
    pub address: Address,
    pub pubkey: BlsPubkey,
    pub node: Address,
    pub status: MinipoolStatus,
    /// Time the minipool entered its current status.
    pub status_time: Timestamp,
    pub bond: BondHistory,
    /// ETH borrowed from the deposit pool.
    pub user_deposit_balance: U256,
}

impl MinipoolDetails {
    /// Whether the minipool was staking at `time`.
    pub fn was_staking_at(&self, time: Timestamp) -> bool {
        self.status == MinipoolStatus::Staking && time >= self.status_time
    }

    /// Node deposit at the snapshot.
    pub fn node_deposit_balance(&self) -> U256 {
        self.bond.bond
    }

    /// Whether the minipool can earn a bonus commission for an interval ending at `eligible_end`.
    pub fn is_eligible_for_bonuses(&self, eligible_end: Timestamp) -> bool {
        if self.status != MinipoolStatus::Staking {
            return false;
        }
        if self.node_deposit_balance() >= super::eth(16) {
            return false;
        }
        self.bond.reduction_time == 0 || self.bond.reduction_time < eligible_end
    }
}

/// One validator of a megapool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MegapoolValidator {
    pub id: u32,
    pub pubkey: BlsPubkey,
    pub staking: bool,
}

/// A megapool contract and its validators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MegapoolDetails {
    pub address: Address,
    pub node: Address,
    /// Total ETH bonded by the node across all validators.
    pub node_bond: U256,
    /// Number of validators counted toward the bond.
    pub active_validator_count: u32,
    pub validators: Vec<MegapoolValidator>,
}

impl MegapoolDetails {
    /// Bond per active validator.
    pub fn bond_per_validator(&self) -> U256 {
        if self.active_validator_count == 0 {
            return U256::ZERO;
        }
        self.node_bond / U256::from(self.active_validator_count)
    }
}

/// Node, voter and pDAO commission split for megapool validators (1e18 = 100%).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSplit {
    pub node_share: U256,
    pub voter_share: U256,
    pub pdao_share: U256,
}

/// A registered node operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub address: Address,
    /// Network the node's rewards are routed to.
    pub reward_network: u64,
    pub registration_time: Timestamp,
    /// Smoothing pool registration state at the snapshot.
    pub smoothing_pool_registered: bool,
    /// Time of the last registration change, zero if never changed.
    pub smoothing_pool_changed_time: Timestamp,
    /// Legacy RPL stake backing minipools.
    pub rpl_stake: U256,
    /// RPL staked against the node's megapool.
    pub megapool_staked_rpl: U256,
    /// Megapool owned by the node, if any.
    pub megapool: Option<Address>,
    /// Penalty strikes recorded against the node during the interval.
    pub penalty_count: u64,
}

/// Penalty strikes at which a node forfeits its smoothing pool rewards.
pub const CHEATER_PENALTY_COUNT: u64 = 3;

impl NodeDetails {
    /// Whether the node collected enough penalties to be excluded from ETH rewards.
    pub fn is_cheater(&self) -> bool {
        self.penalty_count >= CHEATER_PENALTY_COUNT
    }

    /// The inclusive `[opt_in, opt_out]` window of smoothing pool membership.
    pub fn opt_in_window(&self) -> OptInWindow {
        if self.smoothing_pool_registered {
            OptInWindow { opt_in: self.smoothing_pool_changed_time, opt_out: Timestamp::MAX }
        } else {
            OptInWindow { opt_in: 0, opt_out: self.smoothing_pool_changed_time }
        }
    }

    /// Bonus eligibility window clipped to `[start, end]`, if the node was in the pool at all.
    pub fn bonus_window(&self, start: Timestamp, end: Timestamp) -> Option<(Timestamp, Timestamp)> {
        let changed = self.smoothing_pool_changed_time;
        if changed == 0 || changed >= end {
            return None;
        }
        if self.smoothing_pool_registered {
            Some((changed.max(start), end))
        } else {
            Some((changed.max(start), changed.min(end)))
        }
    }
}

/// Smoothing pool membership window of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptInWindow {
    pub opt_in: Timestamp,
    pub opt_out: Timestamp,
}

impl OptInWindow {
    /// Whether the node was opted in at `time`.
    pub fn contains(&self, time: Timestamp) -> bool {
        self.opt_in <= time && time <= self.opt_out
    }

    /// Whether the window overlaps `[start, end]`.
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.opt_in <= end && self.opt_out >= start
    }
}

/// An oracle DAO member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleDaoMember {
    pub address: Address,
    pub joined_time: Timestamp,
}

/// Protocol-wide parameters at the snapshot block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDetails {
    pub pending_rpl_rewards: U256,
    pub node_operator_rewards_percent: U256,
    pub oracle_dao_rewards_percent: U256,
    pub protocol_dao_rewards_percent: U256,
    /// ETH per RPL.
    pub rpl_price: U256,
    /// Minimum RPL collateral as a fraction of borrowed ETH.
    pub min_collateral_fraction: U256,
    /// Nominal interval duration in seconds.
    pub interval_duration: u64,
    pub smoothing_pool_address: Address,
    /// Earmarked voter share carried over from previous intervals.
    pub smoothing_pool_pending_voter_share: U256,
    pub megapool_revenue_split: RevenueSplit,
}

impl NetworkDetails {
    /// Network parameters with the mainnet percentages and a 28 day interval.
    pub fn with_pending_rewards(pending_rpl_rewards: U256) -> Self {
        Self {
            pending_rpl_rewards,
            node_operator_rewards_percent: fraction_eth(70, 100),
            oracle_dao_rewards_percent: fraction_eth(15, 100),
            protocol_dao_rewards_percent: fraction_eth(15, 100),
            rpl_price: fraction_eth(1, 100),
            min_collateral_fraction: fraction_eth(10, 100),
            interval_duration: 28 * 24 * 60 * 60,
            ..Default::default()
        }
    }
}

/// Finalization event of a reward interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsEvent {
    pub index: u64,
    /// Consensus slot the interval's snapshot was taken at.
    pub consensus_block: Slot,
    /// Execution block the interval's snapshot was taken at.
    pub execution_block: u64,
    pub interval_start_time: Timestamp,
    pub interval_end_time: Timestamp,
    pub intervals_passed: u64,
    pub merkle_root: B256,
}

/// Execution block header fields the engine reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHeader {
    pub number: u64,
    pub timestamp: Timestamp,
}

/// Every contract value read for one interval, pinned to `block_number`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub block_number: u64,
    pub slot: Slot,
    pub network: NetworkDetails,
    pub nodes: Vec<NodeDetails>,
    pub minipools: Vec<MinipoolDetails>,
    pub megapools: Vec<MegapoolDetails>,
    pub oracle_dao: Vec<OracleDaoMember>,
    /// Beacon status of every protocol validator known at the snapshot.
    pub validators: Vec<ValidatorStatus>,
}

impl NetworkSnapshot {
    /// Node lookup by address.
    pub fn nodes_by_address(&self) -> HashMap<Address, &NodeDetails> {
        self.nodes.iter().map(|node| (node.address, node)).collect()
    }

    /// Minipools grouped by owning node.
    pub fn minipools_by_node(&self) -> HashMap<Address, Vec<&MinipoolDetails>> {
        let mut out: HashMap<Address, Vec<&MinipoolDetails>> = HashMap::new();
        for minipool in &self.minipools {
            out.entry(minipool.node).or_default().push(minipool);
        }
        out
    }

    /// Megapool lookup by owning node.
    pub fn megapools_by_node(&self) -> HashMap<Address, &MegapoolDetails> {
        self.megapools.iter().map(|megapool| (megapool.node, megapool)).collect()
    }

    /// Beacon status lookup by pubkey.
    pub fn validators_by_pubkey(&self) -> HashMap<BlsPubkey, &ValidatorStatus> {
        self.validators.iter().map(|status| (status.pubkey, status)).collect()
    }

    /// Wall-clock time of the snapshot slot.
    pub fn slot_time(&self, beacon: &BeaconConfig) -> Timestamp {
        beacon.slot_time(self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::eth;

    #[test]
    fn test_bond_and_fee_at() {
        let history = BondHistory {
            bond: eth(8),
            fee: fraction_eth(14, 100),
            previous_bond: eth(16),
            previous_fee: fraction_eth(10, 100),
            reduction_time: 1_000,
        };
        assert_eq!(history.bond_and_fee_at(999), (eth(16), fraction_eth(10, 100)));
        assert_eq!(history.bond_and_fee_at(1_000), (eth(8), fraction_eth(14, 100)));

        let legacy = BondHistory { previous_fee: U256::ZERO, ..history.clone() };
        assert_eq!(legacy.bond_and_fee_at(10), (eth(16), fraction_eth(14, 100)));

        let never = BondHistory::fixed(eth(8), fraction_eth(5, 100));
        assert_eq!(never.bond_and_fee_at(0), (eth(8), fraction_eth(5, 100)));
    }

    #[test]
    fn test_opt_in_window() {
        let mut node = NodeDetails {
            smoothing_pool_registered: true,
            smoothing_pool_changed_time: 500,
            ..Default::default()
        };
        let window = node.opt_in_window();
        assert!(!window.contains(499));
        assert!(window.contains(500));
        assert!(window.contains(u64::MAX - 1));

        node.smoothing_pool_registered = false;
        let window = node.opt_in_window();
        assert!(window.contains(0));
        assert!(window.contains(500));
        assert!(!window.contains(501));
    }

    #[test]
    fn test_bonus_window() {
        let mut node = NodeDetails {
            smoothing_pool_registered: true,
            smoothing_pool_changed_time: 150,
            ..Default::default()
        };
        assert_eq!(node.bonus_window(100, 200), Some((150, 200)));
        node.smoothing_pool_registered = false;
        assert_eq!(node.bonus_window(100, 200), Some((150, 150)));
        node.smoothing_pool_changed_time = 0;
        assert_eq!(node.bonus_window(100, 200), None);
    }

    #[test]
    fn test_minipool_bonus_eligibility() {
        let mut minipool = MinipoolDetails {
            status: MinipoolStatus::Staking,
            bond: BondHistory::fixed(eth(8), fraction_eth(10, 100)),
            ..Default::default()
        };
        assert!(minipool.is_eligible_for_bonuses(100));

        minipool.bond.reduction_time = 200;
        assert!(!minipool.is_eligible_for_bonuses(100));

        minipool.bond = BondHistory::fixed(eth(16), fraction_eth(10, 100));
        assert!(!minipool.is_eligible_for_bonuses(100));
    }
}
