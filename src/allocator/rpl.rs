//! RPL split between node collateral, the oracle DAO and the protocol DAO.

use super::{reconcile, AllocationError, AllocationResult, RewardSplit, RulesetPolicy};
use crate::{
    fees,
    primitives::{
        fraction_eth, safe_arith::Result as ArithResult, Epoch, Interval, NetworkDetails,
        NetworkSnapshot, NodeDetails, SafeArith, SafeArithIter, ONE_ETH,
    },
};
use alloy_primitives::{Address, U256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-node collateral stake and RPIP-30 weight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeWeight {
    effective_stake: U256,
    weight: U256,
}

/// Result of the RPL split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RplAllocation {
    /// Collateral RPL per node, zero entries omitted.
    pub collateral: BTreeMap<Address, U256>,
    /// Oracle DAO RPL per member, zero entries omitted.
    pub oracle_dao: BTreeMap<Address, U256>,
    /// Residual sent to the protocol DAO.
    pub protocol_dao_rpl: U256,
    pub total_collateral_rpl: U256,
    pub total_oracle_dao_rpl: U256,
    pub total_node_weight: U256,
}

/// Split the snapshot's pending RPL for `interval`.
///
/// `end_epoch` bounds which minipools still count as collateral-backed.
pub fn allocate_rpl(
    policy: &RulesetPolicy,
    interval: &Interval,
    snapshot: &NetworkSnapshot,
    end_epoch: Epoch,
    epsilon: U256,
) -> AllocationResult<RplAllocation> {
    let network = &snapshot.network;
    let pending = network.pending_rpl_rewards;
    if pending.is_zero() {
        return Err(AllocationError::NoPendingRewards);
    }
    info!(target: "rewards::allocator", %pending, "Pending RPL rewards");

    let node_operator_rpl = pending.safe_mul_div(network.node_operator_rewards_percent, ONE_ETH)?;
    let oracle_dao_rpl = pending.safe_mul_div(network.oracle_dao_rewards_percent, ONE_ETH)?;
    let expected_pdao_rpl = pending.safe_mul_div(network.protocol_dao_rewards_percent, ONE_ETH)?;

    let mut allocation = RplAllocation::default();

    let weights = node_weights(interval, snapshot, end_epoch)?;
    let total_effective_stake: U256 = weights.values().map(|w| w.effective_stake).safe_sum()?;
    let total_weight: U256 = weights.values().map(|w| w.weight).safe_sum()?;
    allocation.total_node_weight = total_weight;

    let sixths = policy.node_weight.rpip30_sixths(interval.index);
    if !total_weight.is_zero() && !total_effective_stake.is_zero() {
        for (node, weight) in &weights {
            let share =
                collateral_share(node_operator_rpl, *weight, total_weight, total_effective_stake, sixths)?;
            if !share.is_zero() {
                allocation.collateral.insert(*node, share);
            }
        }
        allocation.total_collateral_rpl = allocation.collateral.values().copied().safe_sum()?;
        reconcile(RewardSplit::CollateralRpl, node_operator_rpl, allocation.total_collateral_rpl, epsilon)?;
    } else {
        info!(
            target: "rewards::allocator",
            %node_operator_rpl,
            "No node is eligible for collateral RPL, sending it to the protocol DAO"
        );
    }

    let participation = oracle_dao_participation(interval, snapshot);
    let total_time: u64 = participation.values().copied().safe_sum()?;
    if total_time > 0 {
        for (member, time) in &participation {
            let share = oracle_dao_rpl.safe_mul_div(U256::from(*time), U256::from(total_time))?;
            if !share.is_zero() {
                allocation.oracle_dao.insert(*member, share);
            }
        }
        allocation.total_oracle_dao_rpl = allocation.oracle_dao.values().copied().safe_sum()?;
        reconcile(RewardSplit::OracleDaoRpl, oracle_dao_rpl, allocation.total_oracle_dao_rpl, epsilon)?;
    }

    let distributed = allocation.total_collateral_rpl.safe_add(allocation.total_oracle_dao_rpl)?;
    allocation.protocol_dao_rpl =
        pending.checked_sub(distributed).ok_or(AllocationError::Insolvent {
            split: RewardSplit::ProtocolDaoRpl,
            required: distributed,
            available: pending,
        })?;

    info!(
        target: "rewards::allocator",
        expected = %expected_pdao_rpl,
        actual = %allocation.protocol_dao_rpl,
        collateral = %allocation.total_collateral_rpl,
        oracle_dao = %allocation.total_oracle_dao_rpl,
        "Protocol DAO RPL"
    );
    Ok(allocation)
}

/// One node's collateral RPL, blending RPIP-30 weight and effective stake by `sixths`.
fn collateral_share(
    node_operator_rpl: U256,
    weight: NodeWeight,
    total_weight: U256,
    total_effective_stake: U256,
    sixths: u64,
) -> ArithResult<U256> {
    let six = U256::from(6u64);
    let weighted_part = if sixths == 0 {
        U256::ZERO
    } else {
        if weight.weight.is_zero() {
            return Ok(U256::ZERO);
        }
        node_operator_rpl
            .safe_mul(U256::from(sixths))?
            .safe_mul_div(weight.weight, total_weight.safe_mul(six)?)?
    };
    let staked_part = if sixths >= 6 {
        U256::ZERO
    } else {
        if weight.effective_stake.is_zero() {
            return Ok(U256::ZERO);
        }
        node_operator_rpl
            .safe_mul(U256::from(6 - sixths))?
            .safe_mul_div(weight.effective_stake, total_effective_stake.safe_mul(six)?)?
    };
    weighted_part.safe_add(staked_part)
}

/// Effective stake and RPIP-30 weight of every node with collateral-backed minipools.
fn node_weights(
    interval: &Interval,
    snapshot: &NetworkSnapshot,
    end_epoch: Epoch,
) -> AllocationResult<BTreeMap<Address, NodeWeight>> {
    let statuses = snapshot.validators_by_pubkey();
    let minipools = snapshot.minipools_by_node();
    let network = &snapshot.network;

    let mut weights = BTreeMap::new();
    for node in &snapshot.nodes {
        let node_minipools = minipools.get(&node.address).map(Vec::as_slice).unwrap_or_default();
        let eligible = fees::eligible_eth(node_minipools, &statuses, end_epoch)?;
        let weight = node_weight(node, eligible, interval, network)?;
        if weight != NodeWeight::default() {
            debug!(
                target: "rewards::allocator",
                node = %node.address,
                effective_stake = %weight.effective_stake,
                weight = %weight.weight,
                "Node weight"
            );
            weights.insert(node.address, weight);
        }
    }
    Ok(weights)
}

fn node_weight(
    node: &NodeDetails,
    eligible: fees::EligibleEth,
    interval: &Interval,
    network: &NetworkDetails,
) -> ArithResult<NodeWeight> {
    let rpl_price = network.rpl_price;
    if eligible.borrowed.is_zero() {
        return Ok(NodeWeight::default());
    }
    let min_collateral = eligible.borrowed.safe_mul_div(network.min_collateral_fraction, rpl_price)?;
    if node.rpl_stake < min_collateral {
        return Ok(NodeWeight::default());
    }
    let max_collateral = eligible.bonded.safe_mul_div(fraction_eth(3, 2), rpl_price)?;
    let effective_stake = node.rpl_stake.min(max_collateral);

    let (value, percent) =
        fees::staked_rpl_value_and_percent(node.rpl_stake, eligible.borrowed, rpl_price)?;
    let weight = super::rpip30_weight(value, percent, eligible.borrowed)?;

    let registered_for = interval.end_time.saturating_sub(node.registration_time);
    Ok(NodeWeight {
        effective_stake: super::scale_by_participation(
            effective_stake,
            registered_for,
            network.interval_duration,
        )?,
        weight: super::scale_by_participation(weight, registered_for, network.interval_duration)?,
    })
}

/// Seconds each oracle DAO member was a member during the interval, capped at the interval length.
fn oracle_dao_participation(interval: &Interval, snapshot: &NetworkSnapshot) -> BTreeMap<Address, u64> {
    let duration = snapshot.network.interval_duration;
    let mut participation = BTreeMap::new();
    for member in &snapshot.oracle_dao {
        let time = interval.end_time.saturating_sub(member.joined_time).min(duration);
        participation.insert(member.address, time);
    }
    participation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        primitives::{eth, safe_arith::abs_diff, OracleDaoMember},
        scorer::test_utils::snapshot_with_minipools,
    };

    const DURATION: u64 = 28 * 24 * 60 * 60;
    const START_TIME: u64 = 1_700_000_000;

    fn interval(index: u64) -> Interval {
        Interval {
            index,
            start_time: START_TIME,
            end_time: START_TIME + DURATION,
            end_slot: 1000,
            ..Default::default()
        }
    }

    fn member(n: u8, joined_time: u64) -> OracleDaoMember {
        OracleDaoMember { address: Address::repeat_byte(0x20 | n), joined_time }
    }

    fn allocate(snapshot: &NetworkSnapshot, index: u64) -> AllocationResult<RplAllocation> {
        allocate_rpl(&RulesetPolicy::for_interval(index), &interval(index), snapshot, 31, U256::from(4u64))
    }

    #[test]
    fn test_conservation_and_oracle_dao_time() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        snapshot.oracle_dao = vec![member(1, 0), member(2, START_TIME + DURATION / 2)];

        let allocation = allocate(&snapshot, 40).unwrap();
        assert_eq!(allocation.collateral[&Address::repeat_byte(1)], eth(350));
        assert_eq!(allocation.collateral[&Address::repeat_byte(2)], eth(350));
        assert_eq!(allocation.oracle_dao[&member(1, 0).address], eth(100));
        assert_eq!(allocation.oracle_dao[&member(2, 0).address], eth(50));
        assert_eq!(allocation.protocol_dao_rpl, eth(150));
        assert_eq!(
            allocation.total_collateral_rpl + allocation.total_oracle_dao_rpl + allocation.protocol_dao_rpl,
            eth(1000)
        );
    }

    #[test]
    fn test_below_min_collateral_goes_to_protocol_dao() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        // 24 ETH borrowed needs 240 RPL at 0.01 ETH/RPL
        for node in &mut snapshot.nodes {
            node.rpl_stake = eth(100);
        }
        snapshot.oracle_dao = vec![member(1, 0)];

        let allocation = allocate(&snapshot, 40).unwrap();
        assert!(allocation.collateral.is_empty());
        assert_eq!(allocation.total_node_weight, U256::ZERO);
        assert_eq!(allocation.total_oracle_dao_rpl, eth(150));
        assert_eq!(allocation.protocol_dao_rpl, eth(850));
    }

    #[test]
    fn test_no_pending_rewards() {
        let mut snapshot = snapshot_with_minipools(&[1]);
        snapshot.network.pending_rpl_rewards = U256::ZERO;
        assert_eq!(allocate(&snapshot, 40), Err(AllocationError::NoPendingRewards));
    }

    #[test]
    fn test_phase_in_blends_weights() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        // 3 ETH of RPL against 24 ETH borrowed stays in the linear region
        snapshot.nodes[1].rpl_stake = eth(300);

        let allocation = allocate(&snapshot, 20).unwrap();
        let first = allocation.collateral[&Address::repeat_byte(1)];
        let second = allocation.collateral[&Address::repeat_byte(2)];
        assert!(first > second);
        assert!(abs_diff(first + second, eth(700)) <= U256::from(4u64));
        assert_eq!(allocation.total_collateral_rpl + allocation.protocol_dao_rpl, eth(1000));
    }

    #[test]
    fn test_partial_registration_scales_weight() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        snapshot.nodes[1].registration_time = START_TIME + DURATION / 2;

        let allocation = allocate(&snapshot, 40).unwrap();
        let first = allocation.collateral[&Address::repeat_byte(1)];
        let second = allocation.collateral[&Address::repeat_byte(2)];
        assert!(abs_diff(first, second * U256::from(2u64)) <= U256::from(2u64));
    }

    #[test]
    fn test_exited_minipool_is_not_collateral() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        snapshot.validators[1].exit_epoch = 10;

        let allocation = allocate(&snapshot, 40).unwrap();
        assert_eq!(allocation.collateral.len(), 1);
        assert_eq!(allocation.collateral[&Address::repeat_byte(1)], eth(700));
    }
}
