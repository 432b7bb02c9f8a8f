//! Smoothing pool ETH split.
//!
//! ```text
//!   balance ─┬─ node operators  (score / successful)
//!            ├─ voters          (voter score / successful + pending voter share)
//!            ├─ protocol DAO    (pDAO score / successful)
//!            └─ remainder ──► bonus commission ──► pool stakers
//! ```
//!
//! Voter ETH that no megapool node can claim stays in the remainder, but the
//! pending voter share is never spent on bonuses.

use super::{reconcile, AllocationError, AllocationResult, RewardSplit, RulesetPolicy};
use crate::{
    fees,
    primitives::{
        eth, fraction_eth, BlsPubkey, Epoch, Interval, MinipoolDetails, MinipoolStatus,
        NetworkSnapshot, NodeDetails, SafeArith, SafeArithIter, Slot, ValidatorIndex, ONE_ETH,
    },
    record::RollingRecord,
    scorer::ValidatorKind,
};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Highest commission a minipool may reach through the bonus.
const MAX_BONUS_FEE_PERCENT: u64 = 14;

/// Inputs of the ETH split.
#[derive(Debug, Clone, Copy)]
pub struct EthRequest<'a> {
    pub policy: &'a RulesetPolicy,
    pub interval: &'a Interval,
    pub snapshot: &'a NetworkSnapshot,
    pub record: &'a RollingRecord,
    /// Epoch of the interval's end slot.
    pub end_epoch: Epoch,
    /// Smoothing pool balance at the snapshot block.
    pub balance: U256,
    pub epsilon: U256,
}

/// Interval performance of one protocol validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorPerformance {
    pub index: ValidatorIndex,
    pub pubkey: BlsPubkey,
    pub node: Address,
    pub kind: ValidatorKind,
    pub successful_attestations: u64,
    pub missed_attestations: u64,
    pub attestation_score: U256,
    pub eth_earned: U256,
    pub bonus_eth: U256,
    pub consensus_income: U256,
    pub effective_commission: U256,
    pub missing_slots: Vec<Slot>,
}

/// Result of the ETH split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthAllocation {
    /// Smoothing pool ETH per node, bonus included.
    pub node_eth: BTreeMap<Address, U256>,
    /// Voter share ETH per megapool node.
    pub voter_eth: BTreeMap<Address, U256>,
    pub pool_staker_eth: U256,
    /// Everything paid to node operators, bonus included.
    pub node_operator_eth: U256,
    pub bonus_eth: U256,
    /// Voter share actually paid to nodes.
    pub voter_share_eth: U256,
    pub protocol_dao_eth: U256,
    pub performance: Vec<ValidatorPerformance>,
}

/// Split the smoothing pool balance for `interval`.
pub fn allocate_eth(request: EthRequest<'_>) -> AllocationResult<EthAllocation> {
    let EthRequest { policy, interval, snapshot, record, balance, epsilon, .. } = request;
    let mut allocation = EthAllocation::default();

    if interval.index == 0 || balance.is_zero() {
        allocation.pool_staker_eth = balance;
        allocation.performance = performance(request, &HashMap::new(), &Payouts::default());
        return Ok(allocation);
    }

    let pending_voter_share = if policy.voter_share_enabled {
        snapshot.network.smoothing_pool_pending_voter_share
    } else {
        U256::ZERO
    };
    if pending_voter_share > balance {
        return Err(AllocationError::Insolvent {
            split: RewardSplit::VoterShareEth,
            required: pending_voter_share,
            available: balance,
        });
    }

    if record.total_attestation_score.is_zero() || record.successful_attestations == 0 {
        warn!(
            target: "rewards::allocator",
            %balance,
            "No successful attestations were scored, sending the whole balance to pool stakers"
        );
        allocation.pool_staker_eth = balance;
        allocation.performance = performance(request, &HashMap::new(), &Payouts::default());
        return Ok(allocation);
    }

    let successful = U256::from(record.successful_attestations);
    let share_of = |score: U256| -> AllocationResult<U256> {
        Ok(balance.safe_mul(score)?.safe_div(successful)?.safe_div(ONE_ETH)?)
    };
    let node_operator_share = share_of(record.total_attestation_score)?;
    let (voter_eth, protocol_dao_eth) = if policy.voter_share_enabled {
        (share_of(record.total_voter_score)?, share_of(record.total_pdao_score)?)
    } else {
        (U256::ZERO, U256::ZERO)
    };
    info!(
        target: "rewards::allocator",
        %balance,
        %node_operator_share,
        %voter_eth,
        %protocol_dao_eth,
        %pending_voter_share,
        "Smoothing pool shares"
    );

    let nodes = snapshot.nodes_by_address();
    let eligible = eligible_nodes(snapshot, interval);
    let mut payouts = Payouts::default();

    for (index, duty) in record.validators() {
        if !nodes.contains_key(&duty.node) {
            return Err(AllocationError::MissingValidator(*index));
        }
        if !duty.has_duties() || !duty.was_active || !eligible.contains(&duty.node) {
            continue;
        }
        let earned = node_operator_share
            .safe_mul_div(duty.attestation_score, record.total_attestation_score)?;
        allocation.node_eth.entry(duty.node).or_default().safe_add_assign(earned)?;
        payouts.base.insert(*index, earned);
    }
    let base_total: U256 = allocation.node_eth.values().copied().safe_sum()?;
    reconcile(RewardSplit::SmoothingPoolEth, node_operator_share, base_total, epsilon)?;

    if policy.voter_share_enabled && !voter_eth.is_zero() {
        let voter_total = voter_eth.safe_add(pending_voter_share)?;
        allocation.voter_eth = voter_shares(snapshot, &eligible, voter_total)?;
        if allocation.voter_eth.is_empty() {
            info!(
                target: "rewards::allocator",
                %voter_total,
                "No megapool node is eligible for the voter share, leaving it to pool stakers"
            );
        } else {
            allocation.voter_share_eth = allocation.voter_eth.values().copied().safe_sum()?;
            reconcile(RewardSplit::VoterShareEth, voter_total, allocation.voter_share_eth, epsilon)?;
        }
    }

    let committed = base_total.safe_add(allocation.voter_share_eth)?.safe_add(protocol_dao_eth)?;
    let mut remaining = balance.checked_sub(committed).ok_or(AllocationError::Insolvent {
        split: RewardSplit::SmoothingPoolEth,
        required: committed,
        available: balance,
    })?;
    if allocation.voter_share_eth.is_zero() {
        // the earmarked voter share is owed later and cannot fund bonuses
        remaining = remaining.saturating_sub(pending_voter_share);
    }

    if policy.bonus_enabled {
        let bonuses = bonus_commission(request, &eligible, &nodes, remaining, &mut payouts)?;
        for (node, bonus) in bonuses {
            allocation.node_eth.entry(node).or_default().safe_add_assign(bonus)?;
            allocation.bonus_eth.safe_add_assign(bonus)?;
        }
    }

    allocation.node_operator_eth = allocation.node_eth.values().copied().safe_sum()?;
    allocation.protocol_dao_eth = protocol_dao_eth;
    let paid = allocation
        .node_operator_eth
        .safe_add(allocation.voter_share_eth)?
        .safe_add(allocation.protocol_dao_eth)?;
    allocation.pool_staker_eth = balance.checked_sub(paid).ok_or(AllocationError::Insolvent {
        split: RewardSplit::SmoothingPoolEth,
        required: paid,
        available: balance,
    })?;

    let minipools: HashMap<Address, &MinipoolDetails> =
        snapshot.minipools.iter().map(|minipool| (minipool.address, minipool)).collect();
    allocation.performance = performance(request, &minipools, &payouts);

    info!(
        target: "rewards::allocator",
        node_operators = %allocation.node_operator_eth,
        bonus = %allocation.bonus_eth,
        voters = %allocation.voter_share_eth,
        protocol_dao = %allocation.protocol_dao_eth,
        pool_stakers = %allocation.pool_staker_eth,
        "Smoothing pool ETH allocated"
    );
    Ok(allocation)
}

/// Per-validator and per-minipool amounts collected while splitting.
#[derive(Debug, Default)]
struct Payouts {
    base: HashMap<ValidatorIndex, U256>,
    bonus: HashMap<Address, U256>,
    commission: HashMap<Address, U256>,
}

/// Non-cheating nodes that were in the pool during the interval and run a staking validator.
fn eligible_nodes(snapshot: &NetworkSnapshot, interval: &Interval) -> HashSet<Address> {
    let mut staking: HashSet<Address> = snapshot
        .minipools
        .iter()
        .filter(|minipool| minipool.status == MinipoolStatus::Staking)
        .map(|minipool| minipool.node)
        .collect();
    staking.extend(
        snapshot
            .megapools
            .iter()
            .filter(|megapool| megapool.validators.iter().any(|v| v.staking))
            .map(|megapool| megapool.node),
    );

    snapshot
        .nodes
        .iter()
        .filter(|node| !node.is_cheater())
        .filter(|node| node.opt_in_window().overlaps(interval.start_time, interval.end_time))
        .filter(|node| staking.contains(&node.address))
        .map(|node| node.address)
        .collect()
}

/// Voter share per megapool node, proportional to vote-eligible RPL.
fn voter_shares(
    snapshot: &NetworkSnapshot,
    eligible: &HashSet<Address>,
    voter_total: U256,
) -> AllocationResult<BTreeMap<Address, U256>> {
    let nodes = snapshot.nodes_by_address();
    let mut stakes = BTreeMap::new();
    for megapool in &snapshot.megapools {
        let Some(node) = nodes.get(&megapool.node) else {
            continue;
        };
        if node.is_cheater() || !eligible.contains(&node.address) {
            continue;
        }
        let stake = fees::megapool_vote_eligible_rpl(
            node.megapool_staked_rpl,
            megapool.node_bond,
            snapshot.network.rpl_price,
        )?;
        if !stake.is_zero() {
            stakes.insert(node.address, stake);
        }
    }

    let total: U256 = stakes.values().copied().safe_sum()?;
    let mut shares = BTreeMap::new();
    if total.is_zero() {
        return Ok(shares);
    }
    for (node, stake) in stakes {
        let share = voter_total.safe_mul_div(stake, total)?;
        if !share.is_zero() {
            shares.insert(node, share);
        }
    }
    Ok(shares)
}

/// Bonus commission per node, scaled down to fit `remaining` when needed.
fn bonus_commission(
    request: EthRequest<'_>,
    eligible: &HashSet<Address>,
    nodes: &HashMap<Address, &NodeDetails>,
    remaining: U256,
    payouts: &mut Payouts,
) -> AllocationResult<BTreeMap<Address, U256>> {
    let EthRequest { interval, snapshot, record, end_epoch, .. } = request;
    let statuses = snapshot.validators_by_pubkey();

    let mut bonuses: Vec<(Address, Address, U256)> = Vec::new();
    for (node_address, minipools) in snapshot.minipools_by_node() {
        let Some(node) = nodes.get(&node_address) else {
            continue;
        };
        if !eligible.contains(&node_address) {
            continue;
        }
        let Some((_, eligible_end)) = node.bonus_window(interval.start_time, interval.end_time) else {
            continue;
        };
        let borrowed = fees::eligible_borrowed_eth(&minipools, &statuses, end_epoch)?;
        let (_, percent) =
            fees::staked_rpl_value_and_percent(node.rpl_stake, borrowed, snapshot.network.rpl_price)?;

        for minipool in minipools {
            if !minipool.is_eligible_for_bonuses(eligible_end) {
                continue;
            }
            let Some(income) = record.withdrawals.get(&minipool.address) else {
                continue;
            };
            let (bond, fee) = minipool.bond.bond_and_fee_at(eligible_end);
            let fee_with_bonus = fees::fee_with_bonus(bond, fee, percent)?;
            if fee_with_bonus <= fee {
                continue;
            }
            let fee_with_bonus = check_bonus_fee(minipool.address, fee_with_bonus)?;
            payouts.commission.insert(minipool.address, fee_with_bonus);

            let share = fee_with_bonus
                .safe_sub(fee)?
                .safe_mul_div(eth(32).safe_sub(bond)?, eth(32))?;
            let bonus = income.safe_mul_div(share, ONE_ETH)?;
            if !bonus.is_zero() {
                bonuses.push((node_address, minipool.address, bonus));
            }
        }
    }

    let total: U256 = bonuses.iter().map(|(_, _, bonus)| *bonus).safe_sum()?;
    if total > remaining {
        let scalar = remaining.safe_mul_div(ONE_ETH, total)?;
        warn!(
            target: "rewards::allocator",
            %total,
            %remaining,
            %scalar,
            "Bonus commission exceeds the remaining balance, scaling it down"
        );
        for (_, _, bonus) in &mut bonuses {
            *bonus = bonus.safe_mul_div(scalar, ONE_ETH)?;
        }
    }

    let mut per_node = BTreeMap::new();
    for (node, minipool, bonus) in bonuses {
        debug!(target: "rewards::allocator", %node, %minipool, %bonus, "Bonus commission");
        payouts.bonus.insert(minipool, bonus);
        per_node.entry(node).or_insert(U256::ZERO).safe_add_assign(bonus)?;
    }
    Ok(per_node)
}

/// Rejects a bonus commission above the 14% ceiling.
fn check_bonus_fee(minipool: Address, fee_with_bonus: U256) -> AllocationResult<U256> {
    if fee_with_bonus > fraction_eth(MAX_BONUS_FEE_PERCENT, 100) {
        return Err(AllocationError::FeeTooHigh { minipool, fee: fee_with_bonus });
    }
    Ok(fee_with_bonus)
}

/// Performance entries for every validator with duties, by beacon index.
fn performance(
    request: EthRequest<'_>,
    minipools: &HashMap<Address, &MinipoolDetails>,
    payouts: &Payouts,
) -> Vec<ValidatorPerformance> {
    let EthRequest { interval, snapshot, record, .. } = request;
    let node_share = snapshot.network.megapool_revenue_split.node_share;

    let mut out = Vec::with_capacity(record.validators().len());
    for (index, duty) in record.validators() {
        if !duty.has_duties() {
            continue;
        }
        let address = duty.kind.address();
        let (bonus_eth, consensus_income, effective_commission) = match duty.kind {
            ValidatorKind::Minipool { .. } => {
                let base_fee = minipools
                    .get(&address)
                    .map(|minipool| minipool.bond.bond_and_fee_at(interval.end_time).1)
                    .unwrap_or_default();
                (
                    payouts.bonus.get(&address).copied().unwrap_or_default(),
                    record.withdrawals.get(&address).copied().unwrap_or_default(),
                    payouts.commission.get(&address).copied().unwrap_or(base_fee),
                )
            }
            ValidatorKind::Megapool { .. } => (U256::ZERO, U256::ZERO, node_share),
        };
        out.push(ValidatorPerformance {
            index: *index,
            pubkey: duty.pubkey,
            node: duty.node,
            kind: duty.kind,
            successful_attestations: duty.attestation_count(),
            missed_attestations: duty.missing_slots.len() as u64,
            attestation_score: duty.attestation_score,
            eth_earned: payouts.base.get(index).copied().unwrap_or_default(),
            bonus_eth,
            consensus_income,
            effective_commission,
            missing_slots: duty.missing_slots.iter().copied().collect(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        primitives::{BeaconConfig, BondHistory},
        scorer::{
            test_utils::{add_megapool, snapshot_with_minipools},
            ScoringContext,
        },
    };

    const DURATION: u64 = 28 * 24 * 60 * 60;
    const START_TIME: u64 = 1_700_000_000;

    fn interval(index: u64) -> Interval {
        Interval {
            index,
            start_slot: 0,
            end_slot: 1000,
            start_time: START_TIME,
            end_time: START_TIME + DURATION,
            ..Default::default()
        }
    }

    /// Record with one successful attestation at slot 10 for each of `indices`.
    fn scored_record(snapshot: &NetworkSnapshot, bonus: bool, indices: &[u64]) -> RollingRecord {
        let context =
            ScoringContext::from_snapshot(snapshot, BeaconConfig::default(), 1000, bonus).unwrap();
        let mut record = RollingRecord::new(0, 40);
        for index in indices {
            let Some(validator) = context.validator(*index) else {
                continue;
            };
            record.record_duty(validator, 10, true);
            record.record_duty(validator, 42, true);
            let credit = context.credit(validator, 10).unwrap();
            record.record_attestation(validator, 10, credit).unwrap();
        }
        record
    }

    fn allocate(
        policy: RulesetPolicy,
        snapshot: &NetworkSnapshot,
        record: &RollingRecord,
        balance: U256,
    ) -> AllocationResult<EthAllocation> {
        allocate_eth(EthRequest {
            policy: &policy,
            interval: &interval(40),
            snapshot,
            record,
            end_epoch: 31,
            balance,
            epsilon: U256::from(10u64),
        })
    }

    fn total(allocation: &EthAllocation) -> U256 {
        allocation.node_operator_eth
            + allocation.voter_share_eth
            + allocation.protocol_dao_eth
            + allocation.pool_staker_eth
    }

    #[test]
    fn test_zero_attestations_pay_pool_stakers() {
        let snapshot = snapshot_with_minipools(&[1]);
        let record = RollingRecord::new(0, 40);
        let allocation = allocate(RulesetPolicy::V8, &snapshot, &record, U256::from(1000u64)).unwrap();

        assert_eq!(allocation.pool_staker_eth, U256::from(1000u64));
        assert!(allocation.node_eth.is_empty());
        assert_eq!(allocation.node_operator_eth, U256::ZERO);
        assert_eq!(allocation.protocol_dao_eth, U256::ZERO);
    }

    #[test]
    fn test_single_validator_takes_node_operator_share() {
        let snapshot = snapshot_with_minipools(&[1]);
        let record = scored_record(&snapshot, false, &[1]);
        let allocation = allocate(RulesetPolicy::V8, &snapshot, &record, eth(1)).unwrap();

        // one attestation worth 0.325 against one successful attestation
        let node = Address::repeat_byte(1);
        assert_eq!(allocation.node_eth[&node], fraction_eth(325, 1000));
        assert_eq!(allocation.pool_staker_eth, fraction_eth(675, 1000));
        assert_eq!(total(&allocation), eth(1));

        let performance = &allocation.performance[0];
        assert_eq!(performance.eth_earned, fraction_eth(325, 1000));
        assert_eq!(performance.successful_attestations, 1);
        assert_eq!(performance.missing_slots, vec![42]);
        assert_eq!(performance.effective_commission, fraction_eth(10, 100));
    }

    #[test]
    fn test_cheater_receives_nothing() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        snapshot.nodes[1].penalty_count = 3;
        let record = scored_record(&snapshot, false, &[1, 2]);
        let allocation = allocate(RulesetPolicy::V8, &snapshot, &record, eth(1)).unwrap();

        assert_eq!(allocation.node_eth.len(), 1);
        assert!(allocation.node_eth.contains_key(&Address::repeat_byte(1)));
        assert_eq!(total(&allocation), eth(1));
    }

    #[test]
    fn test_scored_but_ineligible_node_fails_reconciliation() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        let record = scored_record(&snapshot, false, &[1, 2]);
        // opted out long before the interval
        snapshot.nodes[1].smoothing_pool_registered = false;
        snapshot.nodes[1].smoothing_pool_changed_time = 100;

        let err = allocate(RulesetPolicy::V8, &snapshot, &record, eth(1)).unwrap_err();
        assert!(matches!(
            err,
            AllocationError::EpsilonExceeded { split: RewardSplit::SmoothingPoolEth, .. }
        ));
    }

    #[test]
    fn test_bonus_commission() {
        let snapshot = snapshot_with_minipools(&[1]);
        let mut record = scored_record(&snapshot, true, &[1]);
        let minipool = snapshot.minipools[0].address;
        record.add_withdrawal(minipool, eth(1)).unwrap();

        let allocation = allocate(RulesetPolicy::V10, &snapshot, &record, eth(10)).unwrap();

        // score 0.14 + 0.25 * 0.86 = 0.355; bonus (14% - 10%) * 24/32 of 1 ETH = 0.03
        let node = Address::repeat_byte(1);
        assert_eq!(allocation.bonus_eth, fraction_eth(3, 100));
        assert_eq!(allocation.node_eth[&node], fraction_eth(358, 100));
        assert_eq!(allocation.pool_staker_eth, fraction_eth(642, 100));

        let performance = &allocation.performance[0];
        assert_eq!(performance.bonus_eth, fraction_eth(3, 100));
        assert_eq!(performance.consensus_income, eth(1));
        assert_eq!(performance.effective_commission, fraction_eth(14, 100));
    }

    #[test]
    fn test_bonus_is_scaled_to_remaining_balance() {
        let snapshot = snapshot_with_minipools(&[1]);
        let mut record = scored_record(&snapshot, true, &[1]);
        record.add_withdrawal(snapshot.minipools[0].address, eth(10)).unwrap();

        let allocation = allocate(RulesetPolicy::V10, &snapshot, &record, fraction_eth(1, 10)).unwrap();

        // base 0.0355 leaves 0.0645 for a 0.3 ETH bonus
        assert_eq!(allocation.bonus_eth, fraction_eth(645, 10_000));
        assert_eq!(allocation.node_operator_eth, fraction_eth(1, 10));
        assert_eq!(allocation.pool_staker_eth, U256::ZERO);
    }

    #[test]
    fn test_megapool_voter_and_protocol_dao_shares() {
        let mut snapshot = snapshot_with_minipools(&[]);
        add_megapool(&mut snapshot, 3, &[30]);
        let record = scored_record(&snapshot, true, &[30]);

        let allocation = allocate(RulesetPolicy::V11, &snapshot, &record, eth(32)).unwrap();

        let node = Address::repeat_byte(3);
        assert_eq!(allocation.node_eth[&node], fraction_eth(54, 10));
        assert_eq!(allocation.voter_eth[&node], fraction_eth(252, 100));
        assert_eq!(allocation.protocol_dao_eth, fraction_eth(28, 100));
        assert_eq!(allocation.pool_staker_eth, fraction_eth(238, 10));
        assert_eq!(total(&allocation), eth(32));
        assert_eq!(allocation.performance[0].effective_commission, fraction_eth(5, 100));
    }

    #[test]
    fn test_pending_voter_share_above_balance() {
        let mut snapshot = snapshot_with_minipools(&[]);
        add_megapool(&mut snapshot, 3, &[30]);
        snapshot.network.smoothing_pool_pending_voter_share = eth(2);
        let record = scored_record(&snapshot, true, &[30]);

        let err = allocate(RulesetPolicy::V11, &snapshot, &record, eth(1)).unwrap_err();
        assert_eq!(
            err,
            AllocationError::Insolvent {
                split: RewardSplit::VoterShareEth,
                required: eth(2),
                available: eth(1),
            }
        );
    }

    #[test]
    fn test_pending_voter_share_is_added_to_voters() {
        let mut snapshot = snapshot_with_minipools(&[]);
        add_megapool(&mut snapshot, 3, &[30]);
        snapshot.network.smoothing_pool_pending_voter_share = eth(1);
        let record = scored_record(&snapshot, true, &[30]);

        let allocation = allocate(RulesetPolicy::V11, &snapshot, &record, eth(32)).unwrap();

        // shares come from the full balance, the pending share tops up the voters
        let node = Address::repeat_byte(3);
        assert_eq!(allocation.node_eth[&node], fraction_eth(54, 10));
        assert_eq!(allocation.voter_eth[&node], fraction_eth(352, 100));
        assert_eq!(allocation.protocol_dao_eth, fraction_eth(28, 100));
        assert_eq!(allocation.pool_staker_eth, fraction_eth(228, 10));
        assert_eq!(total(&allocation), eth(32));
    }

    #[test]
    fn test_unclaimed_voter_share_stays_with_pool_stakers() {
        let mut snapshot = snapshot_with_minipools(&[1]);
        add_megapool(&mut snapshot, 3, &[30]);
        snapshot.nodes[1].megapool_staked_rpl = U256::ZERO;
        snapshot.network.smoothing_pool_pending_voter_share = fraction_eth(7, 10);
        let mut record = scored_record(&snapshot, true, &[1, 30]);
        record.add_withdrawal(snapshot.minipools[0].address, eth(10)).unwrap();

        let allocation = allocate(RulesetPolicy::V11, &snapshot, &record, eth(1)).unwrap();

        // 1 - 0.261875 base - 0.004375 pDAO leaves 0.73375, minus 0.7 earmarked
        assert!(allocation.voter_eth.is_empty());
        assert_eq!(allocation.voter_share_eth, U256::ZERO);
        assert_eq!(allocation.protocol_dao_eth, fraction_eth(4375, 1_000_000));
        assert_eq!(allocation.bonus_eth, fraction_eth(3375, 100_000));
        assert_eq!(allocation.pool_staker_eth, fraction_eth(7, 10));
        assert_eq!(total(&allocation), eth(1));
    }

    #[test]
    fn test_base_fee_above_bonus_cap_gets_no_bonus() {
        let mut snapshot = snapshot_with_minipools(&[1]);
        snapshot.minipools[0].bond = BondHistory::fixed(eth(8), fraction_eth(15, 100));
        let mut record = scored_record(&snapshot, true, &[1]);
        record.add_withdrawal(snapshot.minipools[0].address, eth(1)).unwrap();

        let allocation = allocate(RulesetPolicy::V10, &snapshot, &record, eth(10)).unwrap();

        // score 0.15 + 0.25 * 0.85 = 0.3625
        assert_eq!(allocation.bonus_eth, U256::ZERO);
        assert_eq!(allocation.node_eth[&Address::repeat_byte(1)], fraction_eth(3625, 1000));
        assert_eq!(allocation.pool_staker_eth, fraction_eth(6375, 1000));
        assert_eq!(allocation.performance[0].effective_commission, fraction_eth(15, 100));
    }

    #[test]
    fn test_bonus_fee_above_cap_is_rejected() {
        let minipool = Address::repeat_byte(0x81);
        assert_eq!(check_bonus_fee(minipool, fraction_eth(14, 100)), Ok(fraction_eth(14, 100)));
        assert_eq!(
            check_bonus_fee(minipool, fraction_eth(15, 100)),
            Err(AllocationError::FeeTooHigh { minipool, fee: fraction_eth(15, 100) })
        );
    }

    #[test]
    fn test_bonus_uses_opt_out_time() {
        let mut snapshot = snapshot_with_minipools(&[1]);
        snapshot.minipools[0].bond = BondHistory {
            bond: eth(8),
            fee: fraction_eth(10, 100),
            previous_bond: eth(16),
            previous_fee: fraction_eth(10, 100),
            reduction_time: START_TIME + DURATION * 3 / 4,
        };
        let mut record = scored_record(&snapshot, true, &[1]);
        record.add_withdrawal(snapshot.minipools[0].address, eth(1)).unwrap();

        // still opted in at the end: the reduction counts
        let allocation = allocate(RulesetPolicy::V10, &snapshot, &record, eth(10)).unwrap();
        assert_eq!(allocation.bonus_eth, fraction_eth(3, 100));

        // opted out before the reduction: the minipool was a 16 ETH one while in the pool
        snapshot.nodes[0].smoothing_pool_registered = false;
        snapshot.nodes[0].smoothing_pool_changed_time = START_TIME + DURATION / 2;
        let allocation = allocate(RulesetPolicy::V10, &snapshot, &record, eth(10)).unwrap();
        assert_eq!(allocation.bonus_eth, U256::ZERO);
        assert!(!allocation.node_eth[&Address::repeat_byte(1)].is_zero());
        assert_eq!(total(&allocation), eth(10));
    }
}
