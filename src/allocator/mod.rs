//! Reward allocation.
//!
//! Splits an interval's pending RPL and smoothing pool ETH between node
//! operators, the oracle DAO, the protocol DAO, voters and pool stakers.
//!
//! ```text
//!   NetworkSnapshot ─┬─► rpl::allocate_rpl ──► collateral + oDAO RPL ──┐
//!                    │                                                  ├─► resolve networks ─► Allocation
//!   RollingRecord ───┴─► eth::allocate_eth ──► node + voter ETH ────────┘
//! ```
//!
//! Both splits reconcile against their expected totals within an epsilon
//! scaled by the population size. The protocol DAO absorbs the RPL residual
//! and pool stakers absorb the ETH residual, so totals always add up exactly.

mod eth;
mod rpl;
mod ruleset;

pub use eth::{allocate_eth, EthAllocation, EthRequest, ValidatorPerformance};
pub use rpl::{allocate_rpl, RplAllocation};
pub use ruleset::{
    ln, log2, rpip30_weight, scale_by_participation, NodeWeightPolicy, RulesetPolicy,
    BONUS_START_INTERVAL, RPIP30_START_INTERVAL, VOTER_SHARE_START_INTERVAL,
};

use crate::{
    chain::{ChainDataPort, ChainError},
    primitives::{
        safe_arith::abs_diff, ArithError, BeaconConfig, Interval, NetworkSnapshot, SafeArith,
        ValidatorIndex,
    },
    record::RollingRecord,
};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tracing::{info, warn};

/// Result type for reward allocation.
pub type AllocationResult<T> = Result<T, AllocationError>;

/// The reward pools that are reconciled against an expected total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardSplit {
    CollateralRpl,
    OracleDaoRpl,
    ProtocolDaoRpl,
    SmoothingPoolEth,
    VoterShareEth,
}

impl fmt::Display for RewardSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CollateralRpl => "collateral RPL",
            Self::OracleDaoRpl => "oracle DAO RPL",
            Self::ProtocolDaoRpl => "protocol DAO RPL",
            Self::SmoothingPoolEth => "smoothing pool ETH",
            Self::VoterShareEth => "voter share ETH",
        };
        f.write_str(name)
    }
}

/// Errors that abort an allocation run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// Nothing to distribute this interval.
    #[error("there are no pending RPL rewards for this interval")]
    NoPendingRewards,

    /// A split's computed total strayed too far from its expected total.
    #[error("{split} total was {actual}, expected {expected}; error exceeds {epsilon} wei")]
    EpsilonExceeded { split: RewardSplit, expected: U256, actual: U256, epsilon: U256 },

    /// The computed shares exceed the funds available for them.
    #[error("{split} requires {required} but only {available} is available")]
    Insolvent { split: RewardSplit, required: U256, available: U256 },

    /// A minipool's commission including the bonus exceeds the cap.
    #[error("minipool {minipool} has a bonus commission of {fee}, above the maximum")]
    FeeTooHigh { minipool: Address, fee: U256 },

    /// The record was built for another interval.
    #[error("record belongs to interval {record}, allocating interval {interval}")]
    RecordIntervalMismatch { record: u64, interval: u64 },

    /// A rewarded address is not a node in the snapshot.
    #[error("rewarded address {0} is not a registered node")]
    UnknownNode(Address),

    /// A scored validator belongs to a node missing from the snapshot.
    #[error("validator {0} has no owning node in the snapshot")]
    MissingValidator(ValidatorIndex),

    /// Arithmetic failure.
    #[error("allocation arithmetic failed: {0}")]
    Arith(#[from] ArithError),

    /// Chain data could not be read.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Rewards of one node for the interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRewardRecord {
    /// Network the rewards are claimable on.
    pub reward_network: u64,
    pub collateral_rpl: U256,
    pub oracle_dao_rpl: U256,
    pub smoothing_pool_eth: U256,
    #[serde(default)]
    pub voter_share_eth: U256,
    /// Sibling hashes from the leaf up to the root.
    #[serde(default)]
    pub merkle_proof: Vec<B256>,
}

impl NodeRewardRecord {
    /// Claimable RPL.
    pub fn total_rpl(&self) -> U256 {
        self.collateral_rpl.saturating_add(self.oracle_dao_rpl)
    }

    /// Claimable ETH.
    pub fn total_eth(&self) -> U256 {
        self.smoothing_pool_eth.saturating_add(self.voter_share_eth)
    }

    /// Whether the node has nothing to claim.
    pub fn is_empty(&self) -> bool {
        self.total_rpl().is_zero() && self.total_eth().is_zero()
    }
}

/// Rewards routed to one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRewardAggregate {
    pub collateral_rpl: U256,
    pub oracle_dao_rpl: U256,
    pub smoothing_pool_eth: U256,
    #[serde(default)]
    pub voter_share_eth: U256,
}

/// Interval-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardTotals {
    pub protocol_dao_rpl: U256,
    pub total_collateral_rpl: U256,
    pub total_oracle_dao_rpl: U256,
    pub total_node_weight: U256,
    pub pool_staker_smoothing_pool_eth: U256,
    pub node_operator_smoothing_pool_eth: U256,
    pub bonus_eth: U256,
    pub voter_share_eth: U256,
    pub protocol_dao_eth: U256,
    pub total_smoothing_pool_eth: U256,
}

/// Output of one allocation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub ruleset: RulesetPolicy,
    /// Rewards per node, keyed by node address.
    pub node_rewards: BTreeMap<Address, NodeRewardRecord>,
    /// Rewards per network, dense from 0 to the highest network used.
    pub network_rewards: BTreeMap<u64, NetworkRewardAggregate>,
    /// Nodes whose requested network is disabled, with that network.
    pub invalid_network_nodes: BTreeMap<Address, u64>,
    pub totals: RewardTotals,
    pub performance: Vec<ValidatorPerformance>,
    /// Voter share ETH per megapool node.
    pub megapool_voter_share: BTreeMap<Address, U256>,
}

/// Inputs of one allocation run.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub interval: &'a Interval,
    pub snapshot: &'a NetworkSnapshot,
    pub record: &'a RollingRecord,
    pub smoothing_pool_balance: U256,
}

/// Computes the rewards of one interval.
///
/// Network-enabled lookups are cached for the lifetime of the allocator,
/// which is one run.
#[derive(Debug)]
pub struct RewardAllocator<'a, C: ?Sized> {
    chain: &'a C,
    policy: RulesetPolicy,
    beacon: BeaconConfig,
    network_cache: BTreeMap<u64, bool>,
}

impl<'a, C: ChainDataPort + ?Sized> RewardAllocator<'a, C> {
    /// Create an allocator for one run under `policy`.
    pub fn new(chain: &'a C, policy: RulesetPolicy, beacon: BeaconConfig) -> Self {
        Self { chain, policy, beacon, network_cache: BTreeMap::from([(0, true)]) }
    }

    /// The ruleset in use.
    pub fn policy(&self) -> &RulesetPolicy {
        &self.policy
    }

    /// Allowed truncation error for the snapshot's population.
    pub fn epsilon(&self, snapshot: &NetworkSnapshot) -> U256 {
        let mut validators = snapshot.minipools.len();
        if self.policy.voter_share_enabled {
            validators += snapshot.megapools.iter().map(|m| m.validators.len()).sum::<usize>();
        }
        self.policy.epsilon(snapshot.nodes.len(), validators)
    }

    /// Run the RPL and ETH splits and route every node's rewards to a network.
    pub async fn allocate(&mut self, request: AllocationRequest<'_>) -> AllocationResult<Allocation> {
        let AllocationRequest { interval, snapshot, record, smoothing_pool_balance } = request;
        if record.rewards_interval != interval.index {
            return Err(AllocationError::RecordIntervalMismatch {
                record: record.rewards_interval,
                interval: interval.index,
            });
        }

        let epsilon = self.epsilon(snapshot);
        info!(
            target: "rewards::allocator",
            interval = interval.index,
            ruleset = self.policy.version,
            nodes = snapshot.nodes.len(),
            %epsilon,
            "Allocating rewards"
        );

        let rpl = allocate_rpl(
            &self.policy,
            interval,
            snapshot,
            self.beacon.epoch_of(interval.end_slot),
            epsilon,
        )?;
        let eth = allocate_eth(EthRequest {
            policy: &self.policy,
            interval,
            snapshot,
            record,
            end_epoch: self.beacon.epoch_of(interval.end_slot),
            balance: smoothing_pool_balance,
            epsilon,
        })?;

        let mut node_rewards: BTreeMap<Address, NodeRewardRecord> = BTreeMap::new();
        for (node, amount) in &rpl.collateral {
            node_rewards.entry(*node).or_default().collateral_rpl = *amount;
        }
        for (node, amount) in &rpl.oracle_dao {
            node_rewards.entry(*node).or_default().oracle_dao_rpl = *amount;
        }
        for (node, amount) in &eth.node_eth {
            node_rewards.entry(*node).or_default().smoothing_pool_eth = *amount;
        }
        for (node, amount) in &eth.voter_eth {
            node_rewards.entry(*node).or_default().voter_share_eth = *amount;
        }
        node_rewards.retain(|_, rewards| !rewards.is_empty());

        let nodes = snapshot.nodes_by_address();
        let mut invalid_network_nodes = BTreeMap::new();
        for (address, rewards) in node_rewards.iter_mut() {
            let node = nodes.get(address).ok_or(AllocationError::UnknownNode(*address))?;
            let network = node.reward_network;
            if self.network_enabled(network, snapshot.block_number).await? {
                rewards.reward_network = network;
            } else {
                warn!(
                    target: "rewards::allocator",
                    node = %address,
                    network,
                    "Node requested a disabled network, routing its rewards to network 0"
                );
                invalid_network_nodes.insert(*address, network);
                rewards.reward_network = 0;
            }
        }

        let network_rewards = aggregate_networks(&node_rewards)?;
        let totals = RewardTotals {
            protocol_dao_rpl: rpl.protocol_dao_rpl,
            total_collateral_rpl: rpl.total_collateral_rpl,
            total_oracle_dao_rpl: rpl.total_oracle_dao_rpl,
            total_node_weight: rpl.total_node_weight,
            pool_staker_smoothing_pool_eth: eth.pool_staker_eth,
            node_operator_smoothing_pool_eth: eth.node_operator_eth,
            bonus_eth: eth.bonus_eth,
            voter_share_eth: eth.voter_share_eth,
            protocol_dao_eth: eth.protocol_dao_eth,
            total_smoothing_pool_eth: smoothing_pool_balance,
        };

        info!(
            target: "rewards::allocator",
            nodes = node_rewards.len(),
            networks = network_rewards.len(),
            invalid_networks = invalid_network_nodes.len(),
            "Allocation complete"
        );

        Ok(Allocation {
            ruleset: self.policy,
            node_rewards,
            network_rewards,
            invalid_network_nodes,
            totals,
            performance: eth.performance,
            megapool_voter_share: eth.voter_eth,
        })
    }

    async fn network_enabled(&mut self, network: u64, block: u64) -> AllocationResult<bool> {
        if let Some(enabled) = self.network_cache.get(&network) {
            return Ok(*enabled);
        }
        let enabled = self.chain.network_enabled(network, block).await?;
        self.network_cache.insert(network, enabled);
        Ok(enabled)
    }
}

/// Fail when `actual` strays from `expected` by more than `epsilon`.
pub(crate) fn reconcile(
    split: RewardSplit,
    expected: U256,
    actual: U256,
    epsilon: U256,
) -> AllocationResult<()> {
    let error = abs_diff(expected, actual);
    info!(target: "rewards::allocator", %split, %expected, %actual, %error, "Reconciled split");
    if error > epsilon {
        return Err(AllocationError::EpsilonExceeded { split, expected, actual, epsilon });
    }
    Ok(())
}

/// Sum node rewards per network, filling unused networks below the highest with zeros.
fn aggregate_networks(
    node_rewards: &BTreeMap<Address, NodeRewardRecord>,
) -> AllocationResult<BTreeMap<u64, NetworkRewardAggregate>> {
    let mut networks: BTreeMap<u64, NetworkRewardAggregate> = BTreeMap::new();
    for rewards in node_rewards.values() {
        let network = networks.entry(rewards.reward_network).or_default();
        network.collateral_rpl.safe_add_assign(rewards.collateral_rpl)?;
        network.oracle_dao_rpl.safe_add_assign(rewards.oracle_dao_rpl)?;
        network.smoothing_pool_eth.safe_add_assign(rewards.smoothing_pool_eth)?;
        network.voter_share_eth.safe_add_assign(rewards.voter_share_eth)?;
    }
    let highest = networks.keys().next_back().copied().unwrap_or_default();
    for network in 0..=highest {
        networks.entry(network).or_default();
    }
    Ok(networks)
}
