//! End-to-end rewards tree generation for one interval.
//!
//! ```text
//!   rewards events ──► Interval ──► snapshot ──► ScoringContext
//!                                                     │
//!   checkpoints ◄──► RollingRecordManager ◄───────────┘
//!                            │ record
//!                            ▼
//!   balance ──────► RewardAllocator ──► MerkleCommitter ──► ArtifactSet
//! ```

use crate::{
    allocator::{Allocation, AllocationError, AllocationRequest, RewardAllocator, RulesetPolicy},
    artifact::{ArtifactCodec, ArtifactError, ArtifactSet},
    chain::{ChainDataPort, ChainError},
    merkle::{MerkleCommitter, MerkleError},
    primitives::{ArithError, BeaconBlock, BeaconConfig, Interval, Slot},
    record::{CheckpointStore, ManagerConfig, RecordError, RollingRecordManager},
    scorer::{ScorerConfig, ScoringContext},
};
use alloy_primitives::B256;
use std::sync::Arc;
use tracing::{debug, info};

/// Result type for tree generation.
pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Errors that abort generation of an interval.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("rolling record: {0}")]
    Record(#[from] RecordError),

    #[error("allocation: {0}")]
    Allocation(#[from] AllocationError),

    #[error("merkle tree: {0}")]
    Merkle(#[from] MerkleError),

    #[error("artifacts: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("arithmetic: {0}")]
    Arith(#[from] ArithError),

    /// The previous interval's snapshot block is not on the beacon chain.
    #[error("previous interval's consensus block at slot {0} was not found")]
    PreviousBlockUnavailable(Slot),

    /// Every slot from the interval start up to the head is empty.
    #[error("no beacon block between slot {from} and the head at slot {head}")]
    NoStartBlock { from: Slot, head: Slot },
}

/// Configuration for the tree generator.
#[derive(Debug, Clone, Default)]
pub struct GeneratorConfig {
    pub beacon: BeaconConfig,
    pub scorer: ScorerConfig,
    pub manager: ManagerConfig,
}

impl GeneratorConfig {
    pub fn with_beacon(mut self, beacon: BeaconConfig) -> Self {
        self.beacon = beacon;
        self
    }

    pub fn with_scorer(mut self, scorer: ScorerConfig) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_manager(mut self, manager: ManagerConfig) -> Self {
        self.manager = manager;
        self
    }
}

/// Output of one generation run.
#[derive(Debug, Clone)]
pub struct GeneratedTree {
    pub interval: Interval,
    pub root: B256,
    pub allocation: Allocation,
    pub artifacts: ArtifactSet,
}

/// Generates the rewards tree of an interval.
#[derive(Debug)]
pub struct TreeGenerator<C: ?Sized, S> {
    chain: Arc<C>,
    store: S,
    config: GeneratorConfig,
}

impl<C, S> TreeGenerator<C, S>
where
    C: ChainDataPort + ?Sized,
    S: CheckpointStore + Clone,
{
    pub fn new(chain: Arc<C>, store: S, config: GeneratorConfig) -> Self {
        Self { chain, store, config }
    }

    /// Slot and execution block bounds of interval `index`, from the previous and current events.
    pub async fn interval(&self, index: u64) -> GeneratorResult<Interval> {
        let beacon = &self.config.beacon;
        let previous = self.chain.rewards_event(index.saturating_sub(1)).await?;
        let current = self.chain.rewards_event(index).await?;

        if self.chain.beacon_block(previous.consensus_block).await?.is_none() {
            return Err(GeneratorError::PreviousBlockUnavailable(previous.consensus_block));
        }

        let start_slot = beacon.epoch_start_slot(beacon.epoch_of(previous.consensus_block) + 1);
        let block = self.first_block_from(start_slot).await?;
        let execution_start_block = match block.execution_block_number {
            Some(number) if number > 0 => number,
            _ => previous.execution_block + 1,
        };
        let header = self.chain.header_by_number(execution_start_block).await?;
        debug!(
            target: "rewards::generator",
            start_slot,
            first_block = block.slot,
            execution_start_block = header.number,
            "Found interval start"
        );

        Ok(Interval {
            index,
            start_slot,
            end_slot: current.consensus_block,
            execution_start_block: header.number,
            execution_end_block: current.execution_block,
            start_time: current.interval_start_time,
            end_time: current.interval_end_time,
            intervals_passed: current.intervals_passed,
        })
    }

    async fn first_block_from(&self, start_slot: Slot) -> GeneratorResult<BeaconBlock> {
        let head = self.chain.beacon_head().await?;
        let head_slot = self.config.beacon.epoch_end_slot(head.epoch);
        for slot in start_slot..=head_slot {
            if let Some(block) = self.chain.beacon_block(slot).await? {
                return Ok(block);
            }
        }
        Err(GeneratorError::NoStartBlock { from: start_slot, head: head_slot })
    }

    /// Score, allocate, commit and encode interval `index`.
    pub async fn generate<K: ArtifactCodec>(
        &self,
        index: u64,
        codec: &K,
    ) -> GeneratorResult<GeneratedTree> {
        let beacon = self.config.beacon;
        let interval = self.interval(index).await?;
        info!(
            target: "rewards::generator",
            index,
            start_slot = interval.start_slot,
            end_slot = interval.end_slot,
            execution_end_block = interval.execution_end_block,
            "Generating rewards tree"
        );

        let snapshot = self.chain.network_snapshot(interval.execution_end_block).await?;
        let policy = RulesetPolicy::for_interval(index);
        let context =
            ScoringContext::from_snapshot(&snapshot, beacon, interval.end_slot, policy.bonus_enabled)?;

        let mut manager = RollingRecordManager::new(
            self.chain.clone(),
            self.store.clone(),
            beacon,
            &interval,
            self.config.manager.clone(),
            self.config.scorer.clone(),
        );
        manager.generate_record_for_slot(&context, &interval, interval.end_slot).await?;
        let record = manager.into_record();

        let balance = self
            .chain
            .balance_at(snapshot.network.smoothing_pool_address, interval.execution_end_block)
            .await?;

        let mut allocator = RewardAllocator::new(&*self.chain, policy, beacon);
        let mut allocation = allocator
            .allocate(AllocationRequest {
                interval: &interval,
                snapshot: &snapshot,
                record: &record,
                smoothing_pool_balance: balance,
            })
            .await?;

        let root = MerkleCommitter::new().commit(&mut allocation.node_rewards)?;
        let artifacts = ArtifactSet::build(codec, &interval, &allocation, root)?;

        info!(
            target: "rewards::generator",
            index,
            %root,
            nodes = allocation.node_rewards.len(),
            performance_cid = %artifacts.reward.performance_cid,
            "Generated rewards tree"
        );
        Ok(GeneratedTree { interval, root, allocation, artifacts })
    }
}
