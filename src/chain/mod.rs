//! Read-only access to consensus and execution chain data.
//!
//! Every component of the reward engine reads the chain through
//! [`ChainDataPort`]. Execution-side calls take an explicit block number so a
//! single interval run always reads one consistent snapshot.
//!
//! # Implementations
//!
//! - [`MemoryChain`]: in-memory chain for tests and offline runs
//! - Production clients wrap a beacon node and an execution client and live
//!   outside this crate.

mod memory;

pub use memory::{ChainData, MemoryChain};

use crate::primitives::{
    BeaconBlock, BeaconHead, Epoch, EpochCommittees, ExecutionHeader, NetworkSnapshot,
    RewardsEvent, Slot,
};
use alloy_primitives::{Address, U256};
use std::{future::Future, pin::Pin};

/// Result type for chain reads.
pub type ChainResult<T> = Result<T, ChainError>;

/// Boxed future returned by [`ChainDataPort`] methods.
pub type ChainFut<'a, T> = Pin<Box<dyn Future<Output = ChainResult<T>> + Send + 'a>>;

/// Errors returned by chain reads. All of them mean the data is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The beacon node could not serve the block (distinct from an empty slot).
    #[error("beacon block at slot {0} is unavailable")]
    BlockUnavailable(Slot),

    /// Committee assignments could not be fetched.
    #[error("committees for epoch {0} are unavailable")]
    CommitteesUnavailable(Epoch),

    /// No rewards event exists for the interval.
    #[error("rewards event for interval {0} not found")]
    EventNotFound(u64),

    /// Execution header not found.
    #[error("execution header {0} not found")]
    HeaderNotFound(u64),

    /// Contract state could not be read at the block.
    #[error("network snapshot at block {0} is unavailable")]
    SnapshotUnavailable(u64),

    /// Transport failure.
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Narrow read-only view of the beacon node and the execution client.
pub trait ChainDataPort: Send + Sync {
    /// Committee assignments for `epoch`.
    fn committees_for_epoch(&self, epoch: Epoch) -> ChainFut<'_, EpochCommittees>;

    /// The block at `slot`; `None` when the slot was skipped.
    fn beacon_block(&self, slot: Slot) -> ChainFut<'_, Option<BeaconBlock>>;

    /// Current beacon head.
    fn beacon_head(&self) -> ChainFut<'_, BeaconHead>;

    /// Finalization event of interval `index`.
    fn rewards_event(&self, index: u64) -> ChainFut<'_, RewardsEvent>;

    /// Execution header at `block`.
    fn header_by_number(&self, block: u64) -> ChainFut<'_, ExecutionHeader>;

    /// ETH balance of `address` at `block`.
    fn balance_at(&self, address: Address, block: u64) -> ChainFut<'_, U256>;

    /// Whether reward `network` accepts claims at `block`.
    fn network_enabled(&self, network: u64, block: u64) -> ChainFut<'_, bool>;

    /// All contract state needed for an interval, read at `block`.
    fn network_snapshot(&self, block: u64) -> ChainFut<'_, NetworkSnapshot>;
}
