//! In-memory chain data.
//!
//! Serves committees, blocks and execution state from maps. Used by tests and
//! by the offline binary. Slots can be marked as failing to exercise the
//! data-unavailable paths.

use super::{ChainDataPort, ChainError, ChainFut, ChainResult};
use crate::primitives::{
    BeaconBlock, BeaconHead, Epoch, EpochCommittees, ExecutionHeader, NetworkSnapshot,
    RewardsEvent, Slot,
};
use alloy_primitives::{Address, U256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Serializable contents of a [`MemoryChain`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainData {
    pub head: BeaconHead,
    pub committees: BTreeMap<Epoch, EpochCommittees>,
    pub blocks: BTreeMap<Slot, BeaconBlock>,
    pub events: BTreeMap<u64, RewardsEvent>,
    pub headers: BTreeMap<u64, ExecutionHeader>,
    pub balances: HashMap<Address, U256>,
    pub enabled_networks: BTreeSet<u64>,
    pub snapshots: BTreeMap<u64, NetworkSnapshot>,
}

/// In-memory [`ChainDataPort`].
#[derive(Debug, Default)]
pub struct MemoryChain {
    data: RwLock<ChainData>,
    failing_slots: RwLock<BTreeSet<Slot>>,
    block_fetches: AtomicUsize,
}

impl MemoryChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain from previously captured data.
    pub fn from_data(data: ChainData) -> Self {
        Self { data: RwLock::new(data), ..Default::default() }
    }

    /// Set the beacon head.
    pub fn set_head(&self, head: BeaconHead) {
        self.data.write().head = head;
    }

    /// Insert committees for an epoch.
    pub fn insert_committees(&self, committees: EpochCommittees) {
        self.data.write().committees.insert(committees.epoch, committees);
    }

    /// Insert a beacon block.
    pub fn insert_block(&self, block: BeaconBlock) {
        self.data.write().blocks.insert(block.slot, block);
    }

    /// Insert a rewards event.
    pub fn insert_event(&self, event: RewardsEvent) {
        self.data.write().events.insert(event.index, event);
    }

    /// Insert an execution header.
    pub fn insert_header(&self, header: ExecutionHeader) {
        self.data.write().headers.insert(header.number, header);
    }

    /// Set the balance of an address (block independent).
    pub fn set_balance(&self, address: Address, balance: U256) {
        self.data.write().balances.insert(address, balance);
    }

    /// Mark a reward network as enabled.
    pub fn enable_network(&self, network: u64) {
        self.data.write().enabled_networks.insert(network);
    }

    /// Insert a contract snapshot.
    pub fn insert_snapshot(&self, snapshot: NetworkSnapshot) {
        self.data.write().snapshots.insert(snapshot.block_number, snapshot);
    }

    /// Make block reads at `slot` fail until cleared.
    pub fn fail_block(&self, slot: Slot) {
        self.failing_slots.write().insert(slot);
    }

    /// Clear all injected failures.
    pub fn clear_failures(&self) {
        self.failing_slots.write().clear();
    }

    /// Number of block reads served so far.
    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::Relaxed)
    }

    fn read_block(&self, slot: Slot) -> ChainResult<Option<BeaconBlock>> {
        self.block_fetches.fetch_add(1, Ordering::Relaxed);
        if self.failing_slots.read().contains(&slot) {
            return Err(ChainError::BlockUnavailable(slot));
        }
        Ok(self.data.read().blocks.get(&slot).cloned())
    }
}

impl ChainDataPort for MemoryChain {
    fn committees_for_epoch(&self, epoch: Epoch) -> ChainFut<'_, EpochCommittees> {
        let result = self
            .data
            .read()
            .committees
            .get(&epoch)
            .cloned()
            .ok_or(ChainError::CommitteesUnavailable(epoch));
        Box::pin(async move { result })
    }

    fn beacon_block(&self, slot: Slot) -> ChainFut<'_, Option<BeaconBlock>> {
        Box::pin(async move {
            // yield so concurrent slot reads interleave like real requests
            tokio::task::yield_now().await;
            self.read_block(slot)
        })
    }

    fn beacon_head(&self) -> ChainFut<'_, BeaconHead> {
        let head = self.data.read().head;
        Box::pin(async move { Ok(head) })
    }

    fn rewards_event(&self, index: u64) -> ChainFut<'_, RewardsEvent> {
        let result =
            self.data.read().events.get(&index).cloned().ok_or(ChainError::EventNotFound(index));
        Box::pin(async move { result })
    }

    fn header_by_number(&self, block: u64) -> ChainFut<'_, ExecutionHeader> {
        let result =
            self.data.read().headers.get(&block).copied().ok_or(ChainError::HeaderNotFound(block));
        Box::pin(async move { result })
    }

    fn balance_at(&self, address: Address, _block: u64) -> ChainFut<'_, U256> {
        let balance = self.data.read().balances.get(&address).copied().unwrap_or_default();
        Box::pin(async move { Ok(balance) })
    }

    fn network_enabled(&self, network: u64, _block: u64) -> ChainFut<'_, bool> {
        let enabled = network == 0 || self.data.read().enabled_networks.contains(&network);
        Box::pin(async move { Ok(enabled) })
    }

    fn network_snapshot(&self, block: u64) -> ChainFut<'_, NetworkSnapshot> {
        let result = self
            .data
            .read()
            .snapshots
            .get(&block)
            .cloned()
            .ok_or(ChainError::SnapshotUnavailable(block));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Committee;

    #[tokio::test]
    async fn test_missing_block_is_not_an_error() {
        let chain = MemoryChain::new();
        chain.insert_block(BeaconBlock { slot: 5, ..Default::default() });

        assert!(chain.beacon_block(5).await.unwrap().is_some());
        assert!(chain.beacon_block(6).await.unwrap().is_none());
        assert_eq!(chain.block_fetches(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let chain = MemoryChain::new();
        chain.fail_block(7);

        assert_eq!(chain.beacon_block(7).await, Err(ChainError::BlockUnavailable(7)));
        chain.clear_failures();
        assert_eq!(chain.beacon_block(7).await, Ok(None));
    }

    #[tokio::test]
    async fn test_committees_and_networks() {
        let chain = MemoryChain::new();
        chain.insert_committees(EpochCommittees::new(
            3,
            vec![Committee { slot: 96, index: 0, validators: vec![1, 2] }],
        ));
        chain.enable_network(2);

        assert_eq!(chain.committees_for_epoch(3).await.unwrap().len(), 1);
        assert_eq!(chain.committees_for_epoch(4).await, Err(ChainError::CommitteesUnavailable(4)));
        assert!(chain.network_enabled(0, 1).await.unwrap());
        assert!(chain.network_enabled(2, 1).await.unwrap());
        assert!(!chain.network_enabled(3, 1).await.unwrap());
    }
}
