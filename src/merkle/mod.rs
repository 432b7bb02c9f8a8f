//! Merkle commitment of an interval's rewards.
//!
//! Every node with something to claim becomes one leaf:
//!
//! ```text
//! ┌──────────────┬──────────────────┬───────────────────────┬───────────────────────┐
//! │ address (20) │ network (32, BE) │ total RPL (32, BE)    │ total ETH (32, BE)    │
//! └──────────────┴──────────────────┴───────────────────────┴───────────────────────┘
//! ```
//!
//! Leaves are ordered by node address, so the root and every proof only
//! depend on the set of rewards.

pub mod error;
pub mod tree;
pub mod utils;

pub use error::{MerkleError, MerkleResult};
pub use tree::MerkleTree;
pub use utils::{hash_leaf, hash_pair, tree_height};

use crate::allocator::NodeRewardRecord;
use alloy_primitives::{Address, B256, U256};
use std::collections::BTreeMap;
use tracing::info;

/// Length of an encoded leaf.
pub const LEAF_LEN: usize = 20 + 32 * 3;

/// Encode the claimable tuple of `node`.
pub fn encode_leaf(node: &Address, rewards: &NodeRewardRecord) -> [u8; LEAF_LEN] {
    let mut leaf = [0u8; LEAF_LEN];
    leaf[..20].copy_from_slice(node.as_slice());
    leaf[20..52].copy_from_slice(&U256::from(rewards.reward_network).to_be_bytes::<32>());
    leaf[52..84].copy_from_slice(&rewards.total_rpl().to_be_bytes::<32>());
    leaf[84..].copy_from_slice(&rewards.total_eth().to_be_bytes::<32>());
    leaf
}

/// Builds the rewards tree and attaches proofs to the node records.
#[derive(Debug, Clone, Default)]
pub struct MerkleCommitter {
    tree: Option<MerkleTree>,
    leaves: BTreeMap<Address, usize>,
}

impl MerkleCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `node_rewards` and write each node's proof into its record.
    ///
    /// Nodes with nothing to claim are left out and keep an empty proof.
    pub fn commit(
        &mut self,
        node_rewards: &mut BTreeMap<Address, NodeRewardRecord>,
    ) -> MerkleResult<B256> {
        let mut leaves = Vec::new();
        self.leaves.clear();
        for (node, rewards) in node_rewards.iter() {
            if rewards.is_empty() {
                continue;
            }
            self.leaves.insert(*node, leaves.len());
            leaves.push(hash_leaf(&encode_leaf(node, rewards)));
        }

        let tree = MerkleTree::from_leaves(leaves)?;
        for (node, rewards) in node_rewards.iter_mut() {
            rewards.merkle_proof = match self.leaves.get(node) {
                Some(index) => tree.proof(*index)?,
                None => Vec::new(),
            };
        }

        let root = tree.root();
        info!(target: "rewards::merkle", %root, leaves = tree.len(), "Built rewards tree");
        self.tree = Some(tree);
        Ok(root)
    }

    /// Root of the last commitment.
    pub fn root(&self) -> Option<B256> {
        self.tree.as_ref().map(MerkleTree::root)
    }

    /// Proof for `node` in the last commitment.
    pub fn proof(&self, node: &Address) -> MerkleResult<Vec<B256>> {
        let (Some(tree), Some(index)) = (&self.tree, self.leaves.get(node)) else {
            return Err(MerkleError::NotCommitted(*node));
        };
        tree.proof(*index)
    }

    /// Whether `rewards` of `node` are committed under `root` by `proof`.
    pub fn verify(node: &Address, rewards: &NodeRewardRecord, proof: &[B256], root: B256) -> bool {
        MerkleTree::verify(hash_leaf(&encode_leaf(node, rewards)), proof, root)
    }
}
