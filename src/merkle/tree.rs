//! Binary keccak Merkle tree over a fixed set of leaves.
//!
//! Leaves are padded with zero hashes up to the next power of two. Every
//! level is kept so proofs are a walk from the leaf to the root.

use super::{
    error::{MerkleError, MerkleResult},
    utils::{hash_pair, tree_height},
};
use alloy_primitives::B256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `levels[0]` are the padded leaves, the last level is the root.
    levels: Vec<Vec<B256>>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Build the tree over hashed leaves.
    pub fn from_leaves(leaves: Vec<B256>) -> MerkleResult<Self> {
        if leaves.is_empty() {
            return Err(MerkleError::Empty);
        }
        let leaf_count = leaves.len();
        let height = tree_height(leaf_count);

        let mut level = leaves;
        level.resize(1 << height, B256::ZERO);

        let mut levels = Vec::with_capacity(height + 1);
        while level.len() > 1 {
            let parent = level.chunks_exact(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
            levels.push(std::mem::replace(&mut level, parent));
        }
        levels.push(level);

        Ok(Self { levels, leaf_count })
    }

    pub fn root(&self) -> B256 {
        self.levels.last().and_then(|level| level.first()).copied().unwrap_or_default()
    }

    /// Number of real leaves, padding excluded.
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Sibling hashes from leaf `index` up to, not including, the root.
    pub fn proof(&self, index: usize) -> MerkleResult<Vec<B256>> {
        if index >= self.leaf_count {
            return Err(MerkleError::LeafOutOfBounds { index, len: self.leaf_count });
        }
        let mut position = index;
        let mut proof = Vec::with_capacity(self.levels.len().saturating_sub(1));
        for level in &self.levels[..self.levels.len() - 1] {
            proof.push(level[position ^ 1]);
            position >>= 1;
        }
        Ok(proof)
    }

    /// Whether `leaf` with `proof` hashes up to `root`.
    pub fn verify(leaf: B256, proof: &[B256], root: B256) -> bool {
        proof.iter().fold(leaf, |node, sibling| hash_pair(&node, sibling)) == root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<B256> {
        (1..=n).map(B256::repeat_byte).collect()
    }

    #[test]
    fn test_single_leaf_is_root() {
        let tree = MerkleTree::from_leaves(leaves(1)).unwrap();
        assert_eq!(tree.root(), B256::repeat_byte(1));
        assert!(tree.proof(0).unwrap().is_empty());
    }

    #[test]
    fn test_padding_with_zero_leaves() {
        let tree = MerkleTree::from_leaves(leaves(3)).unwrap();
        let left = hash_pair(&B256::repeat_byte(1), &B256::repeat_byte(2));
        let right = hash_pair(&B256::repeat_byte(3), &B256::ZERO);
        assert_eq!(tree.root(), hash_pair(&left, &right));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_every_proof_verifies() {
        let leaves = leaves(5);
        let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
        for (index, leaf) in leaves.iter().enumerate() {
            let proof = tree.proof(index).unwrap();
            assert_eq!(proof.len(), 3);
            assert!(MerkleTree::verify(*leaf, &proof, tree.root()));
            assert!(!MerkleTree::verify(B256::repeat_byte(0xff), &proof, tree.root()));
        }
    }

    #[test]
    fn test_errors() {
        assert_eq!(MerkleTree::from_leaves(Vec::new()), Err(MerkleError::Empty));
        let tree = MerkleTree::from_leaves(leaves(2)).unwrap();
        assert_eq!(tree.proof(2), Err(MerkleError::LeafOutOfBounds { index: 2, len: 2 }));
    }
}
