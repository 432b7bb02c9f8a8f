//! Hashing helpers for the rewards tree.

use alloy_primitives::{keccak256, B256};

/// Number of levels above the leaves for a tree holding `n_leaves`.
pub fn tree_height(n_leaves: usize) -> usize {
    if n_leaves <= 1 {
        return 0;
    }
    n_leaves.next_power_of_two().trailing_zeros() as usize
}

/// Hash of an encoded leaf.
pub fn hash_leaf(data: &[u8]) -> B256 {
    keccak256(data)
}

/// Parent of two nodes. The smaller hash goes first, so siblings need no side bit.
pub fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(first.as_slice());
    buf[32..].copy_from_slice(second.as_slice());
    keccak256(buf)
}
