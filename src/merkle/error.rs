//! Error types for Merkle tree construction.

use alloy_primitives::Address;

/// Result type for Merkle operations.
pub type MerkleResult<T> = Result<T, MerkleError>;

/// Errors that abort commitment of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// A tree needs at least one leaf.
    #[error("cannot build a merkle tree without leaves")]
    Empty,

    /// A proof was requested for a leaf the tree does not have.
    #[error("leaf {index} is out of bounds for a tree of {len} leaves")]
    LeafOutOfBounds { index: usize, len: usize },

    /// A node has nothing to claim and has no leaf.
    #[error("node {0} has no leaf in the tree")]
    NotCommitted(Address),
}
