//! Rewards tree generation for a staking protocol.
//!
//! Turns one reward interval of beacon and execution chain data into a
//! Merkle-committed set of per-node RPL and smoothing pool ETH rewards.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          TreeGenerator                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌─────────────────┐   duties/attestations   ┌─────────────────┐    │
//! │  │  ChainDataPort  │ ──────────────────────► │   Attestation   │    │
//! │  │ (MemoryChain)   │                         │     Scorer      │    │
//! │  └────────┬────────┘                         └────────┬────────┘    │
//! │           │ snapshot, balance                         │             │
//! │           │                                  ┌────────▼────────┐    │
//! │           │                                  │  RollingRecord  │◄──►│ checkpoints
//! │           │                                  │    Manager      │    │ (zstd + sha384)
//! │           │                                  └────────┬────────┘    │
//! │  ┌────────▼────────────────────────────────────────────▼────────┐    │
//! │  │                     RewardAllocator                         │    │
//! │  │   RPL: collateral / oDAO / pDAO    ETH: pool / node / bonus  │    │
//! │  └────────────────────────────┬────────────────────────────────┘    │
//! │                  ┌────────────▼────────────┐                        │
//! │                  │     MerkleCommitter     │                        │
//! │                  └────────────┬────────────┘                        │
//! │                  ┌────────────▼────────────┐                        │
//! │                  │  ArtifactSet (codec)    │                        │
//! │                  └─────────────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`primitives`]: Beacon and snapshot types, checked arithmetic
//! - [`chain`]: Chain data access and the in-memory implementation
//! - [`fees`]: Bond and commission math for minipools and megapools
//! - [`scorer`]: Attestation duty tracking and scoring
//! - [`record`]: Rolling record and its checkpoints
//! - [`allocator`]: RPL and ETH reward allocation
//! - [`merkle`]: Rewards tree and proofs
//! - [`artifact`]: Reward and performance artifacts
//! - [`generator`]: End-to-end generation of one interval

#![warn(unused_crate_dependencies)]
// Dependencies used by the binary
use eyre as _;
use tracing_subscriber as _;

pub mod allocator;
pub mod artifact;
pub mod chain;
pub mod fees;
pub mod generator;
pub mod merkle;
pub mod primitives;
pub mod record;
pub mod scorer;

// Re-export primitives
pub use primitives::{
    ArithError, BeaconBlock, BeaconConfig, BeaconHead, Interval, NetworkSnapshot, RewardsEvent,
    SafeArith, SafeArithIter,
};

// Re-export chain access
pub use chain::{ChainData, ChainDataPort, ChainError, MemoryChain};

// Re-export scoring and records
pub use record::{
    CheckpointStore, FileCheckpointStore, ManagerConfig, MemoryCheckpointStore, RecordError,
    RollingRecord, RollingRecordManager,
};
pub use scorer::{AttestationScorer, ScorerConfig, ScorerError, ScoringContext};

// Re-export allocation
pub use allocator::{
    Allocation, AllocationError, AllocationRequest, NodeRewardRecord, RewardAllocator,
    RewardTotals, RulesetPolicy,
};

// Re-export commitment and artifacts
pub use artifact::{ArtifactCodec, ArtifactError, ArtifactSet, ZstdJsonCodec};
pub use merkle::{MerkleCommitter, MerkleError, MerkleTree};

// Re-export the generator
pub use generator::{GeneratedTree, GeneratorConfig, GeneratorError, TreeGenerator};
