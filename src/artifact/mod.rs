//! Reward and performance artifacts.
//!
//! ```text
//!   Allocation ──► PerformanceArtifact ──encode──► bytes ──sha256──► CID
//!        │                                                          │
//!        └───────► RewardArtifact { performance_cid } ◄─────────────┘
//!                         │
//!                      encode ──► bytes
//! ```
//!
//! The reward artifact references the performance artifact by content
//! identifier, never the reverse, so the performance artifact is encoded
//! first.

use crate::{
    allocator::{Allocation, NetworkRewardAggregate, NodeRewardRecord, RewardTotals, ValidatorPerformance},
    primitives::{Interval, Slot, Timestamp},
};
use alloy_primitives::{Address, B256, U256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

/// Result type for artifact encoding.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Errors encoding or writing artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("artifact compression failed: {0}")]
    Compression(String),

    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Claimable rewards of one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardArtifact {
    pub ruleset_version: u64,
    pub index: u64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub consensus_start_block: Slot,
    pub consensus_end_block: Slot,
    pub execution_start_block: u64,
    pub execution_end_block: u64,
    pub intervals_passed: u64,
    pub merkle_root: B256,
    /// Content identifier of the matching performance artifact.
    pub performance_cid: String,
    pub totals: RewardTotals,
    pub network_rewards: BTreeMap<u64, NetworkRewardAggregate>,
    pub node_rewards: BTreeMap<Address, NodeRewardRecord>,
    #[serde(default)]
    pub invalid_network_nodes: BTreeMap<Address, u64>,
}

/// Per-validator performance of one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceArtifact {
    pub ruleset_version: u64,
    pub index: u64,
    pub start_slot: Slot,
    pub end_slot: Slot,
    pub validators: Vec<ValidatorPerformance>,
    #[serde(default)]
    pub megapool_voter_share: BTreeMap<Address, U256>,
}

/// Encoded artifact bytes and their content identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArtifact {
    pub bytes: Vec<u8>,
    pub cid: String,
}

/// Turns artifacts into bytes.
pub trait ArtifactCodec: Send + Sync {
    /// File extension of encoded artifacts, without the leading dot.
    fn extension(&self) -> &'static str;

    fn encode<T: Serialize>(&self, artifact: &T) -> ArtifactResult<EncodedArtifact>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> ArtifactResult<T>;
}

/// Content identifier of encoded bytes: hex sha256.
pub fn content_id(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// JSON compressed with zstd.
#[derive(Debug, Clone, Copy)]
pub struct ZstdJsonCodec {
    level: i32,
}

impl Default for ZstdJsonCodec {
    fn default() -> Self {
        Self { level: 19 }
    }
}

impl ZstdJsonCodec {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl ArtifactCodec for ZstdJsonCodec {
    fn extension(&self) -> &'static str {
        "json.zst"
    }

    fn encode<T: Serialize>(&self, artifact: &T) -> ArtifactResult<EncodedArtifact> {
        let json = serde_json::to_vec(artifact)?;
        let bytes = zstd::encode_all(json.as_slice(), self.level)
            .map_err(|err| ArtifactError::Compression(err.to_string()))?;
        let cid = content_id(&bytes);
        Ok(EncodedArtifact { bytes, cid })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> ArtifactResult<T> {
        let json =
            zstd::decode_all(bytes).map_err(|err| ArtifactError::Compression(err.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Both artifacts of an interval with their encodings.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub reward: RewardArtifact,
    pub performance: PerformanceArtifact,
    pub encoded_reward: EncodedArtifact,
    pub encoded_performance: EncodedArtifact,
    extension: &'static str,
}

impl ArtifactSet {
    /// Build and encode the artifacts of `allocation`, committed under `root`.
    pub fn build<K: ArtifactCodec>(
        codec: &K,
        interval: &Interval,
        allocation: &Allocation,
        root: B256,
    ) -> ArtifactResult<Self> {
        let performance = PerformanceArtifact {
            ruleset_version: allocation.ruleset.version,
            index: interval.index,
            start_slot: interval.start_slot,
            end_slot: interval.end_slot,
            validators: allocation.performance.clone(),
            megapool_voter_share: allocation.megapool_voter_share.clone(),
        };
        let encoded_performance = codec.encode(&performance)?;

        let reward = RewardArtifact {
            ruleset_version: allocation.ruleset.version,
            index: interval.index,
            start_time: interval.start_time,
            end_time: interval.end_time,
            consensus_start_block: interval.start_slot,
            consensus_end_block: interval.end_slot,
            execution_start_block: interval.execution_start_block,
            execution_end_block: interval.execution_end_block,
            intervals_passed: interval.intervals_passed,
            merkle_root: root,
            performance_cid: encoded_performance.cid.clone(),
            totals: allocation.totals.clone(),
            network_rewards: allocation.network_rewards.clone(),
            node_rewards: allocation.node_rewards.clone(),
            invalid_network_nodes: allocation.invalid_network_nodes.clone(),
        };
        let encoded_reward = codec.encode(&reward)?;

        Ok(Self {
            reward,
            performance,
            encoded_reward,
            encoded_performance,
            extension: codec.extension(),
        })
    }

    pub fn reward_file_name(&self) -> String {
        format!("rewards-tree-{}.{}", self.reward.index, self.extension)
    }

    pub fn performance_file_name(&self) -> String {
        format!("performance-{}.{}", self.performance.index, self.extension)
    }

    /// Write both encoded artifacts into `dir`, returning their paths.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> ArtifactResult<(PathBuf, PathBuf)> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let performance = dir.join(self.performance_file_name());
        fs::write(&performance, &self.encoded_performance.bytes)?;
        let reward = dir.join(self.reward_file_name());
        fs::write(&reward, &self.encoded_reward.bytes)?;
        info!(
            target: "rewards::artifact",
            reward = %reward.display(),
            performance = %performance.display(),
            cid = %self.encoded_reward.cid,
            "Wrote artifacts"
        );
        Ok((reward, performance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{allocator::RulesetPolicy, primitives::eth};

    fn allocation() -> Allocation {
        let node = Address::repeat_byte(1);
        Allocation {
            ruleset: RulesetPolicy::V10,
            node_rewards: BTreeMap::from([(
                node,
                NodeRewardRecord { collateral_rpl: eth(5), smoothing_pool_eth: eth(1), ..Default::default() },
            )]),
            network_rewards: BTreeMap::from([(0, NetworkRewardAggregate::default())]),
            invalid_network_nodes: BTreeMap::new(),
            totals: RewardTotals { protocol_dao_rpl: eth(2), ..Default::default() },
            performance: Vec::new(),
            megapool_voter_share: BTreeMap::new(),
        }
    }

    fn interval() -> Interval {
        Interval { index: 31, start_slot: 64, end_slot: 255, ..Default::default() }
    }

    #[test]
    fn test_reward_references_performance_cid() {
        let codec = ZstdJsonCodec::default();
        let set = ArtifactSet::build(&codec, &interval(), &allocation(), B256::repeat_byte(7)).unwrap();

        assert_eq!(set.reward.performance_cid, set.encoded_performance.cid);
        assert_eq!(set.encoded_performance.cid, content_id(&set.encoded_performance.bytes));
        assert_eq!(set.encoded_reward.cid.len(), 64);
        assert_eq!(set.reward.ruleset_version, 10);

        let decoded: RewardArtifact = codec.decode(&set.encoded_reward.bytes).unwrap();
        assert_eq!(decoded, set.reward);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let codec = ZstdJsonCodec::with_level(3);
        let a = ArtifactSet::build(&codec, &interval(), &allocation(), B256::ZERO).unwrap();
        let b = ArtifactSet::build(&codec, &interval(), &allocation(), B256::ZERO).unwrap();
        assert_eq!(a.encoded_reward, b.encoded_reward);
        assert_eq!(a.encoded_performance, b.encoded_performance);
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ZstdJsonCodec::default();
        let set = ArtifactSet::build(&codec, &interval(), &allocation(), B256::ZERO).unwrap();

        let (reward, performance) = set.write_to(dir.path()).unwrap();
        assert!(reward.ends_with("rewards-tree-31.json.zst"));
        assert!(performance.ends_with("performance-31.json.zst"));
        assert_eq!(fs::read(&reward).unwrap(), set.encoded_reward.bytes);

        let decoded: PerformanceArtifact = codec.decode(&fs::read(performance).unwrap()).unwrap();
        assert_eq!(decoded, set.performance);
    }
}
