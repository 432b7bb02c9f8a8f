//! Rolling attestation records.
//!
//! A [`RollingRecord`] accumulates scorer output for one reward interval and
//! is the only mutable state persisted between runs.
//!
//! # Components
//!
//! - [`RollingRecord`]: scores, slot sets and withdrawal totals for `[start_slot, last_duties_slot]`
//! - [`CheckpointStore`]: where compressed checkpoints and the checksum index live
//! - [`RollingRecordManager`]: checkpoint cadence, best-checkpoint selection and rollback
//!
//! # State machine
//!
//! ```text
//!   Empty ──update──► Advancing ──boundary──► AtCheckpoint ──update──► Advancing
//!     ▲                   │                        │
//!     │                   └──error──► reload best ─┘
//!     └── interval advanced: fresh record at the new start slot
//! ```

mod checkpoint;
mod manager;

pub use checkpoint::{
    decode_checkpoint, encode_checkpoint, CheckpointEntry, CheckpointError, CheckpointResult,
    CheckpointStore, ChecksumIndex, EncodedCheckpoint, FileCheckpointStore, MemoryCheckpointStore,
    RecordVersion, CHECKSUM_INDEX_FILE,
};
pub use manager::{ManagerConfig, RecordError, RecordResult, RollingRecordManager};

use crate::{
    chain::ChainDataPort,
    primitives::{safe_arith::Result as ArithResult, BlsPubkey, SafeArith, Slot, ValidatorIndex},
    scorer::{
        AttestationCredit, AttestationScorer, ProtocolValidator, ScorerConfig, ScorerResult,
        ScoringContext, ValidatorKind,
    },
};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Format version written into new records.
pub const RECORD_FORMAT_VERSION: &str = "1.11.0";

/// Accumulated duties of one protocol validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorDuty {
    pub pubkey: BlsPubkey,
    pub node: Address,
    pub kind: ValidatorKind,
    /// Sum of the per-attestation node scores.
    pub attestation_score: U256,
    /// Sum of the per-attestation voter scores (megapools only).
    #[serde(default)]
    pub voter_score: U256,
    /// Sum of the per-attestation pDAO scores (megapools only).
    #[serde(default)]
    pub pdao_score: U256,
    pub completed_slots: BTreeSet<Slot>,
    pub missing_slots: BTreeSet<Slot>,
    /// Whether the validator was active at any point of the interval.
    #[serde(default)]
    pub was_active: bool,
}

impl ValidatorDuty {
    fn new(validator: &ProtocolValidator) -> Self {
        Self {
            pubkey: validator.pubkey,
            node: validator.node,
            kind: validator.kind,
            attestation_score: U256::ZERO,
            voter_score: U256::ZERO,
            pdao_score: U256::ZERO,
            completed_slots: BTreeSet::new(),
            missing_slots: BTreeSet::new(),
            was_active: false,
        }
    }

    /// Number of successful attestations.
    pub fn attestation_count(&self) -> u64 {
        self.completed_slots.len() as u64
    }

    /// Whether the validator had any duty at all.
    pub fn has_duties(&self) -> bool {
        !self.completed_slots.is_empty() || !self.missing_slots.is_empty()
    }
}

/// Scores and withdrawal totals of one reward interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingRecord {
    /// First slot of the interval.
    pub start_slot: Slot,
    /// Last slot whose duties have been collected. `None` before the first update.
    pub last_duties_slot: Option<Slot>,
    /// Interval index the record belongs to.
    pub rewards_interval: u64,
    /// Version of the software that wrote the record.
    #[serde(default)]
    pub format_version: String,
    pub total_attestation_score: U256,
    pub successful_attestations: u64,
    #[serde(default)]
    pub total_voter_score: U256,
    #[serde(default)]
    pub total_pdao_score: U256,
    #[serde(serialize_with = "serialize_with_duties")]
    validators: BTreeMap<ValidatorIndex, ValidatorDuty>,
    /// Consensus income per minipool, for bonus commission.
    #[serde(default)]
    pub withdrawals: BTreeMap<Address, U256>,
}

/// Validators without any duty are not written out.
fn serialize_with_duties<S: Serializer>(
    validators: &BTreeMap<ValidatorIndex, ValidatorDuty>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(validators.iter().filter(|(_, duty)| duty.has_duties()))
}

impl RollingRecord {
    /// An empty record for `rewards_interval` starting at `start_slot`.
    pub fn new(start_slot: Slot, rewards_interval: u64) -> Self {
        Self {
            start_slot,
            last_duties_slot: None,
            rewards_interval,
            format_version: RECORD_FORMAT_VERSION.to_string(),
            total_attestation_score: U256::ZERO,
            successful_attestations: 0,
            total_voter_score: U256::ZERO,
            total_pdao_score: U256::ZERO,
            validators: BTreeMap::new(),
            withdrawals: BTreeMap::new(),
        }
    }

    /// Duties of validator `index`.
    pub fn validator(&self, index: ValidatorIndex) -> Option<&ValidatorDuty> {
        self.validators.get(&index)
    }

    /// All validators with duties, by beacon index.
    pub fn validators(&self) -> &BTreeMap<ValidatorIndex, ValidatorDuty> {
        &self.validators
    }

    /// Whether the record has collected duties up to `slot`.
    pub fn is_past(&self, slot: Slot) -> bool {
        self.last_duties_slot.is_some_and(|last| last > slot)
    }

    /// Epoch of the last collected duty, zero before the first update.
    pub fn last_duties_epoch(&self, slots_per_epoch: u64) -> u64 {
        self.last_duties_slot.unwrap_or(self.start_slot) / slots_per_epoch
    }

    /// Flag `slot` as a duty of `validator`, missing until an attestation is seen.
    pub fn record_duty(&mut self, validator: &ProtocolValidator, slot: Slot, was_active: bool) {
        let duty =
            self.validators.entry(validator.index).or_insert_with(|| ValidatorDuty::new(validator));
        duty.was_active |= was_active;
        if !duty.completed_slots.contains(&slot) {
            duty.missing_slots.insert(slot);
        }
    }

    /// Credit a successful attestation of `validator` at `slot`.
    ///
    /// A slot moves from missing to completed at most once; repeated
    /// inclusions of the same duty are not credited again.
    pub fn record_attestation(
        &mut self,
        validator: &ProtocolValidator,
        slot: Slot,
        credit: AttestationCredit,
    ) -> ArithResult<()> {
        let duty =
            self.validators.entry(validator.index).or_insert_with(|| ValidatorDuty::new(validator));
        if !duty.completed_slots.insert(slot) {
            return Ok(());
        }
        duty.missing_slots.remove(&slot);
        duty.attestation_score.safe_add_assign(credit.score)?;
        duty.voter_score.safe_add_assign(credit.voter_score)?;
        duty.pdao_score.safe_add_assign(credit.pdao_score)?;

        self.total_attestation_score.safe_add_assign(credit.score)?;
        self.total_voter_score.safe_add_assign(credit.voter_score)?;
        self.total_pdao_score.safe_add_assign(credit.pdao_score)?;
        self.successful_attestations.safe_add_assign(1)?;
        Ok(())
    }

    /// Add consensus income to a minipool's withdrawal total.
    pub fn add_withdrawal(&mut self, minipool: Address, amount: U256) -> ArithResult<()> {
        self.withdrawals.entry(minipool).or_default().safe_add_assign(amount)
    }

    /// Score duties up to `target` with a fresh [`AttestationScorer`].
    pub async fn update_to_slot<C: ChainDataPort + ?Sized>(
        &mut self,
        chain: &C,
        context: &ScoringContext,
        config: &ScorerConfig,
        target: Slot,
    ) -> ScorerResult<()> {
        AttestationScorer::new(chain, context, config.clone()).score_to_slot(self, target).await
    }
}
