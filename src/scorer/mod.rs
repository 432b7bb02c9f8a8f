//! Attestation scoring.
//!
//! Turns committee assignments and included attestations into per-validator
//! scores on a [`RollingRecord`].
//!
//! ```text
//!            epoch e                                  epoch e+1
//! ┌──────────────────────────────┐         ┌──────────────────────────┐
//! │ committees ─┐                │         │                          │
//! │ block s0  ──┤  fan-out,      │         │                          │
//! │ block s1  ──┤  bounded by    │ fan-in  │  duties of e still       │
//! │   ...       │  max_concurrent├────────►│  pending in the ledger   │
//! │ block s31 ──┘  _fetches      │         │  match e+1 attestations  │
//! └──────────────────────────────┘         └──────────────────────────┘
//!        │ register duties (missing)
//!        │ match attestations (completed + score)
//!        ▼ merge withdrawals
//!   RollingRecord
//! ```
//!
//! Duty matching runs single-threaded after every fetch of an epoch has
//! completed. A failed fetch aborts the epoch before anything is applied.

mod context;
mod duties;

pub use context::{AttestationCredit, ProtocolValidator, ScoringContext, ValidatorKind};
pub use duties::{DutyLedger, PendingDuty};

#[cfg(test)]
pub(crate) use context::test_utils;

use crate::{
    chain::{ChainDataPort, ChainError},
    primitives::{ArithError, BeaconBlock, Epoch, EpochCommittees, Slot, ValidatorIndex},
    record::RollingRecord,
};
use alloy_primitives::{Address, U256};
use futures::{stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Result type for scoring.
pub type ScorerResult<T> = Result<T, ScorerError>;

/// Errors that abort scoring of an epoch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScorerError {
    /// Chain data could not be fetched.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Score arithmetic failed.
    #[error("score arithmetic failed: {0}")]
    Arith(#[from] ArithError),

    /// A pending duty references a validator the context does not know.
    #[error("validator {0} is not a protocol validator")]
    UnknownValidator(ValidatorIndex),
}

/// Configuration for the attestation scorer.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Maximum number of beacon block requests in flight per epoch.
    pub max_concurrent_fetches: usize,
    /// Maximum inclusion delay, in slots, of a counted attestation.
    /// `None` uses one epoch.
    pub stale_inclusion_slots: Option<u64>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self { max_concurrent_fetches: 12, stale_inclusion_slots: None }
    }
}

impl ScorerConfig {
    /// Set the fetch concurrency limit.
    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit;
        self
    }

    /// Set the maximum inclusion delay.
    pub fn with_stale_inclusion_slots(mut self, slots: u64) -> Self {
        self.stale_inclusion_slots = Some(slots);
        self
    }
}

/// Everything fetched for one epoch.
#[derive(Debug)]
struct EpochData {
    epoch: Epoch,
    committees: Option<EpochCommittees>,
    blocks: Vec<(Slot, Option<BeaconBlock>)>,
    withdrawals: BTreeMap<Address, U256>,
}

/// Slots whose duties and withdrawals may still be counted.
#[derive(Debug, Clone, Copy)]
struct ScanWindow {
    /// Exclusive lower bound: slots already handled by a previous update.
    after: Option<Slot>,
    /// Inclusive lower bound: the record's start slot.
    from: Slot,
    /// Inclusive upper bound.
    to: Slot,
}

impl ScanWindow {
    fn contains(&self, slot: Slot) -> bool {
        slot >= self.from && slot <= self.to && self.after.map_or(true, |after| slot > after)
    }
}

/// Per-epoch tallies for logging.
#[derive(Debug, Default)]
struct EpochTally {
    duties: usize,
    matched: usize,
}

/// Scores the attestation duties of protocol validators.
///
/// A scorer lives for one update of a record. It owns the ledger of duties
/// still waiting for an attestation, which is cleared once the late
/// inclusion pass after the last epoch has run.
#[derive(Debug)]
pub struct AttestationScorer<'a, C: ?Sized> {
    chain: &'a C,
    context: &'a ScoringContext,
    config: ScorerConfig,
    ledger: DutyLedger,
}

impl<'a, C: ChainDataPort + ?Sized> AttestationScorer<'a, C> {
    /// Create a scorer over `chain` for the validators in `context`.
    pub fn new(chain: &'a C, context: &'a ScoringContext, config: ScorerConfig) -> Self {
        Self { chain, context, config, ledger: DutyLedger::new() }
    }

    /// Duties still waiting for an attestation.
    pub fn pending_duties(&self) -> usize {
        self.ledger.len()
    }

    fn stale_cutoff(&self) -> u64 {
        self.config.stale_inclusion_slots.unwrap_or(self.context.beacon().slots_per_epoch)
    }

    /// Advance `record` so duties up to `target` are scored.
    ///
    /// Every epoch from the record's next unscored slot through the epoch of
    /// `target` is fetched, registered and matched in order. The epoch after
    /// `target` is then scanned for late attestations only. On error the
    /// epochs completed so far stay applied and the failing epoch is dropped;
    /// callers reload a checkpoint in that case.
    pub async fn score_to_slot(
        &mut self,
        record: &mut RollingRecord,
        target: Slot,
    ) -> ScorerResult<()> {
        let beacon = *self.context.beacon();
        let first_slot = record.last_duties_slot.map_or(record.start_slot, |last| last + 1);
        let target = target.min(self.context.end_slot().max(record.start_slot));
        if first_slot > target {
            return Ok(());
        }

        let window = ScanWindow { after: record.last_duties_slot, from: record.start_slot, to: target };
        let start_epoch = beacon.epoch_of(first_slot);
        let end_epoch = beacon.epoch_of(target);

        for epoch in start_epoch..=end_epoch {
            let data = self.fetch_epoch(epoch, true, Some(window)).await?;
            let tally = self.apply_epoch(record, data, window)?;
            record.last_duties_slot = Some(beacon.epoch_end_slot(epoch).min(target));

            debug!(
                target: "rewards::scorer",
                epoch,
                duties = tally.duties,
                matched = tally.matched,
                pending = self.ledger.len(),
                "Scored epoch"
            );
        }

        // attestations for the last slots are included in the following epoch
        let late = self.fetch_epoch(end_epoch + 1, false, None).await?;
        let tally = self.apply_epoch(record, late, window)?;
        debug!(
            target: "rewards::scorer",
            epoch = end_epoch + 1,
            matched = tally.matched,
            missed = self.ledger.len(),
            "Processed late attestations"
        );
        self.ledger.clear();

        Ok(())
    }

    /// Fetch the committees (when `with_duties`) and every block of `epoch`.
    ///
    /// Withdrawal income of blocks inside `withdrawal_window` is accumulated
    /// while the fetches complete.
    async fn fetch_epoch(
        &self,
        epoch: Epoch,
        with_duties: bool,
        withdrawal_window: Option<ScanWindow>,
    ) -> ScorerResult<EpochData> {
        let beacon = self.context.beacon();
        let slots = beacon.epoch_start_slot(epoch)..=beacon.epoch_end_slot(epoch);
        let withdrawals = Mutex::new(BTreeMap::<Address, U256>::new());

        let committees = async {
            if with_duties {
                self.chain.committees_for_epoch(epoch).await.map(Some)
            } else {
                Ok(None)
            }
        };

        let blocks = stream::iter(slots)
            .map(|slot| {
                let withdrawals = &withdrawals;
                async move {
                    let block = self.chain.beacon_block(slot).await?;
                    match &block {
                        Some(block) => {
                            if withdrawal_window.is_some_and(|window| window.contains(slot)) {
                                self.accumulate_withdrawals(block, withdrawals);
                            }
                        }
                        None => trace!(target: "rewards::scorer", slot, "Missing block"),
                    }
                    Ok::<_, ChainError>((slot, block))
                }
            })
            .buffered(self.config.max_concurrent_fetches.max(1))
            .try_collect::<Vec<_>>();

        let (committees, blocks) = futures::try_join!(committees, blocks)?;

        Ok(EpochData { epoch, committees, blocks, withdrawals: withdrawals.into_inner() })
    }

    fn accumulate_withdrawals(&self, block: &BeaconBlock, withdrawals: &Mutex<BTreeMap<Address, U256>>) {
        for withdrawal in &block.withdrawals {
            let Some(validator) = self.context.validator(withdrawal.validator_index) else {
                continue;
            };
            let Some(income) =
                self.context.withdrawal_income(validator, block.slot, withdrawal.amount)
            else {
                continue;
            };
            let mut withdrawals = withdrawals.lock();
            let total = withdrawals.entry(validator.kind.address()).or_default();
            *total = total.saturating_add(income);
        }
    }

    /// Register duties, match attestations and merge withdrawals of one epoch.
    fn apply_epoch(
        &mut self,
        record: &mut RollingRecord,
        data: EpochData,
        window: ScanWindow,
    ) -> ScorerResult<EpochTally> {
        let mut tally = EpochTally::default();

        if let Some(committees) = &data.committees {
            tally.duties = self.register_duties(record, committees, window);
        }

        let stale_cutoff = self.stale_cutoff();
        for (inclusion_slot, block) in &data.blocks {
            let Some(block) = block else { continue };
            for attestation in &block.attestations {
                if inclusion_slot.saturating_sub(attestation.slot) > stale_cutoff {
                    continue;
                }
                if !self.ledger.has_committee(attestation.slot, attestation.committee_index) {
                    continue;
                }
                for position in self.ledger.positions(attestation.slot, attestation.committee_index) {
                    if !attestation.has_participant(position) {
                        continue;
                    }
                    let Some(duty) =
                        self.ledger.take(attestation.slot, attestation.committee_index, position)
                    else {
                        continue;
                    };
                    let validator = self
                        .context
                        .validator(duty.validator)
                        .ok_or(ScorerError::UnknownValidator(duty.validator))?;
                    let credit = self.context.credit(validator, duty.slot)?;
                    record.record_attestation(validator, duty.slot, credit)?;
                    tally.matched += 1;
                }
            }
        }

        for (address, amount) in data.withdrawals {
            record.add_withdrawal(address, amount)?;
        }

        // nothing included after the next epoch can match duties older than the cutoff
        let next_start = self.context.beacon().epoch_start_slot(data.epoch + 1);
        self.ledger.prune_before(next_start.saturating_sub(stale_cutoff));

        Ok(tally)
    }

    fn register_duties(
        &mut self,
        record: &mut RollingRecord,
        committees: &EpochCommittees,
        window: ScanWindow,
    ) -> usize {
        let mut registered = 0;
        for committee in &committees.committees {
            if !window.contains(committee.slot) {
                continue;
            }
            for (position, index) in committee.validators.iter().enumerate() {
                let Some(validator) = self.context.validator(*index) else {
                    continue;
                };
                if !self.context.has_scored_duty(validator, committee.slot) {
                    continue;
                }
                self.ledger.register(PendingDuty {
                    slot: committee.slot,
                    committee_index: committee.index,
                    position,
                    validator: *index,
                });
                let was_active = self.context.was_active_during(validator, record.start_slot);
                record.record_duty(validator, committee.slot, was_active);
                registered += 1;
            }
        }
        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::MemoryChain,
        primitives::{
            fraction_eth, Attestation, BeaconConfig, Committee, NetworkSnapshot, Withdrawal,
        },
    };
    use test_utils::*;

    fn context(snapshot: &NetworkSnapshot, end_slot: Slot, bonus: bool) -> ScoringContext {
        ScoringContext::from_snapshot(snapshot, BeaconConfig::default(), end_slot, bonus).unwrap()
    }

    /// One committee per slot of `epoch`, containing `validators`.
    fn insert_epoch(chain: &MemoryChain, epoch: Epoch, validators: &[u64]) {
        let committees = (epoch * 32..epoch * 32 + 32)
            .map(|slot| Committee { slot, index: 0, validators: validators.to_vec() })
            .collect();
        chain.insert_committees(EpochCommittees::new(epoch, committees));
    }

    /// A block at `slot` attesting to `attested` with the given bits.
    fn attesting_block(slot: Slot, attested: Slot, bits: Vec<bool>) -> BeaconBlock {
        BeaconBlock {
            slot,
            attestations: vec![Attestation { slot: attested, committee_index: 0, aggregation_bits: bits }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scores_attestations_and_misses() {
        let snapshot = snapshot_with_minipools(&[1, 2]);
        let context = context(&snapshot, 63, false);
        let chain = MemoryChain::new();
        insert_epoch(&chain, 0, &[1, 2]);
        insert_epoch(&chain, 1, &[1, 2]);
        insert_epoch(&chain, 2, &[1, 2]);
        // validator 1 attests to every slot of epoch 0 one slot late, validator 2 never does
        for slot in 0..32 {
            chain.insert_block(attesting_block(slot + 1, slot, vec![true, false]));
        }

        let mut record = RollingRecord::new(0, 5);
        let mut scorer = AttestationScorer::new(&chain, &context, ScorerConfig::default());
        scorer.score_to_slot(&mut record, 31).await.unwrap();

        assert_eq!(record.last_duties_slot, Some(31));
        assert_eq!(scorer.pending_duties(), 0);

        let first = record.validator(1).unwrap();
        assert_eq!(first.completed_slots.len(), 32);
        assert!(first.missing_slots.is_empty());
        assert_eq!(first.attestation_score, fraction_eth(325, 1000) * U256::from(32u64));

        let second = record.validator(2).unwrap();
        assert!(second.completed_slots.is_empty());
        assert_eq!(second.missing_slots.len(), 32);

        assert_eq!(record.successful_attestations, 32);
        assert_eq!(record.total_attestation_score, first.attestation_score);
    }

    #[tokio::test]
    async fn test_ignores_stale_inclusion() {
        let snapshot = snapshot_with_minipools(&[1]);
        let context = context(&snapshot, 63, false);
        let chain = MemoryChain::new();
        insert_epoch(&chain, 0, &[1]);
        insert_epoch(&chain, 1, &[1]);
        // included 33 slots after the duty
        chain.insert_block(attesting_block(33, 0, vec![true]));
        // included exactly one epoch after the duty
        chain.insert_block(attesting_block(33, 1, vec![true]));

        let mut record = RollingRecord::new(0, 5);
        let mut scorer = AttestationScorer::new(&chain, &context, ScorerConfig::default());
        scorer.score_to_slot(&mut record, 31).await.unwrap();

        let duty = record.validator(1).unwrap();
        assert!(duty.missing_slots.contains(&0));
        assert!(duty.completed_slots.contains(&1));
    }

    #[tokio::test]
    async fn test_opted_out_node_has_no_duties() {
        let mut snapshot = snapshot_with_minipools(&[1, 2]);
        snapshot.nodes[1].smoothing_pool_registered = false;
        snapshot.nodes[1].smoothing_pool_changed_time = 1;
        let context = context(&snapshot, 63, false);
        let chain = MemoryChain::new();
        insert_epoch(&chain, 0, &[1, 2]);

        let mut record = RollingRecord::new(0, 5);
        let mut scorer = AttestationScorer::new(&chain, &context, ScorerConfig::default());
        scorer.score_to_slot(&mut record, 31).await.unwrap();

        assert!(record.validator(1).is_some());
        assert!(record.validator(2).is_none());
    }

    #[tokio::test]
    async fn test_failed_epoch_is_not_applied() {
        let snapshot = snapshot_with_minipools(&[1]);
        let context = context(&snapshot, 127, false);
        let chain = MemoryChain::new();
        insert_epoch(&chain, 0, &[1]);
        insert_epoch(&chain, 1, &[1]);
        chain.insert_block(attesting_block(40, 35, vec![true]));
        chain.fail_block(50);

        let mut record = RollingRecord::new(0, 5);
        let mut scorer = AttestationScorer::new(&chain, &context, ScorerConfig::default());
        let err = scorer.score_to_slot(&mut record, 63).await.unwrap_err();

        assert_eq!(err, ScorerError::Chain(ChainError::BlockUnavailable(50)));
        // epoch 0 completed, epoch 1 left no trace
        assert_eq!(record.last_duties_slot, Some(31));
        let duty = record.validator(1).unwrap();
        assert!(duty.completed_slots.is_empty());
        assert!(duty.missing_slots.iter().all(|slot| *slot < 32));
    }

    #[tokio::test]
    async fn test_resumes_after_last_duties_slot() {
        let snapshot = snapshot_with_minipools(&[1]);
        let context = context(&snapshot, 127, false);
        let chain = MemoryChain::new();
        for epoch in 0..3 {
            insert_epoch(&chain, epoch, &[1]);
        }

        let mut record = RollingRecord::new(0, 5);
        AttestationScorer::new(&chain, &context, ScorerConfig::default())
            .score_to_slot(&mut record, 40)
            .await
            .unwrap();
        assert_eq!(record.last_duties_slot, Some(40));
        assert_eq!(record.validator(1).unwrap().missing_slots.len(), 41);

        AttestationScorer::new(&chain, &context, ScorerConfig::default())
            .score_to_slot(&mut record, 63)
            .await
            .unwrap();
        assert_eq!(record.last_duties_slot, Some(63));
        assert_eq!(record.validator(1).unwrap().missing_slots.len(), 64);

        // no-op when already past the target
        AttestationScorer::new(&chain, &context, ScorerConfig::default())
            .score_to_slot(&mut record, 50)
            .await
            .unwrap();
        assert_eq!(record.last_duties_slot, Some(63));
    }

    #[tokio::test]
    async fn test_megapool_scores_voter_and_pdao() {
        let mut snapshot = snapshot_with_minipools(&[]);
        add_megapool(&mut snapshot, 3, &[30]);
        let context = context(&snapshot, 63, false);
        let chain = MemoryChain::new();
        insert_epoch(&chain, 0, &[30]);
        chain.insert_block(attesting_block(1, 0, vec![true]));

        let mut record = RollingRecord::new(0, 5);
        AttestationScorer::new(&chain, &context, ScorerConfig::default())
            .score_to_slot(&mut record, 31)
            .await
            .unwrap();

        let duty = record.validator(30).unwrap();
        assert_eq!(duty.attestation_score, fraction_eth(54, 320));
        assert_eq!(duty.voter_score, fraction_eth(252, 3200));
        assert_eq!(duty.pdao_score, fraction_eth(28, 3200));
        assert_eq!(record.total_voter_score, duty.voter_score);
        assert_eq!(record.total_pdao_score, duty.pdao_score);
    }

    #[tokio::test]
    async fn test_accumulates_withdrawals_in_window() {
        let snapshot = snapshot_with_minipools(&[1]);
        let context = context(&snapshot, 63, true);
        let chain = MemoryChain::new();
        insert_epoch(&chain, 0, &[]);
        for slot in [3, 7] {
            chain.insert_block(BeaconBlock {
                slot,
                withdrawals: vec![Withdrawal { validator_index: 1, amount: 10_000_000 }],
                ..Default::default()
            });
        }
        // late-pass epoch withdrawals are not counted
        chain.insert_block(BeaconBlock {
            slot: 40,
            withdrawals: vec![Withdrawal { validator_index: 1, amount: 10_000_000 }],
            ..Default::default()
        });

        let mut record = RollingRecord::new(0, 5);
        AttestationScorer::new(&chain, &context, ScorerConfig::default().with_max_concurrent_fetches(4))
            .score_to_slot(&mut record, 31)
            .await
            .unwrap();

        let minipool = snapshot.minipools[0].address;
        assert_eq!(record.withdrawals.get(&minipool), Some(&fraction_eth(2, 100)));
    }

    #[test]
    fn test_config_defaults() {
        let config = ScorerConfig::default();
        assert_eq!(config.max_concurrent_fetches, 12);
        assert_eq!(config.stale_inclusion_slots, None);

        let config = config.with_max_concurrent_fetches(4).with_stale_inclusion_slots(64);
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.stale_inclusion_slots, Some(64));
    }
}
