//! Checkpointed rolling record management.

use super::{
    checkpoint::{
        decode_checkpoint, encode_checkpoint, CheckpointEntry,
        CheckpointError, CheckpointStore, ChecksumIndex, RecordVersion, CHECKSUM_INDEX_FILE,
    },
    RollingRecord, RECORD_FORMAT_VERSION,
};
use crate::{
    chain::ChainDataPort,
    primitives::{BeaconConfig, Epoch, Interval, Slot},
    scorer::{ScorerConfig, ScorerError, ScoringContext},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result type for record management.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors from advancing or persisting a rolling record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Scoring an epoch failed.
    #[error("scoring failed: {0}")]
    Scorer(#[from] ScorerError),

    /// Reading or writing checkpoints failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The best checkpoint already covers slots past the requested one.
    #[error("record has duties up to slot {last_duties_slot}, past the requested slot {target}")]
    RecordPastTarget { last_duties_slot: Slot, target: Slot },
}

/// Configuration for the rolling record manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Epochs between checkpoints.
    pub checkpoint_interval_epochs: u64,
    /// Number of checkpoints kept in the index.
    pub retention_limit: usize,
    /// zstd compression level for checkpoint files.
    pub compression_level: i32,
    /// Oldest record version that can be resumed from.
    pub min_compatible_version: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_epochs: 100,
            retention_limit: 2,
            compression_level: 19,
            min_compatible_version: RECORD_FORMAT_VERSION.to_string(),
        }
    }
}

impl ManagerConfig {
    /// Set the checkpoint interval.
    pub fn with_checkpoint_interval_epochs(mut self, epochs: u64) -> Self {
        self.checkpoint_interval_epochs = epochs.max(1);
        self
    }

    /// Set the retention limit.
    pub fn with_retention_limit(mut self, limit: usize) -> Self {
        self.retention_limit = limit;
        self
    }

    /// Set the compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }
}

/// Owns the rolling record of the current interval and its checkpoints.
///
/// The record is advanced in chunks that stop at every checkpoint epoch so
/// the checkpoint is written before scanning continues. A failed update
/// discards the in-memory record and reloads the best checkpoint.
#[derive(Debug)]
pub struct RollingRecordManager<C: ?Sized, S> {
    chain: Arc<C>,
    store: S,
    beacon: BeaconConfig,
    config: ManagerConfig,
    scorer_config: ScorerConfig,
    start_slot: Slot,
    next_epoch_to_save: Epoch,
    record: RollingRecord,
}

impl<C, S> RollingRecordManager<C, S>
where
    C: ChainDataPort + ?Sized,
    S: CheckpointStore,
{
    /// Create a manager with an empty record for `interval`.
    pub fn new(
        chain: Arc<C>,
        store: S,
        beacon: BeaconConfig,
        interval: &Interval,
        config: ManagerConfig,
        scorer_config: ScorerConfig,
    ) -> Self {
        info!(target: "rewards::record", start_slot = interval.start_slot, interval = interval.index, "Created rolling record manager");
        let mut manager = Self {
            chain,
            store,
            beacon,
            config,
            scorer_config,
            start_slot: interval.start_slot,
            next_epoch_to_save: 0,
            record: RollingRecord::new(interval.start_slot, interval.index),
        };
        manager.reset_record(interval.start_slot, interval.index);
        manager
    }

    /// The current record.
    pub fn record(&self) -> &RollingRecord {
        &self.record
    }

    /// Consume the manager, returning its record.
    pub fn into_record(self) -> RollingRecord {
        self.record
    }

    /// The checkpoint store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Epoch at which the next checkpoint is written.
    pub fn next_epoch_to_save(&self) -> Epoch {
        self.next_epoch_to_save
    }

    fn reset_record(&mut self, start_slot: Slot, rewards_interval: u64) {
        self.start_slot = start_slot;
        self.record = RollingRecord::new(start_slot, rewards_interval);
        self.next_epoch_to_save = (self.beacon.epoch_of(start_slot)
            + self.config.checkpoint_interval_epochs)
            .saturating_sub(1);
    }

    fn read_index(&self) -> RecordResult<Option<ChecksumIndex>> {
        let Some(bytes) = self.store.read(CHECKSUM_INDEX_FILE)? else {
            return Ok(None);
        };
        let contents = String::from_utf8_lossy(&bytes);
        Ok(Some(ChecksumIndex::parse(&contents)?))
    }

    /// Persist `record` as a checkpoint and update the index.
    ///
    /// Returns the checkpoint filename. Entries beyond the retention limit are
    /// removed from the index, oldest first, together with their files.
    pub fn save_record(&self, record: &RollingRecord) -> RecordResult<String> {
        let encoded = encode_checkpoint(record, self.config.compression_level)?;
        let slot = record.last_duties_slot.unwrap_or(record.start_slot);
        let epoch = self.beacon.epoch_of(slot);
        let entry = CheckpointEntry::new(encoded.checksum.clone(), slot, epoch);
        let filename = entry.filename.clone();

        self.store.write(&filename, &encoded.bytes)?;

        let mut index = self.read_index()?.unwrap_or_default();
        index.upsert(entry);
        for culled in index.cull(self.config.retention_limit) {
            if self.store.delete(&culled.filename)? {
                info!(target: "rewards::record", file = %culled.filename, "Removed checkpoint beyond the retention limit");
            } else {
                info!(target: "rewards::record", file = %culled.filename, "Checkpoint beyond the retention limit was already gone");
            }
        }
        self.store.write(CHECKSUM_INDEX_FILE, index.to_string().as_bytes())?;

        info!(
            target: "rewards::record",
            slot,
            epoch,
            file = %filename,
            checksum = %encoded.checksum,
            "Saved record checkpoint"
        );
        Ok(filename)
    }

    /// Check a decoded checkpoint against the requested interval.
    fn validate(
        &self,
        record: &RollingRecord,
        start_slot: Slot,
        rewards_interval: u64,
    ) -> Result<(), CheckpointError> {
        if record.rewards_interval != rewards_interval {
            return Err(CheckpointError::IntervalMismatch {
                expected: rewards_interval,
                found: record.rewards_interval,
            });
        }
        if record.start_slot != start_slot {
            return Err(CheckpointError::StartSlotMismatch {
                expected: start_slot,
                found: record.start_slot,
            });
        }
        let minimum: RecordVersion = self.config.min_compatible_version.parse()?;
        let version = RecordVersion::of_record(record)?;
        if version < minimum {
            return Err(CheckpointError::IncompatibleVersion {
                version: version.to_string(),
                minimum: minimum.to_string(),
            });
        }
        Ok(())
    }

    fn load_entry(&self, entry: &CheckpointEntry) -> Result<RollingRecord, CheckpointError> {
        let bytes = self
            .store
            .read(&entry.filename)?
            .ok_or_else(|| CheckpointError::MissingFile(entry.filename.clone()))?;
        decode_checkpoint(&entry.filename, &bytes, &entry.checksum)
    }

    /// Load the newest usable checkpoint at or before `target_slot`.
    ///
    /// Candidates are tried newest first. Checkpoints past the target are
    /// skipped and the scan stops at the first one older than `start_slot`.
    /// A candidate must match its checksum, the interval, the start slot and
    /// the minimum version. When none qualifies a fresh record is started.
    pub fn load_best_record(
        &mut self,
        start_slot: Slot,
        target_slot: Slot,
        rewards_interval: u64,
    ) -> RecordResult<&RollingRecord> {
        let index = match self.read_index() {
            Ok(Some(index)) => index,
            Ok(None) => {
                info!(target: "rewards::record", start_slot, "No checksum index, starting a fresh record");
                self.reset_record(start_slot, rewards_interval);
                return Ok(&self.record);
            }
            Err(RecordError::Checkpoint(err @ CheckpointError::Io(_))) => return Err(err.into()),
            Err(err) => {
                warn!(target: "rewards::record", %err, "Unreadable checksum index, starting a fresh record");
                self.reset_record(start_slot, rewards_interval);
                return Ok(&self.record);
            }
        };

        for entry in index.entries().iter().rev() {
            if entry.slot > target_slot {
                debug!(target: "rewards::record", file = %entry.filename, target_slot, "Checkpoint is past the target");
                continue;
            }
            if entry.slot < start_slot {
                warn!(target: "rewards::record", file = %entry.filename, start_slot, "Checkpoint predates the interval, no older one can be used");
                break;
            }

            let record = match self
                .load_entry(entry)
                .and_then(|record| self.validate(&record, start_slot, rewards_interval).map(|_| record))
            {
                Ok(record) => record,
                Err(err) => {
                    warn!(target: "rewards::record", file = %entry.filename, %err, "Rejected checkpoint, trying an older one");
                    continue;
                }
            };

            info!(
                target: "rewards::record",
                file = %entry.filename,
                slot = entry.slot,
                interval = record.rewards_interval,
                "Loaded rolling record checkpoint"
            );
            self.start_slot = start_slot;
            self.next_epoch_to_save =
                record.last_duties_epoch(self.beacon.slots_per_epoch) + self.config.checkpoint_interval_epochs;
            self.record = record;
            return Ok(&self.record);
        }

        warn!(target: "rewards::record", start_slot, "No usable checkpoint, starting a fresh record");
        self.reset_record(start_slot, rewards_interval);
        Ok(&self.record)
    }

    /// Advance the record to `target`, writing checkpoints along the way.
    ///
    /// Starts a fresh record first when `interval` is newer than the
    /// record's. On failure the best checkpoint is reloaded and the error
    /// returned; the partially advanced record is never kept.
    pub async fn update_to_slot(
        &mut self,
        context: &ScoringContext,
        interval: &Interval,
        target: Slot,
    ) -> RecordResult<()> {
        let Err(err) = self.update_impl(context, interval, target).await else {
            return Ok(());
        };

        warn!(target: "rewards::record", target, %err, "Record update failed, reverting to the last checkpoint");
        let rewards_interval = self.record.rewards_interval;
        let reloaded = self.load_best_record(self.start_slot, target, rewards_interval).map(|_| ());
        if let Err(reload) = reloaded {
            warn!(target: "rewards::record", err = %reload, "Could not reload a checkpoint");
            self.reset_record(self.start_slot, rewards_interval);
        }
        Err(err)
    }

    async fn update_impl(
        &mut self,
        context: &ScoringContext,
        interval: &Interval,
        target: Slot,
    ) -> RecordResult<()> {
        if self.record.rewards_interval < interval.index {
            info!(
                target: "rewards::record",
                previous = self.record.rewards_interval,
                interval = interval.index,
                start_slot = interval.start_slot,
                "Interval advanced, starting a new record"
            );
            self.reset_record(interval.start_slot, interval.index);
        }

        let spe = self.beacon.slots_per_epoch;
        let mut next_start = self.record.last_duties_slot.map_or(self.start_slot, |last| last + 1);
        let final_epoch = self.beacon.epoch_of(target);

        info!(target: "rewards::record", from = next_start, to = target, "Updating rolling record");
        while next_start <= target {
            let chunk_epoch = final_epoch.min(self.next_epoch_to_save);
            let chunk_target = self.beacon.epoch_end_slot(chunk_epoch).min(target);

            self.record
                .update_to_slot(self.chain.as_ref(), context, &self.scorer_config, chunk_target)
                .await?;
            debug!(
                target: "rewards::record",
                from = next_start,
                to = chunk_target,
                epoch = chunk_target / spe,
                "Advanced rolling record"
            );

            if chunk_epoch == self.next_epoch_to_save
                && chunk_target == self.beacon.epoch_end_slot(chunk_epoch)
            {
                self.save_record(&self.record)?;
                self.next_epoch_to_save += self.config.checkpoint_interval_epochs;
            }

            // the scorer caps its target at the context's end slot
            let reached = self.record.last_duties_slot.unwrap_or(chunk_target);
            if reached < chunk_target {
                break;
            }
            next_start = chunk_target + 1;
        }

        info!(
            target: "rewards::record",
            start_slot = self.record.start_slot,
            last_duties_slot = ?self.record.last_duties_slot,
            "Record update complete"
        );
        Ok(())
    }

    /// Make the record cover exactly `[interval.start_slot, slot]` for a report.
    ///
    /// A record already past `slot` is rebuilt from the best checkpoint;
    /// otherwise it is advanced in place.
    pub async fn prepare_record_for_report(
        &mut self,
        context: &ScoringContext,
        interval: &Interval,
        slot: Slot,
    ) -> RecordResult<&RollingRecord> {
        if self.record.rewards_interval == interval.index && self.record.is_past(slot) {
            info!(
                target: "rewards::record",
                slot,
                record_slot = ?self.record.last_duties_slot,
                "Record is past the report slot, regenerating from a checkpoint"
            );
            self.generate_record_for_slot(context, interval, slot).await?;
        } else {
            self.update_to_slot(context, interval, slot).await?;
        }
        Ok(&self.record)
    }

    /// Build the record for `slot` from the best checkpoint at or before it.
    pub async fn generate_record_for_slot(
        &mut self,
        context: &ScoringContext,
        interval: &Interval,
        slot: Slot,
    ) -> RecordResult<&RollingRecord> {
        self.load_best_record(interval.start_slot, slot, interval.index)?;

        match self.record.last_duties_slot {
            Some(last) if last == slot => {
                info!(target: "rewards::record", slot, "Loaded record is already up to date");
                return Ok(&self.record);
            }
            Some(last) if last > slot => {
                return Err(RecordError::RecordPastTarget { last_duties_slot: last, target: slot });
            }
            _ => {}
        }

        self.update_to_slot(context, interval, slot).await?;
        Ok(&self.record)
    }
}
