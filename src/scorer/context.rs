//! Per-run scoring context.
//!
//! Built once from the interval's [`NetworkSnapshot`] and passed explicitly
//! to the scorer. It holds everything duty matching needs to decide whether a
//! committee member is a protocol validator and what one attestation is worth.

use crate::{
    fees::{self, MegapoolScores},
    primitives::{
        safe_arith::Result as ArithResult, BeaconConfig, BlsPubkey, Epoch, MinipoolDetails,
        NetworkSnapshot, OptInWindow, RevenueSplit, Slot, Timestamp, ValidatorIndex,
        ValidatorStatus, WEI_PER_GWEI,
    },
};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What kind of contract a protocol validator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ValidatorKind {
    Minipool { address: Address },
    Megapool { address: Address, id: u32 },
}

impl ValidatorKind {
    /// Address of the owning contract.
    pub fn address(&self) -> Address {
        match self {
            Self::Minipool { address } | Self::Megapool { address, .. } => *address,
        }
    }

    /// Whether this is a minipool validator.
    pub fn is_minipool(&self) -> bool {
        matches!(self, Self::Minipool { .. })
    }
}

#[derive(Debug, Clone)]
enum BondSource {
    Minipool(MinipoolDetails),
    Megapool { bond: U256, staking: bool },
}

/// A beacon validator owned by the protocol.
#[derive(Debug, Clone)]
pub struct ProtocolValidator {
    pub index: ValidatorIndex,
    pub pubkey: BlsPubkey,
    pub node: Address,
    pub kind: ValidatorKind,
    pub status: ValidatorStatus,
    bond: BondSource,
}

/// Score credited for one successful attestation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttestationCredit {
    pub score: U256,
    pub voter_score: U256,
    pub pdao_score: U256,
}

/// Everything duty matching needs for one interval run.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    beacon: BeaconConfig,
    end_slot: Slot,
    bonus_enabled: bool,
    validators: HashMap<ValidatorIndex, ProtocolValidator>,
    opt_in: HashMap<Address, OptInWindow>,
    percent_of_borrowed: HashMap<Address, U256>,
    revenue_split: RevenueSplit,
}

impl ScoringContext {
    /// Build the context from the interval snapshot.
    ///
    /// Validators of cheating nodes are left out.
    /// `end_slot` bounds duty collection; `bonus_enabled` selects the
    /// bonus-commission fee for minipool scores and enables withdrawal tracking.
    pub fn from_snapshot(
        snapshot: &NetworkSnapshot,
        beacon: BeaconConfig,
        end_slot: Slot,
        bonus_enabled: bool,
    ) -> ArithResult<Self> {
        let statuses = snapshot.validators_by_pubkey();
        let minipools_by_node = snapshot.minipools_by_node();
        let end_epoch = beacon.epoch_of(end_slot);

        let mut validators = HashMap::new();
        let mut opt_in = HashMap::new();
        let mut percent_of_borrowed = HashMap::new();
        let mut cheaters = HashSet::new();

        for node in &snapshot.nodes {
            if node.is_cheater() {
                cheaters.insert(node.address);
                continue;
            }
            opt_in.insert(node.address, node.opt_in_window());

            let minipools = minipools_by_node.get(&node.address).cloned().unwrap_or_default();
            let borrowed = fees::eligible_borrowed_eth(&minipools, &statuses, end_epoch)?;
            let (_, percent) = fees::staked_rpl_value_and_percent(
                node.rpl_stake,
                borrowed,
                snapshot.network.rpl_price,
            )?;
            percent_of_borrowed.insert(node.address, percent);
        }

        for minipool in &snapshot.minipools {
            if cheaters.contains(&minipool.node) {
                continue;
            }
            let Some(status) = statuses.get(&minipool.pubkey) else {
                continue;
            };
            validators.insert(
                status.index,
                ProtocolValidator {
                    index: status.index,
                    pubkey: minipool.pubkey,
                    node: minipool.node,
                    kind: ValidatorKind::Minipool { address: minipool.address },
                    status: (*status).clone(),
                    bond: BondSource::Minipool(minipool.clone()),
                },
            );
        }

        for megapool in &snapshot.megapools {
            if cheaters.contains(&megapool.node) {
                continue;
            }
            let bond = megapool.bond_per_validator();
            for validator in &megapool.validators {
                let Some(status) = statuses.get(&validator.pubkey) else {
                    continue;
                };
                validators.insert(
                    status.index,
                    ProtocolValidator {
                        index: status.index,
                        pubkey: validator.pubkey,
                        node: megapool.node,
                        kind: ValidatorKind::Megapool { address: megapool.address, id: validator.id },
                        status: (*status).clone(),
                        bond: BondSource::Megapool { bond, staking: validator.staking },
                    },
                );
            }
        }

        Ok(Self {
            beacon,
            end_slot,
            bonus_enabled,
            validators,
            opt_in,
            percent_of_borrowed,
            revenue_split: snapshot.network.megapool_revenue_split.clone(),
        })
    }

    /// Beacon timing parameters.
    pub fn beacon(&self) -> &BeaconConfig {
        &self.beacon
    }

    /// Last slot duties are collected for.
    pub fn end_slot(&self) -> Slot {
        self.end_slot
    }

    /// Whether consensus withdrawals are tracked for bonus commission.
    pub fn bonus_enabled(&self) -> bool {
        self.bonus_enabled
    }

    /// Number of protocol validators known to the context.
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Protocol validator with beacon index `index`.
    pub fn validator(&self, index: ValidatorIndex) -> Option<&ProtocolValidator> {
        self.validators.get(&index)
    }

    /// Iterate protocol validators.
    pub fn validators(&self) -> impl Iterator<Item = &ProtocolValidator> {
        self.validators.values()
    }

    /// Whether `node` was opted into the smoothing pool at `time`.
    pub fn is_opted_in(&self, node: &Address, time: Timestamp) -> bool {
        self.opt_in.get(node).is_some_and(|window| window.contains(time))
    }

    /// Whether `validator` owes a scored duty at `slot`.
    pub fn has_scored_duty(&self, validator: &ProtocolValidator, slot: Slot) -> bool {
        let time = self.beacon.slot_time(slot);
        if !validator.status.is_active_at(self.beacon.epoch_of(slot)) {
            return false;
        }
        if !self.is_opted_in(&validator.node, time) {
            return false;
        }
        match &validator.bond {
            BondSource::Minipool(minipool) => minipool.was_staking_at(time),
            BondSource::Megapool { staking, .. } => *staking,
        }
    }

    /// Credit for one successful attestation by `validator` at `slot`.
    pub fn credit(&self, validator: &ProtocolValidator, slot: Slot) -> ArithResult<AttestationCredit> {
        let time = self.beacon.slot_time(slot);
        match &validator.bond {
            BondSource::Minipool(minipool) => {
                let (bond, mut fee) = minipool.bond.bond_and_fee_at(time);
                if self.bonus_enabled {
                    let percent =
                        self.percent_of_borrowed.get(&validator.node).copied().unwrap_or_default();
                    fee = fees::fee_with_bonus(bond, fee, percent)?;
                }
                Ok(AttestationCredit { score: fees::minipool_score(bond, fee)?, ..Default::default() })
            }
            BondSource::Megapool { bond, .. } => {
                let MegapoolScores { node, voter, pdao } =
                    fees::megapool_scores(*bond, &self.revenue_split)?;
                Ok(AttestationCredit { score: node, voter_score: voter, pdao_score: pdao })
            }
        }
    }

    /// Consensus income of a withdrawal, in wei, if it counts toward bonus commission.
    ///
    /// Only minipools whose node was opted in and whose bond was bonus eligible
    /// at `slot` count. Withdrawals at or after the withdrawable epoch have the
    /// 32 ETH principal removed, clamped at zero.
    pub fn withdrawal_income(
        &self,
        validator: &ProtocolValidator,
        slot: Slot,
        amount_gwei: u64,
    ) -> Option<U256> {
        if !self.bonus_enabled {
            return None;
        }
        let BondSource::Minipool(minipool) = &validator.bond else {
            return None;
        };
        let time = self.beacon.slot_time(slot);
        if !self.is_opted_in(&validator.node, time) || !minipool.is_eligible_for_bonuses(time) {
            return None;
        }
        let amount = U256::from(amount_gwei) * U256::from(WEI_PER_GWEI);
        if validator.status.is_withdrawable_at(slot, self.beacon.slots_per_epoch) {
            return Some(amount.saturating_sub(crate::primitives::eth(32)));
        }
        Some(amount)
    }

    /// Whether `validator` was active at any point in `[start_slot, end_slot]`.
    pub fn was_active_during(&self, validator: &ProtocolValidator, start_slot: Slot) -> bool {
        validator.status.was_active_during(start_slot, self.end_slot, self.beacon.slots_per_epoch)
    }

    /// First epoch of the slot range.
    pub fn epoch_of(&self, slot: Slot) -> Epoch {
        self.beacon.epoch_of(slot)
    }
}
