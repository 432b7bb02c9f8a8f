//! Commission and score formulas.
//!
//! All values are 1e18 fixed point: a fee of `0.14e18` is 14%, a bond of
//! `8e18` is 8 ETH, and a score of `1e18` is one full validator's worth of
//! a single attestation.

use crate::primitives::{
    eth, fraction_eth, safe_arith::Result as ArithResult, BlsPubkey, Epoch, MinipoolDetails,
    MinipoolStatus, RevenueSplit, SafeArith, ValidatorStatus, ONE_ETH,
};
use alloy_primitives::U256;
use std::collections::HashMap;

/// Score of one attestation by a minipool validator: `fee + bond * (1 - fee) / 32`.
pub fn minipool_score(bond: U256, fee: U256) -> ArithResult<U256> {
    ONE_ETH
        .safe_sub(fee)?
        .safe_mul_div(bond, eth(32))?
        .safe_add(fee)
}

/// Per-attestation scores of a megapool validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MegapoolScores {
    pub node: U256,
    pub voter: U256,
    pub pdao: U256,
}

/// Scores of one megapool attestation for a validator with `bond` under `split`.
///
/// Node: `(1*b + 32f - f*b) / 32`. Voter and pDAO: `(32f - f*b) / 32`.
pub fn megapool_scores(bond: U256, split: &RevenueSplit) -> ArithResult<MegapoolScores> {
    let thirty_two = eth(32);
    let node = ONE_ETH
        .safe_mul(bond)?
        .safe_add(thirty_two.safe_mul(split.node_share)?)?
        .safe_sub(split.node_share.safe_mul(bond)?)?
        .safe_div(thirty_two)?;
    let share = |fee: U256| -> ArithResult<U256> {
        thirty_two.safe_mul(fee)?.safe_sub(fee.safe_mul(bond)?)?.safe_div(thirty_two)
    };
    Ok(MegapoolScores { node, voter: share(split.voter_share)?, pdao: share(split.pdao_share)? })
}

/// Commission of a minipool including the collateral bonus.
///
/// Minipools bonded with 16 ETH or more keep their fee. Others get
/// `max(fee, 10% + 4% * min(10, pct) / 10)` where `pct` is the node's staked
/// RPL value as a percentage of its borrowed ETH.
pub fn fee_with_bonus(bond: U256, fee: U256, percent_of_borrowed_eth: U256) -> ArithResult<U256> {
    if bond >= eth(16) {
        return Ok(fee);
    }
    let capped = percent_of_borrowed_eth.min(eth(10));
    let bonus_fee =
        capped.safe_mul_div(fraction_eth(4, 100), eth(10))?.safe_add(fraction_eth(10, 100))?;
    Ok(fee.max(bonus_fee))
}

/// Staked RPL value in ETH and that value as a percentage (1e18 = 1%) of borrowed ETH.
pub fn staked_rpl_value_and_percent(
    rpl_stake: U256,
    borrowed_eth: U256,
    rpl_price: U256,
) -> ArithResult<(U256, U256)> {
    let value = rpl_stake.safe_mul_div(rpl_price, ONE_ETH)?;
    if borrowed_eth.is_zero() {
        return Ok((value, U256::ZERO));
    }
    let percent = value.safe_mul_div(eth(100), borrowed_eth)?;
    Ok((value, percent))
}

/// Borrowed and bonded ETH of a node's collateral-eligible minipools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EligibleEth {
    pub borrowed: U256,
    pub bonded: U256,
}

/// Borrowed and bonded ETH of the node's staking minipools that had not exited by `end_epoch`.
///
/// Minipools without a beacon validator yet are not counted.
pub fn eligible_eth(
    minipools: &[&MinipoolDetails],
    validators: &HashMap<BlsPubkey, &ValidatorStatus>,
    end_epoch: Epoch,
) -> ArithResult<EligibleEth> {
    let mut total = EligibleEth::default();
    for minipool in minipools {
        if minipool.status != MinipoolStatus::Staking {
            continue;
        }
        let Some(status) = validators.get(&minipool.pubkey) else {
            continue;
        };
        if status.exit_epoch <= end_epoch {
            continue;
        }
        total.borrowed.safe_add_assign(minipool.user_deposit_balance)?;
        total.bonded.safe_add_assign(minipool.node_deposit_balance())?;
    }
    Ok(total)
}

/// Borrowed ETH of the node's staking minipools that had not exited by `end_epoch`.
pub fn eligible_borrowed_eth(
    minipools: &[&MinipoolDetails],
    validators: &HashMap<BlsPubkey, &ValidatorStatus>,
    end_epoch: Epoch,
) -> ArithResult<U256> {
    Ok(eligible_eth(minipools, validators, end_epoch)?.borrowed)
}

/// RPL of a megapool node that counts toward the voter share.
///
/// `min(staked_rpl, bonded_eth * 1.5 / rpl_price)`.
pub fn megapool_vote_eligible_rpl(
    staked_rpl: U256,
    bonded_eth: U256,
    rpl_price: U256,
) -> ArithResult<U256> {
    if rpl_price.is_zero() {
        return Ok(U256::ZERO);
    }
    let cap = bonded_eth.safe_mul_div(fraction_eth(3, 2), rpl_price)?;
    Ok(staked_rpl.min(cap))
}
