//! Ruleset selection and node weight formulas.

use crate::primitives::{eth, safe_arith::Result as ArithResult, ArithError, SafeArith, ONE_ETH};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// First interval with RPIP-30 node weights. They are phased in over six intervals.
pub const RPIP30_START_INTERVAL: u64 = 18;

/// First interval paying bonus commission on consensus income.
pub const BONUS_START_INTERVAL: u64 = 30;

/// First interval with megapools and the voter and pDAO ETH shares.
pub const VOTER_SHARE_START_INTERVAL: u64 = 40;

/// Number of phase-in steps for RPIP-30 weights.
const RPIP30_PHASE_STEPS: u64 = 6;

/// `log2(e)` in 1e18 fixed point.
const LOG2_E: U256 = U256::from_limbs([1_442_695_040_888_963_407, 0, 0, 0]);

/// `13.6137` in 1e18 fixed point.
const RPIP30_BASE: U256 = U256::from_limbs([13_613_700_000_000_000_000, 0, 0, 0]);

/// How collateral RPL is weighted between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeWeightPolicy {
    /// Proportional to effective RPL stake only.
    EffectiveStake,
    /// RPIP-30 weights, phased in one sixth per interval from `phase_in_start`.
    Rpip30 { phase_in_start: u64 },
}

impl NodeWeightPolicy {
    /// Sixths of collateral RPL distributed by RPIP-30 weight in interval `index`.
    ///
    /// The remainder is distributed by effective stake.
    pub fn rpip30_sixths(&self, index: u64) -> u64 {
        match self {
            Self::EffectiveStake => 0,
            Self::Rpip30 { phase_in_start } => {
                (index + 1).saturating_sub(*phase_in_start).clamp(1, RPIP30_PHASE_STEPS)
            }
        }
    }
}

/// The capabilities of one reward ruleset version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetPolicy {
    pub version: u64,
    pub node_weight: NodeWeightPolicy,
    /// Minipools earn bonus commission on consensus income.
    pub bonus_enabled: bool,
    /// Megapool validators are scored and the voter and pDAO ETH shares are paid.
    pub voter_share_enabled: bool,
}

impl RulesetPolicy {
    /// RPIP-30 phase-in, no bonus commission.
    pub const V8: Self = Self {
        version: 8,
        node_weight: NodeWeightPolicy::Rpip30 { phase_in_start: RPIP30_START_INTERVAL },
        bonus_enabled: false,
        voter_share_enabled: false,
    };

    /// Bonus commission for under-collateralized minipools.
    pub const V10: Self = Self {
        version: 10,
        node_weight: NodeWeightPolicy::Rpip30 { phase_in_start: RPIP30_START_INTERVAL },
        bonus_enabled: true,
        voter_share_enabled: false,
    };

    /// Megapools with voter and pDAO shares.
    pub const V11: Self = Self {
        version: 11,
        node_weight: NodeWeightPolicy::Rpip30 { phase_in_start: RPIP30_START_INTERVAL },
        bonus_enabled: true,
        voter_share_enabled: true,
    };

    /// The ruleset in force for interval `index`.
    pub fn for_interval(index: u64) -> Self {
        if index >= VOTER_SHARE_START_INTERVAL {
            Self::V11
        } else if index >= BONUS_START_INTERVAL {
            Self::V10
        } else {
            Self::V8
        }
    }

    /// Tolerated truncation error: twice the larger of the node and validator counts.
    pub fn epsilon(&self, node_count: usize, validator_count: usize) -> U256 {
        U256::from(node_count.max(validator_count)) * U256::from(2u64)
    }
}

/// Binary logarithm of a 1e18 fixed-point value of at least one.
///
/// The integer part comes from the most significant bit, the fraction from
/// repeated squaring, one bit per iteration.
pub fn log2(x: U256) -> ArithResult<U256> {
    if x < ONE_ETH {
        return Err(ArithError::Underflow);
    }
    let whole_bits = (x / ONE_ETH).bit_len() - 1;
    let mut result = U256::from(whole_bits).safe_mul(ONE_ETH)?;
    let mut y = x >> whole_bits;
    if y == ONE_ETH {
        return Ok(result);
    }

    let two = ONE_ETH.safe_mul(U256::from(2u64))?;
    let mut delta: U256 = ONE_ETH >> 1;
    while !delta.is_zero() {
        y = y.safe_mul_div(y, ONE_ETH)?;
        if y >= two {
            result.safe_add_assign(delta)?;
            y >>= 1;
        }
        delta >>= 1;
    }
    Ok(result)
}

/// Natural logarithm of a 1e18 fixed-point value of at least one.
pub fn ln(x: U256) -> ArithResult<U256> {
    log2(x)?.safe_mul_div(ONE_ETH, LOG2_E)
}

/// RPIP-30 weight of a node.
///
/// `100 * staked_value` while the stake is worth at most 15% of borrowed ETH,
/// `(13.6137 + 2 * ln(pct - 13)) * borrowed` above that.
pub fn rpip30_weight(
    staked_rpl_value: U256,
    percent_of_borrowed: U256,
    eligible_borrowed_eth: U256,
) -> ArithResult<U256> {
    if percent_of_borrowed <= eth(15) {
        return staked_rpl_value.safe_mul(U256::from(100u64));
    }
    let log = ln(percent_of_borrowed.safe_sub(eth(13))?)?;
    log.safe_mul(U256::from(2u64))?
        .safe_add(RPIP30_BASE)?
        .safe_mul_div(eligible_borrowed_eth, ONE_ETH)
}

/// Scale `value` by the share of the interval the node was registered for.
pub fn scale_by_participation(
    value: U256,
    registered_for: u64,
    interval_duration: u64,
) -> ArithResult<U256> {
    if interval_duration == 0 || registered_for >= interval_duration {
        return Ok(value);
    }
    value.safe_mul_div(U256::from(registered_for), U256::from(interval_duration))
}
