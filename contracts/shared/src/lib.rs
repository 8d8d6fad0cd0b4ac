#![no_std]
use soroban_sdk::{contractclient, Address, Env};

/// Shared constants and pure math used by the Tidelock staking and fee
/// distribution contracts, plus the cross-contract interface the fee
/// contract uses to read historical voting power.

// ============================================================================
// Constants
// ============================================================================

/// Seconds in a day
pub const SECONDS_PER_DAY: u64 = 86_400;

/// The lock-date grid step: every unlock date is a multiple of two weeks
/// measured from the kickoff timestamp.
pub const LOCK_INTERVAL: u64 = 14 * SECONDS_PER_DAY;

/// Grid steps in the maximum lock horizon.
pub const MAX_LOCK_INTERVALS: u64 = 78;

/// Maximum lock duration: 78 intervals = 1092 days (~3 years).
pub const MAX_LOCK_DURATION: u64 = MAX_LOCK_INTERVALS * LOCK_INTERVAL;

/// Fixed-point scale of the weight curve. `lock_weight` returns a value in
/// `[WEIGHT_FACTOR, (1 + MAX_WEIGHT_BONUS) * WEIGHT_FACTOR]`; callers divide
/// by `WEIGHT_FACTOR` after multiplying by a stake amount.
pub const WEIGHT_FACTOR: i128 = 10;

/// A maximum-duration lock carries `1 + MAX_WEIGHT_BONUS` times the baseline
/// voting weight.
pub const MAX_WEIGHT_BONUS: i128 = 9;

// ============================================================================
// Lock-date quantizer
// ============================================================================

/// Round `timestamp` up to the next lock-date grid point after `kickoff`.
///
/// A timestamp at or before `kickoff` maps to the first grid point,
/// `kickoff + LOCK_INTERVAL`. Returns `None` when the quantized date would
/// fall beyond `kickoff + MAX_LOCK_DURATION`.
pub fn quantize_lock_date(kickoff: u64, timestamp: u64) -> Option<u64> {
    let date = if timestamp <= kickoff {
        kickoff + LOCK_INTERVAL
    } else {
        let elapsed = timestamp - kickoff;
        let intervals = (elapsed + LOCK_INTERVAL - 1) / LOCK_INTERVAL;
        kickoff + intervals * LOCK_INTERVAL
    };
    if date > kickoff + MAX_LOCK_DURATION {
        None
    } else {
        Some(date)
    }
}

/// Round `timestamp` down onto the lock-date grid, clamped at `kickoff`.
/// Used to anchor as-of dates for historical voting-power reads.
pub fn floor_lock_date(kickoff: u64, timestamp: u64) -> u64 {
    if timestamp <= kickoff {
        return kickoff;
    }
    kickoff + ((timestamp - kickoff) / LOCK_INTERVAL) * LOCK_INTERVAL
}

// ============================================================================
// Weight curve
// ============================================================================

/// Voting weight of stake with `remaining` seconds until unlock, scaled by
/// `WEIGHT_FACTOR`.
///
/// Quadratic bonus curve: unlocked stake carries baseline weight (1x), a
/// maximum-duration lock carries the full bonus (10x), floor arithmetic
/// throughout. `remaining` past the horizon is clamped to the horizon.
pub fn lock_weight(remaining: u64) -> i128 {
    let md = MAX_LOCK_DURATION as i128;
    let r = if remaining > MAX_LOCK_DURATION {
        md
    } else {
        remaining as i128
    };
    let x = md - r;
    MAX_WEIGHT_BONUS * WEIGHT_FACTOR * (md * md - x * x) / (md * md) + WEIGHT_FACTOR
}

// ============================================================================
// Validation helpers
// ============================================================================

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: i128) -> bool {
    amount > 0
}

// ============================================================================
// Cross-contract interface
// ============================================================================

/// Historical voting-power reads exposed by the staking contract and consumed
/// by the fee distribution contract. `block` is a host ledger sequence number
/// and must refer to a settled ledger; `time` anchors the weight curve and is
/// floored onto the lock-date grid by the staking contract.
#[contractclient(name = "StakingPowerClient")]
pub trait StakingPower {
    fn prior_total_voting_power(env: Env, block: u32, time: u64) -> i128;

    fn prior_weighted_stake_of(env: Env, account: Address, block: u32, time: u64) -> i128;
}
