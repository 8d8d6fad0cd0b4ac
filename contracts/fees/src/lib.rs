#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
};
use tidelock_shared::{validate_positive_amount, StakingPowerClient};

// Data Types

/// One fee-accrual event for a reward token: the tokens collected and a
/// snapshot of the total weighted stake at the most recently settled block.
/// Immutable once appended; iterated forward by claims, never searched.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeeCheckpoint {
    pub block_number: u32,
    pub timestamp: u64, // weight-curve anchor, shared by numerator and denominator
    pub total_weighted_stake: i128,
    pub tokens_collected: i128,
}

/// Result of a read-only forward scan for the first checkpoint where an
/// account held weighted stake.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CheckpointScan {
    pub next: u32,
    pub found: bool,
    pub has_more: bool, // unscanned checkpoints remain past `next`
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeeConfig {
    pub admin: Address,
    pub staking_contract: Address,
    pub fee_source: Address, // the only address allowed to record checkpoints
    pub emergency_pause: bool,
}

// Storage Keys
#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Config,
    CheckpointCount(Address),    // reward token
    Checkpoint(Address, u32),    // (reward token, ordinal)
    Processed(Address, Address), // (account, reward token) -> claim cursor
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum FeeError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    InvalidAmount = 4,
    AlreadyCurrent = 5,
    InvalidFromCheckpoint = 6,
    CheckpointMissing = 7,
    InsufficientTreasury = 8,
    NotYetDetermined = 9,
    NumericOverflow = 10,
    ContractPaused = 11,
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeeCheckpointEvent {
    pub token: Address,
    pub index: u32,
    pub block_number: u32,
    pub total_weighted_stake: i128,
    pub tokens_collected: i128,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeesClaimedEvent {
    pub user: Address,
    pub token: Address,
    pub recipient: Address,
    pub amount: i128,
    pub from_checkpoint: u32,
    pub to_checkpoint: u32,
    pub timestamp: u64,
}

#[contract]
pub struct FeeDistributionContract;

#[contractimpl]
impl FeeDistributionContract {
    /// Initialize the fee distribution contract. `staking_contract` answers
    /// historical voting-power queries; `fee_source` is the collaborator
    /// allowed to record fee checkpoints.
    pub fn initialize(
        env: Env,
        admin: Address,
        staking_contract: Address,
        fee_source: Address,
    ) -> Result<(), FeeError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(FeeError::AlreadyInitialized);
        }

        admin.require_auth();

        let config = FeeConfig {
            admin: admin.clone(),
            staking_contract,
            fee_source,
            emergency_pause: false,
        };
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Fee distribution contract initialized by admin: {}", admin);

        Ok(())
    }

    /// Record one fee-accrual event for `token`: pulls `amount` from the
    /// collector into custody and appends a checkpoint pairing it with the
    /// total weighted stake at the most recently settled block. Returns the
    /// new checkpoint's ordinal.
    pub fn record_fee_checkpoint(
        env: Env,
        token: Address,
        collector: Address,
        amount: i128,
    ) -> Result<u32, FeeError> {
        collector.require_auth();

        let config = read_config(&env)?;
        if config.emergency_pause {
            return Err(FeeError::ContractPaused);
        }
        if collector != config.fee_source {
            return Err(FeeError::Unauthorized);
        }
        if !validate_positive_amount(amount) {
            return Err(FeeError::InvalidAmount);
        }

        let sequence = env.ledger().sequence();
        if sequence == 0 {
            // No settled block to snapshot against yet.
            return Err(FeeError::NotYetDetermined);
        }
        let block_number = sequence - 1;
        let timestamp = env.ledger().timestamp();

        let total_weighted_stake = StakingPowerClient::new(&env, &config.staking_contract)
            .prior_total_voting_power(&block_number, &timestamp);

        token::Client::new(&env, &token).transfer(
            &collector,
            &env.current_contract_address(),
            &amount,
        );

        let index = checkpoint_count(&env, &token);
        let checkpoint = FeeCheckpoint {
            block_number,
            timestamp,
            total_weighted_stake,
            tokens_collected: amount,
        };
        env.storage()
            .persistent()
            .set(&DataKey::Checkpoint(token.clone(), index), &checkpoint);
        env.storage()
            .persistent()
            .set(&DataKey::CheckpointCount(token.clone()), &(index + 1));

        let event = FeeCheckpointEvent {
            token: token.clone(),
            index,
            block_number,
            total_weighted_stake,
            tokens_collected: amount,
            timestamp,
        };
        env.events().publish((symbol_short!("feecp"),), event);

        log!(&env, "Fee checkpoint {} recorded: {} tokens", index, amount);

        Ok(index)
    }

    /// Claim the caller's pro-rata share of up to `max_checkpoints`
    /// unprocessed checkpoints (`0` = no limit), paying out to `recipient`
    /// (the caller itself when omitted). Returns the amount paid. Callers
    /// with long histories repeat the call until caught up.
    pub fn claim(
        env: Env,
        user: Address,
        token: Address,
        max_checkpoints: u32,
        recipient: Option<Address>,
    ) -> Result<i128, FeeError> {
        user.require_auth();

        let config = read_config(&env)?;
        let count = checkpoint_count(&env, &token);
        let cursor = processed(&env, &user, &token);
        if cursor >= count {
            return Err(FeeError::AlreadyCurrent);
        }

        pay_range(&env, &config, &user, &token, cursor, max_checkpoints, recipient)
    }

    /// Claim starting at checkpoint `from`, skipping checkpoints the caller
    /// held no stake for. The skip is validated with a spot check of the
    /// last skipped checkpoint; `get_next_positive_checkpoint` is the honest
    /// way to compute `from`. Skipped checkpoints are forfeited.
    pub fn claim_starting_from(
        env: Env,
        user: Address,
        token: Address,
        from: u32,
        max_checkpoints: u32,
        recipient: Option<Address>,
    ) -> Result<i128, FeeError> {
        user.require_auth();

        let config = read_config(&env)?;
        let count = checkpoint_count(&env, &token);
        let cursor = processed(&env, &user, &token);
        if from < cursor || from >= count {
            return Err(FeeError::InvalidFromCheckpoint);
        }

        if from > cursor {
            let prev = checkpoint_at(&env, &token, from - 1).ok_or(FeeError::CheckpointMissing)?;
            if prev.total_weighted_stake > 0 {
                let user_stake = StakingPowerClient::new(&env, &config.staking_contract)
                    .prior_weighted_stake_of(&user, &prev.block_number, &prev.timestamp);
                if user_stake > 0 {
                    return Err(FeeError::InvalidFromCheckpoint);
                }
            }
        }

        pay_range(&env, &config, &user, &token, from, max_checkpoints, recipient)
    }

    /// Read-only skip-ahead helper: scan up to `max_scan` checkpoints
    /// (`0` = no limit) forward from `from` for the first one where the
    /// account's weighted stake was non-zero.
    pub fn get_next_positive_checkpoint(
        env: Env,
        user: Address,
        token: Address,
        from: u32,
        max_scan: u32,
    ) -> Result<CheckpointScan, FeeError> {
        let config = read_config(&env)?;
        let count = checkpoint_count(&env, &token);
        let end = scan_end(from, max_scan, count);
        let staking = StakingPowerClient::new(&env, &config.staking_contract);

        let mut i = from;
        while i < end {
            let cp = checkpoint_at(&env, &token, i).ok_or(FeeError::CheckpointMissing)?;
            if cp.total_weighted_stake > 0
                && staking.prior_weighted_stake_of(&user, &cp.block_number, &cp.timestamp) > 0
            {
                return Ok(CheckpointScan {
                    next: i,
                    found: true,
                    has_more: i + 1 < count,
                });
            }
            i += 1;
        }

        Ok(CheckpointScan {
            next: end,
            found: false,
            has_more: end < count,
        })
    }

    /// Read-only preview of the caller's full pending payout across all
    /// unprocessed checkpoints. Unbounded; off-chain callers only.
    pub fn accumulated_fees(env: Env, user: Address, token: Address) -> Result<i128, FeeError> {
        let config = read_config(&env)?;
        let count = checkpoint_count(&env, &token);
        let cursor = processed(&env, &user, &token);
        pending_between(&env, &config, &user, &token, cursor, count)
    }

    // Read accessors

    pub fn total_token_checkpoints(env: Env, token: Address) -> u32 {
        checkpoint_count(&env, &token)
    }

    pub fn fee_checkpoint_at(env: Env, token: Address, index: u32) -> Option<FeeCheckpoint> {
        checkpoint_at(&env, &token, index)
    }

    pub fn processed_checkpoints(env: Env, user: Address, token: Address) -> u32 {
        processed(&env, &user, &token)
    }

    pub fn get_config(env: Env) -> Result<FeeConfig, FeeError> {
        read_config(&env)
    }

    /// Admin function to pause checkpoint recording. Claims stay open.
    pub fn set_emergency_pause(env: Env, admin: Address, paused: bool) -> Result<(), FeeError> {
        admin.require_auth();

        let mut config = read_config(&env)?;
        if config.admin != admin {
            return Err(FeeError::Unauthorized);
        }

        config.emergency_pause = paused;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Emergency pause set to: {}", paused);

        Ok(())
    }
}

// Internal helpers

fn read_config(env: &Env) -> Result<FeeConfig, FeeError> {
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .ok_or(FeeError::NotInitialized)
}

fn checkpoint_count(env: &Env, token: &Address) -> u32 {
    env.storage()
        .persistent()
        .get(&DataKey::CheckpointCount(token.clone()))
        .unwrap_or(0)
}

fn checkpoint_at(env: &Env, token: &Address, index: u32) -> Option<FeeCheckpoint> {
    env.storage()
        .persistent()
        .get(&DataKey::Checkpoint(token.clone(), index))
}

fn processed(env: &Env, user: &Address, token: &Address) -> u32 {
    env.storage()
        .persistent()
        .get(&DataKey::Processed(user.clone(), token.clone()))
        .unwrap_or(0)
}

fn scan_end(from: u32, limit: u32, count: u32) -> u32 {
    if limit == 0 {
        count
    } else {
        from.saturating_add(limit).min(count)
    }
}

/// Pro-rata share of the checkpoints in `[from, end)`: per checkpoint,
/// `tokens_collected * user_weighted_stake / total_weighted_stake`, floor
/// division. The at-most-one-unit residue per checkpoint stays in the pool.
fn pending_between(
    env: &Env,
    config: &FeeConfig,
    user: &Address,
    token: &Address,
    from: u32,
    end: u32,
) -> Result<i128, FeeError> {
    let staking = StakingPowerClient::new(env, &config.staking_contract);
    let mut payout: i128 = 0;
    let mut i = from;
    while i < end {
        let cp = checkpoint_at(env, token, i).ok_or(FeeError::CheckpointMissing)?;
        if cp.total_weighted_stake > 0 {
            let user_stake =
                staking.prior_weighted_stake_of(user, &cp.block_number, &cp.timestamp);
            if user_stake > 0 {
                let share = cp
                    .tokens_collected
                    .checked_mul(user_stake)
                    .ok_or(FeeError::NumericOverflow)?
                    / cp.total_weighted_stake;
                payout = payout.checked_add(share).ok_or(FeeError::NumericOverflow)?;
            }
        }
        i += 1;
    }
    Ok(payout)
}

/// Settle the checkpoints in `[from, from + max)` for `user`: advance the
/// claim cursor past the chunk and transfer the computed payout.
fn pay_range(
    env: &Env,
    config: &FeeConfig,
    user: &Address,
    token: &Address,
    from: u32,
    max_checkpoints: u32,
    recipient: Option<Address>,
) -> Result<i128, FeeError> {
    let count = checkpoint_count(env, token);
    let end = scan_end(from, max_checkpoints, count);

    let payout = pending_between(env, config, user, token, from, end)?;

    env.storage()
        .persistent()
        .set(&DataKey::Processed(user.clone(), token.clone()), &end);

    let recipient = recipient.unwrap_or(user.clone());
    if payout > 0 {
        let custody = token::Client::new(env, token);
        if custody.balance(&env.current_contract_address()) < payout {
            return Err(FeeError::InsufficientTreasury);
        }
        custody.transfer(&env.current_contract_address(), &recipient, &payout);
    }

    let event = FeesClaimedEvent {
        user: user.clone(),
        token: token.clone(),
        recipient,
        amount: payout,
        from_checkpoint: from,
        to_checkpoint: end,
        timestamp: env.ledger().timestamp(),
    };
    env.events().publish((symbol_short!("claimed"),), event);

    log!(&env, "User {} claimed {} across checkpoints {}..{}", user, payout, from, end);

    Ok(payout)
}

#[cfg(test)]
mod test;
