#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
    Vec,
};
use tidelock_shared::{
    floor_lock_date, lock_weight, quantize_lock_date, validate_positive_amount, LOCK_INTERVAL,
    MAX_LOCK_DURATION, WEIGHT_FACTOR,
};

// Data Types

/// One entry of a checkpoint series: the value a quantity took effect from
/// ledger sequence `block` onwards. Blocks are strictly increasing across a
/// series; a write in the same block amends the last entry instead of
/// appending.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub block: u32,
    pub value: i128,
}

/// An account's open stake. Amounts are not stored here; they live in the
/// checkpoint series so historical reads stay consistent with current state.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakePosition {
    pub locked_until: u64,
    pub delegate: Address,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakingConfig {
    pub admin: Address,
    pub stake_token: Address,
    pub kickoff: u64, // lock-date grid origin, fixed at initialization
    pub emergency_pause: bool,
}

// Storage Keys
#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Config,
    Position(Address),
    UserSeries(Address, u64),     // (account, lock date)
    DelegateSeries(Address, u64), // (delegate, lock date)
    TotalSeries(u64),             // lock date
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StakingError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    InvalidAmount = 4,
    InvalidDuration = 5,
    DurationReduced = 6,
    PositionExists = 7,
    PositionNotFound = 8,
    StillLocked = 9,
    InsufficientStake = 10,
    NotYetDetermined = 11,
    ClockInvariantViolation = 12,
    NumericOverflow = 13,
    ContractPaused = 14,
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeEvent {
    pub user: Address,
    pub delegate: Address,
    pub amount: i128,
    pub locked_until: u64,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IncreaseStakeEvent {
    pub user: Address,
    pub amount: i128,
    pub new_balance: i128,
    pub locked_until: u64,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtendStakeEvent {
    pub user: Address,
    pub amount: i128,
    pub old_locked_until: u64,
    pub new_locked_until: u64,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawEvent {
    pub user: Address,
    pub receiver: Address,
    pub amount: i128,
    pub remaining: i128,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DelegateChangedEvent {
    pub user: Address,
    pub old_delegate: Address,
    pub new_delegate: Address,
    pub amount: i128,
    pub timestamp: u64,
}

#[contract]
pub struct StakingContract;

#[contractimpl]
impl StakingContract {
    /// Initialize the staking contract. Records the kickoff timestamp the
    /// lock-date grid is measured from; it never changes afterwards.
    pub fn initialize(env: Env, admin: Address, stake_token: Address) -> Result<(), StakingError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(StakingError::AlreadyInitialized);
        }

        admin.require_auth();

        let config = StakingConfig {
            admin: admin.clone(),
            stake_token,
            kickoff: env.ledger().timestamp(),
            emergency_pause: false,
        };
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Staking contract initialized by admin: {}", admin);

        Ok(())
    }

    /// Stake tokens locked until `until` (rounded up onto the lock-date
    /// grid), assigning voting rights to `delegate` (the staker itself when
    /// omitted). Returns the quantized lock date.
    pub fn stake(
        env: Env,
        user: Address,
        amount: i128,
        until: u64,
        delegate: Option<Address>,
    ) -> Result<u64, StakingError> {
        user.require_auth();

        let config = read_config(&env)?;
        if config.emergency_pause {
            return Err(StakingError::ContractPaused);
        }
        if !validate_positive_amount(amount) {
            return Err(StakingError::InvalidAmount);
        }
        if env.storage().persistent().has(&DataKey::Position(user.clone())) {
            return Err(StakingError::PositionExists);
        }

        let lock_date =
            quantize_lock_date(config.kickoff, until).ok_or(StakingError::InvalidDuration)?;
        let delegate = delegate.unwrap_or(user.clone());

        // Pull the stake into custody before any series write.
        token::Client::new(&env, &config.stake_token).transfer(
            &user,
            &env.current_contract_address(),
            &amount,
        );

        adjust_series(&env, &DataKey::UserSeries(user.clone(), lock_date), amount)?;
        adjust_series(&env, &DataKey::DelegateSeries(delegate.clone(), lock_date), amount)?;
        adjust_series(&env, &DataKey::TotalSeries(lock_date), amount)?;

        let position = StakePosition {
            locked_until: lock_date,
            delegate: delegate.clone(),
        };
        env.storage().persistent().set(&DataKey::Position(user.clone()), &position);

        let timestamp = env.ledger().timestamp();
        let event = StakeEvent {
            user: user.clone(),
            delegate,
            amount,
            locked_until: lock_date,
            timestamp,
        };
        env.events().publish((symbol_short!("stake"),), event);

        log!(&env, "User {} staked {} until {}", user, amount, lock_date);

        Ok(lock_date)
    }

    /// Add to an existing stake at its current lock date and delegate.
    pub fn increase_stake(env: Env, user: Address, amount: i128) -> Result<(), StakingError> {
        user.require_auth();

        let config = read_config(&env)?;
        if config.emergency_pause {
            return Err(StakingError::ContractPaused);
        }
        if !validate_positive_amount(amount) {
            return Err(StakingError::InvalidAmount);
        }

        let position: StakePosition = env
            .storage()
            .persistent()
            .get(&DataKey::Position(user.clone()))
            .ok_or(StakingError::PositionNotFound)?;
        let lock_date = position.locked_until;

        token::Client::new(&env, &config.stake_token).transfer(
            &user,
            &env.current_contract_address(),
            &amount,
        );

        let new_balance =
            adjust_series(&env, &DataKey::UserSeries(user.clone(), lock_date), amount)?;
        adjust_series(
            &env,
            &DataKey::DelegateSeries(position.delegate.clone(), lock_date),
            amount,
        )?;
        adjust_series(&env, &DataKey::TotalSeries(lock_date), amount)?;

        let timestamp = env.ledger().timestamp();
        let event = IncreaseStakeEvent {
            user: user.clone(),
            amount,
            new_balance,
            locked_until: lock_date,
            timestamp,
        };
        env.events().publish((symbol_short!("increase"),), event);

        log!(&env, "User {} increased stake by {} to {}", user, amount, new_balance);

        Ok(())
    }

    /// Move the full balance to a strictly later lock date, preserving the
    /// delegate. Returns the new quantized lock date.
    pub fn extend_staking_duration(
        env: Env,
        user: Address,
        until: u64,
    ) -> Result<u64, StakingError> {
        user.require_auth();

        let config = read_config(&env)?;
        if config.emergency_pause {
            return Err(StakingError::ContractPaused);
        }

        let mut position: StakePosition = env
            .storage()
            .persistent()
            .get(&DataKey::Position(user.clone()))
            .ok_or(StakingError::PositionNotFound)?;
        let old_date = position.locked_until;

        let new_date =
            quantize_lock_date(config.kickoff, until).ok_or(StakingError::InvalidDuration)?;
        if new_date <= old_date {
            return Err(StakingError::DurationReduced);
        }

        let amount = latest_value(&env, &DataKey::UserSeries(user.clone(), old_date));
        if amount > 0 {
            adjust_series(&env, &DataKey::UserSeries(user.clone(), old_date), -amount)?;
            adjust_series(&env, &DataKey::UserSeries(user.clone(), new_date), amount)?;
            adjust_series(
                &env,
                &DataKey::DelegateSeries(position.delegate.clone(), old_date),
                -amount,
            )?;
            adjust_series(
                &env,
                &DataKey::DelegateSeries(position.delegate.clone(), new_date),
                amount,
            )?;
            adjust_series(&env, &DataKey::TotalSeries(old_date), -amount)?;
            adjust_series(&env, &DataKey::TotalSeries(new_date), amount)?;
        }

        position.locked_until = new_date;
        env.storage().persistent().set(&DataKey::Position(user.clone()), &position);

        let timestamp = env.ledger().timestamp();
        let event = ExtendStakeEvent {
            user: user.clone(),
            amount,
            old_locked_until: old_date,
            new_locked_until: new_date,
            timestamp,
        };
        env.events().publish((symbol_short!("extend"),), event);

        log!(&env, "User {} extended lock from {} to {}", user, old_date, new_date);

        Ok(new_date)
    }

    /// Withdraw matured stake to `receiver` (the staker itself when
    /// omitted). The position is closed once its balance reaches zero.
    pub fn withdraw(
        env: Env,
        user: Address,
        amount: i128,
        receiver: Option<Address>,
    ) -> Result<(), StakingError> {
        user.require_auth();

        let config = read_config(&env)?;
        if !validate_positive_amount(amount) {
            return Err(StakingError::InvalidAmount);
        }

        let position: StakePosition = env
            .storage()
            .persistent()
            .get(&DataKey::Position(user.clone()))
            .ok_or(StakingError::PositionNotFound)?;
        let lock_date = position.locked_until;

        if env.ledger().timestamp() < lock_date {
            return Err(StakingError::StillLocked);
        }

        let balance = latest_value(&env, &DataKey::UserSeries(user.clone(), lock_date));
        if amount > balance {
            return Err(StakingError::InsufficientStake);
        }

        let remaining =
            adjust_series(&env, &DataKey::UserSeries(user.clone(), lock_date), -amount)?;
        adjust_series(
            &env,
            &DataKey::DelegateSeries(position.delegate.clone(), lock_date),
            -amount,
        )?;
        adjust_series(&env, &DataKey::TotalSeries(lock_date), -amount)?;

        if remaining == 0 {
            env.storage().persistent().remove(&DataKey::Position(user.clone()));
        }

        let receiver = receiver.unwrap_or(user.clone());
        token::Client::new(&env, &config.stake_token).transfer(
            &env.current_contract_address(),
            &receiver,
            &amount,
        );

        let timestamp = env.ledger().timestamp();
        let event = WithdrawEvent {
            user: user.clone(),
            receiver,
            amount,
            remaining,
            timestamp,
        };
        env.events().publish((symbol_short!("withdraw"),), event);

        log!(&env, "User {} withdrew {}, {} remaining", user, amount, remaining);

        Ok(())
    }

    /// Reassign the account's voting rights. Moves the full balance between
    /// delegate series at the current block; user and total series are
    /// untouched.
    pub fn delegate(env: Env, user: Address, new_delegate: Address) -> Result<(), StakingError> {
        user.require_auth();

        let config = read_config(&env)?;
        if config.emergency_pause {
            return Err(StakingError::ContractPaused);
        }

        let mut position: StakePosition = env
            .storage()
            .persistent()
            .get(&DataKey::Position(user.clone()))
            .ok_or(StakingError::PositionNotFound)?;
        if position.delegate == new_delegate {
            return Ok(());
        }

        let lock_date = position.locked_until;
        let old_delegate = position.delegate.clone();
        let amount = latest_value(&env, &DataKey::UserSeries(user.clone(), lock_date));
        if amount > 0 {
            adjust_series(
                &env,
                &DataKey::DelegateSeries(old_delegate.clone(), lock_date),
                -amount,
            )?;
            adjust_series(
                &env,
                &DataKey::DelegateSeries(new_delegate.clone(), lock_date),
                amount,
            )?;
        }

        position.delegate = new_delegate.clone();
        env.storage().persistent().set(&DataKey::Position(user.clone()), &position);

        let timestamp = env.ledger().timestamp();
        let event = DelegateChangedEvent {
            user: user.clone(),
            old_delegate,
            new_delegate,
            amount,
            timestamp,
        };
        env.events().publish((symbol_short!("delegate"),), event);

        log!(&env, "User {} changed delegate", user);

        Ok(())
    }

    /// Total weighted voting power across all live lock-date buckets, read
    /// at a settled block, with remaining lock durations measured from
    /// `time` (floored onto the grid).
    pub fn prior_total_voting_power(
        env: Env,
        block: u32,
        time: u64,
    ) -> Result<i128, StakingError> {
        let config = read_config(&env)?;
        require_settled(&env, block)?;

        let start = floor_lock_date(config.kickoff, time);
        weighted_power(&env, block, start, |date| DataKey::TotalSeries(date))
    }

    /// Weighted voting power currently assigned to `delegate`, as of a
    /// settled block.
    pub fn prior_votes_of(
        env: Env,
        delegate: Address,
        block: u32,
        time: u64,
    ) -> Result<i128, StakingError> {
        let config = read_config(&env)?;
        require_settled(&env, block)?;

        let start = floor_lock_date(config.kickoff, time);
        weighted_power(&env, block, start, |date| {
            DataKey::DelegateSeries(delegate.clone(), date)
        })
    }

    /// Weighted stake of `account` itself (independent of delegation), as of
    /// a settled block.
    pub fn prior_weighted_stake_of(
        env: Env,
        account: Address,
        block: u32,
        time: u64,
    ) -> Result<i128, StakingError> {
        let config = read_config(&env)?;
        require_settled(&env, block)?;

        let start = floor_lock_date(config.kickoff, time);
        weighted_power(&env, block, start, |date| {
            DataKey::UserSeries(account.clone(), date)
        })
    }

    // Read accessors

    pub fn get_config(env: Env) -> Result<StakingConfig, StakingError> {
        read_config(&env)
    }

    pub fn kickoff(env: Env) -> Result<u64, StakingError> {
        Ok(read_config(&env)?.kickoff)
    }

    pub fn get_position(env: Env, account: Address) -> Option<StakePosition> {
        env.storage().persistent().get(&DataKey::Position(account))
    }

    /// Current (unweighted) staked balance of `account`.
    pub fn stake_balance_of(env: Env, account: Address) -> i128 {
        match env
            .storage()
            .persistent()
            .get::<_, StakePosition>(&DataKey::Position(account.clone()))
        {
            Some(position) => {
                latest_value(&env, &DataKey::UserSeries(account, position.locked_until))
            }
            None => 0,
        }
    }

    pub fn user_checkpoint_count(env: Env, account: Address, lock_date: u64) -> u32 {
        load_series(&env, &DataKey::UserSeries(account, lock_date)).len()
    }

    pub fn user_checkpoint_at(
        env: Env,
        account: Address,
        lock_date: u64,
        index: u32,
    ) -> Option<Checkpoint> {
        load_series(&env, &DataKey::UserSeries(account, lock_date)).get(index)
    }

    pub fn delegate_checkpoint_count(env: Env, delegate: Address, lock_date: u64) -> u32 {
        load_series(&env, &DataKey::DelegateSeries(delegate, lock_date)).len()
    }

    pub fn delegate_checkpoint_at(
        env: Env,
        delegate: Address,
        lock_date: u64,
        index: u32,
    ) -> Option<Checkpoint> {
        load_series(&env, &DataKey::DelegateSeries(delegate, lock_date)).get(index)
    }

    pub fn total_checkpoint_count(env: Env, lock_date: u64) -> u32 {
        load_series(&env, &DataKey::TotalSeries(lock_date)).len()
    }

    pub fn total_checkpoint_at(env: Env, lock_date: u64, index: u32) -> Option<Checkpoint> {
        load_series(&env, &DataKey::TotalSeries(lock_date)).get(index)
    }

    /// Admin function to pause/unpause the stake-mutating entry points.
    /// Withdrawals stay open while paused.
    pub fn set_emergency_pause(
        env: Env,
        admin: Address,
        paused: bool,
    ) -> Result<(), StakingError> {
        admin.require_auth();

        let mut config = read_config(&env)?;
        if config.admin != admin {
            return Err(StakingError::Unauthorized);
        }

        config.emergency_pause = paused;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Emergency pause set to: {}", paused);

        Ok(())
    }
}

// Checkpoint ledger internals. These are the only code paths that mutate a
// series, which is what keeps the user/delegate/total conservation invariant
// true after every invocation.

fn read_config(env: &Env) -> Result<StakingConfig, StakingError> {
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .ok_or(StakingError::NotInitialized)
}

fn load_series(env: &Env, key: &DataKey) -> Vec<Checkpoint> {
    env.storage()
        .persistent()
        .get(key)
        .unwrap_or_else(|| Vec::new(env))
}

/// Record `value` effective from the current ledger sequence. A repeat write
/// within the same sequence amends the last entry so blocks stay strictly
/// increasing across distinct entries.
fn write_checkpoint(env: &Env, key: &DataKey, value: i128) -> Result<(), StakingError> {
    let block = env.ledger().sequence();
    let mut series = load_series(env, key);
    match series.last() {
        Some(last) if last.block == block => {
            series.set(series.len() - 1, Checkpoint { block, value });
        }
        Some(last) if last.block > block => {
            // Unreachable under a monotonic host clock.
            return Err(StakingError::ClockInvariantViolation);
        }
        _ => {
            series.push_back(Checkpoint { block, value });
        }
    }
    env.storage().persistent().set(key, &series);
    Ok(())
}

/// Apply a signed delta to a series at the current block and return the new
/// value. A delta that would take the series negative is rejected.
fn adjust_series(env: &Env, key: &DataKey, delta: i128) -> Result<i128, StakingError> {
    let current = latest_value(env, key);
    let next = current.checked_add(delta).ok_or(StakingError::NumericOverflow)?;
    if next < 0 {
        return Err(StakingError::InsufficientStake);
    }
    write_checkpoint(env, key, next)?;
    Ok(next)
}

fn latest_value(env: &Env, key: &DataKey) -> i128 {
    match load_series(env, key).last() {
        Some(last) => last.value,
        None => 0,
    }
}

/// Value of the latest checkpoint with `block` at or before the queried
/// block, by binary search. Zero when the series is empty or starts later.
fn value_at_block(env: &Env, key: &DataKey, block: u32) -> i128 {
    let series = load_series(env, key);
    let len = series.len();
    if len == 0 {
        return 0;
    }

    // Fast paths: at or past the last entry, or before the first.
    let last = series.get_unchecked(len - 1);
    if last.block <= block {
        return last.value;
    }
    if series.get_unchecked(0).block > block {
        return 0;
    }

    let mut lower = 0u32;
    let mut upper = len - 1;
    while upper > lower {
        let center = upper - (upper - lower) / 2;
        let cp = series.get_unchecked(center);
        if cp.block <= block {
            lower = center;
        } else {
            upper = center - 1;
        }
    }
    series.get_unchecked(lower).value
}

/// Queries at or past the current sequence could observe checkpoints written
/// by the querying transaction itself, so only settled blocks are readable.
fn require_settled(env: &Env, block: u32) -> Result<(), StakingError> {
    if block >= env.ledger().sequence() {
        return Err(StakingError::NotYetDetermined);
    }
    Ok(())
}

/// Sum a checkpoint series across every lock-date bucket reachable from
/// `start`, weighting each bucket by its remaining lock duration. Bounded by
/// the lock horizon (79 buckets).
fn weighted_power(
    env: &Env,
    block: u32,
    start: u64,
    key_for: impl Fn(u64) -> DataKey,
) -> Result<i128, StakingError> {
    let mut total: i128 = 0;
    let mut date = start;
    let end = start + MAX_LOCK_DURATION;
    while date <= end {
        let amount = value_at_block(env, &key_for(date), block);
        if amount > 0 {
            let weighted = amount
                .checked_mul(lock_weight(date - start))
                .ok_or(StakingError::NumericOverflow)?
                / WEIGHT_FACTOR;
            total = total.checked_add(weighted).ok_or(StakingError::NumericOverflow)?;
        }
        date += LOCK_INTERVAL;
    }
    Ok(total)
}
