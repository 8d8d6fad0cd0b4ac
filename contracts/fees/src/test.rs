#![cfg(test)]
use super::*;
use soroban_sdk::{
    testutils::{Address as _, Ledger},
    token::{Client as TokenClient, StellarAssetClient},
    Env,
};
use tidelock_shared::{lock_weight, LOCK_INTERVAL, SECONDS_PER_DAY, WEIGHT_FACTOR};
use tidelock_staking::{StakingContract, StakingContractClient};

const KICKOFF: u64 = 1_700_000_000;
const START_BLOCK: u32 = 100;

struct Fixture {
    env: Env,
    staking: StakingContractClient<'static>,
    fees: FeeDistributionContractClient<'static>,
    fees_id: Address,
    stake_token: Address,
    fee_token: Address,
    collector: Address,
    admin: Address,
}

fn setup() -> Fixture {
    let env = Env::default();
    env.mock_all_auths();
    env.budget().reset_unlimited();
    env.ledger().with_mut(|li| {
        li.timestamp = KICKOFF;
        li.sequence_number = START_BLOCK;
    });

    let admin = Address::generate(&env);
    let collector = Address::generate(&env);
    let stake_token = env.register_stellar_asset_contract(admin.clone());
    let fee_token = env.register_stellar_asset_contract(admin.clone());

    let staking_id = env.register_contract(None, StakingContract);
    let staking = StakingContractClient::new(&env, &staking_id);
    staking.initialize(&admin, &stake_token);

    let fees_id = env.register_contract(None, FeeDistributionContract);
    let fees = FeeDistributionContractClient::new(&env, &fees_id);
    fees.initialize(&admin, &staking_id, &collector);

    Fixture {
        env,
        staking,
        fees,
        fees_id,
        stake_token,
        fee_token,
        collector,
        admin,
    }
}

fn stake(f: &Fixture, user: &Address, amount: i128, intervals: u64) -> u64 {
    StellarAssetClient::new(&f.env, &f.stake_token).mint(user, &amount);
    f.staking
        .stake(user, &amount, &(KICKOFF + intervals * LOCK_INTERVAL), &None)
}

fn record(f: &Fixture, amount: i128) -> u32 {
    StellarAssetClient::new(&f.env, &f.fee_token).mint(&f.collector, &amount);
    f.fees
        .record_fee_checkpoint(&f.fee_token, &f.collector, &amount)
}

fn advance(env: &Env, blocks: u32, secs: u64) {
    env.ledger().with_mut(|li| {
        li.sequence_number += blocks;
        li.timestamp += secs;
    });
}

#[test]
fn test_initialize() {
    let f = setup();

    let config = f.fees.get_config();
    assert_eq!(config.admin, f.admin);
    assert_eq!(config.fee_source, f.collector);
    assert_eq!(config.emergency_pause, false);
}

#[test]
fn test_initialize_twice_fails() {
    let f = setup();

    let staking_id = f.fees.get_config().staking_contract;
    let result = f.fees.try_initialize(&f.admin, &staking_id, &f.collector);
    assert_eq!(result, Err(Ok(FeeError::AlreadyInitialized)));
}

#[test]
fn test_record_checkpoint_snapshots_total_power() {
    let f = setup();
    let user = Address::generate(&f.env);

    stake(&f, &user, 1_000, 4);
    advance(&f.env, 1, SECONDS_PER_DAY);

    let index = record(&f, 100);
    assert_eq!(index, 0);
    assert_eq!(f.fees.total_token_checkpoints(&f.fee_token), 1);

    let cp = f.fees.fee_checkpoint_at(&f.fee_token, &0).unwrap();
    assert_eq!(cp.block_number, START_BLOCK);
    assert_eq!(cp.timestamp, KICKOFF + SECONDS_PER_DAY);
    assert_eq!(cp.tokens_collected, 100);
    assert_eq!(
        cp.total_weighted_stake,
        f.staking.prior_total_voting_power(&cp.block_number, &cp.timestamp)
    );
    assert_eq!(
        cp.total_weighted_stake,
        1_000 * lock_weight(4 * LOCK_INTERVAL) / WEIGHT_FACTOR
    );

    // The collected tokens sit in custody.
    let balances = TokenClient::new(&f.env, &f.fee_token);
    assert_eq!(balances.balance(&f.fees_id), 100);
    assert_eq!(balances.balance(&f.collector), 0);
}

#[test]
fn test_record_requires_fee_source() {
    let f = setup();
    advance(&f.env, 1, 0);

    StellarAssetClient::new(&f.env, &f.fee_token).mint(&f.admin, &100);
    let result = f.fees.try_record_fee_checkpoint(&f.fee_token, &f.admin, &100);
    assert_eq!(result, Err(Ok(FeeError::Unauthorized)));
}

#[test]
fn test_record_rejects_non_positive_amount() {
    let f = setup();
    advance(&f.env, 1, 0);

    let result = f.fees.try_record_fee_checkpoint(&f.fee_token, &f.collector, &0);
    assert_eq!(result, Err(Ok(FeeError::InvalidAmount)));
    let result = f.fees.try_record_fee_checkpoint(&f.fee_token, &f.collector, &(-10));
    assert_eq!(result, Err(Ok(FeeError::InvalidAmount)));
}

#[test]
fn test_record_requires_settled_block() {
    // A fresh chain at sequence zero has no settled block to snapshot.
    let env = Env::default();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let collector = Address::generate(&env);
    let stake_token = env.register_stellar_asset_contract(admin.clone());
    let fee_token = env.register_stellar_asset_contract(admin.clone());
    let staking_id = env.register_contract(None, StakingContract);
    StakingContractClient::new(&env, &staking_id).initialize(&admin, &stake_token);
    let fees_id = env.register_contract(None, FeeDistributionContract);
    let fees = FeeDistributionContractClient::new(&env, &fees_id);
    fees.initialize(&admin, &staking_id, &collector);

    StellarAssetClient::new(&env, &fee_token).mint(&collector, &100);
    let result = fees.try_record_fee_checkpoint(&fee_token, &collector, &100);
    assert_eq!(result, Err(Ok(FeeError::NotYetDetermined)));
}

#[test]
fn test_claim_sole_staker_is_exact() {
    let f = setup();
    let user = Address::generate(&f.env);

    stake(&f, &user, 1_000, 8);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 200);
    advance(&f.env, 1, 0);

    // The sole staker owns the full weighted stake of every checkpoint, so
    // floor division loses nothing.
    assert_eq!(f.fees.accumulated_fees(&user, &f.fee_token), 300);
    let paid = f.fees.claim(&user, &f.fee_token, &10, &None);
    assert_eq!(paid, 300);
    assert_eq!(f.fees.processed_checkpoints(&user, &f.fee_token), 2);
    assert_eq!(f.fees.accumulated_fees(&user, &f.fee_token), 0);

    let balances = TokenClient::new(&f.env, &f.fee_token);
    assert_eq!(balances.balance(&user), 300);
    assert_eq!(balances.balance(&f.fees_id), 0);

    let result = f.fees.try_claim(&user, &f.fee_token, &10, &None);
    assert_eq!(result, Err(Ok(FeeError::AlreadyCurrent)));
}

#[test]
fn test_claim_pro_rata_split() {
    let f = setup();
    let a = Address::generate(&f.env);
    let b = Address::generate(&f.env);

    // Same lock date, so identical weights: the split is purely 1000:3000.
    stake(&f, &a, 1_000, 8);
    stake(&f, &b, 3_000, 8);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, 0);

    assert_eq!(f.fees.claim(&a, &f.fee_token, &0, &None), 25);
    assert_eq!(f.fees.claim(&b, &f.fee_token, &0, &None), 75);

    let balances = TokenClient::new(&f.env, &f.fee_token);
    assert_eq!(balances.balance(&a), 25);
    assert_eq!(balances.balance(&b), 75);
    assert_eq!(balances.balance(&f.fees_id), 0);
}

#[test]
fn test_claim_in_chunks_is_resumable() {
    let f = setup();
    let user = Address::generate(&f.env);

    stake(&f, &user, 1_000, 8);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, 0);

    assert_eq!(f.fees.claim(&user, &f.fee_token, &2, &None), 200);
    assert_eq!(f.fees.processed_checkpoints(&user, &f.fee_token), 2);

    assert_eq!(f.fees.claim(&user, &f.fee_token, &2, &None), 100);
    assert_eq!(f.fees.processed_checkpoints(&user, &f.fee_token), 3);

    let result = f.fees.try_claim(&user, &f.fee_token, &2, &None);
    assert_eq!(result, Err(Ok(FeeError::AlreadyCurrent)));
}

#[test]
fn test_checkpoint_with_no_stakers_contributes_zero() {
    let f = setup();
    let user = Address::generate(&f.env);

    // Fees accrued before anyone staked are attributable to no one.
    advance(&f.env, 1, SECONDS_PER_DAY);
    let index = record(&f, 100);
    assert_eq!(
        f.fees.fee_checkpoint_at(&f.fee_token, &index).unwrap().total_weighted_stake,
        0
    );

    stake(&f, &user, 1_000, 8);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 50);
    advance(&f.env, 1, 0);

    // The empty checkpoint pays nothing but the cursor still passes it.
    assert_eq!(f.fees.claim(&user, &f.fee_token, &0, &None), 50);
    assert_eq!(f.fees.processed_checkpoints(&user, &f.fee_token), 2);
    assert_eq!(TokenClient::new(&f.env, &f.fee_token).balance(&f.fees_id), 100);
}

#[test]
fn test_skip_ahead_scan_and_claim() {
    let f = setup();
    let a = Address::generate(&f.env);
    let b = Address::generate(&f.env);

    stake(&f, &a, 1_000, 8);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100); // checkpoint 0: only A staked
    advance(&f.env, 1, SECONDS_PER_DAY);
    stake(&f, &b, 1_000, 8);
    record(&f, 100); // checkpoint 1: B's stake not yet settled
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100); // checkpoint 2: A and B both staked
    advance(&f.env, 1, 0);

    // B's first positive checkpoint is 2.
    let scan = f.fees.get_next_positive_checkpoint(&b, &f.fee_token, &0, &10);
    assert_eq!(scan.next, 2);
    assert_eq!(scan.found, true);

    // A bounded scan that stops short reports there is more to look at.
    let scan = f.fees.get_next_positive_checkpoint(&b, &f.fee_token, &0, &2);
    assert_eq!(scan.next, 2);
    assert_eq!(scan.found, false);
    assert_eq!(scan.has_more, true);

    // A held stake through checkpoint 1 and may not skip past it.
    let result = f.fees.try_claim_starting_from(&a, &f.fee_token, &2, &0, &None);
    assert_eq!(result, Err(Ok(FeeError::InvalidFromCheckpoint)));

    // B skips the checkpoints it had no stake for and claims half of the
    // third (equal stakes, equal weights).
    assert_eq!(f.fees.claim_starting_from(&b, &f.fee_token, &2, &0, &None), 50);
    assert_eq!(f.fees.processed_checkpoints(&b, &f.fee_token), 3);
    let result = f.fees.try_claim(&b, &f.fee_token, &0, &None);
    assert_eq!(result, Err(Ok(FeeError::AlreadyCurrent)));

    // A past-the-end start is rejected.
    let result = f.fees.try_claim_starting_from(&b, &f.fee_token, &5, &0, &None);
    assert_eq!(result, Err(Ok(FeeError::InvalidFromCheckpoint)));

    // A's ordinary claim settles everything it is owed.
    assert_eq!(f.fees.claim(&a, &f.fee_token, &0, &None), 250);
    assert_eq!(TokenClient::new(&f.env, &f.fee_token).balance(&f.fees_id), 0);
}

#[test]
fn test_scan_finds_nothing_for_stranger() {
    let f = setup();
    let a = Address::generate(&f.env);
    let stranger = Address::generate(&f.env);

    stake(&f, &a, 1_000, 8);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, 0);

    let scan = f.fees.get_next_positive_checkpoint(&stranger, &f.fee_token, &0, &0);
    assert_eq!(scan.next, 2);
    assert_eq!(scan.found, false);
    assert_eq!(scan.has_more, false);
}

#[test]
fn test_accessor_defaults() {
    let f = setup();
    let user = Address::generate(&f.env);

    assert_eq!(f.fees.total_token_checkpoints(&f.fee_token), 0);
    assert_eq!(f.fees.processed_checkpoints(&user, &f.fee_token), 0);
    assert_eq!(f.fees.fee_checkpoint_at(&f.fee_token, &0), None);
}

#[test]
fn test_pause_blocks_recording_not_claims() {
    let f = setup();
    let user = Address::generate(&f.env);

    stake(&f, &user, 1_000, 8);
    advance(&f.env, 1, SECONDS_PER_DAY);
    record(&f, 100);
    advance(&f.env, 1, 0);

    f.fees.set_emergency_pause(&f.admin, &true);

    StellarAssetClient::new(&f.env, &f.fee_token).mint(&f.collector, &100);
    let result = f.fees.try_record_fee_checkpoint(&f.fee_token, &f.collector, &100);
    assert_eq!(result, Err(Ok(FeeError::ContractPaused)));

    // Claims stay open while recording is paused.
    assert_eq!(f.fees.claim(&user, &f.fee_token, &0, &None), 100);

    f.fees.set_emergency_pause(&f.admin, &false);
    f.fees.record_fee_checkpoint(&f.fee_token, &f.collector, &100);
}

#[test]
fn test_pause_requires_admin() {
    let f = setup();
    let rando = Address::generate(&f.env);

    let result = f.fees.try_set_emergency_pause(&rando, &true);
    assert_eq!(result, Err(Ok(FeeError::Unauthorized)));
}
