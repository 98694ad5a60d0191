//! Engine-level tests through the public `Protocol` surface.
//!
//! Claim payouts that reach past the pool live in waterfall.rs.

mod common;

use common::*;
use parametric_capital::auth::AdminSet;
use parametric_capital::error::CapitalError;
use parametric_capital::events::ProtocolEvent;
use parametric_capital::market::MarketId;
use parametric_capital::math::{MAGIC_SCALE, YEAR};
use parametric_capital::parameters::{ParameterUpdate, Parameters};
use parametric_capital::pool::PoolState;
use parametric_capital::premium::{PremiumCurve, SlopePremium};
use parametric_capital::protocol::Protocol;
use parametric_capital::state::{PolicyStatus, WithdrawalRequest};
use solana_program::pubkey::Pubkey;

const LOCKUP: i64 = Parameters::DEFAULT_LOCKUP;
const WINDOW: i64 = Parameters::DEFAULT_WITHDRAWABLE_DURATION;
const GRACE: i64 = Parameters::DEFAULT_UNLOCK_GRACE_PERIOD;

// ═══════════════════════════════════════════════════════════════
// Construction and authorization
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_new_rejects_unknown_default_model() {
    let mut defaults = Parameters::new(Pubkey::new_unique());
    defaults.premium_model = 1;
    let admin = Pubkey::new_unique();
    let err = Protocol::new(Pubkey::new_unique(), Box::new(AdminSet::new([admin])), defaults, flat(0)).err();
    assert_eq!(err, Some(CapitalError::UnknownPremiumModel));
}

#[test]
fn test_new_rejects_invalid_defaults() {
    let mut defaults = Parameters::new(Pubkey::new_unique());
    defaults.fee_rate = MAGIC_SCALE + 1;
    let admin = Pubkey::new_unique();
    let err = Protocol::new(Pubkey::new_unique(), Box::new(AdminSet::new([admin])), defaults, flat(0)).err();
    assert_eq!(err, Some(CapitalError::InvalidParameters));
}

#[test]
fn test_admin_set_members_only() {
    let (ops1, ops2, outsider) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
    let mut p = Protocol::new(
        Pubkey::new_unique(),
        Box::new(AdminSet::new([ops1, ops2])),
        Parameters::new(Pubkey::new_unique()),
        flat(0),
    )
    .unwrap();

    assert_eq!(p.create_pool(&ops1), Ok(MarketId(0)));
    assert_eq!(p.create_index(&ops2), Ok(MarketId(1)));
    assert_eq!(p.create_cds(&outsider), Err(CapitalError::Unauthorized));
    assert_eq!(p.market_count(), 2);
}

#[test]
fn test_market_addresses_are_distinct_and_derived() {
    let mut w = free_world();
    let pool = w.pool();
    let index = w.index();
    let a = w.protocol.market_address(pool).unwrap();
    let b = w.protocol.market_address(index).unwrap();
    assert_ne!(a, b);
    assert_ne!(&a, w.protocol.vault().address());
    assert_eq!(
        w.count_events(|e| matches!(e, ProtocolEvent::MarketCreated { address, .. } if *address == a)),
        1
    );
}

#[test]
fn test_market_lookup_errors() {
    let mut w = free_world();
    let index = w.index();
    assert_eq!(w.protocol.market(MarketId(9)).err(), Some(CapitalError::InvalidMarket));
    assert_eq!(w.protocol.pool(index).err(), Some(CapitalError::InvalidMarket));
    let buyer = w.user(100);
    assert_eq!(
        w.protocol.insure(&buyer, index, 10, u64::MAX, SPAN, [0; 32], T0),
        Err(CapitalError::InvalidMarket)
    );
}

// ═══════════════════════════════════════════════════════════════
// LP positions
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_first_deposit_mints_one_to_one() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.lp(pool, 1_000);
    assert_eq!(w.protocol.share_balance(pool, &lp).unwrap(), 1_000);
    assert_eq!(w.protocol.share_supply(pool).unwrap(), 1_000);
    assert_eq!(w.protocol.rate(pool).unwrap(), 1_000_000_000_000_000_000);
    assert_eq!(w.balance(&lp), 0);
    assert_eq!(
        w.count_events(|e| matches!(e, ProtocolEvent::Deposited { amount: 1_000, shares: 1_000, .. })),
        1
    );
    w.assert_custody();
}

#[test]
fn test_zero_deposit_rejected() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.user(10);
    assert_eq!(w.protocol.deposit(&lp, pool, 0, T0), Err(CapitalError::ZeroAmount));
}

#[test]
fn test_deposit_without_allowance_changes_nothing() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.user(1_000);
    let vault = *w.protocol.vault().address();
    w.protocol.token_mut().approve(&lp, &vault, 0);
    let events_before = w.protocol.events().len();

    assert_eq!(w.protocol.deposit(&lp, pool, 1_000, T0), Err(CapitalError::InsufficientAllowance));
    assert_eq!(w.protocol.share_supply(pool).unwrap(), 0);
    assert_eq!(w.protocol.vault().total_attributions(), 0);
    assert_eq!(w.balance(&lp), 1_000);
    assert_eq!(w.protocol.events().len(), events_before);
}

#[test]
fn test_withdraw_only_inside_window() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.lp(pool, 1_000);

    assert_eq!(w.protocol.withdraw(&lp, pool, 100, T0 + LOCKUP), Err(CapitalError::WithdrawalNotReady));
    w.protocol.request_withdraw(&lp, pool, 400, T0).unwrap();
    assert_eq!(w.protocol.withdrawal_request(pool, &lp).unwrap(), WithdrawalRequest::new(T0, 400));

    assert_eq!(w.protocol.withdraw(&lp, pool, 400, T0 + LOCKUP - 1), Err(CapitalError::WithdrawalNotReady));
    assert_eq!(
        w.protocol.withdraw(&lp, pool, 500, T0 + LOCKUP),
        Err(CapitalError::WithdrawalExceedsRequest)
    );
    assert_eq!(w.protocol.withdraw(&lp, pool, 400, T0 + LOCKUP).unwrap(), 400);
    assert_eq!(w.balance(&lp), 400);
    assert_eq!(w.protocol.share_balance(pool, &lp).unwrap(), 600);
    assert_eq!(w.protocol.withdrawal_request(pool, &lp).unwrap().amount, 0);

    // Request is spent.
    assert_eq!(w.protocol.withdraw(&lp, pool, 1, T0 + LOCKUP), Err(CapitalError::WithdrawalNotReady));
    w.assert_custody();
}

#[test]
fn test_withdraw_window_expires() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.lp(pool, 1_000);
    w.protocol.request_withdraw(&lp, pool, 1_000, T0).unwrap();
    let closed = T0 + LOCKUP + WINDOW + 1;
    assert_eq!(w.protocol.withdraw(&lp, pool, 1_000, closed), Err(CapitalError::WithdrawalNotReady));

    // A fresh request restarts the lockup.
    w.protocol.request_withdraw(&lp, pool, 1_000, closed).unwrap();
    assert_eq!(w.protocol.withdraw(&lp, pool, 1_000, closed + LOCKUP).unwrap(), 1_000);
    assert_eq!(w.protocol.share_supply(pool).unwrap(), 0);
}

#[test]
fn test_request_cannot_exceed_balance() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.lp(pool, 1_000);
    assert_eq!(w.protocol.request_withdraw(&lp, pool, 1_001, T0), Err(CapitalError::InsufficientShares));
    assert_eq!(w.protocol.request_withdraw(&lp, pool, 0, T0), Err(CapitalError::ZeroAmount));
}

#[test]
fn test_transferred_shares_carry_the_lock() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.lp(pool, 1_000);
    let bob = Pubkey::new_unique();

    w.protocol.request_withdraw(&lp, pool, 1_000, T0).unwrap();
    w.protocol.transfer_shares(&lp, pool, &bob, 400).unwrap();
    assert_eq!(w.protocol.withdrawal_request(pool, &lp).unwrap().amount, 600);
    assert_eq!(w.protocol.withdrawal_request(pool, &bob).unwrap(), WithdrawalRequest::new(T0, 400));

    // The sender's lock has matured but no longer covers the shares it gave away.
    assert_eq!(w.protocol.withdraw(&lp, pool, 700, T0 + LOCKUP), Err(CapitalError::InsufficientShares));
    assert_eq!(w.protocol.withdraw(&bob, pool, 400, T0 + LOCKUP).unwrap(), 400);
    assert_eq!(w.protocol.withdraw(&lp, pool, 600, T0 + LOCKUP).unwrap(), 600);
    assert_eq!(w.balance(&bob), 400);
}

#[test]
fn test_withdraw_cannot_touch_locked_capacity() {
    let mut w = free_world();
    let pool = w.pool();
    let lp = w.lp(pool, 1_000);
    w.insure(pool, 800);
    assert_eq!(w.protocol.available_balance(pool).unwrap(), 200);
    assert_eq!(w.protocol.utilization(pool).unwrap(), 800_000);

    w.protocol.request_withdraw(&lp, pool, 1_000, T0).unwrap();
    assert_eq!(w.protocol.withdraw(&lp, pool, 500, T0 + LOCKUP), Err(CapitalError::InsufficientCapacity));
    assert_eq!(w.protocol.withdraw(&lp, pool, 200, T0 + LOCKUP).unwrap(), 200);
    assert_eq!(w.protocol.available_balance(pool).unwrap(), 0);
}

#[test]
fn test_late_depositor_is_not_diluted_by_premium() {
    let mut w = world(0, flat(269_900));
    let pool = w.pool();
    w.lp(pool, 10_000);
    let buyer = w.user(10_000);
    w.protocol.insure(&buyer, pool, 9_999, u64::MAX, YEAR, [0; 32], T0).unwrap();
    assert_eq!(w.protocol.owned_liquidity(pool).unwrap(), 12_698);
    assert_eq!(w.protocol.rate(pool).unwrap(), 1_269_800_000_000_000_000);

    let late = w.lp(pool, 12_698);
    assert_eq!(w.protocol.share_balance(pool, &late).unwrap(), 10_000);
    assert_eq!(w.protocol.rate(pool).unwrap(), 1_269_800_000_000_000_000);
}

// ═══════════════════════════════════════════════════════════════
// Underwriting
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_quote_matches_charged_premium() {
    let mut w = world(0, flat(269_900));
    let pool = w.pool();
    w.lp(pool, 10_000);
    assert_eq!(w.protocol.premium_quote(pool, 9_999, YEAR).unwrap(), 2_698);

    let buyer = w.user(10_000);
    let out = w.protocol.insure(&buyer, pool, 9_999, 2_698, YEAR, [0; 32], T0).unwrap();
    assert_eq!(out.premium, 2_698);
    assert_eq!(out.fee, 0);
    assert_eq!(w.protocol.locked_amount(pool).unwrap(), 9_999);

    let policy = w.protocol.policy(pool, out.policy_id).unwrap();
    assert_eq!(policy.amount, 9_999);
    assert_eq!(policy.payout_max, 9_999);
    assert_eq!(policy.end_time, T0 + YEAR);
    assert_eq!(policy.insured_pubkey(), buyer);
}

#[test]
fn test_insure_rejections_leave_no_trace() {
    let mut w = world(0, flat(269_900));
    let pool = w.pool();
    w.lp(pool, 1_000);
    let buyer = w.user(1_000);
    let events_before = w.protocol.events().len();

    assert_eq!(
        w.protocol.insure(&buyer, pool, 0, u64::MAX, SPAN, [0; 32], T0),
        Err(CapitalError::ZeroAmount)
    );
    assert_eq!(
        w.protocol.insure(&buyer, pool, 100, u64::MAX, DAY, [0; 32], T0),
        Err(CapitalError::SpanOutOfRange)
    );
    assert_eq!(
        w.protocol.insure(&buyer, pool, 100, u64::MAX, YEAR + 1, [0; 32], T0),
        Err(CapitalError::SpanOutOfRange)
    );
    assert_eq!(
        w.protocol.insure(&buyer, pool, 1_001, u64::MAX, SPAN, [0; 32], T0),
        Err(CapitalError::InsufficientCapacity)
    );
    assert_eq!(
        w.protocol.insure(&buyer, pool, 1_000, 1, YEAR, [0; 32], T0),
        Err(CapitalError::PremiumExceedsMax)
    );

    assert_eq!(w.protocol.locked_amount(pool).unwrap(), 0);
    assert!(w.protocol.pool(pool).unwrap().policies().is_empty());
    assert_eq!(w.balance(&buyer), 1_000);
    assert_eq!(w.protocol.events().len(), events_before);
}

#[test]
fn test_buyer_without_funds_cannot_insure() {
    let mut w = world(0, flat(269_900));
    let pool = w.pool();
    w.lp(pool, 10_000);
    let broke = w.user(1);
    assert_eq!(
        w.protocol.insure(&broke, pool, 9_999, u64::MAX, YEAR, [0; 32], T0),
        Err(CapitalError::InsufficientFunds)
    );
    assert_eq!(w.protocol.locked_amount(pool).unwrap(), 0);
}

#[test]
fn test_fee_accrues_to_treasury_and_is_collected() {
    let mut w = world(100_000, flat(269_900));
    let pool = w.pool();
    w.lp(pool, 10_000);
    let buyer = w.user(10_000);
    let out = w.protocol.insure(&buyer, pool, 9_999, u64::MAX, YEAR, [0; 32], T0).unwrap();
    assert_eq!(out.fee, 269);
    assert_eq!(w.protocol.vault().underlying_value(&w.treasury), 269);
    assert_eq!(w.protocol.owned_liquidity(pool).unwrap(), 10_000 + 2_429);

    let (admin, treasury) = (w.admin, w.treasury);
    let to = Pubkey::new_unique();
    assert_eq!(w.protocol.collect_fees(&to, &treasury, &to), Err(CapitalError::Unauthorized));
    assert_eq!(w.protocol.collect_fees(&admin, &treasury, &to).unwrap(), 269);
    assert_eq!(w.balance(&to), 269);
    assert_eq!(w.protocol.collect_fees(&admin, &treasury, &to), Err(CapitalError::ZeroAmount));
    assert_eq!(w.protocol.owned_liquidity(pool).unwrap(), 12_429);
    w.assert_custody();
}

#[test]
fn test_utilization_priced_curve() {
    let slope = PremiumCurve::Slope(SlopePremium { base_rate: 10_000, slope: 100_000, kink: 800_000, jump_slope: 2_000_000 });
    let mut w = world(0, slope);
    let pool = w.pool();
    w.lp(pool, 1_000_000);

    // Priced at utilization after the lock: 50% -> 1% + 5%.
    let rate_half = 10_000 + 50_000;
    assert_eq!(
        w.protocol.premium_quote(pool, 500_000, YEAR).unwrap(),
        500_000 * rate_half / MAGIC_SCALE
    );
    assert!(w.protocol.premium_quote(pool, 900_000, YEAR).unwrap() > w.protocol.premium_quote(pool, 500_000, YEAR).unwrap() * 2);
}

#[test]
fn test_unlock_after_grace_period() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 1_000);
    let (_, policy) = w.insure(pool, 600);

    assert_eq!(w.protocol.unlock(pool, policy, T0 + SPAN), Err(CapitalError::UnlockNotReady));
    assert_eq!(w.protocol.unlock(pool, policy, T0 + SPAN + GRACE), Err(CapitalError::UnlockNotReady));
    assert_eq!(w.protocol.unlock(pool, policy, T0 + SPAN + GRACE + 1).unwrap(), 600);
    assert_eq!(w.protocol.locked_amount(pool).unwrap(), 0);
    assert_eq!(w.protocol.policy(pool, policy).unwrap().status(), PolicyStatus::Unlocked);
    assert_eq!(w.protocol.unlock(pool, policy, T0 + SPAN + GRACE + 2), Err(CapitalError::UnlockNotReady));
    assert_eq!(w.protocol.unlock(pool, 42, T0 + SPAN + GRACE + 2), Err(CapitalError::UnknownPolicy));
    assert_eq!(w.count_events(|e| matches!(e, ProtocolEvent::Unlocked { .. })), 1);
}

#[test]
fn test_transfer_policy_moves_claim_right() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 1_000);
    let (buyer, policy) = w.insure(pool, 500);
    let heir = Pubkey::new_unique();

    assert_eq!(w.protocol.transfer_policy(&heir, pool, policy, &heir), Err(CapitalError::Unauthorized));
    w.protocol.transfer_policy(&buyer, pool, policy, &heir).unwrap();
    assert_eq!(w.protocol.policy(pool, policy).unwrap().insured_pubkey(), heir);

    w.apply_full_cover(pool);
    assert_eq!(w.protocol.redeem(&buyer, pool, policy, T0 + 200), Err(CapitalError::Unauthorized));
    assert_eq!(w.protocol.redeem(&heir, pool, policy, T0 + 200).unwrap(), 500);
    assert_eq!(w.balance(&heir), 500);
    assert_eq!(w.protocol.owned_liquidity(pool).unwrap(), 500);
}

// ═══════════════════════════════════════════════════════════════
// Claims
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_apply_cover_validation() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 1_000);
    let admin = w.admin;

    assert_eq!(
        w.protocol.apply_cover(&Pubkey::new_unique(), pool, full_cover(T0), T0 + 100).err(),
        Some(CapitalError::Unauthorized)
    );
    assert_eq!(
        w.protocol.apply_cover(&admin, pool, full_cover(T0 + 101), T0 + 100).err(),
        Some(CapitalError::InvalidParameters)
    );
    let mut over = full_cover(T0);
    over.payout_numerator = 3;
    over.payout_denominator = 2;
    assert_eq!(w.protocol.apply_cover(&admin, pool, over, T0 + 100).err(), Some(CapitalError::InvalidPayoutRatio));
    let mut nothing = full_cover(T0);
    nothing.payout_numerator = 0;
    assert_eq!(w.protocol.apply_cover(&admin, pool, nothing, T0 + 100).err(), Some(CapitalError::InvalidPayoutRatio));

    let claim = w.protocol.apply_cover(&admin, pool, full_cover(T0), T0 + 100).unwrap();
    assert_eq!(claim.pending_end, T0 + 100 + 3 * DAY);
    assert_eq!(
        w.protocol.apply_cover(&admin, pool, full_cover(T0), T0 + 101).err(),
        Some(CapitalError::MarketLocked)
    );
}

#[test]
fn test_redeem_rejections() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 1_000);
    let (buyer, policy) = w.insure(pool, 300);
    let stranger = w.user(0);

    assert_eq!(w.protocol.redeem(&buyer, pool, policy, T0 + 10), Err(CapitalError::NoApplicableIncident));

    w.apply_full_cover(pool);
    assert_eq!(w.protocol.redeem(&stranger, pool, policy, T0 + 200), Err(CapitalError::Unauthorized));
    assert_eq!(w.protocol.redeem(&buyer, pool, 7, T0 + 200), Err(CapitalError::UnknownPolicy));
    assert_eq!(
        w.protocol.redeem(&buyer, pool, policy, T0 + 100 + 3 * DAY + 1),
        Err(CapitalError::NoApplicableIncident)
    );

    assert_eq!(w.protocol.redeem(&buyer, pool, policy, T0 + 200).unwrap(), 300);
    assert_eq!(w.protocol.redeem(&buyer, pool, policy, T0 + 201), Err(CapitalError::PolicyNotActive));
}

#[test]
fn test_incident_outside_coverage_not_payable() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 1_000);
    let (buyer, policy) = w.insure(pool, 300);
    let admin = w.admin;

    // Incident before the policy started.
    w.protocol.apply_cover(&admin, pool, full_cover(T0 - 10), T0 + 100).unwrap();
    assert_eq!(w.protocol.redeem(&buyer, pool, policy, T0 + 200), Err(CapitalError::PolicyNotActive));
    // Nothing eligible: the claim can close immediately.
    w.protocol.resume(&admin, pool, T0 + 200).unwrap();
    assert_eq!(w.protocol.locked_amount(pool).unwrap(), 300);
}

#[test]
fn test_claim_target_list_limits_payouts() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 1_000);
    let (first, p0) = w.insure(pool, 200);
    let (second, p1) = w.insure(pool, 200);
    let admin = w.admin;

    let mut terms = full_cover(T0 + 50);
    terms.targets = vec![p1];
    w.protocol.apply_cover(&admin, pool, terms, T0 + 100).unwrap();

    assert_eq!(w.protocol.redeem(&first, pool, p0, T0 + 200), Err(CapitalError::PolicyNotTargeted));
    assert_eq!(w.protocol.redeem(&second, pool, p1, T0 + 200).unwrap(), 200);
    // The untargeted policy keeps its lock and is not claimable.
    assert_eq!(w.protocol.locked_amount(pool).unwrap(), 200);
    w.protocol.resume(&admin, pool, T0 + 201).unwrap();
}

#[test]
fn test_unlock_refused_while_policy_claimable() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 1_000);
    let (buyer, policy) = w.insure(pool, 400);
    let admin = w.admin;

    // Incident at the very end of coverage, reported after the grace period.
    let late = T0 + SPAN + GRACE + 10;
    w.protocol.apply_cover(&admin, pool, full_cover(T0 + SPAN), late).unwrap();
    assert_eq!(w.protocol.unlock(pool, policy, late + 1), Err(CapitalError::UnlockNotReady));
    assert_eq!(w.protocol.redeem(&buyer, pool, policy, late + 1).unwrap(), 400);
}

// ═══════════════════════════════════════════════════════════════
// Index allocation
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_allocation_follows_points_and_replacement() {
    let mut w = free_world();
    let (p1, p2, p3) = (w.pool(), w.pool(), w.pool());
    let index = w.index();
    w.allocate(index, p1, 1);
    w.lp(index, 3_000);
    assert_eq!(w.protocol.allocated_credit(p1, index).unwrap(), 3_000);

    w.allocate(index, p2, 2);
    assert_eq!(w.protocol.allocated_credit(p1, index).unwrap(), 1_000);
    assert_eq!(w.protocol.allocated_credit(p2, index).unwrap(), 2_000);
    assert_eq!(w.protocol.allocation(index, 1).unwrap().allocation_points, 2);

    // Replace slot 0: p1 gives its credit back, p3 takes its share.
    let admin = w.admin;
    w.protocol.set_allocation(&admin, index, 0, p3, 1, false, T0).unwrap();
    assert_eq!(w.protocol.allocated_credit(p1, index).unwrap(), 0);
    assert_eq!(w.protocol.allocated_credit(p3, index).unwrap(), 1_000);
    assert_eq!(w.protocol.allocated_credit(p2, index).unwrap(), 2_000);
    assert_eq!(w.protocol.total_allocated_credit(index).unwrap(), 3_000);
    assert_eq!(w.protocol.index(index).unwrap().pools(), vec![p3, p2]);
}

#[test]
fn test_allocation_errors() {
    let mut w = free_world();
    let (p1, p2) = (w.pool(), w.pool());
    let index = w.index();
    let admin = w.admin;
    w.allocate(index, p1, 1);

    assert_eq!(
        w.protocol.set_allocation(&Pubkey::new_unique(), index, 1, p2, 1, true, T0),
        Err(CapitalError::Unauthorized)
    );
    assert_eq!(w.protocol.set_allocation(&admin, index, 1, p1, 1, true, T0), Err(CapitalError::DuplicatePool));
    assert_eq!(w.protocol.set_allocation(&admin, index, 5, p2, 1, true, T0), Err(CapitalError::InvalidPosition));
    assert_eq!(w.protocol.set_allocation(&admin, index, 3, p2, 1, false, T0), Err(CapitalError::InvalidPosition));
    assert_eq!(w.protocol.set_allocation(&admin, index, 1, index, 1, true, T0), Err(CapitalError::InvalidMarket));

    let cap = ParameterUpdate { max_list: Some(1), ..Default::default() };
    w.protocol.update_parameters(&admin, Some(index), &cap).unwrap();
    assert_eq!(
        w.protocol.set_allocation(&admin, index, 1, p2, 1, true, T0),
        Err(CapitalError::AllocationListFull)
    );
    assert_eq!(w.protocol.index(index).unwrap().slot_count(), 1);
}

#[test]
fn test_allocation_weights_must_fit_in_total() {
    let mut w = free_world();
    let (p1, p2) = (w.pool(), w.pool());
    let index = w.index();
    let admin = w.admin;
    w.allocate(index, p1, u64::MAX);
    let events = w.protocol.events().len();

    assert_eq!(
        w.protocol.set_allocation(&admin, index, 1, p2, 2, true, T0),
        Err(CapitalError::Overflow)
    );
    assert_eq!(w.protocol.index(index).unwrap().slot_count(), 1);
    assert_eq!(w.protocol.events().len(), events);

    // Lowering the heavy weight makes room again.
    w.protocol.set_allocation(&admin, index, 0, p1, 1, false, T0).unwrap();
    w.allocate(index, p2, 2);
    assert_eq!(w.protocol.index(index).unwrap().total_allocation_points(), Ok(3));
}

#[test]
fn test_index_credit_total_cannot_overflow() {
    let mut w = free_world();
    let (p1, p2) = (w.pool(), w.pool());
    let index = w.index();
    w.leverage(index, 2_000);
    w.allocate(index, p1, 1);
    w.allocate(index, p2, 1);

    // Each pool would get 1e19 of credit; together 2e19 does not fit a u64.
    let whale = w.user(10_000_000_000_000_000_000);
    assert_eq!(
        w.protocol.deposit(&whale, index, 10_000_000_000_000_000_000, T0),
        Err(CapitalError::Overflow)
    );
    assert_eq!(w.balance(&whale), 10_000_000_000_000_000_000);
    assert_eq!(w.protocol.share_supply(index).unwrap(), 0);
    assert_eq!(w.protocol.total_allocated_credit(index).unwrap(), 0);
    assert_eq!(w.protocol.leverage(index).unwrap(), 0);
    w.assert_custody();

    w.protocol.deposit(&whale, index, 1_000_000, T0).unwrap();
    assert_eq!(w.protocol.total_allocated_credit(index).unwrap(), 2_000_000);
}

#[test]
fn test_premium_growth_reaches_credit_on_adjust() {
    let mut w = world(0, flat(100_000));
    let pool = w.pool();
    let index = w.index();
    w.allocate(index, pool, 1);
    w.lp(index, 1_000);
    assert_eq!(w.protocol.allocated_credit(pool, index).unwrap(), 1_000);

    w.insure(pool, 500);
    let grown = w.protocol.total_liquidity(index).unwrap();
    assert!(grown > 1_000);
    // Accrual alone does not push credit.
    assert_eq!(w.protocol.allocated_credit(pool, index).unwrap(), 1_000);

    w.protocol.adjust_alloc(index, T0 + 1).unwrap();
    assert_eq!(w.protocol.allocated_credit(pool, index).unwrap(), grown);
    assert_eq!(w.protocol.total_liquidity(index).unwrap(), grown);
}

#[test]
fn test_leverage_scales_credit() {
    let mut w = free_world();
    let pool = w.pool();
    let index = w.index();
    w.allocate(index, pool, 1);
    w.lp(index, 1_000);
    assert_eq!(w.protocol.leverage(index).unwrap(), 1_000);

    w.leverage(index, 3_000);
    assert_eq!(w.protocol.allocated_credit(pool, index).unwrap(), 3_000);
    assert_eq!(w.protocol.leverage(index).unwrap(), 3_000);
    assert_eq!(w.protocol.index(index).unwrap().target_leverage(), 3_000);

    let admin = w.admin;
    assert_eq!(w.protocol.set_leverage(&admin, index, 0, T0), Err(CapitalError::InvalidParameters));
}

#[test]
fn test_adjust_alloc_is_idempotent() {
    let mut w = free_world();
    let (p1, p2) = (w.pool(), w.pool());
    let index = w.index();
    w.allocate(index, p1, 1);
    w.allocate(index, p2, 3);
    w.lp(index, 4_000);
    w.protocol.drain_events();

    w.protocol.adjust_alloc(index, T0 + 1).unwrap();
    w.protocol.adjust_alloc(index, T0 + 2).unwrap();
    assert!(w.protocol.events().is_empty());
    assert_eq!(w.protocol.allocated_credit(p1, index).unwrap(), 1_000);
    assert_eq!(w.protocol.allocated_credit(p2, index).unwrap(), 3_000);
}

#[test]
fn test_index_withdraw_capped_by_pool_headroom() {
    let mut w = free_world();
    let pool = w.pool();
    let index = w.index();
    w.allocate(index, pool, 1);
    let alice = w.lp(index, 1_000);
    w.insure(pool, 600);
    assert_eq!(w.protocol.withdrawable(index).unwrap(), 400);

    w.protocol.request_withdraw(&alice, index, 1_000, T0).unwrap();
    assert_eq!(
        w.protocol.withdraw(&alice, index, 500, T0 + LOCKUP),
        Err(CapitalError::InsufficientCapacity)
    );
    assert_eq!(w.protocol.withdraw(&alice, index, 400, T0 + LOCKUP).unwrap(), 400);
    assert_eq!(w.protocol.allocated_credit(pool, index).unwrap(), 600);
    assert_eq!(w.protocol.available_balance(pool).unwrap(), 0);
    assert_eq!(w.protocol.withdrawable(index).unwrap(), 0);
}

#[test]
fn test_credit_cannot_shrink_below_locked() {
    let mut w = free_world();
    let pool = w.pool();
    let index = w.index();
    w.allocate(index, pool, 1);
    w.lp(index, 1_000);
    w.insure(pool, 900);

    // Halving leverage would pull 500 of credit out from under 900 locked.
    let admin = w.admin;
    assert_eq!(w.protocol.set_leverage(&admin, index, 500, T0), Err(CapitalError::InsufficientCapacity));
    assert_eq!(w.protocol.index(index).unwrap().target_leverage(), 1_000);
    assert_eq!(w.protocol.allocated_credit(pool, index).unwrap(), 1_000);
}

#[test]
fn test_value_conserved_without_claims() {
    let mut w = world(100_000, flat(269_900));
    let (p1, p2) = (w.pool(), w.pool());
    let index = w.index();
    let cds = w.cds();
    w.leverage(index, 2_000);
    w.allocate(index, p1, 1);
    w.allocate(index, p2, 1);
    w.lp(index, 10_000);
    w.lp(cds, 10_000);
    w.lp(p2, 10_000);
    let buyer = w.user(10_000);
    w.protocol.insure(&buyer, p1, 9_999, u64::MAX, YEAR, [0; 32], T0).unwrap();
    w.protocol.adjust_alloc(index, T0 + 1).unwrap();

    let p = &w.protocol;
    let held = p.owned_liquidity(p1).unwrap()
        + p.owned_liquidity(p2).unwrap()
        + p.total_liquidity(index).unwrap()
        + p.total_liquidity(cds).unwrap()
        + p.vault().underlying_value(&w.treasury);
    assert_eq!(held, p.vault().value_all());
    assert_eq!(p.vault().value_all(), 30_000 + 2_698);
    w.assert_custody();
}

// ═══════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_parameter_overrides() {
    let mut w = free_world();
    let (p1, p2) = (w.pool(), w.pool());
    let admin = w.admin;

    let short = ParameterUpdate { lockup: Some(60), ..Default::default() };
    assert_eq!(
        w.protocol.update_parameters(&Pubkey::new_unique(), Some(p1), &short),
        Err(CapitalError::Unauthorized)
    );
    w.protocol.update_parameters(&admin, Some(p1), &short).unwrap();
    assert_eq!(w.protocol.parameters(p1).lockup, 60);
    assert_eq!(w.protocol.parameters(p2).lockup, LOCKUP);

    let lp = w.lp(p1, 100);
    w.protocol.request_withdraw(&lp, p1, 100, T0).unwrap();
    assert_eq!(w.protocol.withdraw(&lp, p1, 100, T0 + 60).unwrap(), 100);

    assert_eq!(
        w.protocol.update_parameters(&admin, Some(MarketId(77)), &short),
        Err(CapitalError::InvalidMarket)
    );
    let bad_fee = ParameterUpdate { fee_rate: Some(MAGIC_SCALE + 1), ..Default::default() };
    assert_eq!(w.protocol.update_parameters(&admin, None, &bad_fee), Err(CapitalError::InvalidParameters));
    assert_eq!(w.protocol.default_parameters().fee_rate, 0);
}

#[test]
fn test_premium_model_selection() {
    let mut w = free_world();
    let pool = w.pool();
    w.lp(pool, 10_000);
    let admin = w.admin;
    assert_eq!(w.protocol.premium_quote(pool, 1_000, YEAR).unwrap(), 0);

    let unknown = ParameterUpdate { premium_model: Some(1), ..Default::default() };
    assert_eq!(
        w.protocol.update_parameters(&admin, Some(pool), &unknown),
        Err(CapitalError::UnknownPremiumModel)
    );

    assert_eq!(w.protocol.add_premium_curve(&admin, flat(100_000)).unwrap(), 1);
    w.protocol.update_parameters(&admin, Some(pool), &unknown).unwrap();
    assert_eq!(w.protocol.premium_quote(pool, 1_000, YEAR).unwrap(), 100);

    w.protocol.set_premium_curve(&admin, 1, flat(200_000)).unwrap();
    assert_eq!(w.protocol.premium_quote(pool, 1_000, YEAR).unwrap(), 200);
    assert_eq!(w.protocol.set_premium_curve(&admin, 9, flat(1)), Err(CapitalError::UnknownPremiumModel));
}

#[test]
fn test_pause_blocks_entry_points() {
    let mut w = free_world();
    let pool = w.pool();
    let index = w.index();
    let cds = w.cds();
    let admin = w.admin;
    let lp = w.user(1_000);

    assert_eq!(w.protocol.set_paused(&lp, pool, true), Err(CapitalError::Unauthorized));
    for market in [pool, index, cds] {
        w.protocol.set_paused(&admin, market, true).unwrap();
        assert_eq!(w.protocol.deposit(&lp, market, 100, T0), Err(CapitalError::MarketPaused));
    }
    assert_eq!(w.protocol.pool_state(pool, T0).unwrap(), PoolState::Paused);
    assert_eq!(
        w.protocol.insure(&lp, pool, 1, u64::MAX, SPAN, [0; 32], T0),
        Err(CapitalError::MarketPaused)
    );

    w.protocol.set_paused(&admin, pool, false).unwrap();
    assert_eq!(w.protocol.deposit(&lp, pool, 100, T0).unwrap(), 100);
    assert_eq!(w.count_events(|e| matches!(e, ProtocolEvent::Paused { paused: true, .. })), 3);
}
