//! Pure capital math — shares, attributions, credit allocation, loss absorption.
//!
//! No state, no Pubkeys. Everything here is integer arithmetic with u128
//! intermediates so the same functions back the engine, the proptest suite
//! and the Kani harnesses.

/// Fixed-point scale for share rates (`rate()` returns 1e18 == 1.0).
pub const RATE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Scale for fee rates, premium rates and utilization (1e6 == 100%).
pub const MAGIC_SCALE: u64 = 1_000_000;

/// Scale for index leverage (1_000 == 1.0x).
pub const LEVERAGE_SCALE: u64 = 1_000;

/// Scale for the per-credit premium accumulator.
pub const REWARD_SCALE: u128 = 1_000_000_000_000;

/// Seconds in a premium year.
pub const YEAR: i64 = 365 * 24 * 60 * 60;

/// `floor(a * b / c)` through u128. `None` on zero divisor or u64 overflow.
pub fn mul_div(a: u64, b: u64, c: u64) -> Option<u64> {
    if c == 0 {
        return None;
    }
    let r = (a as u128).checked_mul(b as u128)? / c as u128;
    u64::try_from(r).ok()
}

/// `ceil(a * b / c)` through u128. `None` on zero divisor or u64 overflow.
pub fn mul_div_up(a: u64, b: u64, c: u64) -> Option<u64> {
    if c == 0 {
        return None;
    }
    let num = (a as u128).checked_mul(b as u128)?;
    let r = num.checked_add(c as u128 - 1)? / c as u128;
    u64::try_from(r).ok()
}

/// Calculate LP shares for a deposit.
///
/// # Arguments
/// * `total_supply` - Current LP shares in circulation
/// * `total_value` - Current value those shares claim (the market's liquidity)
/// * `amount` - Value being deposited
///
/// # Returns
/// * `Some(shares)` - Shares to mint (rounds DOWN — market-favoring)
/// * `None` - Overflow, or a state where minting would steal or dilute
///
/// # Invariant
/// First depositor (supply == 0, value == 0): 1:1.
/// Subsequent: `shares = amount * supply / value`.
pub fn calc_shares_for_deposit(total_supply: u64, total_value: u64, amount: u64) -> Option<u64> {
    if total_supply == 0 && total_value == 0 {
        Some(amount)
    } else if total_supply == 0 {
        // Orphaned value with no holders: a 1:1 mint would hand it to the depositor.
        None
    } else if total_value == 0 {
        // Supply exists but was wiped by a loss: new value would be shared with it.
        None
    } else {
        mul_div(amount, total_supply, total_value)
    }
}

/// Calculate value released by burning LP shares.
///
/// `value = shares * total_value / total_supply` (rounded down).
/// Full burn returns ≤ total_value (never more).
pub fn calc_value_for_withdraw(total_supply: u64, total_value: u64, shares: u64) -> Option<u64> {
    if total_supply == 0 {
        return None;
    }
    mul_div(shares, total_value, total_supply)
}

/// Share rate scaled by `RATE_SCALE`. Zero supply reads as zero.
pub fn share_rate(total_value: u64, total_supply: u64) -> u128 {
    if total_supply == 0 {
        return 0;
    }
    (total_value as u128) * RATE_SCALE / total_supply as u128
}

/// Attribution units minted for `amount` entering a vault.
///
/// 1:1 for an empty vault, otherwise proportional to current value so that
/// value already in the vault is not diluted.
pub fn attributions_for_value(total_attributions: u64, value_all: u64, amount: u64) -> Option<u64> {
    if total_attributions == 0 || value_all == 0 {
        Some(amount)
    } else {
        mul_div(amount, total_attributions, value_all)
    }
}

/// Attribution units that must be burned to release `amount` (rounds UP).
pub fn attributions_to_burn(total_attributions: u64, value_all: u64, amount: u64) -> Option<u64> {
    if amount == 0 {
        return Some(0);
    }
    mul_div_up(amount, total_attributions, value_all)
}

/// Value claimed by `units` of attribution (rounds DOWN).
pub fn value_of_attributions(total_attributions: u64, value_all: u64, units: u64) -> u64 {
    if total_attributions == 0 {
        return 0;
    }
    mul_div(units, value_all, total_attributions).unwrap_or(0)
}

/// Credit an index grants one pool.
///
/// `liquidity * leverage * points / (LEVERAGE_SCALE * total_points)`.
/// Returns 0 when no points are allocated.
pub fn target_credit(liquidity: u64, leverage: u64, points: u64, total_points: u64) -> Option<u64> {
    if total_points == 0 || points == 0 {
        return Some(0);
    }
    let num = (liquidity as u128)
        .checked_mul(leverage as u128)?
        .checked_mul(points as u128)?;
    let den = (LEVERAGE_SCALE as u128).checked_mul(total_points as u128)?;
    u64::try_from(num / den).ok()
}

/// Split `amount` across `weights` pro-rata.
///
/// Each share rounds down; the rounding remainder goes to the last
/// non-zero weight so the parts always sum to `amount` exactly.
/// All-zero weights produce all-zero parts.
pub fn split_pro_rata(amount: u64, weights: &[u64]) -> Vec<u64> {
    let total: u128 = weights.iter().map(|w| *w as u128).sum();
    if total == 0 {
        return vec![0; weights.len()];
    }
    let mut parts: Vec<u64> = weights
        .iter()
        .map(|w| ((amount as u128) * (*w as u128) / total) as u64)
        .collect();
    let assigned: u64 = parts.iter().sum();
    if let Some(last) = weights.iter().rposition(|w| *w > 0) {
        parts[last] += amount - assigned;
    }
    parts
}

/// One layer of the loss waterfall.
///
/// Returns `(absorbed, residual)` with `absorbed = min(loss, available)` and
/// `absorbed + residual == loss`.
pub fn absorb(loss: u64, available: u64) -> (u64, u64) {
    let absorbed = loss.min(available);
    (absorbed, loss - absorbed)
}

/// How much of an index's liquidity can leave without pushing any pool's
/// credit below what that pool has locked.
///
/// Withdrawing `w` shrinks the index's credit in a pool by roughly
/// `credit * w / liquidity`, which must stay within the pool's available
/// balance: `w <= available * liquidity / credit`.
pub fn headroom(available: u64, liquidity: u64, credit: u64) -> u64 {
    if credit == 0 {
        return liquidity;
    }
    mul_div(available, liquidity, credit)
        .unwrap_or(u64::MAX)
        .min(liquidity)
}

/// Utilization scaled by `MAGIC_SCALE`, capped at 100%.
/// Zero liquidity reads as fully utilized.
pub fn utilization(locked: u64, total_liquidity: u64) -> u64 {
    if total_liquidity == 0 {
        return MAGIC_SCALE;
    }
    mul_div(locked, MAGIC_SCALE, total_liquidity)
        .unwrap_or(MAGIC_SCALE)
        .min(MAGIC_SCALE)
}

/// Premium for covering `amount` over `span` seconds at an annual `rate`
/// (`MAGIC_SCALE` == 100% per year). Rounds down.
pub fn premium_for_rate(amount: u64, rate: u64, span: i64) -> Option<u64> {
    if span < 0 {
        return None;
    }
    let num = (amount as u128)
        .checked_mul(rate as u128)?
        .checked_mul(span as u128)?;
    let den = (YEAR as u128) * (MAGIC_SCALE as u128);
    u64::try_from(num / den).ok()
}

/// Split a premium into `(fee, net)` with `fee = premium * fee_rate / MAGIC_SCALE`.
pub fn fee_split(premium: u64, fee_rate: u64) -> Option<(u64, u64)> {
    let fee = mul_div(premium, fee_rate, MAGIC_SCALE)?;
    Some((fee, premium.checked_sub(fee)?))
}

/// Reward accumulator step: `units * REWARD_SCALE / total_credit`.
pub fn reward_per_credit_delta(units: u64, total_credit: u64) -> u128 {
    if total_credit == 0 {
        return 0;
    }
    (units as u128) * REWARD_SCALE / total_credit as u128
}

/// Accrued reward units for `credit` at accumulator value `reward_per_credit`.
pub fn accrued_reward(credit: u64, reward_per_credit: u128) -> u128 {
    (credit as u128).saturating_mul(reward_per_credit) / REWARD_SCALE
}
