use solana_program::{clock::Clock, entrypoint::ProgramResult, msg, pubkey::Pubkey};

use crate::instruction::{CapitalInstruction, CoverArgs, InsureArgs};
use crate::market::MarketId;
use crate::parameters::ParameterUpdate;
use crate::pool::CoverTerms;
use crate::protocol::Protocol;

/// Decode `instruction_data` and apply it as `caller` at `clock`'s time.
/// Errors surface as `ProgramError::Custom(CapitalError as u32)`.
pub fn process(
    protocol: &mut Protocol,
    caller: &Pubkey,
    clock: &Clock,
    instruction_data: &[u8],
) -> ProgramResult {
    let instruction = CapitalInstruction::unpack(instruction_data)?;
    let now = clock.unix_timestamp;

    match instruction {
        CapitalInstruction::Deposit { market, amount } => {
            process_deposit(protocol, caller, MarketId(market), amount, now)
        }
        CapitalInstruction::RequestWithdraw { market, shares } => {
            process_request_withdraw(protocol, caller, MarketId(market), shares, now)
        }
        CapitalInstruction::Withdraw { market, shares } => {
            process_withdraw(protocol, caller, MarketId(market), shares, now)
        }
        CapitalInstruction::TransferShares { market, to, shares } => {
            process_transfer_shares(protocol, caller, MarketId(market), &to, shares)
        }
        CapitalInstruction::Insure { pool, args } => {
            process_insure(protocol, caller, MarketId(pool), &args, now)
        }
        CapitalInstruction::Redeem { pool, policy } => {
            process_redeem(protocol, caller, MarketId(pool), policy, now)
        }
        CapitalInstruction::Unlock { pool, policy } => {
            process_unlock(protocol, MarketId(pool), policy, now)
        }
        CapitalInstruction::TransferPolicy { pool, policy, to } => {
            process_transfer_policy(protocol, caller, MarketId(pool), policy, &to)
        }
        CapitalInstruction::ApplyCover { pool, args, targets } => {
            process_apply_cover(protocol, caller, MarketId(pool), &args, targets, now)
        }
        CapitalInstruction::Resume { pool } => {
            process_resume(protocol, caller, MarketId(pool), now)
        }
        CapitalInstruction::SetAllocation { index, position, pool, points, additional_slot } => {
            process_set_allocation(
                protocol, caller, MarketId(index), position, MarketId(pool), points, additional_slot, now,
            )
        }
        CapitalInstruction::SetLeverage { index, leverage } => {
            process_set_leverage(protocol, caller, MarketId(index), leverage, now)
        }
        CapitalInstruction::SetPaused { market, paused } => {
            process_set_paused(protocol, caller, MarketId(market), paused)
        }
        CapitalInstruction::AdjustAlloc { index } => {
            process_adjust_alloc(protocol, MarketId(index), now)
        }
        CapitalInstruction::SetCds { market, cds } => {
            process_set_cds(protocol, caller, market.map(MarketId), MarketId(cds))
        }
        CapitalInstruction::UpdateParameters { market, update } => {
            process_update_parameters(protocol, caller, market.map(MarketId), &update)
        }
        CapitalInstruction::RepayDebt { market, amount } => {
            process_repay_debt(protocol, caller, MarketId(market), amount)
        }
        CapitalInstruction::CollectFees { treasury, to } => {
            process_collect_fees(protocol, caller, &treasury, &to)
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// LP positions
// ═══════════════════════════════════════════════════════════════

fn process_deposit(protocol: &mut Protocol, caller: &Pubkey, market: MarketId, amount: u64, now: i64) -> ProgramResult {
    let shares = protocol.deposit(caller, market, amount, now)?;
    msg!("Deposited {} into market {}, minted {} shares", amount, market, shares);
    Ok(())
}

fn process_request_withdraw(
    protocol: &mut Protocol,
    caller: &Pubkey,
    market: MarketId,
    shares: u64,
    now: i64,
) -> ProgramResult {
    protocol.request_withdraw(caller, market, shares, now)?;
    let params = protocol.parameters(market);
    msg!(
        "Withdrawal of {} shares from market {} requested, window opens at {}",
        shares,
        market,
        now.saturating_add(params.lockup)
    );
    Ok(())
}

fn process_withdraw(protocol: &mut Protocol, caller: &Pubkey, market: MarketId, shares: u64, now: i64) -> ProgramResult {
    let amount = protocol.withdraw(caller, market, shares, now)?;
    msg!("Withdrew {} from market {}, burned {} shares", amount, market, shares);
    Ok(())
}

fn process_transfer_shares(
    protocol: &mut Protocol,
    caller: &Pubkey,
    market: MarketId,
    to: &Pubkey,
    shares: u64,
) -> ProgramResult {
    protocol.transfer_shares(caller, market, to, shares)?;
    msg!("Transferred {} shares of market {} to {}", shares, market, to);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
// Policies
// ═══════════════════════════════════════════════════════════════

fn process_insure(protocol: &mut Protocol, caller: &Pubkey, pool: MarketId, args: &InsureArgs, now: i64) -> ProgramResult {
    let out = protocol.insure(caller, pool, args.amount, args.max_cost, args.span, args.target, now)?;
    msg!(
        "Policy {} on pool {}: cover {} for {}s, premium {} (fee {})",
        out.policy_id,
        pool,
        args.amount,
        args.span,
        out.premium,
        out.fee
    );
    Ok(())
}

fn process_redeem(protocol: &mut Protocol, caller: &Pubkey, pool: MarketId, policy: u64, now: i64) -> ProgramResult {
    let payout = protocol.redeem(caller, pool, policy, now)?;
    msg!("Policy {} on pool {} redeemed, paid {}", policy, pool, payout);
    Ok(())
}

fn process_unlock(protocol: &mut Protocol, pool: MarketId, policy: u64, now: i64) -> ProgramResult {
    let released = protocol.unlock(pool, policy, now)?;
    msg!("Policy {} on pool {} unlocked, released {}", policy, pool, released);
    Ok(())
}

fn process_transfer_policy(
    protocol: &mut Protocol,
    caller: &Pubkey,
    pool: MarketId,
    policy: u64,
    to: &Pubkey,
) -> ProgramResult {
    protocol.transfer_policy(caller, pool, policy, to)?;
    msg!("Policy {} on pool {} transferred to {}", policy, pool, to);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
// Admin
// ═══════════════════════════════════════════════════════════════

fn process_apply_cover(
    protocol: &mut Protocol,
    caller: &Pubkey,
    pool: MarketId,
    args: &CoverArgs,
    targets: Vec<u64>,
    now: i64,
) -> ProgramResult {
    let terms = CoverTerms {
        grace_period: args.grace_period,
        payout_numerator: args.payout_numerator,
        payout_denominator: args.payout_denominator,
        incident_timestamp: args.incident_timestamp,
        targets,
        metadata: args.metadata,
    };
    let claim = protocol.apply_cover(caller, pool, terms, now)?;
    msg!(
        "Cover applied to pool {}: incident {}, payout {}/{}, redeemable until {}",
        pool,
        claim.incident_timestamp,
        claim.payout_numerator,
        claim.payout_denominator,
        claim.pending_end
    );
    Ok(())
}

fn process_resume(protocol: &mut Protocol, caller: &Pubkey, pool: MarketId, now: i64) -> ProgramResult {
    protocol.resume(caller, pool, now)?;
    msg!("Pool {} resumed", pool);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_set_allocation(
    protocol: &mut Protocol,
    caller: &Pubkey,
    index: MarketId,
    position: u32,
    pool: MarketId,
    points: u64,
    additional_slot: bool,
    now: i64,
) -> ProgramResult {
    protocol.set_allocation(caller, index, position, pool, points, additional_slot, now)?;
    msg!(
        "Index {} slot {} -> pool {} ({} points), allocated credit {}",
        index,
        position,
        pool,
        points,
        protocol.total_allocated_credit(index)?
    );
    Ok(())
}

fn process_set_leverage(protocol: &mut Protocol, caller: &Pubkey, index: MarketId, leverage: u64, now: i64) -> ProgramResult {
    protocol.set_leverage(caller, index, leverage, now)?;
    msg!("Index {} leverage set to {}", index, leverage);
    Ok(())
}

fn process_set_paused(protocol: &mut Protocol, caller: &Pubkey, market: MarketId, paused: bool) -> ProgramResult {
    protocol.set_paused(caller, market, paused)?;
    msg!("Market {} paused: {}", market, paused);
    Ok(())
}

fn process_adjust_alloc(protocol: &mut Protocol, index: MarketId, now: i64) -> ProgramResult {
    protocol.adjust_alloc(index, now)?;
    msg!("Index {} reallocated, credit {}", index, protocol.total_allocated_credit(index)?);
    Ok(())
}

fn process_set_cds(protocol: &mut Protocol, caller: &Pubkey, market: Option<MarketId>, cds: MarketId) -> ProgramResult {
    protocol.set_cds(caller, market, cds)?;
    match market {
        Some(m) => msg!("Market {} losses routed to CDS {}", m, cds),
        None => msg!("Default CDS set to {}", cds),
    }
    Ok(())
}

fn process_update_parameters(
    protocol: &mut Protocol,
    caller: &Pubkey,
    market: Option<MarketId>,
    update: &ParameterUpdate,
) -> ProgramResult {
    protocol.update_parameters(caller, market, update)?;
    match market {
        Some(m) => msg!("Parameters updated for market {}", m),
        None => msg!("Default parameters updated"),
    }
    Ok(())
}

fn process_repay_debt(protocol: &mut Protocol, caller: &Pubkey, market: MarketId, amount: u64) -> ProgramResult {
    let repaid = protocol.repay_debt(caller, market, amount)?;
    msg!("Repaid {} of market {} debt", repaid, market);
    Ok(())
}

fn process_collect_fees(protocol: &mut Protocol, caller: &Pubkey, treasury: &Pubkey, to: &Pubkey) -> ProgramResult {
    let amount = protocol.collect_fees(caller, treasury, to)?;
    msg!("Collected {} fees from treasury {} to {}", amount, treasury, to);
    Ok(())
}
