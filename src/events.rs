//! Typed event log kept on the protocol state.
//!
//! Events are appended inside the same draft as the state change that
//! produced them, so a reverted call leaves no trace here either.

use solana_program::pubkey::Pubkey;

use crate::market::{MarketId, MarketKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    MarketCreated { market: MarketId, kind: MarketKind, address: Pubkey },
    Deposited { market: MarketId, owner: Pubkey, amount: u64, shares: u64 },
    WithdrawRequested { market: MarketId, owner: Pubkey, shares: u64 },
    Withdrawn { market: MarketId, owner: Pubkey, shares: u64, amount: u64 },
    SharesTransferred { market: MarketId, from: Pubkey, to: Pubkey, shares: u64 },
    Insured { pool: MarketId, policy: u64, insured: Pubkey, amount: u64, premium: u64, fee: u64, end_time: i64 },
    PolicyTransferred { pool: MarketId, policy: u64, from: Pubkey, to: Pubkey },
    CoverApplied { pool: MarketId, incident_timestamp: i64, payout_numerator: u64, payout_denominator: u64, pending_end: i64 },
    Redeemed { pool: MarketId, policy: u64, insured: Pubkey, payout: u64 },
    /// Part of a payout absorbed by a market other than the claiming pool.
    LossAbsorbed { pool: MarketId, market: MarketId, amount: u64 },
    /// A payout nobody could absorb; paid anyway and booked as vault debt.
    Insolvency { pool: MarketId, cds: Option<MarketId>, shortfall: u64 },
    Unlocked { pool: MarketId, policy: u64 },
    Resumed { pool: MarketId },
    CreditAllocated { index: MarketId, pool: MarketId, credit: u64 },
    LeverageSet { index: MarketId, leverage: u64 },
    AllocationSet { index: MarketId, position: u32, pool: MarketId, points: u64 },
    Paused { market: MarketId, paused: bool },
    CdsRouted { market: Option<MarketId>, cds: MarketId },
    ParametersUpdated { market: Option<MarketId> },
    PremiumCurveSet { curve: u32 },
    DebtRepaid { debtor: MarketId, payer: Pubkey, amount: u64 },
    FeesCollected { treasury: Pubkey, to: Pubkey, amount: u64 },
}
