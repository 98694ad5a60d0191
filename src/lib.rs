//! Parametric Insurance Capital Engine
//!
//! Capital allocation and loss-waterfall accounting for parametric cover.
//! LPs underwrite single targets through pools, diversify through leveraged
//! indices that lend credit to pools, or backstop the system through CDS
//! reserves. One vault custodies the underlying token for every market.
//!
//! Architecture:
//! - Vault holds the tokens; markets hold attribution (proportional claims)
//! - LP shares price each market's liquidity; withdrawals go through a
//!   lockup and a bounded window, and the lock travels with transferred shares
//! - Indices push `liquidity * leverage * weight` credit into pools
//! - Premiums are split by capital: direct LPs and index credit pro-rata
//! - Claims pay pool → indices (pro-rata by credit) → CDS; an uncovered
//!   remainder is still paid and booked as vault debt
//! - Every call commits fully or not at all
//!
//! Instructions:
//!   0 - Deposit:          Deposit underlying, receive LP shares
//!   1 - RequestWithdraw:  Start the lockup for a withdrawal
//!   2 - Withdraw:         Burn shares inside the withdrawal window
//!   3 - TransferShares:   Move LP shares together with their lock
//!   4 - Insure:           Buy cover from a pool
//!   5 - Redeem:           Claim a policy against a live incident
//!   6 - Unlock:           Release an expired policy
//!   7 - TransferPolicy:   Reassign a policy
//!   8 - ApplyCover:       (admin) Freeze a pool and open redemptions
//!   9 - Resume:           (admin) Close a claim and reallocate
//!  10 - SetAllocation:    (admin) Upsert an index slot
//!  11 - SetLeverage:      (admin) Change index leverage
//!  12 - SetPaused:        (admin) Pause or unpause a market
//!  13 - AdjustAlloc:      Re-run an index's credit allocation
//!  14 - SetCds:           (admin) Route unabsorbed losses to a reserve
//!  15 - UpdateParameters: (admin) Change default or per-market parameters
//!  16 - RepayDebt:        Repay insolvency debt
//!  17 - CollectFees:      (admin) Withdraw protocol fees

pub mod auth;
pub mod cds;
pub mod error;
pub mod events;
pub mod index;
pub mod instruction;
pub mod market;
pub mod math;
pub mod parameters;
pub mod pool;
pub mod premium;
pub mod processor;
pub mod protocol;
pub mod shares;
pub mod state;
pub mod token;
pub mod vault;
