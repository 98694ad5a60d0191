//! LP share ledger shared by pools, indices and CDS reserves.
//!
//! A share position carries its withdrawal lock: transferring shares caps
//! the sender's request to what it still holds and hands the carried part,
//! with the sender's timestamp, to the recipient.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;

use crate::error::CapitalError;
use crate::math;
use crate::state::{RequestState, WithdrawalRequest};

#[derive(Debug, Clone, Default)]
pub struct ShareLedger {
    total_supply: u64,
    balances: BTreeMap<Pubkey, u64>,
    requests: BTreeMap<Pubkey, WithdrawalRequest>,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn balance_of(&self, owner: &Pubkey) -> u64 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    pub fn request(&self, owner: &Pubkey) -> WithdrawalRequest {
        self.requests.get(owner).copied().unwrap_or_default()
    }

    /// Shares a deposit of `amount` mints against `liquidity`.
    pub fn shares_for_deposit(&self, liquidity: u64, amount: u64) -> Result<u64, CapitalError> {
        if amount == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        let shares = math::calc_shares_for_deposit(self.total_supply, liquidity, amount)
            .ok_or(CapitalError::DepositBlocked)?;
        if shares == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        Ok(shares)
    }

    /// Value `owner` releases by burning `shares` against `liquidity`.
    pub fn value_for_shares(&self, owner: &Pubkey, liquidity: u64, shares: u64) -> Result<u64, CapitalError> {
        if shares == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        if self.balance_of(owner) < shares {
            return Err(CapitalError::InsufficientShares);
        }
        let value = math::calc_value_for_withdraw(self.total_supply, liquidity, shares)
            .ok_or(CapitalError::Overflow)?;
        if value == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        Ok(value)
    }

    pub fn mint(&mut self, to: &Pubkey, amount: u64) -> Result<(), CapitalError> {
        self.total_supply = self.total_supply.checked_add(amount).ok_or(CapitalError::Overflow)?;
        *self.balances.entry(*to).or_insert(0) += amount;
        Ok(())
    }

    pub fn burn(&mut self, from: &Pubkey, amount: u64) -> Result<(), CapitalError> {
        let bal = self.balance_of(from);
        if bal < amount {
            return Err(CapitalError::InsufficientShares);
        }
        self.balances.insert(*from, bal - amount);
        self.total_supply -= amount;
        Ok(())
    }

    /// Record (or replace) `owner`'s withdrawal request.
    pub fn request_withdraw(&mut self, owner: &Pubkey, amount: u64, now: i64) -> Result<(), CapitalError> {
        if amount == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        if self.balance_of(owner) < amount {
            return Err(CapitalError::InsufficientShares);
        }
        self.requests.insert(*owner, WithdrawalRequest::new(now, amount));
        Ok(())
    }

    /// Check `owner` may withdraw `amount` shares now and use up that part of the request.
    pub fn consume_request(
        &mut self,
        owner: &Pubkey,
        amount: u64,
        now: i64,
        lockup: i64,
        withdrawable_duration: i64,
    ) -> Result<(), CapitalError> {
        let mut req = self.request(owner);
        if req.state(now, lockup, withdrawable_duration) != RequestState::Executable {
            return Err(CapitalError::WithdrawalNotReady);
        }
        if amount > req.amount {
            return Err(CapitalError::WithdrawalExceedsRequest);
        }
        req.amount -= amount;
        self.requests.insert(*owner, req);
        Ok(())
    }

    pub fn transfer(&mut self, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<(), CapitalError> {
        if amount == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        let from_bal = self.balance_of(from);
        if from_bal < amount {
            return Err(CapitalError::InsufficientShares);
        }
        if from == to {
            return Ok(());
        }
        let remaining = from_bal - amount;

        let mut req = self.request(from);
        if req.amount > remaining {
            let carried = req.amount - remaining;
            req.amount = remaining;
            self.requests.insert(*from, req);

            let inherited = self.requests.entry(*to).or_default();
            if inherited.amount == 0 {
                inherited.timestamp = req.timestamp;
            } else {
                inherited.timestamp = inherited.timestamp.max(req.timestamp);
            }
            inherited.amount += carried;
        }

        self.balances.insert(*from, remaining);
        *self.balances.entry(*to).or_insert(0) += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCKUP: i64 = 100;
    const WINDOW: i64 = 50;

    #[test]
    fn test_request_then_consume_inside_window() {
        let alice = Pubkey::new_unique();
        let mut s = ShareLedger::new();
        s.mint(&alice, 1_000).unwrap();
        s.request_withdraw(&alice, 600, 10).unwrap();

        assert_eq!(s.consume_request(&alice, 100, 109, LOCKUP, WINDOW), Err(CapitalError::WithdrawalNotReady));
        assert_eq!(
            s.consume_request(&alice, 601, 110, LOCKUP, WINDOW),
            Err(CapitalError::WithdrawalExceedsRequest)
        );
        s.consume_request(&alice, 600, 110, LOCKUP, WINDOW).unwrap();
        assert_eq!(s.request(&alice).amount, 0);
        assert_eq!(s.consume_request(&alice, 1, 111, LOCKUP, WINDOW), Err(CapitalError::WithdrawalNotReady));
    }

    #[test]
    fn test_window_closes() {
        let alice = Pubkey::new_unique();
        let mut s = ShareLedger::new();
        s.mint(&alice, 10).unwrap();
        s.request_withdraw(&alice, 10, 0).unwrap();
        assert!(s.consume_request(&alice, 10, LOCKUP + WINDOW + 1, LOCKUP, WINDOW).is_err());
        s.consume_request(&alice, 10, LOCKUP + WINDOW, LOCKUP, WINDOW).unwrap();
    }

    #[test]
    fn test_transfer_carries_lock_to_recipient() {
        let (alice, bob) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut s = ShareLedger::new();
        s.mint(&alice, 1_000).unwrap();
        s.request_withdraw(&alice, 1_000, 5).unwrap();

        s.transfer(&alice, &bob, 400).unwrap();
        assert_eq!(s.request(&alice).amount, 600);
        assert_eq!(s.request(&bob), WithdrawalRequest::new(5, 400));
        assert_eq!(s.balance_of(&bob), 400);
        assert_eq!(s.total_supply(), 1_000);
    }

    #[test]
    fn test_transfer_below_request_leaves_it_alone() {
        let (alice, bob) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut s = ShareLedger::new();
        s.mint(&alice, 1_000).unwrap();
        s.request_withdraw(&alice, 100, 5).unwrap();
        s.transfer(&alice, &bob, 400).unwrap();
        assert_eq!(s.request(&alice).amount, 100);
        assert_eq!(s.request(&bob).amount, 0);
    }

    #[test]
    fn test_inherited_lock_takes_later_timestamp() {
        let (alice, bob) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut s = ShareLedger::new();
        s.mint(&alice, 100).unwrap();
        s.mint(&bob, 100).unwrap();
        s.request_withdraw(&bob, 50, 1).unwrap();
        s.request_withdraw(&alice, 100, 40).unwrap();
        s.transfer(&alice, &bob, 100).unwrap();
        assert_eq!(s.request(&bob), WithdrawalRequest::new(40, 150));
    }
}
