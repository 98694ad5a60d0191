//! Underlying asset ledger.
//!
//! Stands in for the external token program: plain balances and allowances
//! keyed by owner. The vault is just another owner here.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;

use crate::error::CapitalError;

#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    balances: BTreeMap<Pubkey, u64>,
    allowances: BTreeMap<(Pubkey, Pubkey), u64>,
    supply: u64,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, owner: &Pubkey) -> u64 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Pubkey, spender: &Pubkey) -> u64 {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u64 {
        self.supply
    }

    pub fn mint_to(&mut self, to: &Pubkey, amount: u64) -> Result<(), CapitalError> {
        self.supply = self.supply.checked_add(amount).ok_or(CapitalError::Overflow)?;
        let bal = self.balances.entry(*to).or_insert(0);
        *bal = bal.checked_add(amount).ok_or(CapitalError::Overflow)?;
        Ok(())
    }

    /// Sets (not adds to) the allowance.
    pub fn approve(&mut self, owner: &Pubkey, spender: &Pubkey, amount: u64) {
        self.allowances.insert((*owner, *spender), amount);
    }

    pub fn transfer(&mut self, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<(), CapitalError> {
        let from_bal = self.balance_of(from);
        if from_bal < amount {
            return Err(CapitalError::InsufficientFunds);
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        self.balances.insert(*from, from_bal - amount);
        let to_bal = self.balances.entry(*to).or_insert(0);
        *to_bal = to_bal.checked_add(amount).ok_or(CapitalError::Overflow)?;
        Ok(())
    }

    /// Spender moves `amount` out of `from`, consuming allowance.
    pub fn transfer_from(
        &mut self,
        spender: &Pubkey,
        from: &Pubkey,
        to: &Pubkey,
        amount: u64,
    ) -> Result<(), CapitalError> {
        let allowed = self.allowance(from, spender);
        if allowed < amount {
            return Err(CapitalError::InsufficientAllowance);
        }
        self.transfer(from, to, amount)?;
        self.allowances.insert((*from, *spender), allowed - amount);
        Ok(())
    }
}
