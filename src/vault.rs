//! Vault — custodian of the underlying asset for every market.
//!
//! Markets never hold tokens. They hold attribution units, a proportional
//! claim on `value_all()`. Moving value between markets (premium splits,
//! loss absorption) is a ledger edit here; only deposits, withdrawals and
//! payouts touch the token ledger.
//!
//! `value_all()` counts outstanding debt: a payout nobody could absorb is
//! recorded against the debtor market instead of silently diluting every
//! holder's attribution.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;

use crate::error::CapitalError;
use crate::math;
use crate::token::TokenLedger;

#[derive(Debug, Clone)]
pub struct Vault {
    address: Pubkey,
    balance: u64,
    total_attributions: u64,
    attributions: BTreeMap<Pubkey, u64>,
    total_debt: u64,
    debts: BTreeMap<Pubkey, u64>,
}

impl Vault {
    pub fn new(address: Pubkey) -> Self {
        Self {
            address,
            balance: 0,
            total_attributions: 0,
            attributions: BTreeMap::new(),
            total_debt: 0,
            debts: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    /// Tokens actually held.
    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Value that attributions are priced against: held tokens plus debt owed back.
    pub fn value_all(&self) -> u64 {
        self.balance.saturating_add(self.total_debt)
    }

    pub fn total_attributions(&self) -> u64 {
        self.total_attributions
    }

    pub fn attributions(&self, holder: &Pubkey) -> u64 {
        self.attributions.get(holder).copied().unwrap_or(0)
    }

    pub fn attribution_value(&self, units: u64) -> u64 {
        math::value_of_attributions(self.total_attributions, self.value_all(), units)
    }

    pub fn underlying_value(&self, holder: &Pubkey) -> u64 {
        self.attribution_value(self.attributions(holder))
    }

    pub fn debt(&self, debtor: &Pubkey) -> u64 {
        self.debts.get(debtor).copied().unwrap_or(0)
    }

    pub fn total_debt(&self) -> u64 {
        self.total_debt
    }

    /// Pull `amount` tokens from `from` and credit attribution to `credit_to`.
    /// Returns the attribution minted.
    pub fn add_value(
        &mut self,
        token: &mut TokenLedger,
        amount: u64,
        from: &Pubkey,
        credit_to: &Pubkey,
    ) -> Result<u64, CapitalError> {
        if amount == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        let units = math::attributions_for_value(self.total_attributions, self.value_all(), amount)
            .ok_or(CapitalError::Overflow)?;
        let new_balance = self.balance.checked_add(amount).ok_or(CapitalError::Overflow)?;
        let new_total = self.total_attributions.checked_add(units).ok_or(CapitalError::Overflow)?;

        token.transfer_from(&self.address, from, &self.address, amount)?;

        self.balance = new_balance;
        self.total_attributions = new_total;
        *self.attributions.entry(*credit_to).or_insert(0) += units;
        Ok(units)
    }

    /// Burn the attribution backing `amount` of `holder`'s value and pay it to `to`.
    /// Returns the attribution burned.
    pub fn withdraw_value(
        &mut self,
        token: &mut TokenLedger,
        holder: &Pubkey,
        amount: u64,
        to: &Pubkey,
    ) -> Result<u64, CapitalError> {
        if amount == 0 {
            return Ok(0);
        }
        let units = self.units_for_value(amount)?;
        self.burn_and_pay(token, holder, units, amount, to)?;
        Ok(units)
    }

    /// Burn `units` of `holder`'s attribution and pay their value to `to`.
    /// Returns the value paid.
    pub fn withdraw_attribution(
        &mut self,
        token: &mut TokenLedger,
        holder: &Pubkey,
        units: u64,
        to: &Pubkey,
    ) -> Result<u64, CapitalError> {
        let value = self.attribution_value(units);
        self.burn_and_pay(token, holder, units, value, to)?;
        Ok(value)
    }

    pub fn withdraw_all_attribution(
        &mut self,
        token: &mut TokenLedger,
        holder: &Pubkey,
        to: &Pubkey,
    ) -> Result<u64, CapitalError> {
        let units = self.attributions(holder);
        self.withdraw_attribution(token, holder, units, to)
    }

    /// Move `amount` of value from one holder to another. No tokens move.
    /// Returns the attribution moved.
    pub fn transfer_value(&mut self, from: &Pubkey, amount: u64, to: &Pubkey) -> Result<u64, CapitalError> {
        if amount == 0 {
            return Ok(0);
        }
        let units = self.units_for_value(amount)?;
        self.transfer_attribution(from, units, to)?;
        Ok(units)
    }

    pub fn transfer_attribution(&mut self, from: &Pubkey, units: u64, to: &Pubkey) -> Result<(), CapitalError> {
        let held = self.attributions(from);
        if held < units {
            return Err(CapitalError::InsufficientAttribution);
        }
        if units == 0 || from == to {
            return Ok(());
        }
        self.attributions.insert(*from, held - units);
        let dst = self.attributions.entry(*to).or_insert(0);
        *dst = dst.checked_add(units).ok_or(CapitalError::Overflow)?;
        Ok(())
    }

    /// Pay `amount` out of the vault with no holder backing it, recording the
    /// shortfall as `debtor`'s debt.
    pub fn borrow_value(
        &mut self,
        token: &mut TokenLedger,
        debtor: &Pubkey,
        amount: u64,
        to: &Pubkey,
    ) -> Result<(), CapitalError> {
        if amount == 0 {
            return Ok(());
        }
        if self.balance < amount {
            return Err(CapitalError::InsufficientVaultBalance);
        }
        let new_debt = self.total_debt.checked_add(amount).ok_or(CapitalError::Overflow)?;

        token.transfer(&self.address, to, amount)?;

        self.balance -= amount;
        self.total_debt = new_debt;
        *self.debts.entry(*debtor).or_insert(0) += amount;
        Ok(())
    }

    /// Anyone may pay back `debtor`'s debt. Caps at the outstanding amount.
    /// Returns the amount repaid.
    pub fn repay_debt(
        &mut self,
        token: &mut TokenLedger,
        amount: u64,
        from: &Pubkey,
        debtor: &Pubkey,
    ) -> Result<u64, CapitalError> {
        let outstanding = self.debt(debtor);
        let repay = amount.min(outstanding);
        if repay == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        let new_balance = self.balance.checked_add(repay).ok_or(CapitalError::Overflow)?;

        token.transfer_from(&self.address, from, &self.address, repay)?;

        self.balance = new_balance;
        self.total_debt -= repay;
        if outstanding == repay {
            self.debts.remove(debtor);
        } else {
            self.debts.insert(*debtor, outstanding - repay);
        }
        Ok(repay)
    }

    fn units_for_value(&self, amount: u64) -> Result<u64, CapitalError> {
        if self.value_all() == 0 {
            return Err(CapitalError::InsufficientAttribution);
        }
        math::attributions_to_burn(self.total_attributions, self.value_all(), amount)
            .ok_or(CapitalError::Overflow)
    }

    fn burn_and_pay(
        &mut self,
        token: &mut TokenLedger,
        holder: &Pubkey,
        units: u64,
        value: u64,
        to: &Pubkey,
    ) -> Result<(), CapitalError> {
        let held = self.attributions(holder);
        if held < units {
            return Err(CapitalError::InsufficientAttribution);
        }
        if self.balance < value {
            return Err(CapitalError::InsufficientVaultBalance);
        }

        token.transfer(&self.address, to, value)?;

        self.attributions.insert(*holder, held - units);
        self.total_attributions -= units;
        self.balance -= value;
        Ok(())
    }
}
