//! CDS — last-resort reserve. Pool share mechanics without underwriting;
//! absorbs whatever an index could not.

use solana_program::pubkey::Pubkey;

use crate::error::CapitalError;
use crate::market::{impl_liquidity_market, MarketId};
use crate::math;
use crate::parameters::Parameters;
use crate::shares::ShareLedger;
use crate::token::TokenLedger;
use crate::vault::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdsState {
    Open,
    Paused,
}

#[derive(Debug, Clone)]
pub struct Cds {
    id: MarketId,
    address: Pubkey,
    shares: ShareLedger,
    paused: bool,
}

impl_liquidity_market!(Cds);

impl Cds {
    pub fn new(id: MarketId, address: Pubkey) -> Self {
        Self { id, address, shares: ShareLedger::new(), paused: false }
    }

    pub fn current_state(&self) -> CdsState {
        if self.paused {
            CdsState::Paused
        } else {
            CdsState::Open
        }
    }

    pub fn total_liquidity(&self, vault: &Vault) -> u64 {
        vault.underlying_value(&self.address)
    }

    pub fn rate(&self, vault: &Vault) -> u128 {
        math::share_rate(self.total_liquidity(vault), self.shares.total_supply())
    }

    pub fn deposit(
        &mut self,
        vault: &mut Vault,
        token: &mut TokenLedger,
        owner: &Pubkey,
        amount: u64,
    ) -> Result<u64, CapitalError> {
        if self.current_state() == CdsState::Paused {
            return Err(CapitalError::MarketPaused);
        }
        let minted = self.shares.shares_for_deposit(self.total_liquidity(vault), amount)?;
        vault.add_value(token, amount, owner, &self.address)?;
        self.shares.mint(owner, minted)?;
        Ok(minted)
    }

    pub fn withdraw(
        &mut self,
        vault: &mut Vault,
        token: &mut TokenLedger,
        owner: &Pubkey,
        shares: u64,
        now: i64,
        params: &Parameters,
    ) -> Result<u64, CapitalError> {
        let value = self.shares.value_for_shares(owner, self.total_liquidity(vault), shares)?;
        self.shares
            .consume_request(owner, shares, now, params.lockup, params.withdrawable_duration)?;
        self.shares.burn(owner, shares)?;
        vault.withdraw_value(token, &self.address, value, owner)?;
        Ok(value)
    }

    /// Pay up to `amount` of a forwarded loss to `to`. Liquidity floors at
    /// zero; returns what was actually paid so the caller can record the rest.
    pub fn receive_loss(
        &mut self,
        vault: &mut Vault,
        token: &mut TokenLedger,
        amount: u64,
        to: &Pubkey,
    ) -> Result<u64, CapitalError> {
        let units = vault.attributions(&self.address);
        let liquidity = vault.attribution_value(units);
        let (paid, _) = math::absorb(amount, liquidity);
        if paid == liquidity {
            vault.withdraw_attribution(token, &self.address, units, to)?;
        } else {
            vault.withdraw_value(token, &self.address, paid, to)?;
        }
        Ok(paid)
    }
}
