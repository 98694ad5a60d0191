//! Pool — single-target underwriting market.
//!
//! Capacity is the pool's own vault value plus credit granted by indices.
//! Premium attributable to index credit is minted to the pool but owed onward:
//! it sits in `attribution_debt` and accrues to credit lines through a
//! reward-per-credit accumulator until an index harvests it.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;

use crate::error::CapitalError;
use crate::market::{impl_liquidity_market, MarketId};
use crate::math;
use crate::parameters::Parameters;
use crate::premium::PremiumModel;
use crate::shares::ShareLedger;
use crate::state::{CreditLine, Policy, PolicyState, PolicyStatus};
use crate::token::TokenLedger;
use crate::vault::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Open,
    Paused,
    /// A cover claim is live and inside its redemption window
    PayingOut,
    /// Redemption window over; waiting for `resume`
    Resumable,
}

impl PoolState {
    pub fn is_locked(self) -> bool {
        matches!(self, PoolState::PayingOut | PoolState::Resumable)
    }
}

/// An applied cover claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverClaim {
    pub incident_timestamp: i64,
    pub payout_numerator: u64,
    pub payout_denominator: u64,
    /// Policy ids eligible for payout; empty means every covering policy
    pub targets: Vec<u64>,
    pub applied_at: i64,
    /// Last second redemptions are accepted
    pub pending_end: i64,
    pub metadata: [u8; 32],
}

impl CoverClaim {
    pub fn targets_policy(&self, id: u64) -> bool {
        self.targets.is_empty() || self.targets.contains(&id)
    }

    pub fn is_eligible(&self, policy: &Policy) -> bool {
        policy.is_active() && policy.covers(self.incident_timestamp) && self.targets_policy(policy.id)
    }

    /// `min(amount * num / den, payout_max)`.
    pub fn payout_for(&self, policy: &Policy) -> Result<u64, CapitalError> {
        let gross = math::mul_div(policy.amount, self.payout_numerator, self.payout_denominator)
            .ok_or(CapitalError::Overflow)?;
        Ok(gross.min(policy.payout_max))
    }
}

/// Admin-supplied terms of a cover claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverTerms {
    /// Seconds the redemption window stays open
    pub grace_period: i64,
    pub payout_numerator: u64,
    pub payout_denominator: u64,
    pub incident_timestamp: i64,
    pub targets: Vec<u64>,
    pub metadata: [u8; 32],
}

/// Result of a successful `insure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underwritten {
    pub policy_id: u64,
    pub premium: u64,
    pub fee: u64,
}

#[derive(Debug, Clone)]
pub struct Pool {
    id: MarketId,
    address: Pubkey,
    shares: ShareLedger,
    paused: bool,
    locked_amount: u64,
    total_credit: u64,
    attribution_debt: u64,
    reward_per_credit: u128,
    credit_lines: BTreeMap<MarketId, CreditLine>,
    policies: Vec<Policy>,
    claim: Option<CoverClaim>,
}

impl_liquidity_market!(Pool);

impl Pool {
    pub fn new(id: MarketId, address: Pubkey) -> Self {
        Self {
            id,
            address,
            shares: ShareLedger::new(),
            paused: false,
            locked_amount: 0,
            total_credit: 0,
            attribution_debt: 0,
            reward_per_credit: 0,
            credit_lines: BTreeMap::new(),
            policies: Vec::new(),
            claim: None,
        }
    }

    pub fn current_state(&self, now: i64) -> PoolState {
        match &self.claim {
            Some(c) if now <= c.pending_end => PoolState::PayingOut,
            Some(_) => PoolState::Resumable,
            None if self.paused => PoolState::Paused,
            None => PoolState::Open,
        }
    }

    pub fn locked_amount(&self) -> u64 {
        self.locked_amount
    }

    pub fn total_credit(&self) -> u64 {
        self.total_credit
    }

    pub fn attribution_debt(&self) -> u64 {
        self.attribution_debt
    }

    pub fn claim(&self) -> Option<&CoverClaim> {
        self.claim.as_ref()
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn policy(&self, id: u64) -> Result<&Policy, CapitalError> {
        self.policies.get(id as usize).ok_or(CapitalError::UnknownPolicy)
    }

    fn policy_mut(&mut self, id: u64) -> Result<&mut Policy, CapitalError> {
        self.policies.get_mut(id as usize).ok_or(CapitalError::UnknownPolicy)
    }

    pub fn credit_of(&self, index: MarketId) -> u64 {
        self.credit_lines.get(&index).map(|l| l.credit).unwrap_or(0)
    }

    /// `(index, credit)` for every index with a credit line here.
    pub fn credit_lines(&self) -> Vec<(MarketId, u64)> {
        self.credit_lines.iter().map(|(id, l)| (*id, l.credit)).collect()
    }

    pub fn credit_line(&self, index: MarketId) -> Option<&CreditLine> {
        self.credit_lines.get(&index)
    }

    /// Attribution units the pool holds outright (not owed to indices).
    pub fn own_attributions(&self, vault: &Vault) -> u64 {
        vault.attributions(&self.address).saturating_sub(self.attribution_debt)
    }

    /// Value belonging to direct LPs.
    pub fn original_liquidity(&self, vault: &Vault) -> u64 {
        vault.attribution_value(self.own_attributions(vault))
    }

    pub fn total_liquidity(&self, vault: &Vault) -> u64 {
        self.original_liquidity(vault).saturating_add(self.total_credit)
    }

    pub fn available_balance(&self, vault: &Vault) -> u64 {
        self.total_liquidity(vault).saturating_sub(self.locked_amount)
    }

    /// Locked over total, 1e6 scale. An empty, unlocked pool reads as 0.
    pub fn utilization(&self, vault: &Vault) -> u64 {
        if self.locked_amount == 0 {
            return 0;
        }
        math::utilization(self.locked_amount, self.total_liquidity(vault))
    }

    /// Value per direct-LP share, 1e18 scale.
    pub fn rate(&self, vault: &Vault) -> u128 {
        math::share_rate(self.original_liquidity(vault), self.shares.total_supply())
    }

    /// Attribution accrued to `index`'s credit and not yet harvested.
    pub fn pending_attribution(&self, index: MarketId) -> u64 {
        match self.credit_lines.get(&index) {
            Some(line) => {
                let accrued = math::accrued_reward(line.credit, self.reward_per_credit);
                u64::try_from(accrued.saturating_sub(line.reward_debt as u128)).unwrap_or(u64::MAX)
            }
            None => 0,
        }
    }

    pub fn pending_premium(&self, vault: &Vault, index: MarketId) -> u64 {
        vault.attribution_value(self.pending_attribution(index))
    }

    /// Guard for deposits and underwriting.
    fn ensure_open(&self, now: i64) -> Result<(), CapitalError> {
        match self.current_state(now) {
            PoolState::Open => Ok(()),
            PoolState::Paused => Err(CapitalError::MarketPaused),
            PoolState::PayingOut | PoolState::Resumable => Err(CapitalError::MarketLocked),
        }
    }

    pub fn deposit(
        &mut self,
        vault: &mut Vault,
        token: &mut TokenLedger,
        owner: &Pubkey,
        amount: u64,
        now: i64,
    ) -> Result<u64, CapitalError> {
        self.ensure_open(now)?;
        let minted = self.shares.shares_for_deposit(self.original_liquidity(vault), amount)?;
        vault.add_value(token, amount, owner, &self.address)?;
        self.shares.mint(owner, minted)?;
        Ok(minted)
    }

    /// Burn `shares` under an executable request; returns the value paid.
    pub fn withdraw(
        &mut self,
        vault: &mut Vault,
        token: &mut TokenLedger,
        owner: &Pubkey,
        shares: u64,
        now: i64,
        params: &Parameters,
    ) -> Result<u64, CapitalError> {
        if self.current_state(now).is_locked() {
            return Err(CapitalError::MarketLocked);
        }
        let value = self.shares.value_for_shares(owner, self.original_liquidity(vault), shares)?;
        if value > self.available_balance(vault) {
            return Err(CapitalError::InsufficientCapacity);
        }
        self.shares
            .consume_request(owner, shares, now, params.lockup, params.withdrawable_duration)?;
        self.shares.burn(owner, shares)?;
        vault.withdraw_value(token, &self.address, value, owner)?;
        Ok(value)
    }

    /// Sell cover. The buyer pays `premium`; the protocol fee goes to the
    /// treasury and the rest is split between direct LPs and index credit in
    /// proportion to their share of total liquidity.
    #[allow(clippy::too_many_arguments)]
    pub fn insure(
        &mut self,
        vault: &mut Vault,
        token: &mut TokenLedger,
        model: &dyn PremiumModel,
        params: &Parameters,
        buyer: &Pubkey,
        amount: u64,
        max_cost: u64,
        span: i64,
        target: [u8; 32],
        now: i64,
    ) -> Result<Underwritten, CapitalError> {
        self.ensure_open(now)?;
        if amount == 0 {
            return Err(CapitalError::ZeroAmount);
        }
        if !params.span_in_range(span) {
            return Err(CapitalError::SpanOutOfRange);
        }
        let total = self.total_liquidity(vault);
        if amount > total.saturating_sub(self.locked_amount) {
            return Err(CapitalError::InsufficientCapacity);
        }
        let premium = model.premium(amount, span, total, self.locked_amount)?;
        if premium > max_cost {
            return Err(CapitalError::PremiumExceedsMax);
        }
        let (fee, net) = math::fee_split(premium, params.fee_rate).ok_or(CapitalError::Overflow)?;
        let end_time = now.checked_add(span).ok_or(CapitalError::Overflow)?;
        let locked = self.locked_amount.checked_add(amount).ok_or(CapitalError::Overflow)?;

        let policy_id = self.policies.len() as u64;
        self.policies.push(Policy {
            id: policy_id,
            amount,
            payout_max: amount,
            premium,
            start_time: now,
            end_time,
            insured: buyer.to_bytes(),
            target,
            status: PolicyStatus::Active as u8,
            _padding: [0; 7],
        });
        self.locked_amount = locked;

        if fee > 0 {
            vault.add_value(token, fee, buyer, &params.treasury)?;
        }
        if net > 0 {
            let units = vault.add_value(token, net, buyer, &self.address)?;
            if self.total_credit > 0 {
                let owed = math::mul_div(units, self.total_credit, total).ok_or(CapitalError::Overflow)?;
                self.attribution_debt =
                    self.attribution_debt.checked_add(owed).ok_or(CapitalError::Overflow)?;
                self.reward_per_credit = self
                    .reward_per_credit
                    .checked_add(math::reward_per_credit_delta(owed, self.total_credit))
                    .ok_or(CapitalError::Overflow)?;
            }
        }

        Ok(Underwritten { policy_id, premium, fee })
    }

    /// Reassign a live policy. Only the current insured may do this.
    pub fn transfer_policy(&mut self, caller: &Pubkey, id: u64, new_insured: &Pubkey) -> Result<(), CapitalError> {
        let policy = self.policy_mut(id)?;
        if policy.insured_pubkey() != *caller {
            return Err(CapitalError::Unauthorized);
        }
        if !policy.is_active() {
            return Err(CapitalError::PolicyNotActive);
        }
        policy.insured = new_insured.to_bytes();
        Ok(())
    }

    /// Freeze the pool and open a redemption window for an incident.
    pub fn apply_cover(&mut self, now: i64, terms: CoverTerms) -> Result<&CoverClaim, CapitalError> {
        if self.current_state(now).is_locked() {
            return Err(CapitalError::MarketLocked);
        }
        if terms.payout_numerator == 0
            || terms.payout_denominator == 0
            || terms.payout_numerator > terms.payout_denominator
        {
            return Err(CapitalError::InvalidPayoutRatio);
        }
        if terms.grace_period < 0 || terms.incident_timestamp > now {
            return Err(CapitalError::InvalidParameters);
        }
        let pending_end = now.checked_add(terms.grace_period).ok_or(CapitalError::Overflow)?;
        Ok(&*self.claim.insert(CoverClaim {
            incident_timestamp: terms.incident_timestamp,
            payout_numerator: terms.payout_numerator,
            payout_denominator: terms.payout_denominator,
            targets: terms.targets,
            applied_at: now,
            pending_end,
            metadata: terms.metadata,
        }))
    }

    /// Validate a claim on policy `id`, mark it redeemed and release its lock.
    /// Returns what the insured is owed; moving the value is the caller's job.
    pub fn begin_redeem(&mut self, caller: &Pubkey, id: u64, now: i64) -> Result<u64, CapitalError> {
        if self.current_state(now) != PoolState::PayingOut {
            return Err(CapitalError::NoApplicableIncident);
        }
        let claim = self.claim.clone().ok_or(CapitalError::NoApplicableIncident)?;
        let policy = *self.policy(id)?;
        if policy.insured_pubkey() != *caller {
            return Err(CapitalError::Unauthorized);
        }
        if !policy.is_active() || !policy.covers(claim.incident_timestamp) {
            return Err(CapitalError::PolicyNotActive);
        }
        if !claim.targets_policy(id) {
            return Err(CapitalError::PolicyNotTargeted);
        }
        let payout = claim.payout_for(&policy)?;
        self.locked_amount = self
            .locked_amount
            .checked_sub(policy.amount)
            .ok_or(CapitalError::AccountingInvariant)?;
        self.policy_mut(id)?.status = PolicyStatus::Redeemed as u8;
        Ok(payout)
    }

    /// First layer of the waterfall: pay from direct-LP value.
    /// Returns `(paid, residual)`.
    pub fn absorb_loss(
        &mut self,
        vault: &mut Vault,
        token: &mut TokenLedger,
        loss: u64,
        to: &Pubkey,
    ) -> Result<(u64, u64), CapitalError> {
        let own_units = self.own_attributions(vault);
        let own = vault.attribution_value(own_units);
        let (paid, residual) = math::absorb(loss, own);
        if paid == own {
            vault.withdraw_attribution(token, &self.address, own_units, to)?;
        } else {
            vault.withdraw_value(token, &self.address, paid, to)?;
        }
        Ok((paid, residual))
    }

    /// Release an expired policy that can no longer be claimed.
    pub fn unlock(&mut self, id: u64, now: i64, params: &Parameters) -> Result<u64, CapitalError> {
        let policy = *self.policy(id)?;
        if policy.state(now, params.unlock_grace_period) != PolicyState::Unlockable {
            return Err(CapitalError::UnlockNotReady);
        }
        if self.current_state(now) == PoolState::PayingOut {
            if let Some(claim) = &self.claim {
                if claim.is_eligible(&policy) {
                    return Err(CapitalError::UnlockNotReady);
                }
            }
        }
        self.locked_amount = self
            .locked_amount
            .checked_sub(policy.amount)
            .ok_or(CapitalError::AccountingInvariant)?;
        self.policy_mut(id)?.status = PolicyStatus::Unlocked as u8;
        Ok(policy.amount)
    }

    /// Whether the live claim is finished: its window closed, or nothing
    /// eligible is left to redeem.
    pub fn resume_ready(&self, now: i64) -> bool {
        match (self.current_state(now), &self.claim) {
            (PoolState::Resumable, _) => true,
            (PoolState::PayingOut, Some(claim)) => !self.policies.iter().any(|p| claim.is_eligible(p)),
            _ => false,
        }
    }

    pub fn resume(&mut self, now: i64) -> Result<CoverClaim, CapitalError> {
        if !self.current_state(now).is_locked() {
            return Err(CapitalError::NoApplicableIncident);
        }
        if !self.resume_ready(now) {
            return Err(CapitalError::ResumeNotReady);
        }
        self.claim.take().ok_or(CapitalError::NoApplicableIncident)
    }

    /// Move `index`'s accrued premium attribution to the index.
    /// Returns the units moved.
    pub fn harvest(&mut self, vault: &mut Vault, index: MarketId, index_address: &Pubkey) -> Result<u64, CapitalError> {
        let pending = self.pending_attribution(index);
        if let Some(line) = self.credit_lines.get_mut(&index) {
            line.reward_debt = u64::try_from(math::accrued_reward(line.credit, self.reward_per_credit))
                .map_err(|_| CapitalError::Overflow)?;
        }
        if pending == 0 {
            return Ok(0);
        }
        self.attribution_debt = self
            .attribution_debt
            .checked_sub(pending)
            .ok_or(CapitalError::AccountingInvariant)?;
        vault.transfer_attribution(&self.address, pending, index_address)?;
        Ok(pending)
    }

    /// Set the credit `index` grants this pool. Pending premium is harvested
    /// first so the accumulator snapshot matches the new credit. Shrinking
    /// credit may not cut into locked capacity.
    pub fn set_credit(
        &mut self,
        vault: &mut Vault,
        index: MarketId,
        index_address: &Pubkey,
        credit: u64,
    ) -> Result<(), CapitalError> {
        self.harvest(vault, index, index_address)?;
        let current = self.credit_of(index);
        if credit < current && current - credit > self.available_balance(vault) {
            return Err(CapitalError::InsufficientCapacity);
        }
        self.total_credit = self
            .total_credit
            .checked_sub(current)
            .ok_or(CapitalError::AccountingInvariant)?
            .checked_add(credit)
            .ok_or(CapitalError::Overflow)?;
        if credit == 0 {
            self.credit_lines.remove(&index);
        } else {
            let reward_debt = u64::try_from(math::accrued_reward(credit, self.reward_per_credit))
                .map_err(|_| CapitalError::Overflow)?;
            self.credit_lines.insert(
                index,
                CreditLine { index: index.0, _padding: [0; 4], credit, reward_debt },
            );
        }
        Ok(())
    }
}
