//! Protocol — the registry that owns every market, the vault and the
//! underlying token ledger.
//!
//! Markets refer to each other by `MarketId` only; anything that touches more
//! than one market (credit pushes, the loss waterfall) is driven from here.
//! Each public call runs against a cloned draft of the state and is committed
//! only if it returns `Ok`, so a failed call changes nothing.

use std::collections::BTreeMap;

use solana_program::{msg, pubkey::Pubkey};

use crate::auth::Authority;
use crate::cds::Cds;
use crate::error::CapitalError;
use crate::events::ProtocolEvent;
use crate::index::{Index, IndexState};
use crate::market::{LiquidityMarket, Market, MarketId, MarketKind};
use crate::math;
use crate::parameters::{ParameterStore, ParameterUpdate, Parameters};
use crate::pool::{CoverClaim, CoverTerms, Pool, PoolState, Underwritten};
use crate::premium::{PremiumCurve, PremiumModel};
use crate::state::{self, AllocationRecord, Policy, WithdrawalRequest};
use crate::token::TokenLedger;
use crate::vault::Vault;

#[derive(Debug, Clone)]
pub struct ProtocolState {
    program_id: Pubkey,
    token: TokenLedger,
    vault: Vault,
    markets: Vec<Market>,
    premium_curves: Vec<PremiumCurve>,
    parameters: ParameterStore,
    cds_routes: BTreeMap<MarketId, MarketId>,
    default_cds: Option<MarketId>,
    events: Vec<ProtocolEvent>,
}

pub struct Protocol {
    authority: Box<dyn Authority>,
    state: ProtocolState,
}

impl Protocol {
    /// `curve` becomes premium model 0.
    pub fn new(
        program_id: Pubkey,
        authority: Box<dyn Authority>,
        defaults: Parameters,
        curve: PremiumCurve,
    ) -> Result<Self, CapitalError> {
        defaults.validate()?;
        curve.validate()?;
        if defaults.premium_model != 0 {
            return Err(CapitalError::UnknownPremiumModel);
        }
        let (vault_address, _bump) = state::derive_vault_address(&program_id);
        Ok(Self {
            authority,
            state: ProtocolState {
                program_id,
                token: TokenLedger::new(),
                vault: Vault::new(vault_address),
                markets: Vec::new(),
                premium_curves: vec![curve],
                parameters: ParameterStore::new(defaults),
                cds_routes: BTreeMap::new(),
                default_cds: None,
                events: Vec::new(),
            },
        })
    }

    fn ensure_admin(&self, caller: &Pubkey) -> Result<(), CapitalError> {
        if !self.authority.is_authorized(caller) {
            return Err(CapitalError::Unauthorized);
        }
        Ok(())
    }

    fn atomically<T>(
        &mut self,
        op: impl FnOnce(&mut ProtocolState) -> Result<T, CapitalError>,
    ) -> Result<T, CapitalError> {
        let mut draft = self.state.clone();
        let out = op(&mut draft)?;
        self.state = draft;
        Ok(out)
    }

    // ── Admin: markets and configuration ──

    pub fn create_pool(&mut self, caller: &Pubkey) -> Result<MarketId, CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| s.create_market(MarketKind::Pool))
    }

    pub fn create_index(&mut self, caller: &Pubkey) -> Result<MarketId, CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| s.create_market(MarketKind::Index))
    }

    pub fn create_cds(&mut self, caller: &Pubkey) -> Result<MarketId, CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| s.create_market(MarketKind::Cds))
    }

    pub fn add_premium_curve(&mut self, caller: &Pubkey, curve: PremiumCurve) -> Result<u32, CapitalError> {
        self.ensure_admin(caller)?;
        curve.validate()?;
        self.atomically(|s| {
            let id = u32::try_from(s.premium_curves.len()).map_err(|_| CapitalError::Overflow)?;
            s.premium_curves.push(curve);
            s.events.push(ProtocolEvent::PremiumCurveSet { curve: id });
            Ok(id)
        })
    }

    pub fn set_premium_curve(&mut self, caller: &Pubkey, id: u32, curve: PremiumCurve) -> Result<(), CapitalError> {
        self.ensure_admin(caller)?;
        curve.validate()?;
        self.atomically(|s| {
            let slot = s
                .premium_curves
                .get_mut(id as usize)
                .ok_or(CapitalError::UnknownPremiumModel)?;
            *slot = curve;
            s.events.push(ProtocolEvent::PremiumCurveSet { curve: id });
            Ok(())
        })
    }

    /// Update the protocol defaults (`market == None`) or one market's override.
    pub fn update_parameters(
        &mut self,
        caller: &Pubkey,
        market: Option<MarketId>,
        update: &ParameterUpdate,
    ) -> Result<(), CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| {
            if let Some(m) = market {
                s.market(m)?;
            }
            if let Some(model) = update.premium_model {
                if model as usize >= s.premium_curves.len() {
                    return Err(CapitalError::UnknownPremiumModel);
                }
            }
            s.parameters.update(market, update)?;
            s.events.push(ProtocolEvent::ParametersUpdated { market });
            Ok(())
        })
    }

    /// Route `market`'s unabsorbed losses to `cds`; `None` sets the default route.
    pub fn set_cds(&mut self, caller: &Pubkey, market: Option<MarketId>, cds: MarketId) -> Result<(), CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| {
            s.cds(cds)?;
            match market {
                Some(m) => {
                    s.market(m)?;
                    s.cds_routes.insert(m, cds);
                }
                None => s.default_cds = Some(cds),
            }
            s.events.push(ProtocolEvent::CdsRouted { market, cds });
            Ok(())
        })
    }

    pub fn set_paused(&mut self, caller: &Pubkey, market: MarketId, paused: bool) -> Result<(), CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| {
            s.market_mut(market)?.as_liquidity_mut().set_paused(paused);
            s.events.push(ProtocolEvent::Paused { market, paused });
            Ok(())
        })
    }

    /// Pay the treasury's accrued fee attribution out to `to`.
    pub fn collect_fees(&mut self, caller: &Pubkey, treasury: &Pubkey, to: &Pubkey) -> Result<u64, CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| {
            if s.vault.attributions(treasury) == 0 {
                return Err(CapitalError::ZeroAmount);
            }
            let amount = s.vault.withdraw_all_attribution(&mut s.token, treasury, to)?;
            s.events.push(ProtocolEvent::FeesCollected { treasury: *treasury, to: *to, amount });
            Ok(amount)
        })
    }

    // ── Admin: claims ──

    pub fn apply_cover(
        &mut self,
        caller: &Pubkey,
        pool: MarketId,
        terms: CoverTerms,
        now: i64,
    ) -> Result<CoverClaim, CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| {
            let claim = s.pool_mut(pool)?.apply_cover(now, terms)?.clone();
            s.events.push(ProtocolEvent::CoverApplied {
                pool,
                incident_timestamp: claim.incident_timestamp,
                payout_numerator: claim.payout_numerator,
                payout_denominator: claim.payout_denominator,
                pending_end: claim.pending_end,
            });
            Ok(claim)
        })
    }

    pub fn resume(&mut self, caller: &Pubkey, pool: MarketId, now: i64) -> Result<(), CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| s.resume(pool, now))
    }

    // ── Admin: allocation ──

    #[allow(clippy::too_many_arguments)]
    pub fn set_allocation(
        &mut self,
        caller: &Pubkey,
        index: MarketId,
        position: u32,
        pool: MarketId,
        points: u64,
        additional_slot: bool,
        now: i64,
    ) -> Result<(), CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| {
            s.pool(pool)?;
            let max_list = s.parameters.get(index).max_list;
            s.index_mut(index)?
                .set_slot(position as usize, pool, points, additional_slot, max_list)?;
            s.events.push(ProtocolEvent::AllocationSet { index, position, pool, points });
            s.adjust_index(index, now, false)
        })
    }

    pub fn set_leverage(&mut self, caller: &Pubkey, index: MarketId, leverage: u64, now: i64) -> Result<(), CapitalError> {
        self.ensure_admin(caller)?;
        self.atomically(|s| {
            s.index_mut(index)?.set_leverage(leverage)?;
            s.events.push(ProtocolEvent::LeverageSet { index, leverage });
            s.adjust_index(index, now, false)
        })
    }

    // ── Permissionless ──

    /// Re-run the index's credit push at its current liquidity.
    ///
    /// Deposits, withdrawals and claims reallocate on their own. Premium
    /// accrued in pools raises index liquidity without touching credit, so
    /// that growth is only picked up here or by the next index deposit or
    /// withdrawal.
    pub fn adjust_alloc(&mut self, index: MarketId, now: i64) -> Result<(), CapitalError> {
        self.atomically(|s| s.adjust_index(index, now, false))
    }

    pub fn unlock(&mut self, pool: MarketId, policy: u64, now: i64) -> Result<u64, CapitalError> {
        self.atomically(|s| {
            let params = *s.parameters.get(pool);
            let released = s.pool_mut(pool)?.unlock(policy, now, &params)?;
            s.events.push(ProtocolEvent::Unlocked { pool, policy });
            Ok(released)
        })
    }

    /// Pay back vault debt booked against `market`.
    pub fn repay_debt(&mut self, caller: &Pubkey, market: MarketId, amount: u64) -> Result<u64, CapitalError> {
        self.atomically(|s| {
            let debtor = s.address_of(market)?;
            let repaid = s.vault.repay_debt(&mut s.token, amount, caller, &debtor)?;
            s.events.push(ProtocolEvent::DebtRepaid { debtor: market, payer: *caller, amount: repaid });
            Ok(repaid)
        })
    }

    // ── LP positions ──

    pub fn deposit(&mut self, caller: &Pubkey, market: MarketId, amount: u64, now: i64) -> Result<u64, CapitalError> {
        self.atomically(|s| s.deposit(caller, market, amount, now))
    }

    pub fn request_withdraw(&mut self, caller: &Pubkey, market: MarketId, shares: u64, now: i64) -> Result<(), CapitalError> {
        self.atomically(|s| {
            s.market_mut(market)?
                .as_liquidity_mut()
                .shares_mut()
                .request_withdraw(caller, shares, now)?;
            s.events.push(ProtocolEvent::WithdrawRequested { market, owner: *caller, shares });
            Ok(())
        })
    }

    pub fn withdraw(&mut self, caller: &Pubkey, market: MarketId, shares: u64, now: i64) -> Result<u64, CapitalError> {
        self.atomically(|s| s.withdraw(caller, market, shares, now))
    }

    pub fn transfer_shares(&mut self, caller: &Pubkey, market: MarketId, to: &Pubkey, shares: u64) -> Result<(), CapitalError> {
        self.atomically(|s| {
            s.market_mut(market)?.as_liquidity_mut().shares_mut().transfer(caller, to, shares)?;
            s.events.push(ProtocolEvent::SharesTransferred { market, from: *caller, to: *to, shares });
            Ok(())
        })
    }

    // ── Policies ──

    #[allow(clippy::too_many_arguments)]
    pub fn insure(
        &mut self,
        caller: &Pubkey,
        pool: MarketId,
        amount: u64,
        max_cost: u64,
        span: i64,
        target: [u8; 32],
        now: i64,
    ) -> Result<Underwritten, CapitalError> {
        self.atomically(|s| {
            let params = *s.parameters.get(pool);
            let curve = s.curve(params.premium_model)?;
            let (p, vault, token) = s.pool_parts(pool)?;
            let out = p.insure(vault, token, &curve, &params, caller, amount, max_cost, span, target, now)?;
            let end_time = p.policy(out.policy_id)?.end_time;
            s.events.push(ProtocolEvent::Insured {
                pool,
                policy: out.policy_id,
                insured: *caller,
                amount,
                premium: out.premium,
                fee: out.fee,
                end_time,
            });
            Ok(out)
        })
    }

    pub fn transfer_policy(&mut self, caller: &Pubkey, pool: MarketId, policy: u64, to: &Pubkey) -> Result<(), CapitalError> {
        self.atomically(|s| {
            s.pool_mut(pool)?.transfer_policy(caller, policy, to)?;
            s.events.push(ProtocolEvent::PolicyTransferred { pool, policy, from: *caller, to: *to });
            Ok(())
        })
    }

    /// Redeem a policy against the live claim. Returns the payout, which the
    /// insured always receives in full.
    pub fn redeem(&mut self, caller: &Pubkey, pool: MarketId, policy: u64, now: i64) -> Result<u64, CapitalError> {
        self.atomically(|s| s.redeem(caller, pool, policy, now))
    }

    // ── Queries ──

    pub fn program_id(&self) -> &Pubkey {
        &self.state.program_id
    }

    pub fn vault(&self) -> &Vault {
        &self.state.vault
    }

    pub fn token(&self) -> &TokenLedger {
        &self.state.token
    }

    /// The underlying asset lives outside the protocol; holders fund and
    /// approve through it directly.
    pub fn token_mut(&mut self) -> &mut TokenLedger {
        &mut self.state.token
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.state.events
    }

    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.state.events)
    }

    pub fn parameters(&self, market: MarketId) -> &Parameters {
        self.state.parameters.get(market)
    }

    pub fn default_parameters(&self) -> &Parameters {
        self.state.parameters.defaults()
    }

    pub fn premium_curve(&self, id: u32) -> Result<PremiumCurve, CapitalError> {
        self.state.curve(id)
    }

    pub fn market(&self, id: MarketId) -> Result<&Market, CapitalError> {
        self.state.market(id)
    }

    pub fn market_count(&self) -> usize {
        self.state.markets.len()
    }

    pub fn market_address(&self, id: MarketId) -> Result<Pubkey, CapitalError> {
        self.state.address_of(id)
    }

    pub fn pool(&self, id: MarketId) -> Result<&Pool, CapitalError> {
        self.state.pool(id)
    }

    pub fn index(&self, id: MarketId) -> Result<&Index, CapitalError> {
        self.state.index(id)
    }

    pub fn cds(&self, id: MarketId) -> Result<&Cds, CapitalError> {
        self.state.cds(id)
    }

    pub fn cds_for(&self, market: MarketId) -> Option<MarketId> {
        self.state.cds_for(market)
    }

    /// A pool's total liquidity counts index credit; an index's counts
    /// premium still held in its pools.
    pub fn total_liquidity(&self, market: MarketId) -> Result<u64, CapitalError> {
        self.state.total_liquidity(market)
    }

    /// Value the market's own LP shares claim.
    pub fn owned_liquidity(&self, market: MarketId) -> Result<u64, CapitalError> {
        self.state.owned_liquidity(market)
    }

    /// Value per LP share, 1e18 scale.
    pub fn rate(&self, market: MarketId) -> Result<u128, CapitalError> {
        let s = &self.state;
        let supply = s.market(market)?.as_liquidity().shares().total_supply();
        Ok(math::share_rate(s.owned_liquidity(market)?, supply))
    }

    pub fn share_balance(&self, market: MarketId, owner: &Pubkey) -> Result<u64, CapitalError> {
        Ok(self.state.market(market)?.as_liquidity().shares().balance_of(owner))
    }

    pub fn share_supply(&self, market: MarketId) -> Result<u64, CapitalError> {
        Ok(self.state.market(market)?.as_liquidity().shares().total_supply())
    }

    pub fn withdrawal_request(&self, market: MarketId, owner: &Pubkey) -> Result<WithdrawalRequest, CapitalError> {
        Ok(self.state.market(market)?.as_liquidity().shares().request(owner))
    }

    pub fn available_balance(&self, pool: MarketId) -> Result<u64, CapitalError> {
        Ok(self.state.pool(pool)?.available_balance(&self.state.vault))
    }

    pub fn utilization(&self, pool: MarketId) -> Result<u64, CapitalError> {
        Ok(self.state.pool(pool)?.utilization(&self.state.vault))
    }

    pub fn locked_amount(&self, pool: MarketId) -> Result<u64, CapitalError> {
        Ok(self.state.pool(pool)?.locked_amount())
    }

    pub fn allocated_credit(&self, pool: MarketId, index: MarketId) -> Result<u64, CapitalError> {
        Ok(self.state.pool(pool)?.credit_of(index))
    }

    pub fn pending_premium(&self, pool: MarketId, index: MarketId) -> Result<u64, CapitalError> {
        Ok(self.state.pool(pool)?.pending_premium(&self.state.vault, index))
    }

    pub fn policy(&self, pool: MarketId, id: u64) -> Result<Policy, CapitalError> {
        Ok(*self.state.pool(pool)?.policy(id)?)
    }

    pub fn pool_state(&self, pool: MarketId, now: i64) -> Result<PoolState, CapitalError> {
        Ok(self.state.pool(pool)?.current_state(now))
    }

    pub fn index_state(&self, index: MarketId, now: i64) -> Result<IndexState, CapitalError> {
        self.state.index_state(index, now)
    }

    /// Premium `insure` would charge right now.
    pub fn premium_quote(&self, pool: MarketId, amount: u64, span: i64) -> Result<u64, CapitalError> {
        let s = &self.state;
        let p = s.pool(pool)?;
        let curve = s.curve(s.parameters.get(pool).premium_model)?;
        curve.premium(amount, span, p.total_liquidity(&s.vault), p.locked_amount())
    }

    pub fn total_allocated_credit(&self, index: MarketId) -> Result<u64, CapitalError> {
        self.state.index(index)?.total_allocated_credit()
    }

    pub fn allocation(&self, index: MarketId, position: u32) -> Result<AllocationRecord, CapitalError> {
        self.state
            .index(index)?
            .allocation(position as usize)
            .ok_or(CapitalError::InvalidPosition)
    }

    /// Effective index leverage, 1e3 scale.
    pub fn leverage(&self, index: MarketId) -> Result<u64, CapitalError> {
        let liquidity = self.state.index_liquidity(index)?;
        self.state.index(index)?.leverage(liquidity)
    }

    pub fn withdrawable(&self, index: MarketId) -> Result<u64, CapitalError> {
        let liquidity = self.state.index_liquidity(index)?;
        self.state.index_withdrawable(index, liquidity)
    }
}

impl ProtocolState {
    fn market(&self, id: MarketId) -> Result<&Market, CapitalError> {
        self.markets.get(id.0 as usize).ok_or(CapitalError::InvalidMarket)
    }

    fn market_mut(&mut self, id: MarketId) -> Result<&mut Market, CapitalError> {
        self.markets.get_mut(id.0 as usize).ok_or(CapitalError::InvalidMarket)
    }

    fn pool(&self, id: MarketId) -> Result<&Pool, CapitalError> {
        self.market(id)?.as_pool()
    }

    fn pool_mut(&mut self, id: MarketId) -> Result<&mut Pool, CapitalError> {
        self.market_mut(id)?.as_pool_mut()
    }

    fn index(&self, id: MarketId) -> Result<&Index, CapitalError> {
        self.market(id)?.as_index()
    }

    fn index_mut(&mut self, id: MarketId) -> Result<&mut Index, CapitalError> {
        self.market_mut(id)?.as_index_mut()
    }

    fn cds(&self, id: MarketId) -> Result<&Cds, CapitalError> {
        self.market(id)?.as_cds()
    }

    /// A pool together with the vault and token ledger it settles against.
    fn pool_parts(&mut self, id: MarketId) -> Result<(&mut Pool, &mut Vault, &mut TokenLedger), CapitalError> {
        let pool = self
            .markets
            .get_mut(id.0 as usize)
            .ok_or(CapitalError::InvalidMarket)?
            .as_pool_mut()?;
        Ok((pool, &mut self.vault, &mut self.token))
    }

    fn cds_parts(&mut self, id: MarketId) -> Result<(&mut Cds, &mut Vault, &mut TokenLedger), CapitalError> {
        let cds = self
            .markets
            .get_mut(id.0 as usize)
            .ok_or(CapitalError::InvalidMarket)?
            .as_cds_mut()?;
        Ok((cds, &mut self.vault, &mut self.token))
    }

    fn address_of(&self, id: MarketId) -> Result<Pubkey, CapitalError> {
        Ok(*self.market(id)?.as_liquidity().address())
    }

    fn curve(&self, id: u32) -> Result<PremiumCurve, CapitalError> {
        self.premium_curves
            .get(id as usize)
            .copied()
            .ok_or(CapitalError::UnknownPremiumModel)
    }

    fn cds_for(&self, market: MarketId) -> Option<MarketId> {
        self.cds_routes.get(&market).copied().or(self.default_cds)
    }

    fn create_market(&mut self, kind: MarketKind) -> Result<MarketId, CapitalError> {
        let id = MarketId(u32::try_from(self.markets.len()).map_err(|_| CapitalError::Overflow)?);
        let (address, _bump) = state::derive_market_address(&self.program_id, kind.seed(), id.0);
        let market = match kind {
            MarketKind::Pool => Market::Pool(Pool::new(id, address)),
            MarketKind::Index => Market::Index(Index::new(id, address)),
            MarketKind::Cds => Market::Cds(Cds::new(id, address)),
        };
        self.markets.push(market);
        self.events.push(ProtocolEvent::MarketCreated { market: id, kind, address });
        Ok(id)
    }

    fn total_liquidity(&self, market: MarketId) -> Result<u64, CapitalError> {
        match self.market(market)? {
            Market::Pool(p) => Ok(p.total_liquidity(&self.vault)),
            Market::Index(_) => self.index_liquidity(market),
            Market::Cds(c) => Ok(c.total_liquidity(&self.vault)),
        }
    }

    fn owned_liquidity(&self, market: MarketId) -> Result<u64, CapitalError> {
        match self.market(market)? {
            Market::Pool(p) => Ok(p.original_liquidity(&self.vault)),
            _ => self.total_liquidity(market),
        }
    }

    /// Vault value plus premium accrued in pools and not yet harvested.
    fn index_liquidity(&self, index: MarketId) -> Result<u64, CapitalError> {
        let idx = self.index(index)?;
        let mut total = self.vault.underlying_value(idx.address());
        for pool in idx.pools() {
            total = total.saturating_add(self.pool(pool)?.pending_premium(&self.vault, index));
        }
        Ok(total)
    }

    fn any_pool_locked(&self, index: MarketId, now: i64) -> Result<bool, CapitalError> {
        for pool in self.index(index)?.pools() {
            if self.pool(pool)?.current_state(now).is_locked() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn index_state(&self, index: MarketId, now: i64) -> Result<IndexState, CapitalError> {
        let locked = self.any_pool_locked(index, now)?;
        Ok(self.index(index)?.current_state(locked))
    }

    /// `min(L, min_p headroom_p)` over pools holding the index's credit.
    fn index_withdrawable(&self, index: MarketId, liquidity: u64) -> Result<u64, CapitalError> {
        let mut cap = liquidity;
        for pool_id in self.index(index)?.pools() {
            let pool = self.pool(pool_id)?;
            let credit = pool.credit_of(index);
            if credit > 0 {
                cap = cap.min(math::headroom(pool.available_balance(&self.vault), liquidity, credit));
            }
        }
        Ok(cap)
    }

    /// Pull premium accrued for `index` out of every pool it lends to.
    fn harvest_index(&mut self, index: MarketId) -> Result<(), CapitalError> {
        let address = self.address_of(index)?;
        let pools = self.index(index)?.pools();
        for pool in pools {
            let (p, vault, _) = self.pool_parts(pool)?;
            p.harvest(vault, index, &address)?;
        }
        Ok(())
    }

    /// Push the index's target credit into each pool: decreases first, then
    /// increases, so capacity is released before it is claimed elsewhere.
    /// With `clamp`, a decrease a pool cannot release in full is cut to what
    /// it has available instead of failing.
    fn adjust_index(&mut self, index: MarketId, now: i64, clamp: bool) -> Result<(), CapitalError> {
        if self.any_pool_locked(index, now)? {
            return Err(CapitalError::MarketLocked);
        }
        self.harvest_index(index)?;
        let liquidity = self.index_liquidity(index)?;
        let address = self.address_of(index)?;
        let mut targets = self.index(index)?.credit_targets(liquidity)?;
        targets.sort_by_key(|t| t.target >= t.current);

        for t in targets {
            let (pool, vault, _) = self.pool_parts(t.pool)?;
            let mut credit = t.target;
            if clamp && credit < t.current {
                let releasable = pool.available_balance(vault);
                credit = credit.max(t.current.saturating_sub(releasable));
            }
            if credit == t.current {
                continue;
            }
            pool.set_credit(vault, index, &address, credit)?;
            self.index_mut(index)?.record_credit(t.pool, credit);
            self.events.push(ProtocolEvent::CreditAllocated { index, pool: t.pool, credit });
        }
        Ok(())
    }

    fn deposit(&mut self, owner: &Pubkey, market: MarketId, amount: u64, now: i64) -> Result<u64, CapitalError> {
        let kind = self.market(market)?.kind();
        let minted = match kind {
            MarketKind::Pool => {
                let (pool, vault, token) = self.pool_parts(market)?;
                pool.deposit(vault, token, owner, amount, now)?
            }
            MarketKind::Index => self.deposit_index(owner, market, amount, now)?,
            MarketKind::Cds => {
                let (cds, vault, token) = self.cds_parts(market)?;
                cds.deposit(vault, token, owner, amount)?
            }
        };
        self.events.push(ProtocolEvent::Deposited { market, owner: *owner, amount, shares: minted });
        Ok(minted)
    }

    fn deposit_index(&mut self, owner: &Pubkey, index: MarketId, amount: u64, now: i64) -> Result<u64, CapitalError> {
        match self.index_state(index, now)? {
            IndexState::Open => {}
            IndexState::Paused => return Err(CapitalError::MarketPaused),
            IndexState::Frozen => return Err(CapitalError::MarketLocked),
        }
        let liquidity = self.index_liquidity(index)?;
        let minted = self.index(index)?.shares().shares_for_deposit(liquidity, amount)?;
        let address = self.address_of(index)?;
        self.vault.add_value(&mut self.token, amount, owner, &address)?;
        self.index_mut(index)?.shares_mut().mint(owner, minted)?;
        self.adjust_index(index, now, false)?;
        Ok(minted)
    }

    fn withdraw(&mut self, owner: &Pubkey, market: MarketId, shares: u64, now: i64) -> Result<u64, CapitalError> {
        let params = *self.parameters.get(market);
        let kind = self.market(market)?.kind();
        let value = match kind {
            MarketKind::Pool => {
                let (pool, vault, token) = self.pool_parts(market)?;
                pool.withdraw(vault, token, owner, shares, now, &params)?
            }
            MarketKind::Index => self.withdraw_index(owner, market, shares, now, &params)?,
            MarketKind::Cds => {
                let (cds, vault, token) = self.cds_parts(market)?;
                cds.withdraw(vault, token, owner, shares, now, &params)?
            }
        };
        self.events.push(ProtocolEvent::Withdrawn { market, owner: *owner, shares, amount: value });
        Ok(value)
    }

    fn withdraw_index(
        &mut self,
        owner: &Pubkey,
        index: MarketId,
        shares: u64,
        now: i64,
        params: &Parameters,
    ) -> Result<u64, CapitalError> {
        if self.index_state(index, now)? == IndexState::Frozen {
            return Err(CapitalError::MarketLocked);
        }
        self.harvest_index(index)?;
        let liquidity = self.index_liquidity(index)?;
        let value = self.index(index)?.shares().value_for_shares(owner, liquidity, shares)?;
        if value > self.index_withdrawable(index, liquidity)? {
            return Err(CapitalError::InsufficientCapacity);
        }
        let address = self.address_of(index)?;
        let ledger = self.index_mut(index)?.shares_mut();
        ledger.consume_request(owner, shares, now, params.lockup, params.withdrawable_duration)?;
        ledger.burn(owner, shares)?;
        self.vault.withdraw_value(&mut self.token, &address, value, owner)?;
        self.adjust_index(index, now, false)?;
        Ok(value)
    }

    /// Pay a claim through the waterfall: pool, then the indices lending to
    /// it pro-rata by credit, then their reserves. Whatever is left after the
    /// last reserve is still paid and booked as insolvency.
    fn redeem(&mut self, insured: &Pubkey, pool_id: MarketId, policy: u64, now: i64) -> Result<u64, CapitalError> {
        let payout = self.pool_mut(pool_id)?.begin_redeem(insured, policy, now)?;
        let (pool, vault, token) = self.pool_parts(pool_id)?;
        let (_, residual) = pool.absorb_loss(vault, token, payout, insured)?;
        let lines = pool.credit_lines();

        if residual > 0 {
            if lines.is_empty() {
                let cds = self.cds_for(pool_id);
                self.forward_to_cds(pool_id, cds, residual, insured)?;
            } else {
                let weights: Vec<u64> = lines.iter().map(|(_, credit)| *credit).collect();
                let parts = math::split_pro_rata(residual, &weights);
                for ((index, _), part) in lines.into_iter().zip(parts) {
                    if part > 0 {
                        self.index_absorb(pool_id, index, part, insured)?;
                    }
                }
            }
        }

        self.events.push(ProtocolEvent::Redeemed { pool: pool_id, policy, insured: *insured, payout });
        Ok(payout)
    }

    fn index_absorb(&mut self, pool: MarketId, index: MarketId, loss: u64, to: &Pubkey) -> Result<(), CapitalError> {
        self.harvest_index(index)?;
        let address = self.address_of(index)?;
        let units = self.vault.attributions(&address);
        let available = self.vault.attribution_value(units);
        let (paid, rest) = math::absorb(loss, available);
        if paid > 0 {
            if paid == available {
                self.vault.withdraw_attribution(&mut self.token, &address, units, to)?;
            } else {
                self.vault.withdraw_value(&mut self.token, &address, paid, to)?;
            }
            self.events.push(ProtocolEvent::LossAbsorbed { pool, market: index, amount: paid });
        }
        if rest > 0 {
            msg!("Index {} exhausted on pool {} claim, forwarding {} to reserve", index, pool, rest);
            let cds = self.cds_for(index);
            self.forward_to_cds(pool, cds, rest, to)?;
        }
        Ok(())
    }

    fn forward_to_cds(&mut self, pool: MarketId, cds: Option<MarketId>, amount: u64, to: &Pubkey) -> Result<(), CapitalError> {
        let mut shortfall = amount;
        if let Some(cds_id) = cds {
            let (reserve, vault, token) = self.cds_parts(cds_id)?;
            let paid = reserve.receive_loss(vault, token, amount, to)?;
            if paid > 0 {
                self.events.push(ProtocolEvent::LossAbsorbed { pool, market: cds_id, amount: paid });
            }
            shortfall -= paid;
        }
        if shortfall > 0 {
            let debtor = self.address_of(pool)?;
            self.vault.borrow_value(&mut self.token, &debtor, shortfall, to)?;
            msg!("Insolvency: pool {} claim short {} after reserves, booked as vault debt", pool, shortfall);
            self.events.push(ProtocolEvent::Insolvency { pool, cds, shortfall });
        }
        Ok(())
    }

    fn resume(&mut self, pool: MarketId, now: i64) -> Result<(), CapitalError> {
        self.pool_mut(pool)?.resume(now)?;
        self.events.push(ProtocolEvent::Resumed { pool });
        let indices: Vec<MarketId> = self.pool(pool)?.credit_lines().into_iter().map(|(i, _)| i).collect();
        for index in indices {
            if self.any_pool_locked(index, now)? {
                msg!("Index {} still frozen by another pool, reallocation deferred", index);
                continue;
            }
            self.adjust_index(index, now, true)?;
        }
        Ok(())
    }
}
