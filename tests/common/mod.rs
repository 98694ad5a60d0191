//! Shared setup for the engine-level integration tests.

#![allow(dead_code)]

use parametric_capital::auth::SingleAdmin;
use parametric_capital::events::ProtocolEvent;
use parametric_capital::market::MarketId;
use parametric_capital::parameters::Parameters;
use parametric_capital::pool::CoverTerms;
use parametric_capital::premium::{FlatPremium, PremiumCurve};
use parametric_capital::protocol::Protocol;
use solana_program::pubkey::Pubkey;

pub const T0: i64 = 1_700_000_000;
pub const DAY: i64 = 24 * 60 * 60;
pub const SPAN: i64 = 30 * DAY;

pub struct World {
    pub protocol: Protocol,
    pub admin: Pubkey,
    pub treasury: Pubkey,
}

pub fn flat(rate: u64) -> PremiumCurve {
    PremiumCurve::Flat(FlatPremium { rate })
}

pub fn world(fee_rate: u64, curve: PremiumCurve) -> World {
    let admin = Pubkey::new_unique();
    let treasury = Pubkey::new_unique();
    let mut defaults = Parameters::new(treasury);
    defaults.fee_rate = fee_rate;
    let protocol = Protocol::new(Pubkey::new_unique(), Box::new(SingleAdmin { admin }), defaults, curve).unwrap();
    World { protocol, admin, treasury }
}

/// Zero fee, zero premium: payouts are the only value that moves.
pub fn free_world() -> World {
    world(0, flat(0))
}

impl World {
    /// New holder with `amount` tokens and an unlimited vault allowance.
    pub fn user(&mut self, amount: u64) -> Pubkey {
        let who = Pubkey::new_unique();
        self.fund(&who, amount);
        who
    }

    pub fn fund(&mut self, who: &Pubkey, amount: u64) {
        let vault = *self.protocol.vault().address();
        let token = self.protocol.token_mut();
        token.mint_to(who, amount).unwrap();
        token.approve(who, &vault, u64::MAX);
    }

    pub fn balance(&self, who: &Pubkey) -> u64 {
        self.protocol.token().balance_of(who)
    }

    pub fn pool(&mut self) -> MarketId {
        let admin = self.admin;
        self.protocol.create_pool(&admin).unwrap()
    }

    pub fn index(&mut self) -> MarketId {
        let admin = self.admin;
        self.protocol.create_index(&admin).unwrap()
    }

    pub fn cds(&mut self) -> MarketId {
        let admin = self.admin;
        self.protocol.create_cds(&admin).unwrap()
    }

    /// Append `pool` to `index`'s allocation list.
    pub fn allocate(&mut self, index: MarketId, pool: MarketId, points: u64) {
        let admin = self.admin;
        let position = self.protocol.index(index).unwrap().slot_count() as u32;
        self.protocol
            .set_allocation(&admin, index, position, pool, points, true, T0)
            .unwrap();
    }

    pub fn leverage(&mut self, index: MarketId, leverage: u64) {
        let admin = self.admin;
        self.protocol.set_leverage(&admin, index, leverage, T0).unwrap();
    }

    pub fn default_cds(&mut self, cds: MarketId) {
        let admin = self.admin;
        self.protocol.set_cds(&admin, None, cds).unwrap();
    }

    /// Fresh LP depositing `amount` into `market` at `T0`.
    pub fn lp(&mut self, market: MarketId, amount: u64) -> Pubkey {
        let who = self.user(amount);
        self.protocol.deposit(&who, market, amount, T0).unwrap();
        who
    }

    /// Buy `amount` of cover for `SPAN` at `T0`. Returns `(buyer, policy_id)`.
    pub fn insure(&mut self, pool: MarketId, amount: u64) -> (Pubkey, u64) {
        let buyer = self.user(amount);
        let out = self
            .protocol
            .insure(&buyer, pool, amount, u64::MAX, SPAN, [7; 32], T0)
            .unwrap();
        (buyer, out.policy_id)
    }

    /// Full-payout claim for an incident at `T0 + 50`, applied at `T0 + 100`.
    pub fn apply_full_cover(&mut self, pool: MarketId) {
        let admin = self.admin;
        self.protocol
            .apply_cover(&admin, pool, full_cover(T0 + 50), T0 + 100)
            .unwrap();
    }

    pub fn count_events(&self, matches: impl Fn(&ProtocolEvent) -> bool) -> usize {
        self.protocol.events().iter().filter(|&e| matches(e)).count()
    }

    /// Tokens held by the vault match its own balance sheet.
    pub fn assert_custody(&self) {
        let vault = self.protocol.vault();
        assert_eq!(self.protocol.token().balance_of(vault.address()), vault.balance());
    }
}

pub fn full_cover(incident_timestamp: i64) -> CoverTerms {
    CoverTerms {
        grace_period: 3 * DAY,
        payout_numerator: 1,
        payout_denominator: 1,
        incident_timestamp,
        targets: Vec::new(),
        metadata: [0; 32],
    }
}
