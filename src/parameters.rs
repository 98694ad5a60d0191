//! Market parameters — protocol-wide defaults with per-market overrides.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;

use crate::error::CapitalError;
use crate::market::MarketId;
use crate::math::MAGIC_SCALE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    /// Protocol fee on premiums (1e6 scale)
    pub fee_rate: u64,
    /// Seconds after a policy's end before it may be force-unlocked
    pub unlock_grace_period: i64,
    /// Seconds between a withdrawal request and its window opening
    pub lockup: i64,
    /// Seconds the withdrawal window stays open
    pub withdrawable_duration: i64,
    pub min_insure_span: i64,
    pub max_insure_span: i64,
    /// Max allocation slots per index
    pub max_list: u32,
    /// Id into the protocol's premium curve table
    pub premium_model: u32,
    /// Receives the protocol fee as vault attribution
    pub treasury: Pubkey,
}

impl Parameters {
    pub const DEFAULT_UNLOCK_GRACE_PERIOD: i64 = 3 * 24 * 60 * 60; // 3 days
    pub const DEFAULT_LOCKUP: i64 = 7 * 24 * 60 * 60; // 7 days
    pub const DEFAULT_WITHDRAWABLE_DURATION: i64 = 2 * 24 * 60 * 60; // 2 days
    pub const DEFAULT_MIN_INSURE_SPAN: i64 = 7 * 24 * 60 * 60; // 7 days
    pub const DEFAULT_MAX_INSURE_SPAN: i64 = 365 * 24 * 60 * 60; // 1 year
    pub const DEFAULT_MAX_LIST: u32 = 10;

    pub fn new(treasury: Pubkey) -> Self {
        Self {
            fee_rate: 0,
            unlock_grace_period: Self::DEFAULT_UNLOCK_GRACE_PERIOD,
            lockup: Self::DEFAULT_LOCKUP,
            withdrawable_duration: Self::DEFAULT_WITHDRAWABLE_DURATION,
            min_insure_span: Self::DEFAULT_MIN_INSURE_SPAN,
            max_insure_span: Self::DEFAULT_MAX_INSURE_SPAN,
            max_list: Self::DEFAULT_MAX_LIST,
            premium_model: 0,
            treasury,
        }
    }

    pub fn validate(&self) -> Result<(), CapitalError> {
        if self.fee_rate > MAGIC_SCALE
            || self.min_insure_span < 0
            || self.min_insure_span > self.max_insure_span
            || self.lockup < 0
            || self.withdrawable_duration < 0
            || self.unlock_grace_period < 0
            || self.max_list == 0
        {
            return Err(CapitalError::InvalidParameters);
        }
        Ok(())
    }

    pub fn span_in_range(&self, span: i64) -> bool {
        span >= self.min_insure_span && span <= self.max_insure_span
    }

    /// Apply a partial update, leaving `None` fields untouched.
    pub fn apply(&mut self, update: &ParameterUpdate) {
        if let Some(v) = update.fee_rate {
            self.fee_rate = v;
        }
        if let Some(v) = update.unlock_grace_period {
            self.unlock_grace_period = v;
        }
        if let Some(v) = update.lockup {
            self.lockup = v;
        }
        if let Some(v) = update.withdrawable_duration {
            self.withdrawable_duration = v;
        }
        if let Some(v) = update.min_insure_span {
            self.min_insure_span = v;
        }
        if let Some(v) = update.max_insure_span {
            self.max_insure_span = v;
        }
        if let Some(v) = update.max_list {
            self.max_list = v;
        }
        if let Some(v) = update.premium_model {
            self.premium_model = v;
        }
        if let Some(v) = update.treasury {
            self.treasury = v;
        }
    }
}

/// Partial parameter update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParameterUpdate {
    pub fee_rate: Option<u64>,
    pub unlock_grace_period: Option<i64>,
    pub lockup: Option<i64>,
    pub withdrawable_duration: Option<i64>,
    pub min_insure_span: Option<i64>,
    pub max_insure_span: Option<i64>,
    pub max_list: Option<u32>,
    pub premium_model: Option<u32>,
    pub treasury: Option<Pubkey>,
}

#[derive(Debug, Clone)]
pub struct ParameterStore {
    defaults: Parameters,
    overrides: BTreeMap<MarketId, Parameters>,
}

impl ParameterStore {
    pub fn new(defaults: Parameters) -> Self {
        Self { defaults, overrides: BTreeMap::new() }
    }

    pub fn defaults(&self) -> &Parameters {
        &self.defaults
    }

    pub fn get(&self, market: MarketId) -> &Parameters {
        self.overrides.get(&market).unwrap_or(&self.defaults)
    }

    /// Update the defaults (`market == None`) or one market's override.
    /// A market without an override starts from the current defaults.
    pub fn update(&mut self, market: Option<MarketId>, update: &ParameterUpdate) -> Result<(), CapitalError> {
        let mut next = match market {
            Some(m) => *self.get(m),
            None => self.defaults,
        };
        next.apply(update);
        next.validate()?;
        match market {
            Some(m) => {
                self.overrides.insert(m, next);
            }
            None => self.defaults = next,
        }
        Ok(())
    }
}
