//! Index — a leveraged basket that lends its liquidity to pools as credit.
//!
//! The index keeps only its allocation book here. Liquidity (vault value plus
//! premium accrued in pools) and the credit push itself need the pools, so
//! they are driven from the protocol arena.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;

use crate::error::CapitalError;
use crate::market::{impl_liquidity_market, MarketId};
use crate::math::{self, LEVERAGE_SCALE};
use crate::shares::ShareLedger;
use crate::state::AllocationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Open,
    Paused,
    /// Some constituent pool is paying out a claim
    Frozen,
}

/// One step of a reallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditTarget {
    pub pool: MarketId,
    pub current: u64,
    pub target: u64,
}

#[derive(Debug, Clone)]
pub struct Index {
    id: MarketId,
    address: Pubkey,
    shares: ShareLedger,
    paused: bool,
    /// Target leverage, 1e3 scale
    leverage: u64,
    slots: Vec<AllocationRecord>,
    /// Pools dropped from the list that still hold credit
    retiring: BTreeMap<MarketId, u64>,
}

impl_liquidity_market!(Index);

impl Index {
    pub fn new(id: MarketId, address: Pubkey) -> Self {
        Self {
            id,
            address,
            shares: ShareLedger::new(),
            paused: false,
            leverage: LEVERAGE_SCALE,
            slots: Vec::new(),
            retiring: BTreeMap::new(),
        }
    }

    pub fn current_state(&self, any_pool_locked: bool) -> IndexState {
        if any_pool_locked {
            IndexState::Frozen
        } else if self.paused {
            IndexState::Paused
        } else {
            IndexState::Open
        }
    }

    pub fn target_leverage(&self) -> u64 {
        self.leverage
    }

    pub fn set_leverage(&mut self, leverage: u64) -> Result<(), CapitalError> {
        if leverage == 0 {
            return Err(CapitalError::InvalidParameters);
        }
        self.leverage = leverage;
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn allocation(&self, position: usize) -> Option<AllocationRecord> {
        self.slots.get(position).copied()
    }

    pub fn total_allocation_points(&self) -> Result<u64, CapitalError> {
        self.points_without(None)
    }

    pub fn total_allocated_credit(&self) -> Result<u64, CapitalError> {
        self.slots
            .iter()
            .map(|s| s.allocated_credit)
            .chain(self.retiring.values().copied())
            .try_fold(0u64, u64::checked_add)
            .ok_or(CapitalError::Overflow)
    }

    /// Points summed over every slot except `skip`.
    fn points_without(&self, skip: Option<usize>) -> Result<u64, CapitalError> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .try_fold(0u64, |acc, (_, s)| acc.checked_add(s.allocation_points))
            .ok_or(CapitalError::Overflow)
    }

    pub fn credit_of(&self, pool: MarketId) -> u64 {
        self.slots
            .iter()
            .find(|s| s.pool == pool.0)
            .map(|s| s.allocated_credit)
            .or_else(|| self.retiring.get(&pool).copied())
            .unwrap_or(0)
    }

    /// Every pool the index has a slot in or still owes credit to.
    pub fn pools(&self) -> Vec<MarketId> {
        let mut pools: Vec<MarketId> = self.slots.iter().map(|s| MarketId(s.pool)).collect();
        pools.extend(self.retiring.keys().copied());
        pools
    }

    /// Effective leverage, 1e3 scale: allocated credit over liquidity.
    pub fn leverage(&self, liquidity: u64) -> Result<u64, CapitalError> {
        if liquidity == 0 {
            return Ok(0);
        }
        Ok(math::mul_div(self.total_allocated_credit()?, LEVERAGE_SCALE, liquidity).unwrap_or(u64::MAX))
    }

    /// Append a slot (`additional_slot`, position must be the list length)
    /// or replace the pool and weight at an existing position. A pool pushed
    /// out of the list keeps its credit until the next reallocation zeroes it.
    /// The list's total weight must fit in a u64.
    pub fn set_slot(
        &mut self,
        position: usize,
        pool: MarketId,
        points: u64,
        additional_slot: bool,
        max_list: u32,
    ) -> Result<(), CapitalError> {
        let existing = self.slots.iter().position(|s| s.pool == pool.0);
        if additional_slot {
            if position != self.slots.len() {
                return Err(CapitalError::InvalidPosition);
            }
            if self.slots.len() >= max_list as usize {
                return Err(CapitalError::AllocationListFull);
            }
            if existing.is_some() {
                return Err(CapitalError::DuplicatePool);
            }
            self.points_without(None)?.checked_add(points).ok_or(CapitalError::Overflow)?;
            let credit = self.retiring.remove(&pool).unwrap_or(0);
            self.slots.push(AllocationRecord {
                pool: pool.0,
                _padding: [0; 4],
                allocation_points: points,
                allocated_credit: credit,
            });
            return Ok(());
        }

        if position >= self.slots.len() {
            return Err(CapitalError::InvalidPosition);
        }
        if existing.is_some_and(|at| at != position) {
            return Err(CapitalError::DuplicatePool);
        }
        self.points_without(Some(position))?.checked_add(points).ok_or(CapitalError::Overflow)?;
        let slot = &mut self.slots[position];
        if slot.pool != pool.0 {
            if slot.allocated_credit > 0 {
                self.retiring.insert(MarketId(slot.pool), slot.allocated_credit);
            }
            slot.pool = pool.0;
            slot.allocated_credit = self.retiring.remove(&pool).unwrap_or(0);
        }
        slot.allocation_points = points;
        Ok(())
    }

    /// Credit every pool should hold at `liquidity`. Retiring pools target zero.
    /// Fails with `Overflow` when the targets together would not fit in a u64.
    pub fn credit_targets(&self, liquidity: u64) -> Result<Vec<CreditTarget>, CapitalError> {
        let total_points = self.total_allocation_points()?;
        let mut targets = Vec::with_capacity(self.slots.len() + self.retiring.len());
        let mut total_target = 0u64;
        for slot in &self.slots {
            let target = math::target_credit(liquidity, self.leverage, slot.allocation_points, total_points)
                .ok_or(CapitalError::Overflow)?;
            total_target = total_target.checked_add(target).ok_or(CapitalError::Overflow)?;
            targets.push(CreditTarget { pool: MarketId(slot.pool), current: slot.allocated_credit, target });
        }
        for (pool, credit) in &self.retiring {
            targets.push(CreditTarget { pool: *pool, current: *credit, target: 0 });
        }
        Ok(targets)
    }

    /// Book the credit a pool accepted.
    pub fn record_credit(&mut self, pool: MarketId, credit: u64) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.pool == pool.0) {
            slot.allocated_credit = credit;
        } else if credit == 0 {
            self.retiring.remove(&pool);
        } else {
            self.retiring.insert(pool, credit);
        }
    }
}
