//! The closed set of market kinds and the share mechanics they have in common.

use solana_program::pubkey::Pubkey;

use crate::cds::Cds;
use crate::error::CapitalError;
use crate::index::Index;
use crate::pool::Pool;
use crate::shares::ShareLedger;

/// Arena slot of a market inside the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarketId(pub u32);

impl core::fmt::Display for MarketId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarketKind {
    Pool = 0,
    Index = 1,
    Cds = 2,
}

impl MarketKind {
    /// Address derivation seed for this kind.
    pub fn seed(self) -> &'static [u8] {
        match self {
            MarketKind::Pool => b"pool",
            MarketKind::Index => b"index",
            MarketKind::Cds => b"cds",
        }
    }
}

/// Share-token side of a market: identity, LP ledger and the pause switch.
pub trait LiquidityMarket {
    fn id(&self) -> MarketId;
    fn address(&self) -> &Pubkey;
    fn shares(&self) -> &ShareLedger;
    fn shares_mut(&mut self) -> &mut ShareLedger;
    fn is_paused(&self) -> bool;
    fn set_paused(&mut self, paused: bool);
}

#[derive(Debug, Clone)]
pub enum Market {
    Pool(Pool),
    Index(Index),
    Cds(Cds),
}

impl Market {
    pub fn kind(&self) -> MarketKind {
        match self {
            Market::Pool(_) => MarketKind::Pool,
            Market::Index(_) => MarketKind::Index,
            Market::Cds(_) => MarketKind::Cds,
        }
    }

    pub fn as_liquidity(&self) -> &dyn LiquidityMarket {
        match self {
            Market::Pool(m) => m,
            Market::Index(m) => m,
            Market::Cds(m) => m,
        }
    }

    pub fn as_liquidity_mut(&mut self) -> &mut dyn LiquidityMarket {
        match self {
            Market::Pool(m) => m,
            Market::Index(m) => m,
            Market::Cds(m) => m,
        }
    }

    pub fn as_pool(&self) -> Result<&Pool, CapitalError> {
        match self {
            Market::Pool(p) => Ok(p),
            _ => Err(CapitalError::InvalidMarket),
        }
    }

    pub fn as_pool_mut(&mut self) -> Result<&mut Pool, CapitalError> {
        match self {
            Market::Pool(p) => Ok(p),
            _ => Err(CapitalError::InvalidMarket),
        }
    }

    pub fn as_index(&self) -> Result<&Index, CapitalError> {
        match self {
            Market::Index(i) => Ok(i),
            _ => Err(CapitalError::InvalidMarket),
        }
    }

    pub fn as_index_mut(&mut self) -> Result<&mut Index, CapitalError> {
        match self {
            Market::Index(i) => Ok(i),
            _ => Err(CapitalError::InvalidMarket),
        }
    }

    pub fn as_cds(&self) -> Result<&Cds, CapitalError> {
        match self {
            Market::Cds(c) => Ok(c),
            _ => Err(CapitalError::InvalidMarket),
        }
    }

    pub fn as_cds_mut(&mut self) -> Result<&mut Cds, CapitalError> {
        match self {
            Market::Cds(c) => Ok(c),
            _ => Err(CapitalError::InvalidMarket),
        }
    }
}

/// Implements `LiquidityMarket` for a struct with `id`, `address`, `shares`
/// and `paused` fields.
macro_rules! impl_liquidity_market {
    ($ty:ty) => {
        impl $crate::market::LiquidityMarket for $ty {
            fn id(&self) -> $crate::market::MarketId {
                self.id
            }
            fn address(&self) -> &solana_program::pubkey::Pubkey {
                &self.address
            }
            fn shares(&self) -> &$crate::shares::ShareLedger {
                &self.shares
            }
            fn shares_mut(&mut self) -> &mut $crate::shares::ShareLedger {
                &mut self.shares
            }
            fn is_paused(&self) -> bool {
                self.paused
            }
            fn set_paused(&mut self, paused: bool) {
                self.paused = paused;
            }
        }
    };
}

pub(crate) use impl_liquidity_market;
