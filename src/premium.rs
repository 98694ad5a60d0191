//! Premium models.
//!
//! Pure functions of utilization. Each curve is its own strategy; the pool
//! only sees the `PremiumModel` trait. Rates are annual and scaled by
//! `MAGIC_SCALE` (1_000_000 == 100% per year).

use crate::error::CapitalError;
use crate::math::{self, MAGIC_SCALE};

pub trait PremiumModel {
    /// Annual rate at the utilization implied by `locked_amount / total_liquidity`.
    /// Zero liquidity prices as full utilization.
    fn premium_rate(&self, total_liquidity: u64, locked_amount: u64) -> u64;

    /// Premium for locking `amount` more for `span` seconds, priced at the
    /// utilization after the lock.
    fn premium(
        &self,
        amount: u64,
        span: i64,
        total_liquidity: u64,
        locked_amount: u64,
    ) -> Result<u64, CapitalError> {
        let locked_after = locked_amount.checked_add(amount).ok_or(CapitalError::Overflow)?;
        let rate = self.premium_rate(total_liquidity, locked_after);
        math::premium_for_rate(amount, rate, span).ok_or(CapitalError::Overflow)
    }
}

/// Same rate at every utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatPremium {
    pub rate: u64,
}

impl PremiumModel for FlatPremium {
    fn premium_rate(&self, _total_liquidity: u64, _locked_amount: u64) -> u64 {
        self.rate
    }
}

/// Piecewise-linear utilization curve with a kink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlopePremium {
    pub base_rate: u64,
    /// Rate added per 100% utilization below the kink
    pub slope: u64,
    /// Utilization (1e6 scale) where the steeper slope starts
    pub kink: u64,
    /// Rate added per 100% utilization above the kink
    pub jump_slope: u64,
}

impl SlopePremium {
    fn rate_at(&self, u: u64) -> u64 {
        let below = u.min(self.kink);
        let above = u.saturating_sub(self.kink);
        let r = self.base_rate as u128
            + (self.slope as u128) * (below as u128) / MAGIC_SCALE as u128
            + (self.jump_slope as u128) * (above as u128) / MAGIC_SCALE as u128;
        u64::try_from(r).unwrap_or(u64::MAX)
    }
}

impl PremiumModel for SlopePremium {
    fn premium_rate(&self, total_liquidity: u64, locked_amount: u64) -> u64 {
        self.rate_at(math::utilization(locked_amount, total_liquidity))
    }
}

/// Hyperbolic bonding curve: `b + k/(1 + a - u) - k/(1 + a)` in 1e6 fixed point,
/// rising steeply as utilization approaches 100%. Deep pools that stay under
/// `low_risk_util` pay the flat `low_risk_rate` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondingPremium {
    pub k: u64,
    pub b: u64,
    /// Curve offset; must be non-zero so the curve is finite at 100%
    pub a: u64,
    pub low_risk_liquidity: u64,
    pub low_risk_util: u64,
    pub low_risk_rate: u64,
}

impl BondingPremium {
    fn curve(&self, u: u64) -> u64 {
        let scale = MAGIC_SCALE as u128;
        let k = self.k as u128 * scale;
        let at_u = k / (scale + self.a as u128 - u.min(MAGIC_SCALE) as u128);
        let at_zero = k / (scale + self.a as u128);
        let r = self.b as u128 + at_u - at_zero;
        u64::try_from(r).unwrap_or(u64::MAX)
    }

    fn is_low_risk(&self, total_liquidity: u64, u: u64) -> bool {
        self.low_risk_liquidity > 0 && total_liquidity >= self.low_risk_liquidity && u <= self.low_risk_util
    }
}

impl PremiumModel for BondingPremium {
    fn premium_rate(&self, total_liquidity: u64, locked_amount: u64) -> u64 {
        let u = math::utilization(locked_amount, total_liquidity);
        if self.is_low_risk(total_liquidity, u) {
            self.low_risk_rate
        } else {
            self.curve(u)
        }
    }
}

/// The closed set of curves a market can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumCurve {
    Flat(FlatPremium),
    Slope(SlopePremium),
    Bonding(BondingPremium),
}

impl PremiumCurve {
    /// Reject parameter sets that would make the rate non-monotonic or undefined.
    pub fn validate(&self) -> Result<(), CapitalError> {
        match self {
            PremiumCurve::Flat(_) => Ok(()),
            PremiumCurve::Slope(s) => {
                if s.kink > MAGIC_SCALE {
                    return Err(CapitalError::InvalidParameters);
                }
                Ok(())
            }
            PremiumCurve::Bonding(c) => {
                if c.a == 0 || c.low_risk_util > MAGIC_SCALE {
                    return Err(CapitalError::InvalidParameters);
                }
                // Leaving the low-risk band must never lower the rate.
                if c.low_risk_liquidity > 0 && c.low_risk_rate > c.curve(c.low_risk_util) {
                    return Err(CapitalError::InvalidParameters);
                }
                Ok(())
            }
        }
    }
}

impl PremiumModel for PremiumCurve {
    fn premium_rate(&self, total_liquidity: u64, locked_amount: u64) -> u64 {
        match self {
            PremiumCurve::Flat(c) => c.premium_rate(total_liquidity, locked_amount),
            PremiumCurve::Slope(c) => c.premium_rate(total_liquidity, locked_amount),
            PremiumCurve::Bonding(c) => c.premium_rate(total_liquidity, locked_amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::YEAR;

    fn slope() -> SlopePremium {
        SlopePremium { base_rate: 10_000, slope: 100_000, kink: 800_000, jump_slope: 2_000_000 }
    }

    fn bonding() -> BondingPremium {
        BondingPremium {
            k: 200_000,
            b: 30_000,
            a: 10_000,
            low_risk_liquidity: 1_000_000,
            low_risk_util: 150_000,
            low_risk_rate: 20_000,
        }
    }

    #[test]
    fn test_flat_premium_year() {
        let m = FlatPremium { rate: 269_900 };
        assert_eq!(m.premium(9_999, YEAR, 10_000, 0).unwrap(), 2_698);
    }

    #[test]
    fn test_slope_kink() {
        let m = slope();
        assert_eq!(m.premium_rate(1_000, 0), 10_000);
        assert_eq!(m.premium_rate(1_000, 800), 10_000 + 80_000);
        assert_eq!(m.premium_rate(1_000, 900), 10_000 + 80_000 + 200_000);
    }

    #[test]
    fn test_zero_liquidity_is_ceiling() {
        let s = slope();
        assert_eq!(s.premium_rate(0, 0), s.premium_rate(1, 1));
        let b = bonding();
        assert_eq!(b.premium_rate(0, 0), b.curve(MAGIC_SCALE));
    }

    #[test]
    fn test_curves_monotone_in_utilization() {
        let curves = [
            PremiumCurve::Flat(FlatPremium { rate: 50_000 }),
            PremiumCurve::Slope(slope()),
            PremiumCurve::Bonding(bonding()),
        ];
        for c in curves.iter() {
            c.validate().unwrap();
            let mut last = 0;
            for locked in (0..=2_000_000u64).step_by(50_000) {
                let r = c.premium_rate(2_000_000, locked);
                assert!(r >= last, "{:?} fell at locked={}", c, locked);
                last = r;
            }
        }
    }

    #[test]
    fn test_bonding_low_risk_band() {
        let b = bonding();
        assert_eq!(b.premium_rate(2_000_000, 100_000), 20_000);
        // Same utilization in a shallow pool prices on the curve.
        assert!(b.premium_rate(200_000, 10_000) > 20_000);
    }

    #[test]
    fn test_bonding_validation() {
        let mut b = bonding();
        b.a = 0;
        assert_eq!(PremiumCurve::Bonding(b).validate(), Err(CapitalError::InvalidParameters));
        let mut b = bonding();
        b.low_risk_rate = 1_000_000;
        assert_eq!(PremiumCurve::Bonding(b).validate(), Err(CapitalError::InvalidParameters));
    }
}
