//! Exact payout rates.
//!
//! A resolved round's rate is kept as the fraction
//! `rewards_deposited / total_effective_stake` and only reduced to integer
//! units when applied to a single stake's weight.  Rounding is always toward
//! zero; the discarded fraction is returned as dust (10^-12 units) so the
//! caller can carry it into the next claim.

use {
    crate::{constants::DUST_PRECISION, error::LockedStakeError},
    borsh::{BorshDeserialize, BorshSerialize},
    serde::{Deserialize, Serialize},
};

/// Rewards per unit of effective weight, as an exact fraction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Rate {
    pub numerator: u64,
    pub denominator: u64,
}

/// Result of applying a [`Rate`] to one weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accrual {
    /// Whole reward units.
    pub units: u64,
    /// Fractional remainder in `1 / DUST_PRECISION` units.
    pub dust: u128,
}

impl Rate {
    pub const ZERO: Self = Self {
        numerator: 0,
        denominator: 1,
    };

    /// `rewards / total_weight`, defined as zero when nothing is staked.
    pub fn new(rewards: u64, total_weight: u64) -> Self {
        if total_weight == 0 {
            Self::ZERO
        } else {
            Self {
                numerator: rewards,
                denominator: total_weight,
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    /// `weight × rate`, rounded toward zero.
    pub fn accrue(&self, weight: u64) -> Result<Accrual, LockedStakeError> {
        if self.denominator == 0 {
            return Err(LockedStakeError::invariant("rate with zero denominator"));
        }
        // u64 × u64 always fits in u128.
        let product = u128::from(weight) * u128::from(self.numerator);
        let denominator = u128::from(self.denominator);
        let units = product / denominator;
        let remainder = product % denominator;
        let dust = remainder
            .checked_mul(DUST_PRECISION)
            .ok_or(LockedStakeError::ArithmeticOverflow)?
            / denominator;
        Ok(Accrual {
            units: u64::try_from(units).map_err(|_| LockedStakeError::ArithmeticOverflow)?,
            dust,
        })
    }

    /// Total whole units paid out if the full `total_weight` claims at this rate.
    pub fn distributed(&self, total_weight: u64) -> Result<u64, LockedStakeError> {
        self.accrue(total_weight).map(|accrual| accrual.units)
    }
}

impl Accrual {
    pub fn checked_add(self, other: Self) -> Result<Self, LockedStakeError> {
        Ok(Self {
            units: self
                .units
                .checked_add(other.units)
                .ok_or(LockedStakeError::ArithmeticOverflow)?,
            dust: self
                .dust
                .checked_add(other.dust)
                .ok_or(LockedStakeError::ArithmeticOverflow)?,
        })
    }

    /// Fold carried dust in and promote every whole unit it adds up to.
    /// Returns the payable units and the dust left to carry.
    pub fn settle(self, carried_dust: u128) -> Result<(u64, u128), LockedStakeError> {
        let dust = self
            .dust
            .checked_add(carried_dust)
            .ok_or(LockedStakeError::ArithmeticOverflow)?;
        let promoted = u64::try_from(dust / DUST_PRECISION)
            .map_err(|_| LockedStakeError::ArithmeticOverflow)?;
        let units = self
            .units
            .checked_add(promoted)
            .ok_or(LockedStakeError::ArithmeticOverflow)?;
        Ok((units, dust % DUST_PRECISION))
    }
}
