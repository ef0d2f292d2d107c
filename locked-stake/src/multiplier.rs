//! Lock-duration multipliers.
//!
//! Each token class supports a fixed set of lock durations.  A duration maps
//! to three multipliers, all in basis points of the unlocked baseline:
//!
//! | Axis     | Used for                                   |
//! |----------|--------------------------------------------|
//! | emission | share of emission-token rewards            |
//! | yield    | share of yield-token rewards               |
//! | vote     | governance voting weight                   |

use {
    crate::{
        constants::{BPS_DENOMINATOR, GOVERNANCE_TOKEN_TIERS, YIELD_TOKEN_TIERS},
        error::LockedStakeError,
    },
    borsh::{BorshDeserialize, BorshSerialize},
    serde::{Deserialize, Serialize},
};

/// Which token a stake is denominated in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum TokenClass {
    /// Yield-bearing token.
    Yield,
    /// Governance / emission token.
    Governance,
}

/// Multipliers captured by a stake at creation (or upgrade).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct MultiplierEntry {
    pub lock_duration_days: u64,
    pub emission_multiplier_bps: u32,
    pub yield_multiplier_bps: u32,
    pub vote_multiplier_bps: u32,
}

impl MultiplierEntry {
    const fn from_tier(tier: (u64, u32, u32, u32)) -> Self {
        Self {
            lock_duration_days: tier.0,
            emission_multiplier_bps: tier.1,
            yield_multiplier_bps: tier.2,
            vote_multiplier_bps: tier.3,
        }
    }
}

/// Supported lock tiers per token class, sorted by duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MultiplierTable {
    pub yield_token: Vec<MultiplierEntry>,
    pub governance_token: Vec<MultiplierEntry>,
}

impl MultiplierTable {
    /// Look up the multipliers for `lock_duration_days`.
    ///
    /// Fails with `InvalidDuration` unless the duration is one of the class's
    /// enumerated tiers.
    pub fn lookup(
        &self,
        token_class: TokenClass,
        lock_duration_days: u64,
    ) -> Result<MultiplierEntry, LockedStakeError> {
        self.entries(token_class)
            .iter()
            .find(|entry| entry.lock_duration_days == lock_duration_days)
            .copied()
            .ok_or(LockedStakeError::InvalidDuration {
                token_class,
                lock_duration_days,
            })
    }

    pub fn entries(&self, token_class: TokenClass) -> &[MultiplierEntry] {
        match token_class {
            TokenClass::Yield => &self.yield_token,
            TokenClass::Governance => &self.governance_token,
        }
    }

    /// Supported durations for a token class, ascending.
    pub fn supported_durations(&self, token_class: TokenClass) -> Vec<u64> {
        self.entries(token_class)
            .iter()
            .map(|entry| entry.lock_duration_days)
            .collect()
    }

    /// Check the table invariants for both token classes:
    ///
    /// * at least one tier, strictly ascending durations;
    /// * all three multipliers non-decreasing with duration;
    /// * a 0-day tier carries a 1× vote multiplier (and, by monotonicity,
    ///   the minimum emission and yield multipliers).
    pub fn validate(&self) -> Result<(), LockedStakeError> {
        for token_class in [TokenClass::Yield, TokenClass::Governance] {
            let entries = self.entries(token_class);
            if entries.is_empty() {
                return Err(LockedStakeError::InvalidConfig {
                    reason: format!("{token_class:?} table has no tiers"),
                });
            }
            for pair in entries.windows(2) {
                let (lower, upper) = (&pair[0], &pair[1]);
                if upper.lock_duration_days <= lower.lock_duration_days {
                    return Err(LockedStakeError::InvalidConfig {
                        reason: format!(
                            "{token_class:?} tiers must be strictly ascending ({} then {})",
                            lower.lock_duration_days, upper.lock_duration_days
                        ),
                    });
                }
                if upper.emission_multiplier_bps < lower.emission_multiplier_bps
                    || upper.yield_multiplier_bps < lower.yield_multiplier_bps
                    || upper.vote_multiplier_bps < lower.vote_multiplier_bps
                {
                    return Err(LockedStakeError::InvalidConfig {
                        reason: format!(
                            "{token_class:?} multipliers decrease between {} and {} days",
                            lower.lock_duration_days, upper.lock_duration_days
                        ),
                    });
                }
            }
            if let Some(unlocked) = entries.iter().find(|entry| entry.lock_duration_days == 0) {
                if u64::from(unlocked.vote_multiplier_bps) != BPS_DENOMINATOR {
                    return Err(LockedStakeError::InvalidConfig {
                        reason: format!(
                            "{token_class:?} 0-day vote multiplier must be {BPS_DENOMINATOR} bps"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for MultiplierTable {
    fn default() -> Self {
        Self {
            yield_token: YIELD_TOKEN_TIERS
                .iter()
                .copied()
                .map(MultiplierEntry::from_tier)
                .collect(),
            governance_token: GOVERNANCE_TOKEN_TIERS
                .iter()
                .copied()
                .map(MultiplierEntry::from_tier)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches, test_case::test_case};

    #[test]
    fn test_default_table_is_valid() {
        assert_eq!(MultiplierTable::default().validate(), Ok(()));
    }

    #[test_case(TokenClass::Yield, 0, 10_000, 10_000, 10_000; "yield unlocked")]
    #[test_case(TokenClass::Yield, 90, 13_000, 12_000, 13_000; "yield 90 days")]
    #[test_case(TokenClass::Yield, 720, 30_000, 17_500, 30_000; "yield 720 days")]
    #[test_case(TokenClass::Governance, 30, 12_000, 10_000, 12_500; "governance 30 days")]
    #[test_case(TokenClass::Governance, 360, 30_000, 10_000, 30_000; "governance 360 days")]
    fn test_lookup(token_class: TokenClass, days: u64, emission: u32, yield_bps: u32, vote: u32) {
        let entry = MultiplierTable::default().lookup(token_class, days).unwrap();
        assert_eq!(entry.lock_duration_days, days);
        assert_eq!(entry.emission_multiplier_bps, emission);
        assert_eq!(entry.yield_multiplier_bps, yield_bps);
        assert_eq!(entry.vote_multiplier_bps, vote);
    }

    #[test_case(TokenClass::Yield, 45)]
    #[test_case(TokenClass::Yield, u64::MAX)]
    #[test_case(TokenClass::Governance, 0; "governance has no unlocked tier")]
    #[test_case(TokenClass::Governance, 720)]
    fn test_lookup_rejects_unsupported_duration(token_class: TokenClass, days: u64) {
        assert_eq!(
            MultiplierTable::default().lookup(token_class, days),
            Err(LockedStakeError::InvalidDuration {
                token_class,
                lock_duration_days: days,
            })
        );
    }

    #[test]
    fn test_supported_durations() {
        let table = MultiplierTable::default();
        assert_eq!(
            table.supported_durations(TokenClass::Yield),
            vec![0, 30, 60, 90, 180, 360, 720]
        );
        assert_eq!(
            table.supported_durations(TokenClass::Governance),
            vec![30, 90, 180, 360]
        );
    }

    #[test]
    fn test_validate_rejects_decreasing_multiplier() {
        let mut table = MultiplierTable::default();
        table.yield_token[3].yield_multiplier_bps = 10_000;
        assert_matches!(table.validate(), Err(LockedStakeError::InvalidConfig { reason })
            if reason.contains("decrease"));
    }

    #[test]
    fn test_validate_rejects_unsorted_durations() {
        let mut table = MultiplierTable::default();
        table.governance_token.swap(0, 1);
        assert_matches!(table.validate(), Err(LockedStakeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validate_rejects_boosted_unlocked_vote() {
        let mut table = MultiplierTable::default();
        table.yield_token[0].vote_multiplier_bps = 10_500;
        table.yield_token[1].vote_multiplier_bps = 10_500;
        assert_matches!(table.validate(), Err(LockedStakeError::InvalidConfig { reason })
            if reason.contains("0-day"));
    }

    #[test]
    fn test_validate_rejects_empty_class() {
        let table = MultiplierTable {
            governance_token: vec![],
            ..Default::default()
        };
        assert_matches!(table.validate(), Err(LockedStakeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_serde_roundtrip() {
        let table = MultiplierTable::default();
        let json = serde_json::to_string(&table).unwrap();
        let decoded: MultiplierTable = serde_json::from_str(&json).unwrap();
        assert_eq!(table, decoded);
    }
}
