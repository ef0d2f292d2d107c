use {
    crate::{
        constants::{BPS_DENOMINATOR, DEFAULT_BASE_PENALTY_BPS, DEFAULT_ROUND_LENGTH_SECS},
        error::LockedStakeError,
    },
    borsh::{BorshDeserialize, BorshSerialize},
    serde::{Deserialize, Serialize},
};

/// Tunables for a [`RewardLedger`](crate::ledger::RewardLedger).
///
/// Lock tiers live in [`MultiplierTable`](crate::multiplier::MultiplierTable);
/// this struct holds everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LedgerConfig {
    /// Length of one accrual round in seconds.
    /// Rounds are back-to-back: round `n` starts at `genesis + n × length`.
    pub round_length_secs: u64,

    /// Early-exit behaviour for stakes that are still locked.
    pub early_exit: EarlyExitConfig,
}

/// Early-exit parameters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct EarlyExitConfig {
    /// When `false`, locked stakes can only leave through redemption.
    pub enabled: bool,

    /// Penalty in basis points of principal for exiting at the very start of
    /// the lock.  Scales linearly with the remaining lock fraction.
    pub base_penalty_bps: u16,
}

impl LedgerConfig {
    /// Round length as a signed duration, matching `UnixTimestamp` arithmetic.
    pub fn round_length(&self) -> Result<i64, LockedStakeError> {
        i64::try_from(self.round_length_secs).map_err(|_| LockedStakeError::ArithmeticOverflow)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), LockedStakeError> {
        if self.round_length_secs == 0 {
            return Err(LockedStakeError::InvalidConfig {
                reason: "round_length_secs must be > 0".to_string(),
            });
        }
        self.round_length()?;
        if u64::from(self.early_exit.base_penalty_bps) > BPS_DENOMINATOR {
            return Err(LockedStakeError::InvalidConfig {
                reason: format!(
                    "base_penalty_bps ({}) must be at most {}",
                    self.early_exit.base_penalty_bps, BPS_DENOMINATOR
                ),
            });
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            round_length_secs: DEFAULT_ROUND_LENGTH_SECS, // weekly rounds
            early_exit: EarlyExitConfig::default(),
        }
    }
}

impl Default for EarlyExitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_penalty_bps: DEFAULT_BASE_PENALTY_BPS, // 10% at full lock
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_default_config() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.round_length_secs, 604_800);
        assert!(cfg.early_exit.enabled);
        assert_eq!(cfg.early_exit.base_penalty_bps, 1_000);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_zero_round_length_rejected() {
        let cfg = LedgerConfig {
            round_length_secs: 0,
            ..Default::default()
        };
        assert_matches!(cfg.validate(), Err(LockedStakeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_round_length_out_of_range_rejected() {
        let cfg = LedgerConfig {
            round_length_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(LockedStakeError::ArithmeticOverflow));
    }

    #[test]
    fn test_penalty_above_principal_rejected() {
        let cfg = LedgerConfig {
            early_exit: EarlyExitConfig {
                enabled: true,
                base_penalty_bps: 10_001,
            },
            ..Default::default()
        };
        assert_matches!(cfg.validate(), Err(LockedStakeError::InvalidConfig { reason })
            if reason.contains("10001"));
    }

    #[test]
    fn test_borsh_roundtrip() {
        let cfg = LedgerConfig::default();
        let bytes = borsh::to_vec(&cfg).unwrap();
        let decoded: LedgerConfig = borsh::from_slice(&bytes).unwrap();
        assert_eq!(cfg, decoded);
    }

    #[test]
    fn test_serde_roundtrip() {
        let cfg = LedgerConfig {
            round_length_secs: 86_400,
            early_exit: EarlyExitConfig {
                enabled: false,
                base_penalty_bps: 2_500,
            },
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let decoded: LedgerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, decoded);
    }
}
