//! Redemption policy and early-exit penalties.

use {
    crate::{
        config::EarlyExitConfig,
        constants::BPS_DENOMINATOR,
        error::LockedStakeError,
        stake::{LockedStake, StakeState},
    },
    solana_clock::UnixTimestamp,
    std::{fmt, sync::Arc},
};

/// Protocol-defined early-exit penalty.
///
/// Implementations must be monotonic non-increasing as `remaining_secs`
/// shrinks, return zero once nothing remains, and never exceed `amount`.
pub trait EarlyExitPenalty: fmt::Debug + Send + Sync {
    fn penalty(
        &self,
        amount: u64,
        remaining_secs: i64,
        lock_secs: i64,
    ) -> Result<u64, LockedStakeError>;
}

/// `amount × base_penalty_bps × remaining / (10_000 × lock)`, rounded down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearPenalty {
    pub base_penalty_bps: u16,
}

impl EarlyExitPenalty for LinearPenalty {
    fn penalty(
        &self,
        amount: u64,
        remaining_secs: i64,
        lock_secs: i64,
    ) -> Result<u64, LockedStakeError> {
        if remaining_secs <= 0 || lock_secs <= 0 {
            return Ok(0);
        }
        let remaining = remaining_secs.min(lock_secs) as u128;
        let numerator = u128::from(amount)
            .checked_mul(u128::from(self.base_penalty_bps))
            .and_then(|n| n.checked_mul(remaining))
            .ok_or(LockedStakeError::ArithmeticOverflow)?;
        let denominator = u128::from(BPS_DENOMINATOR)
            .checked_mul(lock_secs as u128)
            .ok_or(LockedStakeError::ArithmeticOverflow)?;
        let penalty = u64::try_from(numerator / denominator)
            .map_err(|_| LockedStakeError::ArithmeticOverflow)?;
        Ok(penalty.min(amount))
    }
}

/// Which exit a stake may take right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// Still locked and early exit is not offered.
    Locked { remaining_secs: i64 },
    /// Lock expired: full principal is redeemable.
    Redeemable,
    /// Still locked; exiting now forfeits `penalty` of the principal.
    EarlyExitAvailable { penalty: u64, remaining_secs: i64 },
    /// Already redeemed or early-exited.
    Closed { state: StakeState },
}

/// Decides the legal exit for a stake.  The stake operations re-check the
/// same rules, so a stale classification can never force an illegal exit.
#[derive(Debug, Clone)]
pub struct RedemptionPolicy {
    early_exit_enabled: bool,
    penalty: Arc<dyn EarlyExitPenalty>,
}

impl RedemptionPolicy {
    pub fn new(config: &EarlyExitConfig) -> Self {
        Self::with_penalty(
            config.enabled,
            Arc::new(LinearPenalty {
                base_penalty_bps: config.base_penalty_bps,
            }),
        )
    }

    pub fn with_penalty(early_exit_enabled: bool, penalty: Arc<dyn EarlyExitPenalty>) -> Self {
        Self {
            early_exit_enabled,
            penalty,
        }
    }

    pub fn early_exit_enabled(&self) -> bool {
        self.early_exit_enabled
    }

    pub fn classify(
        &self,
        stake: &LockedStake,
        now: UnixTimestamp,
    ) -> Result<Redemption, LockedStakeError> {
        if stake.is_terminal() {
            return Ok(Redemption::Closed { state: stake.state });
        }
        if stake.state == StakeState::Resolved || stake.is_lock_expired(now) {
            return Ok(Redemption::Redeemable);
        }
        let remaining_secs = stake.remaining_lock(now);
        if !self.early_exit_enabled {
            return Ok(Redemption::Locked { remaining_secs });
        }
        Ok(Redemption::EarlyExitAvailable {
            penalty: self.penalty_at(stake, now)?,
            remaining_secs,
        })
    }

    /// Penalty for exiting `stake` at `now`; fails if early exit is off.
    pub fn penalty_at(
        &self,
        stake: &LockedStake,
        now: UnixTimestamp,
    ) -> Result<u64, LockedStakeError> {
        if !self.early_exit_enabled {
            return Err(LockedStakeError::EarlyExitUnavailable);
        }
        let penalty = self.penalty.penalty(
            stake.amount,
            stake.remaining_lock(now),
            stake.lock_length_secs(),
        )?;
        if penalty > stake.amount {
            return Err(LockedStakeError::invariant(format!(
                "penalty {penalty} exceeds principal {}",
                stake.amount
            )));
        }
        Ok(penalty)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            constants::SECONDS_PER_DAY,
            multiplier::{MultiplierTable, TokenClass},
            stake::OwnerId,
        },
        assert_matches::assert_matches,
        test_case::test_case,
    };

    const DAY: i64 = SECONDS_PER_DAY;

    fn stake(days: u64) -> LockedStake {
        let entry = MultiplierTable::default()
            .lookup(TokenClass::Yield, days)
            .unwrap();
        LockedStake::new(1, OwnerId([9; 32]), TokenClass::Yield, 1_000, &entry, 0, false, 0)
            .unwrap()
    }

    fn policy() -> RedemptionPolicy {
        RedemptionPolicy::new(&EarlyExitConfig::default())
    }

    #[test]
    fn test_early_exit_at_day_300_of_360() {
        // 1000 × 10% × 60/360 = 16.67 → 16
        let classification = policy().classify(&stake(360), 300 * DAY).unwrap();
        assert_eq!(
            classification,
            Redemption::EarlyExitAvailable {
                penalty: 16,
                remaining_secs: 60 * DAY,
            }
        );
    }

    #[test_case(0, 100; "at stake time")]
    #[test_case(180, 50; "half way")]
    #[test_case(359, 0; "last day")]
    fn test_linear_penalty_schedule(day: i64, expected: u64) {
        let penalty = policy().penalty_at(&stake(360), day * DAY).unwrap();
        assert_eq!(penalty, expected);
    }

    #[test]
    fn test_penalty_is_non_increasing() {
        let stake = stake(360);
        let policy = policy();
        let mut previous = u64::MAX;
        for hour in 0..(360 * 24) {
            let penalty = policy.penalty_at(&stake, hour * 3_600).unwrap();
            assert!(penalty <= previous, "penalty rose at hour {hour}");
            previous = penalty;
        }
        assert_eq!(policy.penalty_at(&stake, 360 * DAY).unwrap(), 0);
    }

    #[test]
    fn test_expired_lock_is_redeemable() {
        assert_eq!(
            policy().classify(&stake(30), 30 * DAY).unwrap(),
            Redemption::Redeemable
        );
        // Unlocked tier is redeemable immediately.
        assert_eq!(policy().classify(&stake(0), 0).unwrap(), Redemption::Redeemable);
    }

    #[test]
    fn test_disabled_early_exit_reports_locked() {
        let policy = RedemptionPolicy::new(&EarlyExitConfig {
            enabled: false,
            ..EarlyExitConfig::default()
        });
        assert_eq!(
            policy.classify(&stake(90), 10 * DAY).unwrap(),
            Redemption::Locked {
                remaining_secs: 80 * DAY,
            }
        );
        assert_eq!(
            policy.penalty_at(&stake(90), 10 * DAY),
            Err(LockedStakeError::EarlyExitUnavailable)
        );
    }

    #[test]
    fn test_terminal_stake_is_closed() {
        let mut stake = stake(90);
        stake.close(StakeState::EarlyExited, 0).unwrap();
        assert_matches!(
            policy().classify(&stake, DAY).unwrap(),
            Redemption::Closed {
                state: StakeState::EarlyExited
            }
        );
    }

    #[derive(Debug)]
    struct Confiscate;

    impl EarlyExitPenalty for Confiscate {
        fn penalty(&self, amount: u64, _: i64, _: i64) -> Result<u64, LockedStakeError> {
            Ok(amount.saturating_add(1))
        }
    }

    #[test]
    fn test_custom_penalty_cannot_exceed_principal() {
        let policy = RedemptionPolicy::with_penalty(true, Arc::new(Confiscate));
        assert_matches!(
            policy.penalty_at(&stake(90), DAY),
            Err(LockedStakeError::InvariantViolation { .. })
        );
    }
}
