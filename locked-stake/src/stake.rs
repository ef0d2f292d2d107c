//! Locked stake records.

use {
    crate::{
        constants::{BPS_DENOMINATOR, SECONDS_PER_DAY},
        error::LockedStakeError,
        multiplier::{MultiplierEntry, TokenClass},
        rate::{Accrual, Rate},
    },
    borsh::{BorshDeserialize, BorshSerialize},
    serde::{Deserialize, Serialize},
    solana_clock::UnixTimestamp,
};

pub type StakeId = u64;

/// Account that owns a stake.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct OwnerId(pub [u8; 32]);

/// Lifecycle of a stake.
///
/// ```text
///   Active ──(lock expires)──▶ Resolved ──redeem──▶ Redeemed
///     │  └────────────────redeem (after end)──────▶ Redeemed
///     └──early exit (before end)──▶ EarlyExited
/// ```
///
/// `Resolved` marks a matured lock that is still earning and claimable but
/// can no longer be upgraded or early-exited.  `Redeemed` and `EarlyExited`
/// are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum StakeState {
    Active,
    Resolved,
    EarlyExited,
    Redeemed,
}

impl StakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::EarlyExited | Self::Redeemed)
    }
}

/// A stake's contribution to round totals.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct EffectiveWeight {
    /// `amount × yield_multiplier_bps / 10_000`
    pub yield_weight: u64,
    /// `amount × emission_multiplier_bps / 10_000`
    pub emission_weight: u64,
}

impl EffectiveWeight {
    pub fn of(amount: u64, entry: &MultiplierEntry) -> Result<Self, LockedStakeError> {
        Ok(Self {
            yield_weight: apply_bps(amount, entry.yield_multiplier_bps)?,
            emission_weight: apply_bps(amount, entry.emission_multiplier_bps)?,
        })
    }
}

fn apply_bps(amount: u64, bps: u32) -> Result<u64, LockedStakeError> {
    let scaled = u128::from(amount) * u128::from(bps) / u128::from(BPS_DENOMINATOR);
    u64::try_from(scaled).map_err(|_| LockedStakeError::ArithmeticOverflow)
}

/// Weight in force from `from_round` until the next segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct WeightSegment {
    pub from_round: u64,
    pub weight: EffectiveWeight,
}

/// Rewards moved to the owner by one operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct ClaimedRewards {
    pub yield_amount: u64,
    pub emission_amount: u64,
}

impl ClaimedRewards {
    pub fn is_empty(&self) -> bool {
        self.yield_amount == 0 && self.emission_amount == 0
    }

    pub fn checked_add(self, other: Self) -> Result<Self, LockedStakeError> {
        Ok(Self {
            yield_amount: self
                .yield_amount
                .checked_add(other.yield_amount)
                .ok_or(LockedStakeError::ArithmeticOverflow)?,
            emission_amount: self
                .emission_amount
                .checked_add(other.emission_amount)
                .ok_or(LockedStakeError::ArithmeticOverflow)?,
        })
    }
}

/// Unsettled accrual over a span of resolved rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingAccrual {
    pub yield_accrual: Accrual,
    pub emission_accrual: Accrual,
    /// Last round covered, if any.
    pub through_round: Option<u64>,
}

/// One owner's locked position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LockedStake {
    pub id: StakeId,
    pub owner: OwnerId,
    pub token_class: TokenClass,

    /// Principal.  Drops to zero exactly once, on redemption or early exit.
    pub amount: u64,

    pub lock_duration_days: u64,
    pub stake_time: UnixTimestamp,
    /// `stake_time + lock_duration_days` days.
    pub end_time: UnixTimestamp,

    pub emission_multiplier_bps: u32,
    pub yield_multiplier_bps: u32,
    pub vote_multiplier_bps: u32,

    /// Bootstrap stakes are exempt from upgrades.
    pub is_genesis: bool,
    pub state: StakeState,

    /// First round this stake contributed weight to.
    pub first_round: u64,
    /// Round the weight was removed from; the stake earns nothing from it on.
    pub exit_round: Option<u64>,
    pub weight_history: Vec<WeightSegment>,

    pub last_claimed_round_index: Option<u64>,
    pub claimed_yield: u64,
    pub claimed_emission: u64,

    /// Sub-unit remainders carried to the next claim, in 10^-12 units.
    pub yield_dust: u128,
    pub emission_dust: u128,
}

impl LockedStake {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: StakeId,
        owner: OwnerId,
        token_class: TokenClass,
        amount: u64,
        entry: &MultiplierEntry,
        stake_time: UnixTimestamp,
        is_genesis: bool,
        first_round: u64,
    ) -> Result<Self, LockedStakeError> {
        if amount == 0 {
            return Err(LockedStakeError::InsufficientPrincipal);
        }
        let weight = EffectiveWeight::of(amount, entry)?;
        Ok(Self {
            id,
            owner,
            token_class,
            amount,
            lock_duration_days: entry.lock_duration_days,
            stake_time,
            end_time: lock_end(stake_time, entry.lock_duration_days)?,
            emission_multiplier_bps: entry.emission_multiplier_bps,
            yield_multiplier_bps: entry.yield_multiplier_bps,
            vote_multiplier_bps: entry.vote_multiplier_bps,
            is_genesis,
            state: StakeState::Active,
            first_round,
            exit_round: None,
            weight_history: vec![WeightSegment {
                from_round: first_round,
                weight,
            }],
            last_claimed_round_index: None,
            claimed_yield: 0,
            claimed_emission: 0,
            yield_dust: 0,
            emission_dust: 0,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn ensure_not_terminal(&self) -> Result<(), LockedStakeError> {
        if self.is_terminal() {
            return Err(LockedStakeError::StakeAlreadyTerminal { state: self.state });
        }
        Ok(())
    }

    pub fn is_lock_expired(&self, now: UnixTimestamp) -> bool {
        now >= self.end_time
    }

    /// Seconds until the lock expires, zero once it has.
    pub fn remaining_lock(&self, now: UnixTimestamp) -> i64 {
        self.end_time.saturating_sub(now).max(0)
    }

    pub fn lock_length_secs(&self) -> i64 {
        self.end_time.saturating_sub(self.stake_time)
    }

    /// Weight under the current multipliers.
    pub fn effective_weight(&self) -> Result<EffectiveWeight, LockedStakeError> {
        EffectiveWeight::of(self.amount, &self.multipliers())
    }

    pub fn multipliers(&self) -> MultiplierEntry {
        MultiplierEntry {
            lock_duration_days: self.lock_duration_days,
            emission_multiplier_bps: self.emission_multiplier_bps,
            yield_multiplier_bps: self.yield_multiplier_bps,
            vote_multiplier_bps: self.vote_multiplier_bps,
        }
    }

    /// Weight this stake held in `round`, or `None` if it was not part of it.
    pub fn weight_for_round(&self, round: u64) -> Option<EffectiveWeight> {
        if round < self.first_round || self.exit_round.is_some_and(|exit| round >= exit) {
            return None;
        }
        self.weight_history
            .iter()
            .rev()
            .find(|segment| segment.from_round <= round)
            .map(|segment| segment.weight)
    }

    /// First round not yet folded into the claimed totals.
    pub fn next_unclaimed_round(&self) -> u64 {
        self.last_claimed_round_index
            .map_or(self.first_round, |last| last.saturating_add(1))
            .max(self.first_round)
    }

    /// Accrual for a single resolved round.
    pub fn accrue(
        &self,
        round: u64,
        yield_rate: &Rate,
        emission_rate: &Rate,
    ) -> Result<(Accrual, Accrual), LockedStakeError> {
        match self.weight_for_round(round) {
            Some(weight) => Ok((
                yield_rate.accrue(weight.yield_weight)?,
                emission_rate.accrue(weight.emission_weight)?,
            )),
            None => Ok((Accrual::default(), Accrual::default())),
        }
    }

    /// Fold a pending accrual into the claimed totals, carrying sub-unit dust.
    pub fn credit(&mut self, pending: PendingAccrual) -> Result<ClaimedRewards, LockedStakeError> {
        let (yield_amount, yield_dust) = pending.yield_accrual.settle(self.yield_dust)?;
        let (emission_amount, emission_dust) =
            pending.emission_accrual.settle(self.emission_dust)?;
        let claimed_yield = self
            .claimed_yield
            .checked_add(yield_amount)
            .ok_or(LockedStakeError::ArithmeticOverflow)?;
        let claimed_emission = self
            .claimed_emission
            .checked_add(emission_amount)
            .ok_or(LockedStakeError::ArithmeticOverflow)?;

        self.claimed_yield = claimed_yield;
        self.claimed_emission = claimed_emission;
        self.yield_dust = yield_dust;
        self.emission_dust = emission_dust;
        if let Some(through) = pending.through_round {
            self.last_claimed_round_index = Some(
                self.last_claimed_round_index
                    .map_or(through, |last| last.max(through)),
            );
        }
        Ok(ClaimedRewards {
            yield_amount,
            emission_amount,
        })
    }

    /// Preview of what [`LockedStake::credit`] would pay, without mutating.
    pub fn preview(&self, pending: PendingAccrual) -> Result<ClaimedRewards, LockedStakeError> {
        self.clone().credit(pending)
    }

    /// Check that `new_duration_days` is a legal upgrade at `now`.
    pub fn check_upgrade(
        &self,
        now: UnixTimestamp,
        new_duration_days: u64,
    ) -> Result<(), LockedStakeError> {
        self.ensure_not_terminal()?;
        if self.is_genesis {
            return Err(LockedStakeError::GenesisStakeImmutable);
        }
        if self.state == StakeState::Resolved || self.is_lock_expired(now) {
            return Err(LockedStakeError::LockExpired);
        }
        if new_duration_days <= self.lock_duration_days {
            return Err(LockedStakeError::DurationMustIncrease {
                current: self.lock_duration_days,
                requested: new_duration_days,
            });
        }
        Ok(())
    }

    /// Re-pull multipliers for a longer lock, effective from `from_round`.
    /// The original `stake_time` is kept.
    pub fn apply_upgrade(
        &mut self,
        entry: &MultiplierEntry,
        from_round: u64,
    ) -> Result<EffectiveWeight, LockedStakeError> {
        let weight = EffectiveWeight::of(self.amount, entry)?;
        let end_time = lock_end(self.stake_time, entry.lock_duration_days)?;

        self.lock_duration_days = entry.lock_duration_days;
        self.end_time = end_time;
        self.emission_multiplier_bps = entry.emission_multiplier_bps;
        self.yield_multiplier_bps = entry.yield_multiplier_bps;
        self.vote_multiplier_bps = entry.vote_multiplier_bps;

        self.record_weight(from_round, weight);
        Ok(weight)
    }

    /// Record `weight` as this stake's contribution from `from_round` on.
    pub fn record_weight(&mut self, from_round: u64, weight: EffectiveWeight) {
        let segment = WeightSegment { from_round, weight };
        match self.weight_history.last_mut() {
            Some(last) if last.from_round == from_round => *last = segment,
            _ => self.weight_history.push(segment),
        }
    }

    pub fn check_redeem(&self, now: UnixTimestamp) -> Result<(), LockedStakeError> {
        self.ensure_not_terminal()?;
        if !self.is_lock_expired(now) {
            return Err(LockedStakeError::StakeStillLocked {
                remaining_secs: self.remaining_lock(now),
            });
        }
        Ok(())
    }

    pub fn check_early_exit(&self, now: UnixTimestamp) -> Result<(), LockedStakeError> {
        self.ensure_not_terminal()?;
        if self.state == StakeState::Resolved || self.is_lock_expired(now) {
            return Err(LockedStakeError::LockExpired);
        }
        Ok(())
    }

    /// Move an active stake whose lock has passed to `Resolved`.
    pub fn mature(&mut self, now: UnixTimestamp) -> bool {
        if self.state == StakeState::Active && self.is_lock_expired(now) {
            self.state = StakeState::Resolved;
            return true;
        }
        false
    }

    /// Release the principal and enter a terminal state.  Returns the
    /// principal that was held.
    pub fn close(
        &mut self,
        state: StakeState,
        exit_round: u64,
    ) -> Result<u64, LockedStakeError> {
        if !state.is_terminal() {
            return Err(LockedStakeError::invariant(format!(
                "close into non-terminal state {state:?}"
            )));
        }
        self.ensure_not_terminal()?;
        let principal = self.amount;
        self.amount = 0;
        self.state = state;
        self.exit_round = Some(exit_round);
        Ok(principal)
    }

    /// Governance weight: `amount × vote_multiplier_bps / 10_000` while the
    /// lock runs at `now`, zero once it expires or the stake leaves.
    pub fn voting_power(&self, now: UnixTimestamp) -> Result<u64, LockedStakeError> {
        if self.state != StakeState::Active || self.is_lock_expired(now) {
            return Ok(0);
        }
        apply_bps(self.amount, self.vote_multiplier_bps)
    }
}

fn lock_end(stake_time: UnixTimestamp, days: u64) -> Result<UnixTimestamp, LockedStakeError> {
    i64::try_from(days)
        .ok()
        .and_then(|days| days.checked_mul(SECONDS_PER_DAY))
        .and_then(|secs| stake_time.checked_add(secs))
        .ok_or(LockedStakeError::ArithmeticOverflow)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::multiplier::MultiplierTable,
        assert_matches::assert_matches,
    };

    const DAY: i64 = SECONDS_PER_DAY;

    fn entry(days: u64) -> MultiplierEntry {
        MultiplierTable::default()
            .lookup(TokenClass::Yield, days)
            .unwrap()
    }

    fn stake(amount: u64, days: u64) -> LockedStake {
        LockedStake::new(7, OwnerId([1; 32]), TokenClass::Yield, amount, &entry(days), 0, false, 3)
            .unwrap()
    }

    #[test]
    fn test_new_captures_multipliers() {
        let stake = stake(1_000, 90);
        assert_eq!(stake.end_time, 90 * DAY);
        assert_eq!(stake.yield_multiplier_bps, 12_000);
        assert_eq!(stake.state, StakeState::Active);
        assert_eq!(
            stake.effective_weight().unwrap(),
            EffectiveWeight {
                yield_weight: 1_200,
                emission_weight: 1_300,
            }
        );
        assert_eq!(stake.next_unclaimed_round(), 3);
    }

    #[test]
    fn test_zero_amount_rejected() {
        assert_eq!(
            LockedStake::new(1, OwnerId::default(), TokenClass::Yield, 0, &entry(0), 0, false, 0),
            Err(LockedStakeError::InsufficientPrincipal)
        );
    }

    #[test]
    fn test_weight_for_round_follows_history() {
        let mut stake = stake(1_000, 30);
        assert_eq!(stake.weight_for_round(2), None);
        assert_eq!(stake.weight_for_round(3).unwrap().yield_weight, 1_050);

        stake.apply_upgrade(&entry(90), 5).unwrap();
        assert_eq!(stake.weight_for_round(4).unwrap().yield_weight, 1_050);
        assert_eq!(stake.weight_for_round(5).unwrap().yield_weight, 1_200);
        assert_eq!(stake.weight_for_round(9).unwrap().yield_weight, 1_200);

        // A second upgrade in the same round replaces the segment.
        stake.apply_upgrade(&entry(180), 5).unwrap();
        assert_eq!(stake.weight_history.len(), 2);
        assert_eq!(stake.weight_for_round(5).unwrap().yield_weight, 1_350);
        assert_eq!(stake.end_time, 180 * DAY);

        // Sitting out rounds 6 and 7.
        stake.record_weight(6, EffectiveWeight::default());
        stake.record_weight(8, stake.effective_weight().unwrap());
        assert_eq!(stake.weight_for_round(7), Some(EffectiveWeight::default()));
        assert_eq!(stake.weight_for_round(8).unwrap().yield_weight, 1_350);

        stake.close(StakeState::EarlyExited, 9).unwrap();
        assert_eq!(stake.weight_for_round(8).unwrap().yield_weight, 1_350);
        assert_eq!(stake.weight_for_round(9), None);
    }

    #[test]
    fn test_check_upgrade() {
        let stake = stake(1_000, 90);
        assert_eq!(stake.check_upgrade(DAY, 180), Ok(()));
        assert_eq!(
            stake.check_upgrade(DAY, 60),
            Err(LockedStakeError::DurationMustIncrease {
                current: 90,
                requested: 60,
            })
        );
        assert_matches!(
            stake.check_upgrade(DAY, 90),
            Err(LockedStakeError::DurationMustIncrease { .. })
        );
        assert_eq!(stake.check_upgrade(90 * DAY, 180), Err(LockedStakeError::LockExpired));

        let mut genesis = stake.clone();
        genesis.is_genesis = true;
        assert_eq!(
            genesis.check_upgrade(DAY, 180),
            Err(LockedStakeError::GenesisStakeImmutable)
        );
    }

    #[test]
    fn test_check_redeem_and_early_exit() {
        let mut stake = stake(1_000, 30);
        assert_eq!(
            stake.check_redeem(10 * DAY),
            Err(LockedStakeError::StakeStillLocked {
                remaining_secs: 20 * DAY,
            })
        );
        assert_eq!(stake.check_early_exit(10 * DAY), Ok(()));
        assert_eq!(stake.check_redeem(30 * DAY), Ok(()));
        assert_eq!(stake.check_early_exit(30 * DAY), Err(LockedStakeError::LockExpired));

        assert!(stake.mature(30 * DAY));
        assert!(!stake.mature(31 * DAY));
        assert_eq!(stake.state, StakeState::Resolved);
        assert_eq!(stake.check_redeem(30 * DAY), Ok(()));

        assert_eq!(stake.close(StakeState::Redeemed, 6).unwrap(), 1_000);
        assert_eq!(stake.amount, 0);
        assert_eq!(
            stake.check_redeem(40 * DAY),
            Err(LockedStakeError::StakeAlreadyTerminal {
                state: StakeState::Redeemed,
            })
        );
        assert_matches!(
            stake.close(StakeState::EarlyExited, 7),
            Err(LockedStakeError::StakeAlreadyTerminal { .. })
        );
    }

    #[test]
    fn test_credit_carries_dust_and_is_monotonic() {
        let mut stake = stake(1_000, 90);
        let rate = Rate::new(100, 1_700);
        let (yield_accrual, emission_accrual) = stake.accrue(3, &rate, &Rate::ZERO).unwrap();
        let paid = stake
            .credit(PendingAccrual {
                yield_accrual,
                emission_accrual,
                through_round: Some(3),
            })
            .unwrap();
        assert_eq!(paid.yield_amount, 70);
        assert_eq!(stake.yield_dust, 588_235_294_117);
        assert_eq!(stake.last_claimed_round_index, Some(3));

        // Same accrual again: dust crosses a whole unit.
        let paid = stake
            .credit(PendingAccrual {
                yield_accrual,
                emission_accrual,
                through_round: Some(4),
            })
            .unwrap();
        assert_eq!(paid.yield_amount, 71);
        assert_eq!(stake.claimed_yield, 141);
        assert_eq!(stake.yield_dust, 176_470_588_234);

        // Empty credit changes nothing.
        let before = stake.clone();
        assert!(stake.credit(PendingAccrual::default()).unwrap().is_empty());
        assert_eq!(stake, before);
    }

    #[test]
    fn test_voting_power() {
        let mut stake = stake(1_000, 360);
        assert_eq!(stake.voting_power(DAY).unwrap(), 2_000);
        assert_eq!(stake.voting_power(360 * DAY - 1).unwrap(), 2_000);
        // Expiry alone removes the vote, matured or not.
        assert_eq!(stake.voting_power(360 * DAY).unwrap(), 0);
        stake.mature(360 * DAY);
        assert_eq!(stake.voting_power(DAY).unwrap(), 0);
    }

    #[test]
    fn test_borsh_roundtrip() {
        let mut stake = stake(5_000, 180);
        stake.apply_upgrade(&entry(360), 4).unwrap();
        let bytes = borsh::to_vec(&stake).unwrap();
        let decoded: LockedStake = borsh::from_slice(&bytes).unwrap();
        assert_eq!(stake, decoded);
    }
}
