//! Accrual rounds.
//!
//! A round is a fixed window `[start_time, end_time)` during which deposited
//! rewards accumulate against the total effective weight of active stakes.
//! Once the window has elapsed the round is resolved exactly once: its totals
//! are frozen and turned into exact payout [`Rate`]s.
//!
//! # Concurrency
//!
//! Totals are plain atomics updated with `fetch_update`, so stakes on
//! different owners never serialize on a lock.  The `phase` word packs a
//! count of in-flight writers with two flags:
//!
//! ```text
//!   bit 63  CLOSING   a resolver has won the compare-and-set
//!   bit 62  RESOLVED  rates are published
//!   0..62   writers   sessions currently adjusting totals
//! ```
//!
//! Writers may only enter while neither flag is set.  The resolver sets
//! `CLOSING` with a compare-and-set, waits for the writer count to drain,
//! reads the totals once and publishes the rates.  Any other resolver that
//! loses the race waits for `RESOLVED` and observes the same result.  A
//! writer turned away from a closing round retries against the next one.

use {
    crate::{error::LockedStakeError, rate::Rate, stake::EffectiveWeight},
    borsh::{BorshDeserialize, BorshSerialize},
    log::*,
    serde::{Deserialize, Serialize},
    solana_clock::UnixTimestamp,
    std::{
        hint,
        sync::{
            atomic::{AtomicU64, Ordering},
            OnceLock,
        },
    },
};

const CLOSING: u64 = 1 << 63;
const RESOLVED: u64 = 1 << 62;
const WRITERS: u64 = RESOLVED - 1;

/// Running (or frozen) sums for one round.
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
pub struct RoundTotals {
    /// Sum of yield-weighted effective stake.
    pub total_effective_stake: u64,
    /// Sum of emission-weighted effective stake.
    pub total_effective_stake_emission_weighted: u64,
    pub rewards_deposited: u64,
    pub emission_rewards_deposited: u64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct RoundHeader {
    pub index: u64,
    pub start_time: UnixTimestamp,
    pub end_time: UnixTimestamp,
}

/// Point-in-time view of a round.  Rates only exist on resolved rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum RoundView {
    Open {
        header: RoundHeader,
        totals: RoundTotals,
        /// Bumped by every write session; orders snapshots of the same round.
        revision: u64,
    },
    Resolved {
        header: RoundHeader,
        totals: RoundTotals,
        yield_rate: Rate,
        emission_rate: Rate,
    },
}

impl RoundView {
    pub fn header(&self) -> &RoundHeader {
        match self {
            Self::Open { header, .. } | Self::Resolved { header, .. } => header,
        }
    }

    pub fn index(&self) -> u64 {
        self.header().index
    }

    pub fn totals(&self) -> &RoundTotals {
        match self {
            Self::Open { totals, .. } | Self::Resolved { totals, .. } => totals,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    /// Yield rewards no stake can ever claim from this round.  Non-zero only
    /// when rewards were deposited while nothing was staked.
    pub fn undistributed_yield(&self) -> Result<u64, LockedStakeError> {
        match self {
            Self::Open { .. } => Ok(0),
            Self::Resolved {
                totals, yield_rate, ..
            } => undistributed(
                totals.rewards_deposited,
                yield_rate,
                totals.total_effective_stake,
            ),
        }
    }

    /// Emission analogue of [`RoundView::undistributed_yield`].
    pub fn undistributed_emission(&self) -> Result<u64, LockedStakeError> {
        match self {
            Self::Open { .. } => Ok(0),
            Self::Resolved {
                totals,
                emission_rate,
                ..
            } => undistributed(
                totals.emission_rewards_deposited,
                emission_rate,
                totals.total_effective_stake_emission_weighted,
            ),
        }
    }
}

fn undistributed(deposited: u64, rate: &Rate, total_weight: u64) -> Result<u64, LockedStakeError> {
    deposited
        .checked_sub(rate.distributed(total_weight)?)
        .ok_or_else(|| LockedStakeError::invariant("round distributes more than was deposited"))
}

#[derive(Debug, Clone, Copy)]
struct Resolution {
    totals: RoundTotals,
    yield_rate: Rate,
    emission_rate: Rate,
}

/// One accrual round, shared by every stake active during its window.
#[derive(Debug)]
pub struct StakeRound {
    header: RoundHeader,
    phase: AtomicU64,
    revision: AtomicU64,
    total_effective_stake: AtomicU64,
    total_effective_stake_emission_weighted: AtomicU64,
    rewards_deposited: AtomicU64,
    emission_rewards_deposited: AtomicU64,
    resolution: OnceLock<Resolution>,
}

/// Registration of an in-flight writer; leaving bumps the revision.
struct WriteSession<'a> {
    round: &'a StakeRound,
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        self.round.revision.fetch_add(1, Ordering::SeqCst);
        self.round.phase.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StakeRound {
    /// Open a round with `carried` weight already staked and no deposits.
    pub fn open(
        index: u64,
        start_time: UnixTimestamp,
        length_secs: i64,
        carried: EffectiveWeight,
    ) -> Result<Self, LockedStakeError> {
        let end_time = start_time
            .checked_add(length_secs)
            .ok_or(LockedStakeError::ArithmeticOverflow)?;
        Ok(Self::with_state(
            RoundHeader {
                index,
                start_time,
                end_time,
            },
            RoundTotals {
                total_effective_stake: carried.yield_weight,
                total_effective_stake_emission_weighted: carried.emission_weight,
                ..RoundTotals::default()
            },
            0,
            None,
        ))
    }

    /// Rebuild a round from a persisted view.
    pub fn from_view(view: &RoundView) -> Self {
        match view {
            RoundView::Open {
                header,
                totals,
                revision,
            } => Self::with_state(*header, *totals, *revision, None),
            RoundView::Resolved {
                header,
                totals,
                yield_rate,
                emission_rate,
            } => Self::with_state(
                *header,
                *totals,
                0,
                Some(Resolution {
                    totals: *totals,
                    yield_rate: *yield_rate,
                    emission_rate: *emission_rate,
                }),
            ),
        }
    }

    fn with_state(
        header: RoundHeader,
        totals: RoundTotals,
        revision: u64,
        resolution: Option<Resolution>,
    ) -> Self {
        let phase = if resolution.is_some() { RESOLVED } else { 0 };
        let cell = OnceLock::new();
        if let Some(resolution) = resolution {
            let _ = cell.set(resolution);
        }
        Self {
            header,
            phase: AtomicU64::new(phase),
            revision: AtomicU64::new(revision),
            total_effective_stake: AtomicU64::new(totals.total_effective_stake),
            total_effective_stake_emission_weighted: AtomicU64::new(
                totals.total_effective_stake_emission_weighted,
            ),
            rewards_deposited: AtomicU64::new(totals.rewards_deposited),
            emission_rewards_deposited: AtomicU64::new(totals.emission_rewards_deposited),
            resolution: cell,
        }
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn header(&self) -> &RoundHeader {
        &self.header
    }

    pub fn end_time(&self) -> UnixTimestamp {
        self.header.end_time
    }

    pub fn has_elapsed(&self, now: UnixTimestamp) -> bool {
        now >= self.header.end_time
    }

    /// `true` until a resolver has started closing the round.
    pub fn is_open(&self) -> bool {
        self.phase.load(Ordering::SeqCst) & (CLOSING | RESOLVED) == 0
    }

    pub fn is_resolved(&self) -> bool {
        self.phase.load(Ordering::SeqCst) & RESOLVED != 0
    }

    /// Exact rates, once resolved.
    pub fn rates(&self) -> Option<(Rate, Rate)> {
        if !self.is_resolved() {
            return None;
        }
        self.resolution
            .get()
            .map(|resolution| (resolution.yield_rate, resolution.emission_rate))
    }

    /// Add a stake's weight.  `Ok(false)` means the round is closing and
    /// nothing was changed; the caller must use the next round.
    pub fn add_effective_stake(&self, weight: EffectiveWeight) -> Result<bool, LockedStakeError> {
        self.adjust_stake(EffectiveWeight::default(), weight)
    }

    /// Remove a stake's weight.  Same `Ok(false)` contract as
    /// [`StakeRound::add_effective_stake`].
    pub fn remove_effective_stake(
        &self,
        weight: EffectiveWeight,
    ) -> Result<bool, LockedStakeError> {
        self.adjust_stake(weight, EffectiveWeight::default())
    }

    /// Swap `old` for `new` in a single write session (lock upgrades).
    pub fn replace_effective_stake(
        &self,
        old: EffectiveWeight,
        new: EffectiveWeight,
    ) -> Result<bool, LockedStakeError> {
        self.adjust_stake(old, new)
    }

    /// Credit rewards to this round.  `Ok(false)` if the round is closing.
    pub fn deposit_rewards(
        &self,
        yield_amount: u64,
        emission_amount: u64,
    ) -> Result<bool, LockedStakeError> {
        let Some(_session) = self.enter() else {
            return Ok(false);
        };
        adjust(&self.rewards_deposited, 0, yield_amount)?;
        if let Err(err) = adjust(&self.emission_rewards_deposited, 0, emission_amount) {
            revert(&self.rewards_deposited, yield_amount, 0);
            return Err(err);
        }
        Ok(true)
    }

    fn adjust_stake(
        &self,
        remove: EffectiveWeight,
        add: EffectiveWeight,
    ) -> Result<bool, LockedStakeError> {
        let Some(_session) = self.enter() else {
            return Ok(false);
        };
        adjust(
            &self.total_effective_stake,
            remove.yield_weight,
            add.yield_weight,
        )?;
        if let Err(err) = adjust(
            &self.total_effective_stake_emission_weighted,
            remove.emission_weight,
            add.emission_weight,
        ) {
            revert(
                &self.total_effective_stake,
                add.yield_weight,
                remove.yield_weight,
            );
            return Err(err);
        }
        Ok(true)
    }

    fn enter(&self) -> Option<WriteSession<'_>> {
        self.phase
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |phase| {
                (phase & (CLOSING | RESOLVED) == 0).then(|| phase.saturating_add(1))
            })
            .ok()
            .map(|_| WriteSession { round: self })
    }

    /// Resolve the round.  Idempotent: every caller, concurrent or later,
    /// receives the same frozen totals and rates.
    pub fn resolve(&self, now: UnixTimestamp) -> Result<RoundView, LockedStakeError> {
        if !self.is_resolved() && !self.has_elapsed(now) {
            return Err(LockedStakeError::RoundNotYetClosed {
                round: self.header.index,
                closes_at: self.header.end_time,
            });
        }

        let mut phase = self.phase.load(Ordering::SeqCst);
        loop {
            if phase & (CLOSING | RESOLVED) != 0 {
                // Somebody else won; their result is ours.
                self.wait_resolved();
                return Ok(self.view());
            }
            match self.phase.compare_exchange_weak(
                phase,
                phase | CLOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => phase = actual,
            }
        }

        while self.phase.load(Ordering::SeqCst) & WRITERS != 0 {
            hint::spin_loop();
        }

        let totals = self.read_totals();
        let resolution = *self.resolution.get_or_init(|| Resolution {
            totals,
            yield_rate: Rate::new(totals.rewards_deposited, totals.total_effective_stake),
            emission_rate: Rate::new(
                totals.emission_rewards_deposited,
                totals.total_effective_stake_emission_weighted,
            ),
        });
        self.phase.fetch_or(RESOLVED, Ordering::SeqCst);

        debug!(
            "round {} resolved: yield {}/{} emission {}/{}",
            self.header.index,
            resolution.yield_rate.numerator,
            resolution.yield_rate.denominator,
            resolution.emission_rate.numerator,
            resolution.emission_rate.denominator,
        );
        if totals.total_effective_stake == 0 && totals.rewards_deposited > 0 {
            warn!(
                "round {} resolved with {} yield rewards and no effective stake",
                self.header.index, totals.rewards_deposited
            );
        }
        Ok(self.view())
    }

    fn wait_resolved(&self) {
        while !self.is_resolved() {
            hint::spin_loop();
        }
    }

    /// Open the next round, carrying this round's frozen weight forward.
    pub fn successor(&self, length_secs: i64) -> Result<Self, LockedStakeError> {
        let (true, Some(resolution)) = (self.is_resolved(), self.resolution.get()) else {
            return Err(LockedStakeError::invariant(format!(
                "round {} has no successor before it resolves",
                self.header.index
            )));
        };
        let index = self
            .header
            .index
            .checked_add(1)
            .ok_or(LockedStakeError::ArithmeticOverflow)?;
        Self::open(
            index,
            self.header.end_time,
            length_secs,
            EffectiveWeight {
                yield_weight: resolution.totals.total_effective_stake,
                emission_weight: resolution.totals.total_effective_stake_emission_weighted,
            },
        )
    }

    /// Consistent snapshot.  Open rounds are read seqlock-style: retry until
    /// no writer was active and the revision did not move during the read.
    pub fn view(&self) -> RoundView {
        loop {
            let phase = self.phase.load(Ordering::SeqCst);
            if phase & RESOLVED != 0 {
                if let Some(resolution) = self.resolution.get() {
                    return RoundView::Resolved {
                        header: self.header,
                        totals: resolution.totals,
                        yield_rate: resolution.yield_rate,
                        emission_rate: resolution.emission_rate,
                    };
                }
            }
            if phase & WRITERS != 0 {
                hint::spin_loop();
                continue;
            }
            let revision = self.revision.load(Ordering::SeqCst);
            let totals = self.read_totals();
            let phase_after = self.phase.load(Ordering::SeqCst);
            if phase_after & WRITERS == 0
                && phase_after & RESOLVED == 0
                && self.revision.load(Ordering::SeqCst) == revision
            {
                return RoundView::Open {
                    header: self.header,
                    totals,
                    revision,
                };
            }
        }
    }

    fn read_totals(&self) -> RoundTotals {
        RoundTotals {
            total_effective_stake: self.total_effective_stake.load(Ordering::SeqCst),
            total_effective_stake_emission_weighted: self
                .total_effective_stake_emission_weighted
                .load(Ordering::SeqCst),
            rewards_deposited: self.rewards_deposited.load(Ordering::SeqCst),
            emission_rewards_deposited: self.emission_rewards_deposited.load(Ordering::SeqCst),
        }
    }
}

/// Atomically `value - sub + add`, failing without a write on under/overflow.
fn adjust(value: &AtomicU64, sub: u64, add: u64) -> Result<(), LockedStakeError> {
    value
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            current.checked_sub(sub)?.checked_add(add)
        })
        .map(|_| ())
        .map_err(|current| {
            if current < sub {
                LockedStakeError::invariant(format!(
                    "removing {sub} from round total {current}"
                ))
            } else {
                LockedStakeError::ArithmeticOverflow
            }
        })
}

fn revert(value: &AtomicU64, sub: u64, add: u64) {
    if let Err(err) = adjust(value, sub, add) {
        error!("failed to roll back partial round update: {err}");
    }
}
