//! # TRv1 Locked Stake
//!
//! A **round-based reward accrual and redemption engine** for locked stake.
//!
//! Owners lock tokens for one of a fixed set of durations.  Longer locks pull
//! larger multipliers from a [`MultiplierTable`], which scale the stake's
//! *effective weight* in each accrual round.  Rewards deposited during a
//! round are split pro-rata by effective weight once the round resolves.
//!
//! | Lock (days) | Yield token: emission / yield / vote | Governance token: emission / vote |
//! |-------------|--------------------------------------|-----------------------------------|
//! | 0           | 1.00× / 1.00× / 1.00×                | not offered                       |
//! | 30          | 1.10× / 1.05× / 1.10×                | 1.20× / 1.25×                     |
//! | 60          | 1.20× / 1.10× / 1.20×                | not offered                       |
//! | 90          | 1.30× / 1.20× / 1.30×                | 1.50× / 1.50×                     |
//! | 180         | 1.50× / 1.35× / 1.50×                | 2.00× / 2.00×                     |
//! | 360         | 2.00× / 1.50× / 2.00×                | 3.00× / 3.00×                     |
//! | 720         | 3.00× / 1.75× / 3.00×                | not offered                       |
//!
//! ## Quick start
//!
//! ```rust
//! use {
//!     std::sync::Arc,
//!     trv1_locked_stake::{
//!         clock::ManualClock, store::InMemoryStore, LedgerConfig, MultiplierTable, OwnerId,
//!         RewardLedger, TokenClass,
//!     },
//! };
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let ledger = RewardLedger::new(
//!     LedgerConfig::default(),
//!     MultiplierTable::default(),
//!     clock.clone(),
//!     Arc::new(InMemoryStore::new()),
//! )?;
//!
//! // 1000 tokens for 90 days: 1.2× yield weight.
//! let stake = ledger.create_stake(OwnerId([1; 32]), TokenClass::Yield, 1_000, 90)?;
//! ledger.deposit_rewards(100, 0)?;
//!
//! // One week later the round resolves and the sole staker takes it all.
//! clock.advance(7 * 86_400);
//! assert_eq!(ledger.claim(stake.id)?.yield_amount, 100);
//! # Ok::<(), trv1_locked_stake::LockedStakeError>(())
//! ```
//!
//! See [`round`] for how rounds resolve under concurrent writers and
//! [`redemption`] for exits.

#![allow(clippy::arithmetic_side_effects)]

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod multiplier;
pub mod rate;
pub mod redemption;
pub mod round;
pub mod stake;
pub mod store;


// Re-exports for convenience.
pub use {
    config::{EarlyExitConfig, LedgerConfig},
    error::{LockedStakeError, StoreError},
    ledger::{ExitOutcome, LedgerStats, RewardLedger},
    multiplier::{MultiplierEntry, MultiplierTable, TokenClass},
    redemption::{EarlyExitPenalty, LinearPenalty, Redemption},
    round::RoundView,
    stake::{ClaimedRewards, LockedStake, OwnerId, StakeId, StakeState},
};
