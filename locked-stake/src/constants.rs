//! Locked-stake tier definitions and engine constants.
//!
//! The tables below are the genesis defaults for [`MultiplierTable`].  They
//! are configuration, not protocol law: deployments supply their own table
//! and the engine only relies on the invariants enforced by
//! [`MultiplierTable::validate`].
//!
//! [`MultiplierTable`]: crate::multiplier::MultiplierTable
//! [`MultiplierTable::validate`]: crate::multiplier::MultiplierTable::validate

/// Seconds per day, used for lock duration calculations.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Basis points denominator (10_000 bps = 1×).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Default round length: one week.
pub const DEFAULT_ROUND_LENGTH_SECS: u64 = 7 * SECONDS_PER_DAY as u64;

/// Default early-exit base penalty: 10% of principal for a full-length lock.
pub const DEFAULT_BASE_PENALTY_BPS: u16 = 1_000;

/// Fractional reward units are carried between claims at this precision
/// (10^12 dust per whole unit).
pub const DUST_PRECISION: u128 = 1_000_000_000_000;

// ---------------------------------------------------------------------------
// Yield-bearing token tiers
//
//   (lock days, emission bps, yield bps, vote bps)
//   The 0-day tier is the unlocked baseline: every multiplier is 1×.
// ---------------------------------------------------------------------------

pub const YIELD_TOKEN_TIERS: &[(u64, u32, u32, u32)] = &[
    (0, 10_000, 10_000, 10_000),
    (30, 11_000, 10_500, 11_000),
    (60, 12_000, 11_000, 12_000),
    (90, 13_000, 12_000, 13_000),
    (180, 15_000, 13_500, 15_000),
    (360, 20_000, 15_000, 20_000),
    (720, 30_000, 17_500, 30_000),
];

// ---------------------------------------------------------------------------
// Governance / emission token tiers
//
//   No unlocked tier.  Yield boost is flat; lock length only buys emission
//   share and governance weight.
// ---------------------------------------------------------------------------

pub const GOVERNANCE_TOKEN_TIERS: &[(u64, u32, u32, u32)] = &[
    (30, 12_000, 10_000, 12_500),
    (90, 15_000, 10_000, 15_000),
    (180, 20_000, 10_000, 20_000),
    (360, 30_000, 10_000, 30_000),
];
