use {
    crate::{multiplier::TokenClass, stake::StakeState},
    thiserror::Error,
};

/// Errors produced by the locked-stake engine.
///
/// Every variant except [`LockedStakeError::InvariantViolation`] is a
/// caller-correctable condition.  An invariant violation aborts the single
/// operation that detected it; shared state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockedStakeError {
    /// The lock duration is not one of the token class's supported tiers.
    #[error("Invalid lock duration: {lock_duration_days} days is not a {token_class:?} tier")]
    InvalidDuration {
        token_class: TokenClass,
        lock_duration_days: u64,
    },

    /// Redemption was requested before the lock expired.
    #[error("Stake is still locked for another {remaining_secs} seconds")]
    StakeStillLocked { remaining_secs: i64 },

    /// The stake has already been redeemed or early-exited.
    #[error("Stake is already terminal ({state:?})")]
    StakeAlreadyTerminal { state: StakeState },

    /// Genesis stakes cannot change their lock parameters.
    #[error("Genesis stakes cannot be upgraded")]
    GenesisStakeImmutable,

    /// An upgrade must strictly extend the lock.
    #[error("Lock duration must increase: currently {current} days, requested {requested} days")]
    DurationMustIncrease { current: u64, requested: u64 },

    /// Stake amount must be greater than zero.
    #[error("Stake amount must be greater than zero")]
    InsufficientPrincipal,

    /// A manual resolve was attempted before the round's window elapsed.
    #[error("Round {round} is still open until {closes_at}")]
    RoundNotYetClosed { round: u64, closes_at: i64 },

    /// The lock has already expired; the stake can only be redeemed.
    #[error("Lock period has expired; redeem the stake instead")]
    LockExpired,

    /// Early exit is disabled for this ledger.
    #[error("Early exit is not available")]
    EarlyExitUnavailable,

    #[error("Unknown stake {0}")]
    UnknownStake(u64),

    #[error("Unknown round {0}")]
    UnknownRound(u64),

    /// The configuration or multiplier table is inconsistent.
    #[error("Invalid locked-stake configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Arithmetic overflow in a weight or reward calculation.
    #[error("Arithmetic overflow in locked-stake calculation")]
    ArithmeticOverflow,

    /// Internal bug-check; the operation was aborted.
    #[error("Locked-stake invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("Ledger storage error: {0}")]
    Storage(#[from] StoreError),
}

impl LockedStakeError {
    /// Stable numeric code for the API layer.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidDuration { .. } => 0,
            Self::StakeStillLocked { .. } => 1,
            Self::StakeAlreadyTerminal { .. } => 2,
            Self::GenesisStakeImmutable => 3,
            Self::DurationMustIncrease { .. } => 4,
            Self::InsufficientPrincipal => 5,
            Self::RoundNotYetClosed { .. } => 6,
            Self::LockExpired => 7,
            Self::EarlyExitUnavailable => 8,
            Self::UnknownStake(_) => 9,
            Self::UnknownRound(_) => 10,
            Self::InvalidConfig { .. } => 11,
            Self::ArithmeticOverflow => 12,
            Self::InvariantViolation { .. } => 13,
            Self::Storage(_) => 14,
        }
    }

    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by a [`LedgerStore`](crate::store::LedgerStore) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record data is invalid or corrupted: {0}")]
    InvalidRecord(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}
