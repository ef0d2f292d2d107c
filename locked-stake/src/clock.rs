//! Time source injected into the ledger.

use {
    solana_clock::UnixTimestamp,
    std::{
        sync::atomic::{AtomicI64, Ordering},
        time::{SystemTime, UNIX_EPOCH},
    },
};

/// Wall-clock source.  The ledger never reads global time directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> UnixTimestamp;
}

/// Reads the host's system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| UnixTimestamp::try_from(elapsed.as_secs()).unwrap_or(UnixTimestamp::MAX))
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.  Used to step through round
/// boundaries deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: UnixTimestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: UnixTimestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward by `secs`, returning the new time.
    pub fn advance(&self, secs: i64) -> UnixTimestamp {
        self.now
            .fetch_add(secs, Ordering::SeqCst)
            .saturating_add(secs)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        assert_eq!(clock.advance(500), 1_500);
        assert_eq!(clock.now(), 1_500);
        clock.set(42);
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
