//! Concurrency scenarios: stake, deposit, claim and exit traffic racing the
//! lazy round rollover.

use {
    std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        thread,
    },
    trv1_locked_stake::{
        clock::ManualClock,
        constants::SECONDS_PER_DAY,
        store::InMemoryStore,
        LedgerConfig, LockedStake, LockedStakeError, MultiplierTable, OwnerId, RewardLedger,
        StakeState, TokenClass,
    },
};

const START: i64 = 1_700_000_000;
const WEEK: i64 = 7 * SECONDS_PER_DAY;

fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

fn new_ledger() -> (RewardLedger, Arc<ManualClock>) {
    init_logger();
    let clock = Arc::new(ManualClock::new(START));
    let ledger = RewardLedger::new(
        LedgerConfig::default(),
        MultiplierTable::default(),
        clock.clone(),
        Arc::new(InMemoryStore::new()),
    )
    .unwrap();
    (ledger, clock)
}

#[test]
fn round_totals_match_stake_histories_under_contention() {
    const STAKERS: u8 = 4;
    const STAKES_PER_THREAD: u64 = 40;
    const DEPOSITS_PER_THREAD: u64 = 60;

    let (ledger, clock) = new_ledger();
    let deposited = AtomicU64::new(0);
    let durations = ledger.multipliers().supported_durations(TokenClass::Yield);

    thread::scope(|scope| {
        for t in 0..STAKERS {
            let (ledger, durations) = (&ledger, &durations);
            scope.spawn(move || {
                let owner = OwnerId([t; 32]);
                for i in 0..STAKES_PER_THREAD {
                    let days = durations[(i as usize) % durations.len()];
                    let stake = ledger
                        .create_stake(owner, TokenClass::Yield, 1_000 + i, days)
                        .unwrap();
                    match i % 4 {
                        0 => {
                            ledger.early_exit(stake.id).ok();
                        }
                        1 => {
                            let longer = durations.iter().find(|&&d| d > days);
                            if let Some(&longer) = longer {
                                ledger.upgrade(stake.id, longer).ok();
                            }
                        }
                        _ => {
                            ledger.claim(stake.id).unwrap();
                        }
                    }
                }
            });
        }
        for _ in 0..2 {
            let (ledger, deposited) = (&ledger, &deposited);
            scope.spawn(move || {
                for _ in 0..DEPOSITS_PER_THREAD {
                    ledger.deposit_rewards(1_000, 100).unwrap();
                    deposited.fetch_add(1_000, Ordering::SeqCst);
                }
            });
        }
        let clock = &clock;
        scope.spawn(move || {
            for _ in 0..100 {
                clock.advance(WEEK / 10);
                thread::yield_now();
            }
        });
        let ledger = &ledger;
        scope.spawn(move || {
            for _ in 0..200 {
                let current = ledger.current_round().unwrap();
                if let Some(previous) = current.index().checked_sub(1) {
                    assert!(ledger.resolve_round(previous).unwrap().is_resolved());
                }
            }
        });
    });

    // Close out the last round.
    clock.advance(WEEK);
    let current = ledger.current_round().unwrap().index();
    assert!(current >= 10);

    let stakes: Vec<LockedStake> = (0..STAKERS)
        .flat_map(|t| ledger.stakes_by_owner(&OwnerId([t; 32])))
        .collect();
    assert_eq!(stakes.len() as u64, u64::from(STAKERS) * STAKES_PER_THREAD);

    // Every resolved round's frozen totals equal the weights the stakes
    // recorded for that round.
    for round in 0..current {
        let view = ledger.round(round).unwrap();
        assert!(view.is_resolved());
        let (yield_sum, emission_sum) = stakes
            .iter()
            .filter_map(|stake| stake.weight_for_round(round))
            .fold((0u64, 0u64), |(y, e), w| {
                (y + w.yield_weight, e + w.emission_weight)
            });
        assert_eq!(view.totals().total_effective_stake, yield_sum, "round {round}");
        assert_eq!(
            view.totals().total_effective_stake_emission_weighted,
            emission_sum,
            "round {round}"
        );
    }

    // The open round holds exactly the live stakes.
    let live_weight: u64 = stakes
        .iter()
        .filter(|stake| !stake.is_terminal())
        .map(|stake| stake.effective_weight().unwrap().yield_weight)
        .sum();
    assert_eq!(
        ledger.current_round().unwrap().totals().total_effective_stake,
        live_weight
    );

    // Nothing is paid out beyond what was deposited.
    for stake in stakes.iter().filter(|stake| !stake.is_terminal()) {
        ledger.claim(stake.id).unwrap();
    }
    let stats = ledger.stats().unwrap();
    let deposited = deposited.load(Ordering::SeqCst);
    assert!(stats.total_claimed_yield + stats.undistributed_yield <= deposited);
}

#[test]
fn concurrent_exits_on_one_stake_are_serialized() {
    let (ledger, _clock) = new_ledger();
    for _ in 0..50 {
        let id = ledger
            .create_stake(OwnerId([1; 32]), TokenClass::Governance, 1_000, 90)
            .unwrap()
            .id;
        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| ledger.early_exit(id)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        for result in results.iter().filter(|result| result.is_err()) {
            assert_eq!(
                result,
                &Err(LockedStakeError::StakeAlreadyTerminal {
                    state: StakeState::EarlyExited,
                })
            );
        }
    }
    assert_eq!(
        ledger.current_round().unwrap().totals().total_effective_stake,
        0
    );
}

#[test]
fn concurrent_claims_pay_once() {
    let (ledger, clock) = new_ledger();
    let a = ledger
        .create_stake(OwnerId([1; 32]), TokenClass::Yield, 1_000, 90)
        .unwrap()
        .id;
    ledger
        .create_stake(OwnerId([2; 32]), TokenClass::Yield, 500, 0)
        .unwrap();
    ledger.deposit_rewards(100, 0).unwrap();
    clock.advance(WEEK);

    let paid: u64 = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| ledger.claim(a).unwrap().yield_amount))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });
    // 100 × 1200/1700 = 70.58 → 70, paid exactly once.
    assert_eq!(paid, 70);
    assert_eq!(ledger.stake(a).unwrap().claimed_yield, 70);
}
