//! The reward ledger: round rollover, claims, upgrades and exits.
//!
//! Rounds live in an append-only arena indexed by round number.  The arena
//! lock is only taken for writing while rolling over to a new round; stake
//! and deposit traffic goes through the round's atomic totals.  Each stake
//! sits behind its own mutex so operations on one stake are serialized while
//! different stakes proceed in parallel.
//!
//! Operations roll rounds over lazily: whichever call first observes that
//! the open round's window has elapsed resolves it and opens the next.
//!
//! A stake operation only takes effect once its stake record is in the
//! store.  Round records are written through on a best-effort basis; a
//! restore rebuilds the totals of unresolved rounds from the stake records.

use {
    crate::{
        clock::Clock,
        config::LedgerConfig,
        error::LockedStakeError,
        multiplier::{MultiplierTable, TokenClass},
        redemption::{EarlyExitPenalty, Redemption, RedemptionPolicy},
        round::{RoundTotals, RoundView, StakeRound},
        stake::{
            ClaimedRewards, EffectiveWeight, LockedStake, OwnerId, PendingAccrual, StakeId,
            StakeState,
        },
        store::LedgerStore,
    },
    dashmap::DashMap,
    log::*,
    parking_lot::{Mutex, RwLock},
    solana_clock::UnixTimestamp,
    std::{
        collections::BTreeSet,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
};

/// What a redemption or early exit hands back to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub stake_id: StakeId,
    pub state: StakeState,
    /// Principal returned to the owner (`amount − penalty`).
    pub released_principal: u64,
    pub penalty: u64,
    /// Rewards settled as part of the exit.
    pub rewards: ClaimedRewards,
}

/// Aggregate view over every stake and round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerStats {
    pub rounds: u64,
    pub latest_resolved_round: Option<u64>,
    /// Stakes whose lock is still running.
    pub active_stakes: u64,
    /// Stakes past their lock end that have not been redeemed yet.
    pub matured_stakes: u64,
    /// Principal still held by non-terminal stakes.
    pub total_principal: u64,
    pub total_claimed_yield: u64,
    pub total_claimed_emission: u64,
    pub undistributed_yield: u64,
    pub undistributed_emission: u64,
    /// Records whose last write to the store failed.
    pub pending_writes: u64,
}

#[derive(Debug, Default)]
struct PendingWrites {
    rounds: BTreeSet<u64>,
    stakes: BTreeSet<StakeId>,
}

/// Owns the round arena and every stake of one staking pool.
pub struct RewardLedger {
    round_length: i64,
    multipliers: MultiplierTable,
    policy: RedemptionPolicy,
    clock: Arc<dyn Clock>,
    store: Arc<dyn LedgerStore>,
    rounds: RwLock<Vec<Arc<StakeRound>>>,
    stakes: DashMap<StakeId, Arc<Mutex<LockedStake>>>,
    next_stake_id: AtomicU64,
    pending: Mutex<PendingWrites>,
}

impl std::fmt::Debug for RewardLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardLedger")
            .field("round_length", &self.round_length)
            .field("multipliers", &self.multipliers)
            .field("policy", &self.policy)
            .field("next_stake_id", &self.next_stake_id)
            .finish_non_exhaustive()
    }
}

impl RewardLedger {
    /// Start an empty ledger whose first round opens at `clock.now()`.
    pub fn new(
        config: LedgerConfig,
        multipliers: MultiplierTable,
        clock: Arc<dyn Clock>,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, LockedStakeError> {
        config.validate()?;
        multipliers.validate()?;
        let round_length = config.round_length()?;
        let genesis = Arc::new(StakeRound::open(
            0,
            clock.now(),
            round_length,
            EffectiveWeight::default(),
        )?);
        let ledger = Self {
            round_length,
            multipliers,
            policy: RedemptionPolicy::new(&config.early_exit),
            clock,
            store,
            rounds: RwLock::new(vec![Arc::clone(&genesis)]),
            stakes: DashMap::new(),
            next_stake_id: AtomicU64::new(0),
            pending: Mutex::new(PendingWrites::default()),
        };
        ledger.persist_round(&genesis);
        info!("locked-stake ledger opened with {round_length}s rounds");
        Ok(ledger)
    }

    /// Rebuild a ledger from `store`.  Falls back to [`RewardLedger::new`]
    /// when the store holds no rounds.
    pub fn restore(
        config: LedgerConfig,
        multipliers: MultiplierTable,
        clock: Arc<dyn Clock>,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, LockedStakeError> {
        let mut views = Vec::new();
        while let Some(view) = store.load_round(views.len() as u64)? {
            if view.index() != views.len() as u64 {
                return Err(LockedStakeError::invariant(format!(
                    "stored round {} found at position {}",
                    view.index(),
                    views.len()
                )));
            }
            views.push(view);
        }
        if views.is_empty() {
            return Self::new(config, multipliers, clock, store);
        }

        config.validate()?;
        multipliers.validate()?;
        let round_length = config.round_length()?;

        let mut loaded = Vec::new();
        for id in store.stake_ids()? {
            loaded.push(
                store
                    .load_stake(id)?
                    .ok_or(LockedStakeError::UnknownStake(id))?,
            );
        }

        // Stake records are authoritative for the weight of rounds that
        // were not resolved when last written.
        let last = views.len().saturating_sub(1);
        let mut rounds = Vec::with_capacity(views.len());
        let mut stale = Vec::new();
        for (position, view) in views.into_iter().enumerate() {
            let round = match view {
                RoundView::Open {
                    header,
                    totals,
                    revision,
                } => {
                    let staked = staked_weight(&loaded, header.index)?;
                    let round = StakeRound::from_view(&RoundView::Open {
                        header,
                        totals: RoundTotals {
                            total_effective_stake: staked.yield_weight,
                            total_effective_stake_emission_weighted: staked.emission_weight,
                            ..totals
                        },
                        revision,
                    });
                    if position < last {
                        warn!("round {} stored unresolved, resolving", header.index);
                        round.resolve(round.end_time())?;
                        stale.push(header.index);
                    }
                    round
                }
                resolved => StakeRound::from_view(&resolved),
            };
            rounds.push(Arc::new(round));
        }

        let stakes = DashMap::new();
        let mut next_stake_id = 0u64;
        for stake in loaded {
            next_stake_id = next_stake_id.max(stake.id.saturating_add(1));
            stakes.insert(stake.id, Arc::new(Mutex::new(stake)));
        }
        info!(
            "locked-stake ledger restored: {} rounds, {} stakes",
            rounds.len(),
            stakes.len()
        );

        let ledger = Self {
            round_length,
            multipliers,
            policy: RedemptionPolicy::new(&config.early_exit),
            clock,
            store,
            rounds: RwLock::new(rounds),
            stakes,
            next_stake_id: AtomicU64::new(next_stake_id),
            pending: Mutex::new(PendingWrites::default()),
        };
        for index in stale {
            ledger.persist_round(&*ledger.round_arc(index)?);
        }
        Ok(ledger)
    }

    /// Swap in a protocol-specific early-exit penalty.
    pub fn with_penalty(mut self, penalty: Arc<dyn EarlyExitPenalty>) -> Self {
        self.policy = RedemptionPolicy::with_penalty(self.policy.early_exit_enabled(), penalty);
        self
    }

    pub fn multipliers(&self) -> &MultiplierTable {
        &self.multipliers
    }

    pub fn now(&self) -> UnixTimestamp {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Rounds
    // -----------------------------------------------------------------------

    /// The round accepting stake and deposits right now, rolling over first
    /// if its window has elapsed.
    fn open_round(&self) -> Result<Arc<StakeRound>, LockedStakeError> {
        loop {
            let now = self.clock.now();
            {
                let rounds = self.rounds.read();
                let last = rounds
                    .last()
                    .ok_or_else(|| LockedStakeError::invariant("round arena is empty"))?;
                if last.is_open() && !last.has_elapsed(now) {
                    return Ok(Arc::clone(last));
                }
            }
            self.roll_over(now)?;
        }
    }

    /// Resolve every elapsed round and open successors until the last round
    /// covers `now`.
    fn roll_over(&self, now: UnixTimestamp) -> Result<(), LockedStakeError> {
        let mut rounds = self.rounds.write();
        loop {
            let last = rounds
                .last()
                .cloned()
                .ok_or_else(|| LockedStakeError::invariant("round arena is empty"))?;
            if last.is_open() && !last.has_elapsed(now) {
                return Ok(());
            }
            // Either elapsed or already being closed by a manual resolve.
            last.resolve(now.max(last.end_time()))?;
            let next = Arc::new(last.successor(self.round_length)?);
            debug!(
                "rolled over to round {} starting at {}",
                next.index(),
                next.header().start_time
            );
            rounds.push(Arc::clone(&next));
            self.persist_round(&last);
            self.persist_round(&next);
        }
    }

    /// Write to the open round, retrying on the successor if the round
    /// started closing underneath us.  Returns the round written to.
    fn admit(
        &self,
        mut write: impl FnMut(&StakeRound) -> Result<bool, LockedStakeError>,
    ) -> Result<Arc<StakeRound>, LockedStakeError> {
        loop {
            let round = self.open_round()?;
            if write(&round)? {
                self.persist_round(&round);
                return Ok(round);
            }
            trace!("round {} closed during write, retrying", round.index());
        }
    }

    fn round_arc(&self, index: u64) -> Result<Arc<StakeRound>, LockedStakeError> {
        let position = usize::try_from(index).map_err(|_| LockedStakeError::UnknownRound(index))?;
        self.rounds
            .read()
            .get(position)
            .cloned()
            .ok_or(LockedStakeError::UnknownRound(index))
    }

    /// Explicitly resolve round `index`.  Fails with `RoundNotYetClosed`
    /// before its window elapses; resolving again is a no-op.
    pub fn resolve_round(&self, index: u64) -> Result<RoundView, LockedStakeError> {
        let round = self.round_arc(index)?;
        let view = round.resolve(self.clock.now())?;
        self.persist_round(&round);
        // Make sure a successor exists for the next writer.
        self.open_round()?;
        Ok(view)
    }

    /// Snapshot of round `index`, after any due rollover.
    pub fn round(&self, index: u64) -> Result<RoundView, LockedStakeError> {
        self.open_round()?;
        Ok(self.round_arc(index)?.view())
    }

    /// Snapshot of the open round, after any due rollover.
    pub fn current_round(&self) -> Result<RoundView, LockedStakeError> {
        Ok(self.open_round()?.view())
    }

    fn latest_resolved_round(&self) -> Option<u64> {
        let rounds = self.rounds.read();
        rounds
            .iter()
            .rev()
            .find(|round| round.is_resolved())
            .map(|round| round.index())
    }

    /// Credit rewards from the fee/emission feed to the open round.
    /// Returns the round index that received them.
    pub fn deposit_rewards(
        &self,
        yield_amount: u64,
        emission_amount: u64,
    ) -> Result<u64, LockedStakeError> {
        let round = self.admit(|round| round.deposit_rewards(yield_amount, emission_amount))?;
        debug!(
            "deposited {yield_amount} yield / {emission_amount} emission into round {}",
            round.index()
        );
        Ok(round.index())
    }

    // -----------------------------------------------------------------------
    // Stakes
    // -----------------------------------------------------------------------

    /// Lock `amount` of `token_class` for `lock_duration_days`.
    pub fn create_stake(
        &self,
        owner: OwnerId,
        token_class: TokenClass,
        amount: u64,
        lock_duration_days: u64,
    ) -> Result<LockedStake, LockedStakeError> {
        self.open_stake(owner, token_class, amount, lock_duration_days, false)
    }

    /// Import a bootstrap stake.  Genesis stakes can never be upgraded.
    pub fn create_genesis_stake(
        &self,
        owner: OwnerId,
        token_class: TokenClass,
        amount: u64,
        lock_duration_days: u64,
    ) -> Result<LockedStake, LockedStakeError> {
        self.open_stake(owner, token_class, amount, lock_duration_days, true)
    }

    fn open_stake(
        &self,
        owner: OwnerId,
        token_class: TokenClass,
        amount: u64,
        lock_duration_days: u64,
        is_genesis: bool,
    ) -> Result<LockedStake, LockedStakeError> {
        trace!("create_stake: {amount} {token_class:?} for {lock_duration_days} days");
        if amount == 0 {
            return Err(LockedStakeError::InsufficientPrincipal);
        }
        let entry = self.multipliers.lookup(token_class, lock_duration_days)?;
        // Validate everything before touching shared totals.
        let mut stake = LockedStake::new(
            0,
            owner,
            token_class,
            amount,
            &entry,
            self.clock.now(),
            is_genesis,
            0,
        )?;
        let weight = stake.effective_weight()?;
        let round = self.admit(|round| round.add_effective_stake(weight))?;
        let id = self.next_stake_id.fetch_add(1, Ordering::SeqCst);
        stake.id = id;
        stake.first_round = round.index();
        for segment in &mut stake.weight_history {
            segment.from_round = round.index();
        }

        if let Err(err) = self.store.put_stake(&stake) {
            // No record means no stake: take the weight back out.
            let undo = self.admit(|round| round.remove_effective_stake(weight))?;
            warn!(
                "stake {id} not created, store write failed: {err} \
                 (weight held in rounds {}..{})",
                round.index(),
                undo.index()
            );
            return Err(err.into());
        }
        self.stakes.insert(id, Arc::new(Mutex::new(stake.clone())));
        info!(
            "stake {id}: {amount} {token_class:?} locked {lock_duration_days} days from round {}{}",
            round.index(),
            if is_genesis { " (genesis)" } else { "" }
        );
        Ok(stake)
    }

    fn stake_cell(&self, id: StakeId) -> Result<Arc<Mutex<LockedStake>>, LockedStakeError> {
        self.stakes
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LockedStakeError::UnknownStake(id))
    }

    /// Snapshot of one stake.
    pub fn stake(&self, id: StakeId) -> Result<LockedStake, LockedStakeError> {
        Ok(self.stake_cell(id)?.lock().clone())
    }

    pub fn stakes_by_owner(&self, owner: &OwnerId) -> Vec<LockedStake> {
        let mut owned: Vec<LockedStake> = self
            .all_stake_cells()
            .iter()
            .map(|cell| cell.lock().clone())
            .filter(|stake| stake.owner == *owner)
            .collect();
        owned.sort_by_key(|stake| stake.id);
        owned
    }

    fn all_stake_cells(&self) -> Vec<Arc<Mutex<LockedStake>>> {
        self.stakes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Sum of governance weight across an owner's stakes.
    pub fn voting_power(&self, owner: &OwnerId) -> Result<u64, LockedStakeError> {
        let now = self.clock.now();
        self.stakes_by_owner(owner)
            .iter()
            .try_fold(0u64, |total, stake| {
                total
                    .checked_add(stake.voting_power(now)?)
                    .ok_or(LockedStakeError::ArithmeticOverflow)
            })
    }

    /// Which exit `id` may take right now.
    pub fn classify(&self, id: StakeId) -> Result<Redemption, LockedStakeError> {
        let cell = self.stake_cell(id)?;
        let stake = cell.lock();
        self.policy.classify(&stake, self.clock.now())
    }

    // -----------------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------------

    /// Accrual for `stake` over resolved rounds `next_unclaimed..=through`.
    fn pending_accrual(
        &self,
        stake: &LockedStake,
        through: Option<u64>,
    ) -> Result<PendingAccrual, LockedStakeError> {
        let Some(through) = through else {
            return Ok(PendingAccrual::default());
        };
        let start = stake.next_unclaimed_round();
        let mut pending = PendingAccrual {
            through_round: Some(through),
            ..PendingAccrual::default()
        };
        if start > through {
            return Ok(pending);
        }

        let span: Vec<Arc<StakeRound>> = {
            let rounds = self.rounds.read();
            let (from, to) = (usize::try_from(start), usize::try_from(through));
            match (from, to) {
                (Ok(from), Ok(to)) if to < rounds.len() => rounds[from..=to].to_vec(),
                _ => {
                    return Err(LockedStakeError::invariant(format!(
                        "claim span {start}..={through} outside the round arena"
                    )))
                }
            }
        };

        for round in span {
            let (yield_rate, emission_rate) = round.rates().ok_or_else(|| {
                LockedStakeError::invariant(format!(
                    "round {} is below the claim horizon but unresolved",
                    round.index()
                ))
            })?;
            let (yield_accrual, emission_accrual) =
                stake.accrue(round.index(), &yield_rate, &emission_rate)?;
            pending.yield_accrual = pending.yield_accrual.checked_add(yield_accrual)?;
            pending.emission_accrual = pending.emission_accrual.checked_add(emission_accrual)?;
        }
        Ok(pending)
    }

    /// Rewards `id` could claim right now, without claiming them.
    pub fn claimable(&self, id: StakeId) -> Result<ClaimedRewards, LockedStakeError> {
        self.open_round()?;
        let cell = self.stake_cell(id)?;
        let stake = cell.lock();
        if stake.is_terminal() {
            return Ok(ClaimedRewards::default());
        }
        let pending = self.pending_accrual(&stake, self.latest_resolved_round())?;
        stake.preview(pending)
    }

    /// Settle all resolved rounds into `id`'s claimed totals and return the
    /// amounts to pay out.  A second claim with no newly resolved round
    /// returns zero.
    pub fn claim(&self, id: StakeId) -> Result<ClaimedRewards, LockedStakeError> {
        self.open_round()?;
        let cell = self.stake_cell(id)?;
        let mut stake = cell.lock();
        stake.ensure_not_terminal()?;

        let mut updated = stake.clone();
        let pending = self.pending_accrual(&updated, self.latest_resolved_round())?;
        let rewards = updated.credit(pending)?;
        updated.mature(self.clock.now());

        if updated != *stake {
            self.store.put_stake(&updated)?;
            *stake = updated;
        }
        if !rewards.is_empty() {
            info!(
                "stake {id} claimed {} yield / {} emission",
                rewards.yield_amount, rewards.emission_amount
            );
        }
        Ok(rewards)
    }

    // -----------------------------------------------------------------------
    // Upgrades and exits
    // -----------------------------------------------------------------------

    /// Extend the lock of a non-genesis stake that has not yet expired.
    pub fn upgrade(
        &self,
        id: StakeId,
        new_duration_days: u64,
    ) -> Result<LockedStake, LockedStakeError> {
        let cell = self.stake_cell(id)?;
        let mut stake = cell.lock();
        stake.check_upgrade(self.clock.now(), new_duration_days)?;
        let entry = self
            .multipliers
            .lookup(stake.token_class, new_duration_days)?;

        let old_weight = stake.effective_weight()?;
        let new_weight = EffectiveWeight::of(stake.amount, &entry)?;
        // Surface arithmetic errors before the round totals move.
        stake.clone().apply_upgrade(&entry, stake.first_round)?;

        let round = self.admit(|round| round.replace_effective_stake(old_weight, new_weight))?;
        let mut updated = stake.clone();
        let result = updated
            .apply_upgrade(&entry, round.index())
            .and_then(|_| self.store.put_stake(&updated).map_err(Into::into));
        if let Err(err) = result {
            error!("stake {id} upgrade failed in round {}: {err}", round.index());
            self.roll_back_weight(&mut stake, round.index(), new_weight, |round| {
                round.replace_effective_stake(new_weight, old_weight)
            })?;
            return Err(err);
        }
        *stake = updated.clone();
        info!(
            "stake {id} upgraded to {new_duration_days} days from round {}",
            round.index()
        );
        Ok(updated)
    }

    /// Redeem a stake whose lock has expired: full principal plus all
    /// unclaimed rewards.
    pub fn redeem(&self, id: StakeId) -> Result<ExitOutcome, LockedStakeError> {
        let cell = self.stake_cell(id)?;
        let mut stake = cell.lock();
        stake.check_redeem(self.clock.now())?;
        self.exit(&mut stake, 0, StakeState::Redeemed)
    }

    /// Leave before the lock expires, forfeiting the early-exit penalty.
    pub fn early_exit(&self, id: StakeId) -> Result<ExitOutcome, LockedStakeError> {
        let cell = self.stake_cell(id)?;
        let mut stake = cell.lock();
        let now = self.clock.now();
        stake.check_early_exit(now)?;
        let penalty = self.policy.penalty_at(&stake, now)?;
        self.exit(&mut stake, penalty, StakeState::EarlyExited)
    }

    /// Claim resolved rounds, pull the weight out of the open round, then
    /// close the stake.  In that order: the claim must see the stake as a
    /// participant of every round it was counted in.
    fn exit(
        &self,
        stake: &mut LockedStake,
        penalty: u64,
        state: StakeState,
    ) -> Result<ExitOutcome, LockedStakeError> {
        let mut updated = stake.clone();

        // 1. Claim everything already resolved.
        let pending = self.pending_accrual(&updated, self.latest_resolved_round())?;
        let mut rewards = updated.credit(pending)?;
        let released_principal = updated
            .amount
            .checked_sub(penalty)
            .ok_or_else(|| LockedStakeError::invariant("penalty exceeds principal"))?;

        // 2. Remove the weight from the open round.
        let weight = updated.effective_weight()?;
        let round = self.admit(|round| round.remove_effective_stake(weight))?;

        // 3. Settle rounds that resolved between 1 and 2, close, and store.
        let result = self
            .settle_exit(&mut updated, state, round.index())
            .and_then(|late| rewards.checked_add(late))
            .and_then(|total| {
                self.store.put_stake(&updated)?;
                Ok(total)
            });
        match result {
            Ok(total) => rewards = total,
            Err(err) => {
                error!(
                    "stake {} exit failed after leaving round {}: {err}",
                    updated.id,
                    round.index()
                );
                self.roll_back_weight(stake, round.index(), EffectiveWeight::default(), |round| {
                    round.add_effective_stake(weight)
                })?;
                return Err(err);
            }
        }
        *stake = updated;
        info!(
            "stake {} {state:?}: released {released_principal}, penalty {penalty}, \
             rewards {} yield / {} emission",
            stake.id, rewards.yield_amount, rewards.emission_amount
        );
        Ok(ExitOutcome {
            stake_id: stake.id,
            state,
            released_principal,
            penalty,
            rewards,
        })
    }

    /// Undo a weight change made in round `applied_in` by an operation that
    /// then failed.  If that round closed in the meantime the undo lands in a
    /// later one, and `stake` records `interim` for the rounds in between.
    fn roll_back_weight(
        &self,
        stake: &mut LockedStake,
        applied_in: u64,
        interim: EffectiveWeight,
        undo: impl FnMut(&StakeRound) -> Result<bool, LockedStakeError>,
    ) -> Result<(), LockedStakeError> {
        let round = self.admit(undo)?;
        if round.index() == applied_in {
            return Ok(());
        }
        let restored = stake.effective_weight()?;
        stake.record_weight(applied_in, interim);
        stake.record_weight(round.index(), restored);
        warn!(
            "stake {} weight restored in round {} instead of {applied_in}",
            stake.id,
            round.index()
        );
        self.persist_stake(stake);
        Ok(())
    }

    fn settle_exit(
        &self,
        stake: &mut LockedStake,
        state: StakeState,
        exit_round: u64,
    ) -> Result<ClaimedRewards, LockedStakeError> {
        let late = match exit_round.checked_sub(1) {
            Some(through) => {
                let pending = self.pending_accrual(stake, Some(through))?;
                stake.credit(pending)?
            }
            None => ClaimedRewards::default(),
        };
        stake.close(state, exit_round)?;
        Ok(late)
    }

    // -----------------------------------------------------------------------
    // Statistics and persistence
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> Result<LedgerStats, LockedStakeError> {
        self.open_round()?;
        let now = self.clock.now();
        let mut stats = LedgerStats {
            latest_resolved_round: self.latest_resolved_round(),
            ..LedgerStats::default()
        };
        let rounds: Vec<Arc<StakeRound>> = self.rounds.read().clone();
        stats.rounds = rounds.len() as u64;
        for round in rounds {
            let view = round.view();
            stats.undistributed_yield =
                checked_sum(stats.undistributed_yield, view.undistributed_yield()?)?;
            stats.undistributed_emission =
                checked_sum(stats.undistributed_emission, view.undistributed_emission()?)?;
        }
        for cell in self.all_stake_cells() {
            let stake = cell.lock();
            match stake.state {
                StakeState::Active if !stake.is_lock_expired(now) => {
                    stats.active_stakes = stats.active_stakes.saturating_add(1);
                }
                StakeState::Active | StakeState::Resolved => {
                    stats.matured_stakes = stats.matured_stakes.saturating_add(1);
                }
                StakeState::EarlyExited | StakeState::Redeemed => {}
            }
            if !stake.is_terminal() {
                stats.total_principal = checked_sum(stats.total_principal, stake.amount)?;
            }
            stats.total_claimed_yield =
                checked_sum(stats.total_claimed_yield, stake.claimed_yield)?;
            stats.total_claimed_emission =
                checked_sum(stats.total_claimed_emission, stake.claimed_emission)?;
        }
        let pending = self.pending.lock();
        stats.pending_writes = (pending.rounds.len() + pending.stakes.len()) as u64;
        Ok(stats)
    }

    fn persist_round(&self, round: &StakeRound) {
        if let Err(err) = self.store.put_round(&round.view()) {
            warn!("round {} not persisted: {err}", round.index());
            self.pending.lock().rounds.insert(round.index());
        }
    }

    fn persist_stake(&self, stake: &LockedStake) {
        if let Err(err) = self.store.put_stake(stake) {
            warn!("stake {} not persisted: {err}", stake.id);
            self.pending.lock().stakes.insert(stake.id);
        }
    }

    /// Retry every write that previously failed, using current state.
    /// Returns the number of records written.
    pub fn flush(&self) -> Result<usize, LockedStakeError> {
        let PendingWrites { rounds, stakes } = std::mem::take(&mut *self.pending.lock());
        let mut written = 0usize;
        let mut failed = PendingWrites::default();
        let mut first_error = None;

        for index in rounds {
            let result = self
                .round_arc(index)
                .and_then(|round| self.store.put_round(&round.view()).map_err(Into::into));
            match result {
                Ok(()) => written = written.saturating_add(1),
                Err(err) => {
                    failed.rounds.insert(index);
                    first_error.get_or_insert(err);
                }
            }
        }
        for id in stakes {
            let result = self
                .stake(id)
                .and_then(|stake| self.store.put_stake(&stake).map_err(Into::into));
            match result {
                Ok(()) => written = written.saturating_add(1),
                Err(err) => {
                    failed.stakes.insert(id);
                    first_error.get_or_insert(err);
                }
            }
        }

        let mut pending = self.pending.lock();
        pending.rounds.extend(failed.rounds);
        pending.stakes.extend(failed.stakes);
        match first_error {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }
}

/// Weight `stakes` recorded for `round`.
fn staked_weight(stakes: &[LockedStake], round: u64) -> Result<EffectiveWeight, LockedStakeError> {
    stakes
        .iter()
        .filter_map(|stake| stake.weight_for_round(round))
        .try_fold(EffectiveWeight::default(), |total, weight| {
            Ok(EffectiveWeight {
                yield_weight: checked_sum(total.yield_weight, weight.yield_weight)?,
                emission_weight: checked_sum(total.emission_weight, weight.emission_weight)?,
            })
        })
}

fn checked_sum(total: u64, value: u64) -> Result<u64, LockedStakeError> {
    total
        .checked_add(value)
        .ok_or(LockedStakeError::ArithmeticOverflow)
}
