//! Durable storage boundary.
//!
//! The ledger keeps its working state in memory and writes every touched
//! round and stake through a [`LedgerStore`].  Records are Borsh-encoded with
//! a leading discriminator byte, the same framing the on-chain programs use
//! for account data.

use {
    crate::{
        error::StoreError,
        round::RoundView,
        stake::{LockedStake, OwnerId, StakeId},
    },
    borsh::{BorshDeserialize, BorshSerialize},
    parking_lot::RwLock,
    std::collections::{BTreeMap, BTreeSet, HashMap},
};

/// Discriminator for round records.
pub const ROUND_RECORD_DISCRIMINATOR: u8 = 1;

/// Discriminator for stake records.
pub const STAKE_RECORD_DISCRIMINATOR: u8 = 2;

/// Access pattern the ledger needs from persistence.
pub trait LedgerStore: Send + Sync {
    /// Store a round snapshot.
    ///
    /// Snapshots of one round can arrive out of order from concurrent
    /// writers.  Implementations must keep the newest: a resolved view
    /// supersedes any open view, and among open views the higher revision
    /// wins.
    fn put_round(&self, round: &RoundView) -> Result<(), StoreError>;

    fn load_round(&self, index: u64) -> Result<Option<RoundView>, StoreError>;

    /// The round currently accepting stake and deposits, if persisted.
    fn open_round(&self) -> Result<Option<RoundView>, StoreError>;

    fn put_stake(&self, stake: &LockedStake) -> Result<(), StoreError>;

    fn load_stake(&self, id: StakeId) -> Result<Option<LockedStake>, StoreError>;

    fn stakes_by_owner(&self, owner: &OwnerId) -> Result<Vec<LockedStake>, StoreError>;

    fn stake_ids(&self) -> Result<Vec<StakeId>, StoreError>;
}

/// Prepend `discriminator` to the Borsh encoding of `record`.
pub fn encode_record<T: BorshSerialize>(
    discriminator: u8,
    record: &T,
) -> Result<Vec<u8>, StoreError> {
    let mut data = vec![discriminator];
    record
        .serialize(&mut data)
        .map_err(|err| StoreError::InvalidRecord(err.to_string()))?;
    Ok(data)
}

/// Decode a record written by [`encode_record`], checking its discriminator.
pub fn decode_record<T: BorshDeserialize>(
    discriminator: u8,
    data: &[u8],
) -> Result<T, StoreError> {
    match data.split_first() {
        Some((&found, mut payload)) if found == discriminator => {
            T::deserialize(&mut payload).map_err(|err| StoreError::InvalidRecord(err.to_string()))
        }
        _ => Err(StoreError::InvalidRecord(format!(
            "missing or invalid discriminator, expected {discriminator}"
        ))),
    }
}

/// `true` if `incoming` should replace `existing` under the
/// [`LedgerStore::put_round`] ordering rule.
pub fn supersedes(incoming: &RoundView, existing: &RoundView) -> bool {
    match (incoming, existing) {
        (RoundView::Resolved { .. }, _) => true,
        (RoundView::Open { .. }, RoundView::Resolved { .. }) => false,
        (
            RoundView::Open {
                revision: incoming, ..
            },
            RoundView::Open {
                revision: existing, ..
            },
        ) => incoming >= existing,
    }
}

/// Process-local store, mainly for tests and simulations.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rounds: RwLock<BTreeMap<u64, Vec<u8>>>,
    stakes: RwLock<HashMap<StakeId, Vec<u8>>>,
    owners: RwLock<HashMap<OwnerId, BTreeSet<StakeId>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_count(&self) -> usize {
        self.rounds.read().len()
    }
}

impl LedgerStore for InMemoryStore {
    fn put_round(&self, round: &RoundView) -> Result<(), StoreError> {
        let data = encode_record(ROUND_RECORD_DISCRIMINATOR, round)?;
        let mut rounds = self.rounds.write();
        if let Some(existing) = rounds.get(&round.index()) {
            let existing: RoundView = decode_record(ROUND_RECORD_DISCRIMINATOR, existing)?;
            if !supersedes(round, &existing) {
                return Ok(());
            }
        }
        rounds.insert(round.index(), data);
        Ok(())
    }

    fn load_round(&self, index: u64) -> Result<Option<RoundView>, StoreError> {
        self.rounds
            .read()
            .get(&index)
            .map(|data| decode_record(ROUND_RECORD_DISCRIMINATOR, data))
            .transpose()
    }

    fn open_round(&self) -> Result<Option<RoundView>, StoreError> {
        let rounds = self.rounds.read();
        let Some(data) = rounds.values().next_back() else {
            return Ok(None);
        };
        let view: RoundView = decode_record(ROUND_RECORD_DISCRIMINATOR, data)?;
        Ok((!view.is_resolved()).then_some(view))
    }

    fn put_stake(&self, stake: &LockedStake) -> Result<(), StoreError> {
        let data = encode_record(STAKE_RECORD_DISCRIMINATOR, stake)?;
        self.stakes.write().insert(stake.id, data);
        self.owners
            .write()
            .entry(stake.owner)
            .or_default()
            .insert(stake.id);
        Ok(())
    }

    fn load_stake(&self, id: StakeId) -> Result<Option<LockedStake>, StoreError> {
        self.stakes
            .read()
            .get(&id)
            .map(|data| decode_record(STAKE_RECORD_DISCRIMINATOR, data))
            .transpose()
    }

    fn stakes_by_owner(&self, owner: &OwnerId) -> Result<Vec<LockedStake>, StoreError> {
        let ids: Vec<StakeId> = self
            .owners
            .read()
            .get(owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.load_stake(id).transpose())
            .collect()
    }

    fn stake_ids(&self) -> Result<Vec<StakeId>, StoreError> {
        let mut ids: Vec<StakeId> = self.stakes.read().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
