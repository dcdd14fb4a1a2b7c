//! Storage gateway: persistence seam for pots and battles.
//!
//! Writers go through version-checked updates so a second process pointed at
//! the same store cannot silently clobber a concurrent mutation. Entry,
//! participant, and round records are append-only.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::types::{Battle, BattleParticipant, BattleRound, Pot, PotEntry, PotStatus};

/// Wrap a gateway call with a deadline. Elapsing maps to `GatewayTimeout`
/// so callers can tell a slow dependency from a rejected request.
pub async fn bounded<T, F>(operation: &'static str, deadline: Duration, call: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::GatewayTimeout {
            operation,
            timeout_ms: deadline.as_millis() as u64,
        }),
    }
}

/// CRUD plus compare-and-set updates for the two aggregate records, and
/// append/list for their child records.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn insert_pot(&self, pot: &Pot) -> EngineResult<()>;

    async fn fetch_pot(&self, pot_id: Uuid) -> EngineResult<Option<Pot>>;

    /// Persist `pot` only if the stored version still equals `pot.version`.
    /// Returns the stored copy with its bumped version.
    async fn update_pot(&self, pot: &Pot) -> EngineResult<Pot>;

    /// Pots, optionally filtered by status, newest first.
    async fn list_pots(&self, status: Option<PotStatus>) -> EngineResult<Vec<Pot>>;

    async fn append_pot_entry(&self, entry: &PotEntry) -> EngineResult<()>;

    /// Entries for one pot in ticket-range order.
    async fn list_pot_entries(&self, pot_id: Uuid) -> EngineResult<Vec<PotEntry>>;

    async fn insert_battle(&self, battle: &Battle) -> EngineResult<()>;

    async fn fetch_battle(&self, battle_id: Uuid) -> EngineResult<Option<Battle>>;

    /// Version-checked update, same discipline as [`update_pot`](Self::update_pot).
    async fn update_battle(&self, battle: &Battle) -> EngineResult<Battle>;

    async fn list_battles(&self, status: Option<crate::types::BattleStatus>)
        -> EngineResult<Vec<Battle>>;

    async fn append_participant(&self, participant: &BattleParticipant) -> EngineResult<()>;

    /// Participants for one battle in join order.
    async fn list_participants(&self, battle_id: Uuid) -> EngineResult<Vec<BattleParticipant>>;

    /// Rewrite one participant record in place, matched by id.
    async fn update_participant(&self, participant: &BattleParticipant) -> EngineResult<()>;

    async fn append_round(&self, round: &BattleRound) -> EngineResult<()>;

    /// Rounds for one battle in resolution order.
    async fn list_rounds(&self, battle_id: Uuid) -> EngineResult<Vec<BattleRound>>;
}

/// In-process store for the single-node deployment and tests.
pub struct MemoryStore {
    pots: DashMap<Uuid, Pot>,
    pot_entries: DashMap<Uuid, Vec<PotEntry>>,
    battles: DashMap<Uuid, Battle>,
    participants: DashMap<Uuid, Vec<BattleParticipant>>,
    rounds: DashMap<Uuid, Vec<BattleRound>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            pots: DashMap::new(),
            pot_entries: DashMap::new(),
            battles: DashMap::new(),
            participants: DashMap::new(),
            rounds: DashMap::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageGateway for MemoryStore {
    async fn insert_pot(&self, pot: &Pot) -> EngineResult<()> {
        match self.pots.entry(pot.id) {
            Entry::Occupied(_) => Err(EngineError::Storage(format!(
                "pot {} already exists",
                pot.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(pot.clone());
                Ok(())
            }
        }
    }

    async fn fetch_pot(&self, pot_id: Uuid) -> EngineResult<Option<Pot>> {
        Ok(self.pots.get(&pot_id).map(|p| p.clone()))
    }

    async fn update_pot(&self, pot: &Pot) -> EngineResult<Pot> {
        match self.pots.entry(pot.id) {
            Entry::Occupied(mut slot) => {
                if slot.get().version != pot.version {
                    return Err(EngineError::Storage(format!(
                        "version conflict on pot {}: stored {}, expected {}",
                        pot.id,
                        slot.get().version,
                        pot.version
                    )));
                }
                let mut next = pot.clone();
                next.version += 1;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(EngineError::PotNotFound(pot.id)),
        }
    }

    async fn list_pots(&self, status: Option<PotStatus>) -> EngineResult<Vec<Pot>> {
        let mut pots: Vec<Pot> = self
            .pots
            .iter()
            .map(|p| p.clone())
            .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
            .collect();
        pots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pots)
    }

    async fn append_pot_entry(&self, entry: &PotEntry) -> EngineResult<()> {
        self.pot_entries
            .entry(entry.pot_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_pot_entries(&self, pot_id: Uuid) -> EngineResult<Vec<PotEntry>> {
        let mut entries = self
            .pot_entries
            .get(&pot_id)
            .map(|e| e.clone())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.ticket_start);
        Ok(entries)
    }

    async fn insert_battle(&self, battle: &Battle) -> EngineResult<()> {
        match self.battles.entry(battle.id) {
            Entry::Occupied(_) => Err(EngineError::Storage(format!(
                "battle {} already exists",
                battle.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(battle.clone());
                Ok(())
            }
        }
    }

    async fn fetch_battle(&self, battle_id: Uuid) -> EngineResult<Option<Battle>> {
        Ok(self.battles.get(&battle_id).map(|b| b.clone()))
    }

    async fn update_battle(&self, battle: &Battle) -> EngineResult<Battle> {
        match self.battles.entry(battle.id) {
            Entry::Occupied(mut slot) => {
                if slot.get().version != battle.version {
                    return Err(EngineError::Storage(format!(
                        "version conflict on battle {}: stored {}, expected {}",
                        battle.id,
                        slot.get().version,
                        battle.version
                    )));
                }
                let mut next = battle.clone();
                next.version += 1;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(EngineError::BattleNotFound(battle.id)),
        }
    }

    async fn list_battles(
        &self,
        status: Option<crate::types::BattleStatus>,
    ) -> EngineResult<Vec<Battle>> {
        let mut battles: Vec<Battle> = self
            .battles
            .iter()
            .map(|b| b.clone())
            .filter(|b| status.map(|s| b.status == s).unwrap_or(true))
            .collect();
        battles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(battles)
    }

    async fn append_participant(&self, participant: &BattleParticipant) -> EngineResult<()> {
        self.participants
            .entry(participant.battle_id)
            .or_default()
            .push(participant.clone());
        Ok(())
    }

    async fn list_participants(&self, battle_id: Uuid) -> EngineResult<Vec<BattleParticipant>> {
        Ok(self
            .participants
            .get(&battle_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }

    async fn update_participant(&self, participant: &BattleParticipant) -> EngineResult<()> {
        let mut seats = self
            .participants
            .entry(participant.battle_id)
            .or_default();
        match seats.iter_mut().find(|seat| seat.id == participant.id) {
            Some(seat) => {
                *seat = participant.clone();
                Ok(())
            }
            None => Err(EngineError::Storage(format!(
                "participant {} not found in battle {}",
                participant.id, participant.battle_id
            ))),
        }
    }

    async fn append_round(&self, round: &BattleRound) -> EngineResult<()> {
        self.rounds
            .entry(round.battle_id)
            .or_default()
            .push(round.clone());
        Ok(())
    }

    async fn list_rounds(&self, battle_id: Uuid) -> EngineResult<Vec<BattleRound>> {
        Ok(self
            .rounds
            .get(&battle_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}

/// Store wrapper that fails a scripted number of update calls without
/// applying them, for driving the partial-write repair paths in tests.
#[cfg(test)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    pot_update_skips: AtomicU32,
    pot_update_failures: AtomicU32,
    battle_update_skips: AtomicU32,
    battle_update_failures: AtomicU32,
}

#[cfg(test)]
impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            pot_update_skips: AtomicU32::new(0),
            pot_update_failures: AtomicU32::new(0),
            battle_update_skips: AtomicU32::new(0),
            battle_update_failures: AtomicU32::new(0),
        }
    }

    /// Let `skip` pot updates through, then fail the next `count`.
    pub(crate) fn fail_pot_updates(&self, skip: u32, count: u32) {
        self.pot_update_skips.store(skip, Ordering::SeqCst);
        self.pot_update_failures.store(count, Ordering::SeqCst);
    }

    /// Let `skip` battle updates through, then fail the next `count`.
    pub(crate) fn fail_battle_updates(&self, skip: u32, count: u32) {
        self.battle_update_skips.store(skip, Ordering::SeqCst);
        self.battle_update_failures.store(count, Ordering::SeqCst);
    }

    fn gate(skips: &AtomicU32, failures: &AtomicU32) -> EngineResult<()> {
        if skips
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(());
        }
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Storage("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl StorageGateway for FlakyStore {
    async fn insert_pot(&self, pot: &Pot) -> EngineResult<()> {
        self.inner.insert_pot(pot).await
    }

    async fn fetch_pot(&self, pot_id: Uuid) -> EngineResult<Option<Pot>> {
        self.inner.fetch_pot(pot_id).await
    }

    async fn update_pot(&self, pot: &Pot) -> EngineResult<Pot> {
        Self::gate(&self.pot_update_skips, &self.pot_update_failures)?;
        self.inner.update_pot(pot).await
    }

    async fn list_pots(&self, status: Option<PotStatus>) -> EngineResult<Vec<Pot>> {
        self.inner.list_pots(status).await
    }

    async fn append_pot_entry(&self, entry: &PotEntry) -> EngineResult<()> {
        self.inner.append_pot_entry(entry).await
    }

    async fn list_pot_entries(&self, pot_id: Uuid) -> EngineResult<Vec<PotEntry>> {
        self.inner.list_pot_entries(pot_id).await
    }

    async fn insert_battle(&self, battle: &Battle) -> EngineResult<()> {
        self.inner.insert_battle(battle).await
    }

    async fn fetch_battle(&self, battle_id: Uuid) -> EngineResult<Option<Battle>> {
        self.inner.fetch_battle(battle_id).await
    }

    async fn update_battle(&self, battle: &Battle) -> EngineResult<Battle> {
        Self::gate(&self.battle_update_skips, &self.battle_update_failures)?;
        self.inner.update_battle(battle).await
    }

    async fn list_battles(
        &self,
        status: Option<crate::types::BattleStatus>,
    ) -> EngineResult<Vec<Battle>> {
        self.inner.list_battles(status).await
    }

    async fn append_participant(&self, participant: &BattleParticipant) -> EngineResult<()> {
        self.inner.append_participant(participant).await
    }

    async fn list_participants(&self, battle_id: Uuid) -> EngineResult<Vec<BattleParticipant>> {
        self.inner.list_participants(battle_id).await
    }

    async fn update_participant(&self, participant: &BattleParticipant) -> EngineResult<()> {
        self.inner.update_participant(participant).await
    }

    async fn append_round(&self, round: &BattleRound) -> EngineResult<()> {
        self.inner.append_round(round).await
    }

    async fn list_rounds(&self, battle_id: Uuid) -> EngineResult<Vec<BattleRound>> {
        self.inner.list_rounds(battle_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_pot() -> Pot {
        Pot {
            id: Uuid::new_v4(),
            entry_cost: 500,
            max_tickets: 10,
            max_per_user: None,
            tickets_sold: 0,
            status: PotStatus::Open,
            created_at: Utc::now(),
            expires_at: None,
            server_seed_hash: "hash".to_string(),
            revealed_seed: None,
            winner_entry_id: None,
            rake_bps: 0,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_fetch_round_trip() {
        let store = MemoryStore::new();
        let pot = sample_pot();

        store.insert_pot(&pot).await.unwrap();
        let fetched = store.fetch_pot(pot.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, pot.id);

        assert!(store.insert_pot(&pot).await.is_err());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryStore::new();
        let mut pot = sample_pot();
        store.insert_pot(&pot).await.unwrap();

        pot.tickets_sold = 4;
        let stored = store.update_pot(&pot).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.tickets_sold, 4);
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let store = MemoryStore::new();
        let mut pot = sample_pot();
        store.insert_pot(&pot).await.unwrap();

        pot.tickets_sold = 4;
        store.update_pot(&pot).await.unwrap();

        // Same version again: the first update already bumped the store.
        pot.tickets_sold = 9;
        let result = store.update_pot(&pot).await;
        assert!(matches!(result, Err(EngineError::Storage(_))));
    }

    #[tokio::test]
    async fn test_entries_listed_in_range_order() {
        let store = MemoryStore::new();
        let pot_id = Uuid::new_v4();

        for (start, end) in [(4u32, 10u32), (0, 4)] {
            store
                .append_pot_entry(&PotEntry {
                    id: Uuid::new_v4(),
                    pot_id,
                    user_id: "u".to_string(),
                    ticket_count: end - start,
                    ticket_start: start,
                    ticket_end: end,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let entries = store.list_pot_entries(pot_id).await.unwrap();
        assert_eq!(entries[0].ticket_start, 0);
        assert_eq!(entries[1].ticket_start, 4);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_scripted_updates() {
        let store = FlakyStore::new();
        let mut pot = sample_pot();
        store.insert_pot(&pot).await.unwrap();

        store.fail_pot_updates(1, 1);

        pot.tickets_sold = 1;
        pot = store.update_pot(&pot).await.unwrap();

        pot.tickets_sold = 2;
        assert!(matches!(
            store.update_pot(&pot).await,
            Err(EngineError::Storage(_))
        ));

        // Script exhausted: the failed call was never applied, and updates
        // pass again.
        let stored = store.update_pot(&pot).await.unwrap();
        assert_eq!(stored.tickets_sold, 2);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: EngineResult<()> = bounded(
            "storage.sleep",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(EngineError::GatewayTimeout {
                operation: "storage.sleep",
                ..
            })
        ));
    }
}
