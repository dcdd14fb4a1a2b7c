//! Battle lifecycle manager.
//!
//! Drives `waiting -> locking -> active -> completed` (or `-> cancelled`
//! before rounds start). Rounds are engine-driven: locking a battle reveals
//! the vaulted server seed and resolves every (case, participant) round in
//! one pass. The reveal is persisted with the locking transition, so any
//! process can finish a resolution that died mid-flight.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cases::CaseCatalog;
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::fairness::FairnessEngine;
use crate::ledger::{operation_id, LedgerGateway};
use crate::metrics::EngineMetrics;
use crate::store::{bounded, StorageGateway};
use crate::types::{
    Battle, BattleOutcome, BattleParticipant, BattleRound, BattleStatus, TiePolicy,
};

#[derive(Debug, Clone)]
pub struct CreateBattleParams {
    /// Cases opened in this order, one round per participant each.
    pub case_ids: Vec<String>,
    pub max_participants: u32,
    /// Client seed for the creator's own seat.
    pub client_seed: Option<String>,
}

/// One round of a completed battle, replayed against the revealed seed.
#[derive(Debug, Clone, Serialize)]
pub struct RoundCheck {
    pub case_index: u32,
    pub participant_index: u32,
    pub user_id: String,
    pub roll: u64,
    pub item_name: String,
    /// Roll recomputed from the published inputs; must equal `roll`.
    pub recomputed_roll: Option<u64>,
    pub roll_message: Option<String>,
}

/// Replay bundle for third-party verification of a battle.
#[derive(Debug, Clone, Serialize)]
pub struct BattleVerification {
    pub battle_id: Uuid,
    pub status: BattleStatus,
    pub server_seed_hash: String,
    pub revealed_seed: Option<String>,
    pub seed_matches_commitment: Option<bool>,
    pub rounds: Vec<RoundCheck>,
}

pub struct BattleService {
    store: Arc<dyn StorageGateway>,
    ledger: Arc<dyn LedgerGateway>,
    fairness: Arc<FairnessEngine>,
    catalog: Arc<CaseCatalog>,
    metrics: Arc<EngineMetrics>,
    config: EngineConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl BattleService {
    pub fn new(
        store: Arc<dyn StorageGateway>,
        ledger: Arc<dyn LedgerGateway>,
        fairness: Arc<FairnessEngine>,
        catalog: Arc<CaseCatalog>,
        metrics: Arc<EngineMetrics>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            fairness,
            catalog,
            metrics,
            config,
            locks: DashMap::new(),
        }
    }

    fn entity_lock(&self, battle_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(battle_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let result = bounded(operation, self.config.gateway_timeout(), fut).await;
        if matches!(result, Err(EngineError::GatewayTimeout { .. })) {
            EngineMetrics::incr(&self.metrics.gateway_timeouts);
        }
        result
    }

    fn validate_client_seed(&self, client_seed: &str) -> EngineResult<()> {
        if client_seed.len() > self.config.limits.max_client_seed_len {
            return Err(EngineError::InvalidArgument {
                field: "client_seed",
                reason: format!(
                    "must be at most {} bytes",
                    self.config.limits.max_client_seed_len
                ),
            });
        }
        Ok(())
    }

    /// Create a battle and seat the creator in it. The creator pays the
    /// entry cost like anyone else; if that debit fails the battle is
    /// cancelled before anyone can see it.
    pub async fn create_battle(
        &self,
        creator_id: &str,
        params: CreateBattleParams,
    ) -> EngineResult<Battle> {
        if creator_id.is_empty() {
            return Err(EngineError::InvalidArgument {
                field: "user_id",
                reason: "user id must be non-empty".to_string(),
            });
        }
        if params.case_ids.is_empty() {
            return Err(EngineError::InvalidArgument {
                field: "case_ids",
                reason: "a battle needs at least one case".to_string(),
            });
        }
        if params.case_ids.len() > self.config.limits.max_cases_per_battle as usize {
            return Err(EngineError::InvalidArgument {
                field: "case_ids",
                reason: format!(
                    "at most {} cases per battle",
                    self.config.limits.max_cases_per_battle
                ),
            });
        }
        if params.max_participants < 2
            || params.max_participants > self.config.limits.max_participants_cap
        {
            return Err(EngineError::InvalidArgument {
                field: "max_participants",
                reason: format!(
                    "must be between 2 and {}",
                    self.config.limits.max_participants_cap
                ),
            });
        }

        let entry_cost = self.catalog.entry_cost(&params.case_ids)?;
        if entry_cost
            .checked_mul(params.max_participants as u64)
            .is_none()
        {
            return Err(EngineError::InvalidArgument {
                field: "case_ids",
                reason: "case prices times seats overflows a 64-bit pool".to_string(),
            });
        }
        let battle_id = Uuid::new_v4();
        let server_seed_hash = self.fairness.commit_for(battle_id);

        let battle = Battle {
            id: battle_id,
            creator_id: creator_id.to_string(),
            status: BattleStatus::Waiting,
            max_participants: params.max_participants,
            current_participants: 0,
            case_ids: params.case_ids,
            entry_cost,
            created_at: Utc::now(),
            server_seed_hash,
            revealed_seed: None,
            winner_user_ids: vec![],
            rake_bps: self.config.fairness.rake_bps,
            tie_policy: self.config.fairness.tie_policy,
            version: 0,
        };

        self.call("storage.insert_battle", self.store.insert_battle(&battle))
            .await?;
        EngineMetrics::incr(&self.metrics.battles_created);
        info!(
            "Battle {} created by {}: {} cases, entry {}, up to {} seats",
            battle_id,
            creator_id,
            battle.case_ids.len(),
            entry_cost,
            battle.max_participants
        );

        match self
            .join_battle(battle_id, creator_id, params.client_seed)
            .await
        {
            Ok(_) => self.get_battle(battle_id).await,
            Err(err) => {
                warn!(
                    "Battle {} creator could not take a seat ({}), cancelling",
                    battle_id, err
                );
                if let Err(cancel_err) = self.cancel_battle(battle_id).await {
                    warn!(
                        "Battle {} cleanup cancel failed, battle stays waiting: {}",
                        battle_id, cancel_err
                    );
                }
                Err(err)
            }
        }
    }

    pub async fn join_battle(
        &self,
        battle_id: Uuid,
        user_id: &str,
        client_seed: Option<String>,
    ) -> EngineResult<BattleParticipant> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidArgument {
                field: "user_id",
                reason: "user id must be non-empty".to_string(),
            });
        }
        let client_seed = client_seed.unwrap_or_default();
        self.validate_client_seed(&client_seed)?;

        let lock = self.entity_lock(battle_id);
        let _guard = lock.lock().await;

        let mut battle = self
            .call("storage.fetch_battle", self.store.fetch_battle(battle_id))
            .await?
            .ok_or(EngineError::BattleNotFound(battle_id))?;

        if battle.status != BattleStatus::Waiting {
            return Err(EngineError::BattleNotOpen(battle_id));
        }

        let participants = self
            .call(
                "storage.list_participants",
                self.store.list_participants(battle_id),
            )
            .await?;

        // A join that failed between its seat append and the battle update
        // leaves the counter behind the persisted seats. Heal it before
        // checking capacity, or the battle hands out more seats than it has.
        let healed = participants.len() as u32 > battle.current_participants;
        if healed {
            battle.current_participants = participants.len() as u32;
        }

        if let Some(seat) = participants.iter().find(|p| p.user_id == user_id) {
            // The seat's debit receipt already exists, so a retry gets the
            // seat back instead of a rejection or a second charge.
            if healed {
                self.call("storage.update_battle", self.store.update_battle(&battle))
                    .await?;
                return Ok(seat.clone());
            }
            return Err(EngineError::AlreadyParticipant {
                battle_id,
                user_id: user_id.to_string(),
            });
        }

        if battle.is_full() {
            return Err(EngineError::BattleFull(battle_id));
        }

        let op_id = operation_id(battle_id, "join", user_id);
        self.call(
            "ledger.debit",
            self.ledger
                .debit(op_id, user_id, battle.entry_cost, "battle entry"),
        )
        .await?;

        let participant = BattleParticipant {
            id: Uuid::new_v4(),
            battle_id,
            user_id: user_id.to_string(),
            client_seed,
            joined_at: Utc::now(),
            cumulative_value: 0,
        };
        self.call(
            "storage.append_participant",
            self.store.append_participant(&participant),
        )
        .await?;

        battle.current_participants += 1;
        self.call("storage.update_battle", self.store.update_battle(&battle))
            .await?;

        EngineMetrics::incr(&self.metrics.battle_joins);
        EngineMetrics::add(&self.metrics.amount_debited, battle.entry_cost);
        info!(
            "Battle {} join: user {} took seat {} of {}",
            battle_id, user_id, battle.current_participants, battle.max_participants
        );
        Ok(participant)
    }

    /// Lock a waiting battle and resolve it to completion: reveal the seed,
    /// roll every round, credit the winners. Locking an already-completed
    /// battle returns the recorded outcome without moving funds again.
    pub async fn lock_battle(&self, battle_id: Uuid) -> EngineResult<BattleOutcome> {
        let lock = self.entity_lock(battle_id);
        let _guard = lock.lock().await;

        let mut battle = self
            .call("storage.fetch_battle", self.store.fetch_battle(battle_id))
            .await?
            .ok_or(EngineError::BattleNotFound(battle_id))?;

        match battle.status {
            BattleStatus::Completed => return self.recorded_outcome(&battle).await,
            BattleStatus::Cancelled => {
                return Err(EngineError::InvalidTransition {
                    entity: "battle",
                    id: battle_id,
                    from: battle.status.to_string(),
                    to: BattleStatus::Active.to_string(),
                })
            }
            BattleStatus::Waiting => {
                // Seats whose battle update was lost still count here, the
                // same healing join does, so nobody's stake sits outside the
                // resolution.
                let participants = self
                    .call(
                        "storage.list_participants",
                        self.store.list_participants(battle_id),
                    )
                    .await?;
                if participants.len() as u32 > battle.current_participants {
                    battle.current_participants = participants.len() as u32;
                }
                if battle.current_participants < 2 {
                    return Err(EngineError::NotEnoughParticipants {
                        battle_id,
                        required: 2,
                        current: battle.current_participants,
                    });
                }
                let seed = self.fairness.reveal_for(battle_id).ok_or_else(|| {
                    EngineError::Storage(format!(
                        "server seed for battle {} is no longer held",
                        battle_id
                    ))
                })?;
                battle.status = BattleStatus::Locking;
                // The reveal rides the locking write, so a battle caught
                // mid-resolution stays resolvable after a restart.
                battle.revealed_seed = Some(seed);
                battle = self
                    .call("storage.update_battle", self.store.update_battle(&battle))
                    .await?;
                battle.status = BattleStatus::Active;
                battle = self
                    .call("storage.update_battle", self.store.update_battle(&battle))
                    .await?;
                info!(
                    "Battle {} active: {} participants over {} cases",
                    battle_id,
                    battle.current_participants,
                    battle.case_ids.len()
                );
            }
            // A crashed resolution left the battle mid-flight; resume it.
            BattleStatus::Locking => {
                battle.status = BattleStatus::Active;
                battle = self
                    .call("storage.update_battle", self.store.update_battle(&battle))
                    .await?;
            }
            BattleStatus::Active => {}
        }

        self.resolve(&mut battle).await
    }

    /// Roll all rounds, persist the audit trail, pay the winners, complete.
    /// Every step is idempotent, so a resumed resolution converges on the
    /// same outcome.
    async fn resolve(&self, battle: &mut Battle) -> EngineResult<BattleOutcome> {
        let battle_id = battle.id;
        // Battles locked before the reveal was persisted fall back to the
        // vault. Every roll still checks the seed against the commitment.
        let seed = match battle.revealed_seed.clone() {
            Some(seed) => seed,
            None => self.fairness.reveal_for(battle_id).ok_or_else(|| {
                EngineError::Storage(format!(
                    "server seed for battle {} is no longer held",
                    battle_id
                ))
            })?,
        };

        let mut participants = self
            .call(
                "storage.list_participants",
                self.store.list_participants(battle_id),
            )
            .await?;
        let existing_rounds = self
            .call("storage.list_rounds", self.store.list_rounds(battle_id))
            .await?;

        let mut rounds = Vec::with_capacity(battle.case_ids.len() * participants.len());
        let mut totals = vec![0u64; participants.len()];

        for (case_index, case_id) in battle.case_ids.iter().enumerate() {
            let case = self.catalog.get(case_id)?;
            let total_weight = case.total_weight();

            for (participant_index, participant) in participants.iter().enumerate() {
                let roll = match FairnessEngine::battle_roll(
                    &seed,
                    &battle.server_seed_hash,
                    battle_id,
                    &participant.client_seed,
                    case_index as u32,
                    participant_index as u32,
                    total_weight,
                ) {
                    Ok(roll) => roll,
                    Err(err) => {
                        if matches!(err, EngineError::CommitmentMismatch { .. }) {
                            EngineMetrics::incr(&self.metrics.commitment_mismatches);
                            error!(
                                "Commitment mismatch on battle {}: vaulted seed does not hash to the published commitment",
                                battle_id
                            );
                        }
                        return Err(err);
                    }
                };
                let item = case.item_at_roll(roll).ok_or_else(|| {
                    EngineError::Storage(format!(
                        "roll {} outside the weight table for case '{}'",
                        roll, case.id
                    ))
                })?;

                totals[participant_index] += item.value;
                let round = BattleRound {
                    battle_id,
                    case_index: case_index as u32,
                    case_id: case_id.clone(),
                    participant_index: participant_index as u32,
                    user_id: participant.user_id.clone(),
                    roll,
                    item_name: item.name.clone(),
                    item_value: item.value,
                };

                let already_persisted = existing_rounds.iter().any(|r| {
                    r.case_index == round.case_index
                        && r.participant_index == round.participant_index
                });
                if !already_persisted {
                    self.call("storage.append_round", self.store.append_round(&round))
                        .await?;
                    EngineMetrics::incr(&self.metrics.rounds_resolved);
                }
                rounds.push(round);
            }
        }

        for (index, participant) in participants.iter_mut().enumerate() {
            participant.cumulative_value = totals[index];
            self.call(
                "storage.update_participant",
                self.store.update_participant(participant),
            )
            .await?;
        }

        let top = totals.iter().copied().max().unwrap_or(0);
        let tied: Vec<usize> = totals
            .iter()
            .enumerate()
            .filter(|(_, value)| **value == top)
            .map(|(index, _)| index)
            .collect();
        let winner_indices: Vec<usize> = match battle.tie_policy {
            TiePolicy::Split => tied,
            TiePolicy::DrawOff if tied.len() > 1 => {
                let pick = FairnessEngine::battle_draw_off(
                    &seed,
                    &battle.server_seed_hash,
                    battle_id,
                    tied.len() as u32,
                )?;
                vec![tied[pick as usize]]
            }
            TiePolicy::DrawOff => tied,
        };

        let total_pool = battle.entry_cost * participants.len() as u64;
        // Widened so pool * rake_bps cannot wrap; rake_bps is capped at
        // 10_000, so the result folds back into the pool's range.
        let rake = (total_pool as u128 * battle.rake_bps as u128 / 10_000) as u64;
        let pool = total_pool - rake;
        let share = pool / winner_indices.len() as u64;
        let remainder = pool % winner_indices.len() as u64;

        let mut winner_user_ids = Vec::with_capacity(winner_indices.len());
        let mut payouts = Vec::with_capacity(winner_indices.len());
        for (slot, &index) in winner_indices.iter().enumerate() {
            let user_id = participants[index].user_id.clone();
            // winner_indices ascends in join order, so the remainder cent
            // lands on the earliest joiner among the tied.
            let amount = if slot == 0 { share + remainder } else { share };
            let op_id = operation_id(battle_id, "payout", &user_id);
            self.call(
                "ledger.credit",
                self.ledger
                    .credit(op_id, &user_id, amount, "battle winnings"),
            )
            .await?;
            EngineMetrics::add(&self.metrics.amount_credited, amount);
            winner_user_ids.push(user_id);
            payouts.push(amount);
        }

        battle.status = BattleStatus::Completed;
        battle.revealed_seed = Some(seed.clone());
        battle.winner_user_ids = winner_user_ids.clone();
        let completed = self
            .call("storage.update_battle", self.store.update_battle(battle))
            .await?;
        *battle = completed;
        self.fairness.discard(battle_id);
        self.locks.remove(&battle_id);

        EngineMetrics::incr(&self.metrics.battles_completed);
        info!(
            "Battle {} completed: winners {:?} split {} (rake {})",
            battle_id, winner_user_ids, pool, rake
        );

        Ok(BattleOutcome {
            battle_id,
            winner_user_ids,
            payouts,
            total_pool,
            rake,
            revealed_seed: seed,
            rounds,
        })
    }

    /// Rebuild the outcome of an already-completed battle from persisted
    /// state. Payout math is deterministic, so no funds move here.
    async fn recorded_outcome(&self, battle: &Battle) -> EngineResult<BattleOutcome> {
        let seed = battle.revealed_seed.clone().ok_or_else(|| {
            EngineError::Storage(format!("completed battle {} has no revealed seed", battle.id))
        })?;
        if battle.winner_user_ids.is_empty() {
            return Err(EngineError::Storage(format!(
                "completed battle {} has no recorded winners",
                battle.id
            )));
        }

        let participants = self
            .call(
                "storage.list_participants",
                self.store.list_participants(battle.id),
            )
            .await?;
        let mut rounds = self
            .call("storage.list_rounds", self.store.list_rounds(battle.id))
            .await?;
        rounds.sort_by_key(|round| (round.case_index, round.participant_index));

        let total_pool = battle.entry_cost * participants.len() as u64;
        let rake = (total_pool as u128 * battle.rake_bps as u128 / 10_000) as u64;
        let pool = total_pool - rake;
        let winners = battle.winner_user_ids.len() as u64;
        let share = pool / winners;
        let remainder = pool % winners;

        let payouts = (0..battle.winner_user_ids.len())
            .map(|slot| if slot == 0 { share + remainder } else { share })
            .collect();

        Ok(BattleOutcome {
            battle_id: battle.id,
            winner_user_ids: battle.winner_user_ids.clone(),
            payouts,
            total_pool,
            rake,
            revealed_seed: seed,
            rounds,
        })
    }

    /// Cancel a battle that has not started rounds, refunding every seat.
    pub async fn cancel_battle(&self, battle_id: Uuid) -> EngineResult<Battle> {
        let lock = self.entity_lock(battle_id);
        let _guard = lock.lock().await;

        let mut battle = self
            .call("storage.fetch_battle", self.store.fetch_battle(battle_id))
            .await?
            .ok_or(EngineError::BattleNotFound(battle_id))?;

        if !battle.status.can_transition_to(BattleStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                entity: "battle",
                id: battle_id,
                from: battle.status.to_string(),
                to: BattleStatus::Cancelled.to_string(),
            });
        }

        let participants = self
            .call(
                "storage.list_participants",
                self.store.list_participants(battle_id),
            )
            .await?;

        let refunds = participants.iter().map(|participant| {
            let op_id = operation_id(battle_id, "refund", &participant.user_id);
            let ledger = self.ledger.clone();
            let user_id = participant.user_id.clone();
            let amount = battle.entry_cost;
            async move {
                ledger
                    .credit(op_id, &user_id, amount, "battle cancelled")
                    .await
                    .map(|receipt| receipt.amount)
            }
        });
        let mut refunded = 0u64;
        for result in futures::future::join_all(refunds).await {
            refunded += result?;
        }

        battle.status = BattleStatus::Cancelled;
        let battle = self
            .call("storage.update_battle", self.store.update_battle(&battle))
            .await?;
        self.fairness.discard(battle_id);
        self.locks.remove(&battle_id);

        EngineMetrics::incr(&self.metrics.battles_cancelled);
        EngineMetrics::add(&self.metrics.amount_credited, refunded);
        warn!(
            "Battle {} cancelled, refunded {} across {} seats",
            battle_id,
            refunded,
            participants.len()
        );
        Ok(battle)
    }

    pub async fn get_battle(&self, battle_id: Uuid) -> EngineResult<Battle> {
        self.call("storage.fetch_battle", self.store.fetch_battle(battle_id))
            .await?
            .ok_or(EngineError::BattleNotFound(battle_id))
    }

    pub async fn list_battles(&self, status: Option<BattleStatus>) -> EngineResult<Vec<Battle>> {
        self.call("storage.list_battles", self.store.list_battles(status))
            .await
    }

    pub async fn participants(&self, battle_id: Uuid) -> EngineResult<Vec<BattleParticipant>> {
        self.get_battle(battle_id).await?;
        self.call(
            "storage.list_participants",
            self.store.list_participants(battle_id),
        )
        .await
    }

    pub async fn rounds(&self, battle_id: Uuid) -> EngineResult<Vec<BattleRound>> {
        self.get_battle(battle_id).await?;
        let mut rounds = self
            .call("storage.list_rounds", self.store.list_rounds(battle_id))
            .await?;
        rounds.sort_by_key(|round| (round.case_index, round.participant_index));
        Ok(rounds)
    }

    /// Everything a third party needs to replay every roll of the battle.
    pub async fn verify_battle(&self, battle_id: Uuid) -> EngineResult<BattleVerification> {
        let battle = self.get_battle(battle_id).await?;
        let participants = self
            .call(
                "storage.list_participants",
                self.store.list_participants(battle_id),
            )
            .await?;
        let rounds = self.rounds(battle_id).await?;

        let seed_matches = battle
            .revealed_seed
            .as_deref()
            .map(|seed| FairnessEngine::matches_commitment(seed, &battle.server_seed_hash));

        let checks = rounds
            .iter()
            .map(|round| {
                let (recomputed_roll, roll_message) = match battle.revealed_seed.as_deref() {
                    Some(seed) => {
                        let client_seed = participants
                            .get(round.participant_index as usize)
                            .map(|p| p.client_seed.as_str())
                            .unwrap_or_default();
                        let message = FairnessEngine::battle_roll_message(
                            battle_id,
                            seed,
                            client_seed,
                            round.case_index,
                            round.participant_index,
                        );
                        let recomputed = self
                            .catalog
                            .get(&round.case_id)
                            .ok()
                            .and_then(|case| {
                                FairnessEngine::battle_roll(
                                    seed,
                                    &battle.server_seed_hash,
                                    battle_id,
                                    client_seed,
                                    round.case_index,
                                    round.participant_index,
                                    case.total_weight(),
                                )
                                .ok()
                            });
                        (recomputed, Some(message))
                    }
                    None => (None, None),
                };

                RoundCheck {
                    case_index: round.case_index,
                    participant_index: round.participant_index,
                    user_id: round.user_id.clone(),
                    roll: round.roll,
                    item_name: round.item_name.clone(),
                    recomputed_roll,
                    roll_message,
                }
            })
            .collect();

        Ok(BattleVerification {
            battle_id,
            status: battle.status,
            server_seed_hash: battle.server_seed_hash,
            revealed_seed: battle.revealed_seed,
            seed_matches_commitment: seed_matches,
            rounds: checks,
        })
    }
}
