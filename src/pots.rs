//! Pot lifecycle manager.
//!
//! Drives `open -> locked -> settled` (or `-> cancelled`) with all funds
//! movement through the ledger gateway and all randomness through the
//! fairness engine. Mutations on one pot are serialized behind a per-pot
//! mutex; the storage layer's version check backstops any second writer.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::fairness::FairnessEngine;
use crate::ledger::{operation_id, LedgerGateway};
use crate::metrics::EngineMetrics;
use crate::store::{bounded, StorageGateway};
use crate::types::{Pot, PotEntry, PotOutcome, PotStatus};

#[derive(Debug, Clone)]
pub struct CreatePotParams {
    pub entry_cost: u64,
    pub max_tickets: u32,
    pub max_per_user: Option<u32>,
    pub expires_in_minutes: Option<i64>,
}

/// Replay bundle for third-party verification of a pot draw.
#[derive(Debug, Clone, Serialize)]
pub struct PotVerification {
    pub pot_id: Uuid,
    pub status: PotStatus,
    pub server_seed_hash: String,
    pub tickets_sold: u32,
    /// Absent until settlement reveals the seed.
    pub revealed_seed: Option<String>,
    pub winning_ticket: Option<u32>,
    pub winner_entry_id: Option<Uuid>,
    /// The exact string hashed for the draw, reproducible offline.
    pub draw_message: Option<String>,
    pub seed_matches_commitment: Option<bool>,
}

pub struct PotService {
    store: Arc<dyn StorageGateway>,
    ledger: Arc<dyn LedgerGateway>,
    fairness: Arc<FairnessEngine>,
    metrics: Arc<EngineMetrics>,
    config: EngineConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl PotService {
    pub fn new(
        store: Arc<dyn StorageGateway>,
        ledger: Arc<dyn LedgerGateway>,
        fairness: Arc<FairnessEngine>,
        metrics: Arc<EngineMetrics>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            fairness,
            metrics,
            config,
            locks: DashMap::new(),
        }
    }

    fn entity_lock(&self, pot_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(pot_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Gateway call with the configured deadline; timeouts are counted.
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

    pub async fn create_pot(&self, params: CreatePotParams) -> EngineResult<Pot> {
        if params.entry_cost == 0 {
            return Err(EngineError::InvalidArgument {
                field: "entry_cost",
                reason: "entry cost must be positive".to_string(),
            });
        }
        if params.max_tickets == 0 || params.max_tickets > self.config.limits.max_tickets_cap {
            return Err(EngineError::InvalidArgument {
                field: "max_tickets",
                reason: format!(
                    "must be between 1 and {}",
                    self.config.limits.max_tickets_cap
                ),
            });
        }
        if params
            .entry_cost
            .checked_mul(params.max_tickets as u64)
            .is_none()
        {
            return Err(EngineError::InvalidArgument {
                field: "entry_cost",
                reason: "entry cost times max tickets overflows a 64-bit pool".to_string(),
            });
        }
        if params.max_per_user == Some(0) {
            return Err(EngineError::InvalidArgument {
                field: "max_per_user",
                reason: "per-user limit must be positive when set".to_string(),
            });
        }
        if matches!(params.expires_in_minutes, Some(minutes) if minutes <= 0) {
            return Err(EngineError::InvalidArgument {
                field: "expires_in_minutes",
                reason: "expiry must be in the future".to_string(),
            });
        }

        let pot_id = Uuid::new_v4();
        // Commitment is generated and published before the first ticket can
        // possibly sell.
        let server_seed_hash = self.fairness.commit_for(pot_id);
        let now = Utc::now();

        let pot = Pot {
            id: pot_id,
            entry_cost: params.entry_cost,
            max_tickets: params.max_tickets,
            max_per_user: params.max_per_user,
            tickets_sold: 0,
            status: PotStatus::Open,
            created_at: now,
            expires_at: params
                .expires_in_minutes
                .map(|minutes| now + ChronoDuration::minutes(minutes)),
            server_seed_hash,
            revealed_seed: None,
            winner_entry_id: None,
            rake_bps: self.config.fairness.rake_bps,
            version: 0,
        };

        self.call("storage.insert_pot", self.store.insert_pot(&pot))
            .await?;

        EngineMetrics::incr(&self.metrics.pots_created);
        info!(
            "Pot {} created: {} tickets at {} each, expires {:?}",
            pot.id, pot.max_tickets, pot.entry_cost, pot.expires_at
        );
        Ok(pot)
    }

    pub async fn join_pot(
        &self,
        pot_id: Uuid,
        user_id: &str,
        ticket_count: u32,
    ) -> EngineResult<PotEntry> {
        if ticket_count == 0 {
            return Err(EngineError::InvalidArgument {
                field: "ticket_count",
                reason: "must buy at least one ticket".to_string(),
            });
        }
        if user_id.is_empty() {
            return Err(EngineError::InvalidArgument {
                field: "user_id",
                reason: "user id must be non-empty".to_string(),
            });
        }

        let lock = self.entity_lock(pot_id);
        let _guard = lock.lock().await;

        let mut pot = self
            .call("storage.fetch_pot", self.store.fetch_pot(pot_id))
            .await?
            .ok_or(EngineError::PotNotFound(pot_id))?;

        if pot.status != PotStatus::Open {
            return Err(EngineError::PotNotOpen(pot_id));
        }
        let now = Utc::now();
        if pot.is_expired(now) {
            return Err(EngineError::PotExpired {
                pot_id,
                // is_expired only returns true when the field is set
                expired_at: pot.expires_at.unwrap_or(now),
            });
        }
        let entries = self
            .call("storage.list_pot_entries", self.store.list_pot_entries(pot_id))
            .await?;

        // A join that crashed between its entry append and the pot update
        // leaves tickets_sold behind the persisted entries. Heal the counter
        // before admitting anyone, and hand a retrying buyer the orphaned
        // entry back instead of selling the same range twice.
        let persisted_end = entries
            .iter()
            .map(|entry| entry.ticket_end)
            .max()
            .unwrap_or(0);
        if persisted_end > pot.tickets_sold {
            let orphan = entries
                .iter()
                .find(|entry| {
                    entry.ticket_start >= pot.tickets_sold
                        && entry.user_id == user_id
                        && entry.ticket_count == ticket_count
                })
                .cloned();
            pot.tickets_sold = persisted_end;

            if let Some(orphan) = orphan {
                let cost = orphan.ticket_count as u64 * pot.entry_cost;
                let op_id =
                    operation_id(pot_id, &format!("join:{}", orphan.ticket_start), user_id);
                self.call(
                    "ledger.debit",
                    self.ledger.debit(op_id, user_id, cost, "pot entry"),
                )
                .await?;
                self.call("storage.update_pot", self.store.update_pot(&pot))
                    .await?;

                EngineMetrics::incr(&self.metrics.pot_joins);
                EngineMetrics::add(&self.metrics.tickets_sold, orphan.ticket_count as u64);
                EngineMetrics::add(&self.metrics.amount_debited, cost);
                info!(
                    "Pot {} join: user {} reclaimed tickets [{}, {}) after an interrupted write",
                    pot_id, user_id, orphan.ticket_start, orphan.ticket_end
                );
                return Ok(orphan);
            }
        }

        // Open pots keep tickets_sold <= max_tickets, so comparing against
        // the remainder cannot wrap no matter how large the request is.
        let remaining = pot.remaining_tickets();
        if ticket_count > remaining {
            return Err(EngineError::TicketsExhausted {
                pot_id,
                remaining,
                requested: ticket_count,
            });
        }

        if let Some(limit) = pot.max_per_user {
            let held: u32 = entries
                .iter()
                .filter(|entry| entry.user_id == user_id)
                .map(|entry| entry.ticket_count)
                .sum();
            if held as u64 + ticket_count as u64 > limit as u64 {
                return Err(EngineError::PerUserLimitExceeded {
                    pot_id,
                    limit,
                    held,
                    requested: ticket_count,
                });
            }
        }

        let ticket_start = pot.tickets_sold;
        let cost = ticket_count as u64 * pot.entry_cost;
        // The op id is a function of the reserved range, so a retry after a
        // partial failure replays the same debit instead of charging twice.
        let op_id = operation_id(pot_id, &format!("join:{}", ticket_start), user_id);
        self.call(
            "ledger.debit",
            self.ledger.debit(op_id, user_id, cost, "pot entry"),
        )
        .await?;

        let entry = PotEntry {
            id: Uuid::new_v4(),
            pot_id,
            user_id: user_id.to_string(),
            ticket_count,
            ticket_start,
            ticket_end: ticket_start + ticket_count,
            created_at: now,
        };
        self.call("storage.append_pot_entry", self.store.append_pot_entry(&entry))
            .await?;

        pot.tickets_sold += entry.ticket_count;
        self.call("storage.update_pot", self.store.update_pot(&pot))
            .await?;

        EngineMetrics::incr(&self.metrics.pot_joins);
        EngineMetrics::add(&self.metrics.tickets_sold, entry.ticket_count as u64);
        EngineMetrics::add(&self.metrics.amount_debited, cost);
        info!(
            "Pot {} join: user {} took tickets [{}, {}) for {}",
            pot_id, user_id, entry.ticket_start, entry.ticket_end, cost
        );
        Ok(entry)
    }

    pub async fn lock_pot(&self, pot_id: Uuid) -> EngineResult<Pot> {
        let lock = self.entity_lock(pot_id);
        let _guard = lock.lock().await;

        let mut pot = self
            .call("storage.fetch_pot", self.store.fetch_pot(pot_id))
            .await?
            .ok_or(EngineError::PotNotFound(pot_id))?;

        if pot.status != PotStatus::Open {
            return Err(EngineError::PotNotOpen(pot_id));
        }

        // Count entries whose pot update was lost, the same healing join
        // does, so the draw range always covers every persisted entry.
        let entries = self
            .call("storage.list_pot_entries", self.store.list_pot_entries(pot_id))
            .await?;
        let persisted_end = entries
            .iter()
            .map(|entry| entry.ticket_end)
            .max()
            .unwrap_or(0);
        if persisted_end > pot.tickets_sold {
            pot.tickets_sold = persisted_end;
        }
        if pot.tickets_sold == 0 {
            return Err(EngineError::NoEntries(pot_id));
        }

        pot.status = PotStatus::Locked;
        let pot = self
            .call("storage.update_pot", self.store.update_pot(&pot))
            .await?;

        EngineMetrics::incr(&self.metrics.pots_locked);
        info!("Pot {} locked with {} tickets sold", pot_id, pot.tickets_sold);
        Ok(pot)
    }

    /// Settle a locked pot with the revealed seed. Passing `None` uses the
    /// seed vaulted at creation. Settling an already-settled pot returns the
    /// recorded outcome without moving funds again.
    pub async fn settle_pot(
        &self,
        pot_id: Uuid,
        reveal_seed: Option<&str>,
    ) -> EngineResult<PotOutcome> {
        let lock = self.entity_lock(pot_id);
        let _guard = lock.lock().await;

        let mut pot = self
            .call("storage.fetch_pot", self.store.fetch_pot(pot_id))
            .await?
            .ok_or(EngineError::PotNotFound(pot_id))?;

        if pot.status == PotStatus::Settled {
            return self.recorded_outcome(&pot).await;
        }
        if pot.status != PotStatus::Locked {
            return Err(EngineError::PotNotLocked(pot_id));
        }

        let seed = match reveal_seed {
            Some(seed) => seed.to_string(),
            None => self
                .fairness
                .reveal_for(pot_id)
                .ok_or(EngineError::InvalidArgument {
                    field: "reveal_seed",
                    reason: "no reveal seed supplied and none held for this pot".to_string(),
                })?,
        };

        let winning_ticket = match FairnessEngine::draw_pot_winner(
            &seed,
            &pot.server_seed_hash,
            pot_id,
            pot.tickets_sold,
        ) {
            Ok(index) => index,
            Err(err) => {
                if matches!(err, EngineError::CommitmentMismatch { .. }) {
                    EngineMetrics::incr(&self.metrics.commitment_mismatches);
                    error!(
                        "Commitment mismatch on pot {}: reveal does not hash to the published commitment",
                        pot_id
                    );
                }
                return Err(err);
            }
        };

        let entries = self
            .call("storage.list_pot_entries", self.store.list_pot_entries(pot_id))
            .await?;
        let winner = entries
            .iter()
            .find(|entry| entry.contains_ticket(winning_ticket))
            .ok_or_else(|| {
                EngineError::Storage(format!(
                    "no entry covers winning ticket {} in pot {}",
                    winning_ticket, pot_id
                ))
            })?;

        let pool = pot.pool_value();
        // Widened so pool * rake_bps cannot wrap; rake_bps is capped at
        // 10_000, so the result folds back into the pool's range.
        let rake = (pool as u128 * pot.rake_bps as u128 / 10_000) as u64;
        let payout = pool - rake;

        // Credit before persisting the transition: if the credit fails the
        // pot stays locked and a retry replays the same deterministic op id.
        let payout_op = operation_id(pot_id, "payout", &winner.user_id);
        self.call(
            "ledger.credit",
            self.ledger
                .credit(payout_op, &winner.user_id, payout, "pot payout"),
        )
        .await?;

        pot.status = PotStatus::Settled;
        pot.revealed_seed = Some(seed.clone());
        pot.winner_entry_id = Some(winner.id);
        self.call("storage.update_pot", self.store.update_pot(&pot))
            .await?;
        self.fairness.discard(pot_id);
        self.locks.remove(&pot_id);

        EngineMetrics::incr(&self.metrics.pots_settled);
        EngineMetrics::add(&self.metrics.amount_credited, payout);
        info!(
            "Pot {} settled: ticket {} wins {} for user {} (rake {})",
            pot_id, winning_ticket, payout, winner.user_id, rake
        );

        Ok(PotOutcome {
            pot_id,
            winning_ticket,
            winner_entry_id: winner.id,
            winner_user_id: winner.user_id.clone(),
            payout,
            rake,
            revealed_seed: seed,
        })
    }

    /// Rebuild the outcome of an already-settled pot from persisted state.
    async fn recorded_outcome(&self, pot: &Pot) -> EngineResult<PotOutcome> {
        let seed = pot.revealed_seed.clone().ok_or_else(|| {
            EngineError::Storage(format!("settled pot {} has no revealed seed", pot.id))
        })?;
        let winner_entry_id = pot.winner_entry_id.ok_or_else(|| {
            EngineError::Storage(format!("settled pot {} has no winner entry", pot.id))
        })?;

        let winning_ticket = FairnessEngine::draw_pot_winner(
            &seed,
            &pot.server_seed_hash,
            pot.id,
            pot.tickets_sold,
        )?;

        let entries = self
            .call("storage.list_pot_entries", self.store.list_pot_entries(pot.id))
            .await?;
        let winner = entries
            .iter()
            .find(|entry| entry.id == winner_entry_id)
            .ok_or_else(|| {
                EngineError::Storage(format!(
                    "winner entry {} missing from pot {}",
                    winner_entry_id, pot.id
                ))
            })?;

        let pool = pot.pool_value();
        let rake = (pool as u128 * pot.rake_bps as u128 / 10_000) as u64;

        Ok(PotOutcome {
            pot_id: pot.id,
            winning_ticket,
            winner_entry_id,
            winner_user_id: winner.user_id.clone(),
            payout: pool - rake,
            rake,
            revealed_seed: seed,
        })
    }

    /// Cancel an open or locked pot, refunding every entry exactly once.
    /// Cancelling a terminal pot returns `InvalidTransition`.
    pub async fn cancel_pot(&self, pot_id: Uuid) -> EngineResult<Pot> {
        let lock = self.entity_lock(pot_id);
        let _guard = lock.lock().await;

        let mut pot = self
            .call("storage.fetch_pot", self.store.fetch_pot(pot_id))
            .await?
            .ok_or(EngineError::PotNotFound(pot_id))?;

        if !pot.status.can_transition_to(PotStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                entity: "pot",
                id: pot_id,
                from: pot.status.to_string(),
                to: PotStatus::Cancelled.to_string(),
            });
        }

        let entries = self
            .call("storage.list_pot_entries", self.store.list_pot_entries(pot_id))
            .await?;

        let refunds = entries.iter().map(|entry| {
            let amount = entry.ticket_count as u64 * pot.entry_cost;
            let op_id = operation_id(pot_id, &format!("refund:{}", entry.id), &entry.user_id);
            let ledger = self.ledger.clone();
            let user_id = entry.user_id.clone();
            async move {
                ledger
                    .credit(op_id, &user_id, amount, "pot cancelled")
                    .await
                    .map(|receipt| receipt.amount)
            }
        });
        let mut refunded = 0u64;
        for result in futures::future::join_all(refunds).await {
            refunded += result?;
        }

        pot.status = PotStatus::Cancelled;
        let pot = self
            .call("storage.update_pot", self.store.update_pot(&pot))
            .await?;
        self.fairness.discard(pot_id);
        self.locks.remove(&pot_id);

        EngineMetrics::incr(&self.metrics.pots_cancelled);
        EngineMetrics::add(&self.metrics.amount_credited, refunded);
        warn!(
            "Pot {} cancelled, refunded {} across {} entries",
            pot_id,
            refunded,
            entries.len()
        );
        Ok(pot)
    }

    pub async fn get_pot(&self, pot_id: Uuid) -> EngineResult<Pot> {
        self.call("storage.fetch_pot", self.store.fetch_pot(pot_id))
            .await?
            .ok_or(EngineError::PotNotFound(pot_id))
    }

    pub async fn list_pots(&self, status: Option<PotStatus>) -> EngineResult<Vec<Pot>> {
        self.call("storage.list_pots", self.store.list_pots(status))
            .await
    }

    pub async fn entries(&self, pot_id: Uuid) -> EngineResult<Vec<PotEntry>> {
        // Surface NotFound for unknown pots rather than an empty list.
        self.get_pot(pot_id).await?;
        self.call("storage.list_pot_entries", self.store.list_pot_entries(pot_id))
            .await
    }

    /// Everything a third party needs to replay the draw. Pre-settlement the
    /// bundle carries only the commitment.
    pub async fn verify_pot(&self, pot_id: Uuid) -> EngineResult<PotVerification> {
        let pot = self.get_pot(pot_id).await?;

        let mut verification = PotVerification {
            pot_id,
            status: pot.status,
            server_seed_hash: pot.server_seed_hash.clone(),
            tickets_sold: pot.tickets_sold,
            revealed_seed: pot.revealed_seed.clone(),
            winning_ticket: None,
            winner_entry_id: pot.winner_entry_id,
            draw_message: None,
            seed_matches_commitment: None,
        };

        if let Some(seed) = &pot.revealed_seed {
            let matches = FairnessEngine::matches_commitment(seed, &pot.server_seed_hash);
            verification.seed_matches_commitment = Some(matches);
            verification.draw_message = Some(FairnessEngine::pot_draw_message(pot_id, seed));
            if matches {
                verification.winning_ticket = Some(FairnessEngine::draw_pot_winner(
                    seed,
                    &pot.server_seed_hash,
                    pot_id,
                    pot.tickets_sold,
                )?);
            }
        }

        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::store::{FlakyStore, MemoryStore};

    fn service() -> (PotService, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let service = PotService::new(
            Arc::new(MemoryStore::new()),
            ledger.clone(),
            Arc::new(FairnessEngine::new()),
            Arc::new(EngineMetrics::new()),
            EngineConfig::for_tests(),
        );
        (service, ledger)
    }

    fn service_over(store: Arc<FlakyStore>) -> (PotService, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let service = PotService::new(
            store,
            ledger.clone(),
            Arc::new(FairnessEngine::new()),
            Arc::new(EngineMetrics::new()),
            EngineConfig::for_tests(),
        );
        (service, ledger)
    }

    fn params(entry_cost: u64, max_tickets: u32) -> CreatePotParams {
        CreatePotParams {
            entry_cost,
            max_tickets,
            max_per_user: None,
            expires_in_minutes: None,
        }
    }

    #[tokio::test]
    async fn test_create_validates_inputs() {
        let (service, _) = service();

        assert!(matches!(
            service.create_pot(params(0, 10)).await,
            Err(EngineError::InvalidArgument { field: "entry_cost", .. })
        ));
        assert!(matches!(
            service.create_pot(params(5, 0)).await,
            Err(EngineError::InvalidArgument { field: "max_tickets", .. })
        ));

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        assert_eq!(pot.status, PotStatus::Open);
        assert_eq!(pot.server_seed_hash.len(), 64);
        assert!(pot.revealed_seed.is_none());
    }

    #[tokio::test]
    async fn test_join_assigns_contiguous_ranges() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 1000);
        ledger.seed_balance("bob", 1000);

        let pot = service.create_pot(params(5, 10)).await.unwrap();

        let a = service.join_pot(pot.id, "alice", 4).await.unwrap();
        assert_eq!((a.ticket_start, a.ticket_end), (0, 4));

        let b = service.join_pot(pot.id, "bob", 3).await.unwrap();
        assert_eq!((b.ticket_start, b.ticket_end), (4, 7));

        assert_eq!(service.get_pot(pot.id).await.unwrap().tickets_sold, 7);
        assert_eq!(ledger.balance("alice").await.unwrap(), 980);
        assert_eq!(ledger.balance("bob").await.unwrap(), 985);
    }

    #[tokio::test]
    async fn test_join_respects_capacity_and_per_user_limit() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 10_000);

        let pot = service
            .create_pot(CreatePotParams {
                entry_cost: 5,
                max_tickets: 10,
                max_per_user: Some(6),
                expires_in_minutes: None,
            })
            .await
            .unwrap();

        service.join_pot(pot.id, "alice", 4).await.unwrap();

        let over_limit = service.join_pot(pot.id, "alice", 3).await;
        assert!(matches!(
            over_limit,
            Err(EngineError::PerUserLimitExceeded {
                limit: 6,
                held: 4,
                requested: 3,
                ..
            })
        ));

        let exhausted = service.join_pot(pot.id, "alice", 11).await;
        assert!(matches!(
            exhausted,
            Err(EngineError::TicketsExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_rejects_counts_past_capacity_boundary() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 1000);
        ledger.seed_balance("mallory", 1000);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 4).await.unwrap();

        // A count big enough to wrap 32-bit math still reads as exhausted.
        let huge = service.join_pot(pot.id, "mallory", u32::MAX - 1).await;
        assert!(matches!(
            huge,
            Err(EngineError::TicketsExhausted {
                remaining: 6,
                requested,
                ..
            }) if requested == u32::MAX - 1
        ));
        assert_eq!(ledger.balance("mallory").await.unwrap(), 1000);
        assert_eq!(service.get_pot(pot.id).await.unwrap().tickets_sold, 4);

        let exact = service.join_pot(pot.id, "mallory", 6).await.unwrap();
        assert_eq!((exact.ticket_start, exact.ticket_end), (4, 10));
    }

    #[tokio::test]
    async fn test_create_rejects_unrepresentable_pool() {
        let (service, _ledger) = service();

        let result = service.create_pot(params(u64::MAX / 2, 3)).await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidArgument {
                field: "entry_cost",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_join_rejects_insufficient_balance() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 9);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        let result = service.join_pot(pot.id, "alice", 2).await;

        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance { needed: 10, available: 9, .. })
        ));
        assert_eq!(service.get_pot(pot.id).await.unwrap().tickets_sold, 0);
    }

    #[tokio::test]
    async fn test_join_rejects_expired_pot() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 1000);

        let pot = service
            .create_pot(CreatePotParams {
                entry_cost: 5,
                max_tickets: 10,
                max_per_user: None,
                expires_in_minutes: Some(1),
            })
            .await
            .unwrap();

        // Force the stored expiry into the past.
        let mut stale = service.get_pot(pot.id).await.unwrap();
        stale.expires_at = Some(Utc::now() - ChronoDuration::minutes(1));
        service.store.update_pot(&stale).await.unwrap();

        let result = service.join_pot(pot.id, "alice", 1).await;
        assert!(matches!(result, Err(EngineError::PotExpired { .. })));
    }

    #[tokio::test]
    async fn test_join_repairs_interrupted_write_without_overlap() {
        let store = Arc::new(FlakyStore::new());
        let (service, ledger) = service_over(store.clone());
        ledger.seed_balance("alice", 100);
        ledger.seed_balance("bob", 100);

        let pot = service.create_pot(params(5, 12)).await.unwrap();
        service.join_pot(pot.id, "alice", 4).await.unwrap();

        // The entry persists but the tickets_sold bump is lost.
        store.fail_pot_updates(0, 1);
        let torn = service.join_pot(pot.id, "alice", 4).await;
        assert!(matches!(torn, Err(EngineError::Storage(_))));
        assert_eq!(ledger.balance("alice").await.unwrap(), 60);

        // The next buyer lands after the orphaned range, not on top of it.
        let entry = service.join_pot(pot.id, "bob", 4).await.unwrap();
        assert_eq!((entry.ticket_start, entry.ticket_end), (8, 12));
        assert_eq!(service.get_pot(pot.id).await.unwrap().tickets_sold, 12);

        let entries = service.entries(pot.id).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].ticket_start, 0);
        for pair in entries.windows(2) {
            assert_eq!(pair[0].ticket_end, pair[1].ticket_start);
        }

        // Every stake, the orphan's included, reaches the settled pool.
        service.lock_pot(pot.id).await.unwrap();
        let outcome = service.settle_pot(pot.id, None).await.unwrap();
        assert_eq!(outcome.payout, 60);
        let total =
            ledger.balance("alice").await.unwrap() + ledger.balance("bob").await.unwrap();
        assert_eq!(total, 200);
    }

    #[tokio::test]
    async fn test_join_retry_adopts_orphaned_entry() {
        let store = Arc::new(FlakyStore::new());
        let (service, ledger) = service_over(store.clone());
        ledger.seed_balance("alice", 100);

        let pot = service.create_pot(params(5, 12)).await.unwrap();
        service.join_pot(pot.id, "alice", 4).await.unwrap();

        store.fail_pot_updates(0, 1);
        assert!(service.join_pot(pot.id, "alice", 4).await.is_err());
        assert_eq!(ledger.balance("alice").await.unwrap(), 60);

        // Retrying the same purchase hands back the persisted entry and
        // replays its debit instead of charging again.
        let adopted = service.join_pot(pot.id, "alice", 4).await.unwrap();
        assert_eq!((adopted.ticket_start, adopted.ticket_end), (4, 8));
        assert_eq!(ledger.balance("alice").await.unwrap(), 60);
        assert_eq!(service.get_pot(pot.id).await.unwrap().tickets_sold, 8);
        assert_eq!(service.entries(pot.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lock_requires_open_and_entries() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 1000);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        assert!(matches!(
            service.lock_pot(pot.id).await,
            Err(EngineError::NoEntries(_))
        ));

        service.join_pot(pot.id, "alice", 2).await.unwrap();
        let locked = service.lock_pot(pot.id).await.unwrap();
        assert_eq!(locked.status, PotStatus::Locked);

        // Locked pots take no further joins or locks.
        assert!(matches!(
            service.join_pot(pot.id, "alice", 1).await,
            Err(EngineError::PotNotOpen(_))
        ));
        assert!(matches!(
            service.lock_pot(pot.id).await,
            Err(EngineError::PotNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_settle_with_vaulted_seed() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 1000);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 10).await.unwrap();
        service.lock_pot(pot.id).await.unwrap();

        let outcome = service.settle_pot(pot.id, None).await.unwrap();
        assert_eq!(outcome.winner_user_id, "alice");
        assert_eq!(outcome.payout, 50);
        assert_eq!(outcome.rake, 0);
        assert!(outcome.winning_ticket < 10);

        // 1000 - 50 staked + 50 won back.
        assert_eq!(ledger.balance("alice").await.unwrap(), 1000);

        let settled = service.get_pot(pot.id).await.unwrap();
        assert_eq!(settled.status, PotStatus::Settled);
        assert_eq!(settled.revealed_seed.as_deref(), Some(outcome.revealed_seed.as_str()));
    }

    #[tokio::test]
    async fn test_settle_rejects_wrong_seed() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 1000);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 2).await.unwrap();
        service.lock_pot(pot.id).await.unwrap();

        let bogus = FairnessEngine::generate_seed();
        let result = service.settle_pot(pot.id, Some(&bogus.seed_hex)).await;
        assert!(matches!(
            result,
            Err(EngineError::CommitmentMismatch { entity: "pot", .. })
        ));

        // Still locked; the correct seed settles it.
        assert_eq!(
            service.get_pot(pot.id).await.unwrap().status,
            PotStatus::Locked
        );
        service.settle_pot(pot.id, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_requires_locked() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 1000);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        assert!(matches!(
            service.settle_pot(pot.id, None).await,
            Err(EngineError::PotNotLocked(_))
        ));
    }

    #[tokio::test]
    async fn test_settle_replay_returns_same_winner_without_double_credit() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 100);
        ledger.seed_balance("bob", 100);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 4).await.unwrap();
        service.join_pot(pot.id, "bob", 6).await.unwrap();
        service.lock_pot(pot.id).await.unwrap();

        let first = service.settle_pot(pot.id, None).await.unwrap();
        let winner_balance = ledger.balance(&first.winner_user_id).await.unwrap();

        let second = service.settle_pot(pot.id, None).await.unwrap();
        assert_eq!(first.winning_ticket, second.winning_ticket);
        assert_eq!(first.winner_entry_id, second.winner_entry_id);
        assert_eq!(first.payout, second.payout);
        assert_eq!(
            ledger.balance(&first.winner_user_id).await.unwrap(),
            winner_balance
        );
    }

    #[tokio::test]
    async fn test_rake_is_withheld() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut config = EngineConfig::for_tests();
        config.fairness.rake_bps = 1_000; // 10%
        let service = PotService::new(
            Arc::new(MemoryStore::new()),
            ledger.clone(),
            Arc::new(FairnessEngine::new()),
            Arc::new(EngineMetrics::new()),
            config,
        );

        ledger.seed_balance("alice", 100);
        let pot = service.create_pot(params(10, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 10).await.unwrap();
        service.lock_pot(pot.id).await.unwrap();

        let outcome = service.settle_pot(pot.id, None).await.unwrap();
        assert_eq!(outcome.rake, 10);
        assert_eq!(outcome.payout, 90);
        assert_eq!(ledger.balance("alice").await.unwrap(), 90);
    }

    #[tokio::test]
    async fn test_rake_on_huge_pool_does_not_wrap() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut config = EngineConfig::for_tests();
        config.fairness.rake_bps = 1_000; // 10%
        let service = PotService::new(
            Arc::new(MemoryStore::new()),
            ledger.clone(),
            Arc::new(FairnessEngine::new()),
            Arc::new(EngineMetrics::new()),
            config,
        );

        // A pool this size pushes pool * rake_bps past 64 bits.
        let entry_cost = 10_000_000_000_000u64;
        let pool = entry_cost * 1_000_000;
        ledger.seed_balance("whale", pool);

        let pot = service
            .create_pot(params(entry_cost, 1_000_000))
            .await
            .unwrap();
        service.join_pot(pot.id, "whale", 1_000_000).await.unwrap();
        service.lock_pot(pot.id).await.unwrap();

        let outcome = service.settle_pot(pot.id, None).await.unwrap();
        assert_eq!(outcome.rake, pool / 10);
        assert_eq!(outcome.payout, pool - pool / 10);
        assert_eq!(ledger.balance("whale").await.unwrap(), pool - pool / 10);
    }

    #[tokio::test]
    async fn test_cancel_refunds_every_entry_once() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 100);
        ledger.seed_balance("bob", 100);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 4).await.unwrap();
        service.join_pot(pot.id, "bob", 3).await.unwrap();
        service.lock_pot(pot.id).await.unwrap();

        let cancelled = service.cancel_pot(pot.id).await.unwrap();
        assert_eq!(cancelled.status, PotStatus::Cancelled);
        assert_eq!(ledger.balance("alice").await.unwrap(), 100);
        assert_eq!(ledger.balance("bob").await.unwrap(), 100);

        // Replaying the cancel is an error, not a second refund.
        assert!(matches!(
            service.cancel_pot(pot.id).await,
            Err(EngineError::InvalidTransition { .. })
        ));
        assert_eq!(ledger.balance("alice").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_cancel_settled_pot_rejected() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 100);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 2).await.unwrap();
        service.lock_pot(pot.id).await.unwrap();
        service.settle_pot(pot.id, None).await.unwrap();

        assert!(matches!(
            service.cancel_pot(pot.id).await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_verification_bundle_replays() {
        let (service, ledger) = service();
        ledger.seed_balance("alice", 100);

        let pot = service.create_pot(params(5, 10)).await.unwrap();
        service.join_pot(pot.id, "alice", 10).await.unwrap();

        // Pre-settlement: commitment only.
        let before = service.verify_pot(pot.id).await.unwrap();
        assert!(before.revealed_seed.is_none());
        assert!(before.winning_ticket.is_none());

        service.lock_pot(pot.id).await.unwrap();
        let outcome = service.settle_pot(pot.id, None).await.unwrap();

        let after = service.verify_pot(pot.id).await.unwrap();
        assert_eq!(after.seed_matches_commitment, Some(true));
        assert_eq!(after.winning_ticket, Some(outcome.winning_ticket));
        assert!(after.draw_message.is_some());
    }
}
