//! API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cases::Case;
use crate::types::{
    Battle, BattleParticipant, BattleRound, BattleStatus, Pot, PotEntry, PotStatus, TiePolicy,
};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePotRequest {
    pub entry_cost: u64,
    pub max_tickets: u32,
    #[serde(default)]
    pub max_per_user: Option<u32>,
    #[serde(default)]
    pub expires_in_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinPotRequest {
    pub tickets: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettlePotRequest {
    /// Seed plaintext for deployments that keep custody outside the engine.
    /// Omitted, the engine reveals from its own vault.
    #[serde(default)]
    pub reveal_seed: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBattleRequest {
    pub case_ids: Vec<String>,
    pub max_participants: u32,
    #[serde(default)]
    pub client_seed: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinBattleRequest {
    #[serde(default)]
    pub client_seed: Option<String>,
}

/// Pot as presented to clients. Storage internals stay out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotResponse {
    pub id: Uuid,
    pub status: PotStatus,
    pub entry_cost: u64,
    pub max_tickets: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_user: Option<u32>,
    pub tickets_sold: u32,
    pub remaining_tickets: u32,
    pub pool_value: u64,
    pub rake_bps: u32,
    pub server_seed_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Pot> for PotResponse {
    fn from(pot: &Pot) -> Self {
        Self {
            id: pot.id,
            status: pot.status,
            entry_cost: pot.entry_cost,
            max_tickets: pot.max_tickets,
            max_per_user: pot.max_per_user,
            tickets_sold: pot.tickets_sold,
            remaining_tickets: pot.remaining_tickets(),
            pool_value: pot.pool_value(),
            rake_bps: pot.rake_bps,
            server_seed_hash: pot.server_seed_hash.clone(),
            revealed_seed: pot.revealed_seed.clone(),
            winner_entry_id: pot.winner_entry_id,
            created_at: pot.created_at,
            expires_at: pot.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryResponse {
    pub id: Uuid,
    pub user_id: String,
    pub ticket_count: u32,
    pub ticket_start: u32,
    pub ticket_end: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&PotEntry> for EntryResponse {
    fn from(entry: &PotEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id.clone(),
            ticket_count: entry.ticket_count,
            ticket_start: entry.ticket_start,
            ticket_end: entry.ticket_end,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotsResponse {
    pub pots: Vec<PotResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotDetailResponse {
    pub pot: PotResponse,
    pub entries: Vec<EntryResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleResponse {
    pub id: Uuid,
    pub creator_id: String,
    pub status: BattleStatus,
    pub max_participants: u32,
    pub current_participants: u32,
    pub case_ids: Vec<String>,
    pub entry_cost: u64,
    pub rake_bps: u32,
    pub tie_policy: TiePolicy,
    pub server_seed_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_seed: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub winner_user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Battle> for BattleResponse {
    fn from(battle: &Battle) -> Self {
        Self {
            id: battle.id,
            creator_id: battle.creator_id.clone(),
            status: battle.status,
            max_participants: battle.max_participants,
            current_participants: battle.current_participants,
            case_ids: battle.case_ids.clone(),
            entry_cost: battle.entry_cost,
            rake_bps: battle.rake_bps,
            tie_policy: battle.tie_policy,
            server_seed_hash: battle.server_seed_hash.clone(),
            revealed_seed: battle.revealed_seed.clone(),
            winner_user_ids: battle.winner_user_ids.clone(),
            created_at: battle.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub user_id: String,
    pub client_seed: String,
    pub cumulative_value: u64,
    pub joined_at: DateTime<Utc>,
}

impl From<&BattleParticipant> for ParticipantResponse {
    fn from(participant: &BattleParticipant) -> Self {
        Self {
            user_id: participant.user_id.clone(),
            client_seed: participant.client_seed.clone(),
            cumulative_value: participant.cumulative_value,
            joined_at: participant.joined_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResponse {
    pub case_index: u32,
    pub case_id: String,
    pub participant_index: u32,
    pub user_id: String,
    pub roll: u64,
    pub item_name: String,
    pub item_value: u64,
}

impl From<&BattleRound> for RoundResponse {
    fn from(round: &BattleRound) -> Self {
        Self {
            case_index: round.case_index,
            case_id: round.case_id.clone(),
            participant_index: round.participant_index,
            user_id: round.user_id.clone(),
            roll: round.roll,
            item_name: round.item_name.clone(),
            item_value: round.item_value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlesResponse {
    pub battles: Vec<BattleResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleDetailResponse {
    pub battle: BattleResponse,
    pub participants: Vec<ParticipantResponse>,
    pub rounds: Vec<RoundResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: String,
    pub name: String,
    pub price: u64,
    pub item_count: usize,
}

impl From<&Case> for CaseSummary {
    fn from(case: &Case) -> Self {
        Self {
            id: case.id.clone(),
            name: case.name.clone(),
            price: case.price,
            item_count: case.items.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasesResponse {
    pub cases: Vec<CaseSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: u64,
}
