//! Core domain model for pots and battles.
//!
//! All monetary amounts are integer minor units (cents). Hashes and seeds are
//! lowercase hex strings. Records in terminal states are never deleted; they
//! stay readable for fairness verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle states of a pot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PotStatus {
    Open,
    Locked,
    Settled,
    Cancelled,
}

impl PotStatus {
    /// Allowed forward transitions. Terminal states accept nothing.
    pub fn can_transition_to(self, next: PotStatus) -> bool {
        matches!(
            (self, next),
            (PotStatus::Open, PotStatus::Locked)
                | (PotStatus::Open, PotStatus::Cancelled)
                | (PotStatus::Locked, PotStatus::Settled)
                | (PotStatus::Locked, PotStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PotStatus::Settled | PotStatus::Cancelled)
    }
}

impl fmt::Display for PotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PotStatus::Open => write!(f, "open"),
            PotStatus::Locked => write!(f, "locked"),
            PotStatus::Settled => write!(f, "settled"),
            PotStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for PotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PotStatus::Open),
            "locked" => Ok(PotStatus::Locked),
            "settled" => Ok(PotStatus::Settled),
            "cancelled" => Ok(PotStatus::Cancelled),
            other => Err(format!("unknown pot status '{}'", other)),
        }
    }
}

/// Lifecycle states of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    Waiting,
    Locking,
    Active,
    Completed,
    Cancelled,
}

impl BattleStatus {
    pub fn can_transition_to(self, next: BattleStatus) -> bool {
        matches!(
            (self, next),
            (BattleStatus::Waiting, BattleStatus::Locking)
                | (BattleStatus::Waiting, BattleStatus::Cancelled)
                | (BattleStatus::Locking, BattleStatus::Active)
                | (BattleStatus::Locking, BattleStatus::Cancelled)
                | (BattleStatus::Active, BattleStatus::Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BattleStatus::Completed | BattleStatus::Cancelled)
    }
}

impl fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BattleStatus::Waiting => write!(f, "waiting"),
            BattleStatus::Locking => write!(f, "locking"),
            BattleStatus::Active => write!(f, "active"),
            BattleStatus::Completed => write!(f, "completed"),
            BattleStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for BattleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(BattleStatus::Waiting),
            "locking" => Ok(BattleStatus::Locking),
            "active" => Ok(BattleStatus::Active),
            "completed" => Ok(BattleStatus::Completed),
            "cancelled" => Ok(BattleStatus::Cancelled),
            other => Err(format!("unknown battle status '{}'", other)),
        }
    }
}

/// How a battle pays out when top scores tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TiePolicy {
    /// Tied participants split the pool evenly; remainder cents go to the
    /// earliest joiner among them.
    Split,
    /// One extra deterministic roll among the tied participants picks a
    /// single winner.
    DrawOff,
}

impl fmt::Display for TiePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TiePolicy::Split => write!(f, "split"),
            TiePolicy::DrawOff => write!(f, "drawoff"),
        }
    }
}

/// A pooled-prize ticket draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pot {
    pub id: Uuid,
    /// Price per ticket in minor units.
    pub entry_cost: u64,
    pub max_tickets: u32,
    /// Per-user cumulative ticket cap. `None` means unlimited.
    pub max_per_user: Option<u32>,
    pub tickets_sold: u32,
    pub status: PotStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Published before any ticket is sold.
    pub server_seed_hash: String,
    /// Set at settlement; proves the commitment.
    pub revealed_seed: Option<String>,
    pub winner_entry_id: Option<Uuid>,
    /// House rake in basis points, frozen at creation so later config
    /// changes cannot alter an already-sold pot's payout.
    pub rake_bps: u32,
    /// Optimistic-concurrency version, bumped on every persisted mutation.
    pub version: u64,
}

impl Pot {
    pub fn remaining_tickets(&self) -> u32 {
        self.max_tickets.saturating_sub(self.tickets_sold)
    }

    /// Total prize pool before rake.
    pub fn pool_value(&self) -> u64 {
        self.tickets_sold as u64 * self.entry_cost
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// One user's ticket purchase in a pot. Ranges are half-open `[start, end)`
/// and contiguous across entries: together they partition `[0, tickets_sold)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotEntry {
    pub id: Uuid,
    pub pot_id: Uuid,
    pub user_id: String,
    pub ticket_count: u32,
    pub ticket_start: u32,
    pub ticket_end: u32,
    pub created_at: DateTime<Utc>,
}

impl PotEntry {
    pub fn contains_ticket(&self, ticket: u32) -> bool {
        ticket >= self.ticket_start && ticket < self.ticket_end
    }
}

/// Outcome of a settled pot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotOutcome {
    pub pot_id: Uuid,
    pub winning_ticket: u32,
    pub winner_entry_id: Uuid,
    pub winner_user_id: String,
    /// Amount credited to the winner after rake.
    pub payout: u64,
    pub rake: u64,
    pub revealed_seed: String,
}

/// A multi-round case-opening battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battle {
    pub id: Uuid,
    pub creator_id: String,
    pub status: BattleStatus,
    pub max_participants: u32,
    pub current_participants: u32,
    /// Cases opened in order, one round per (case, participant) pair.
    pub case_ids: Vec<String>,
    /// Sum of the case prices; debited from each participant on join.
    pub entry_cost: u64,
    pub created_at: DateTime<Utc>,
    pub server_seed_hash: String,
    pub revealed_seed: Option<String>,
    pub winner_user_ids: Vec<String>,
    /// Economic terms frozen at creation, like [`Pot::rake_bps`].
    pub rake_bps: u32,
    pub tie_policy: TiePolicy,
    /// Optimistic-concurrency version, bumped on every persisted mutation.
    pub version: u64,
}

impl Battle {
    pub fn is_full(&self) -> bool {
        self.current_participants >= self.max_participants
    }
}

/// One user's seat in a battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleParticipant {
    pub id: Uuid,
    pub battle_id: Uuid,
    pub user_id: String,
    /// Caller-chosen entropy mixed into every roll for this seat.
    pub client_seed: String,
    pub joined_at: DateTime<Utc>,
    /// Running total of drawn item values, in minor units.
    pub cumulative_value: u64,
}

/// Audit record of a single resolved battle roll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleRound {
    pub battle_id: Uuid,
    pub case_index: u32,
    pub case_id: String,
    pub participant_index: u32,
    pub user_id: String,
    /// Raw roll in `[0, total_weight)` before the weighted item lookup.
    pub roll: u64,
    pub item_name: String,
    pub item_value: u64,
}

/// Outcome of a completed battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleOutcome {
    pub battle_id: Uuid,
    pub winner_user_ids: Vec<String>,
    /// Per-winner credited amounts, aligned with `winner_user_ids`.
    pub payouts: Vec<u64>,
    pub total_pool: u64,
    pub rake: u64,
    pub revealed_seed: String,
    pub rounds: Vec<BattleRound>,
}
