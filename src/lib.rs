//! Provably-fair pot and battle lifecycle engine.
//!
//! Two settlement flows over pooled stakes: pots (pooled-prize ticket draws
//! where one winner takes the pool) and battles (head-to-head case-opening
//! races where the highest cumulative value wins). Every random outcome is
//! commit/reveal fair: the SHA-256 hash of a server seed is published before
//! any stake is taken, and the seed reveal at settlement lets anyone replay
//! the draw offline.
//!
//! Money and persistence are capabilities injected at construction
//! ([`ledger::LedgerGateway`], [`store::StorageGateway`]); the in-memory
//! implementations back the single-process deployment and the tests.

pub mod api;
pub mod battles;
pub mod cases;
pub mod config;
pub mod errors;
pub mod fairness;
pub mod ledger;
pub mod metrics;
pub mod pots;
pub mod store;
pub mod sweeper;
pub mod types;

pub use battles::{BattleService, BattleVerification, CreateBattleParams};
pub use cases::{Case, CaseCatalog, CaseItem};
pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult, ErrorKind};
pub use fairness::{FairnessEngine, SeedCommitment};
pub use ledger::{InMemoryLedger, LedgerGateway, Receipt};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use pots::{CreatePotParams, PotService, PotVerification};
pub use store::{MemoryStore, StorageGateway};
pub use sweeper::ExpirySweeper;
pub use types::{
    Battle, BattleOutcome, BattleParticipant, BattleRound, BattleStatus, Pot, PotEntry, PotOutcome,
    PotStatus, TiePolicy,
};
