//! Commit/reveal fairness engine.
//!
//! Goals:
//! - Publish a one-way commitment to the server seed before any ticket or
//!   round is sold, so the operator cannot pick a seed after seeing entries.
//! - Make every draw a pure function of revealed inputs, byte-replayable by
//!   third parties from the published record alone.
//! - Keep plaintext seeds out of persistence: only the hash is stored, the
//!   seed lives in an in-process vault until reveal.

use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};

/// Server seeds are 32 bytes of OS randomness, hex-encoded on the wire.
pub const SEED_BYTES: usize = 32;

const POT_DRAW_DOMAIN: &str = "pot-draw:v1";
const BATTLE_ROLL_DOMAIN: &str = "battle-roll:v1";
const BATTLE_DRAW_OFF_DOMAIN: &str = "battle-drawoff:v1";

/// A freshly generated server seed and its publishable commitment.
#[derive(Clone, Debug)]
pub struct SeedCommitment {
    /// Hex-encoded seed. Secret until settlement.
    pub seed_hex: String,
    /// Hex-encoded SHA-256 of the raw seed bytes. Published at creation.
    pub hash_hex: String,
}

/// Stateless draw functions plus a vault for unrevealed seeds.
///
/// The vault is keyed by entity id. Seeds enter it at pot/battle creation
/// and leave it exactly once, at settlement or cancellation.
pub struct FairnessEngine {
    vault: DashMap<Uuid, String>,
}

impl FairnessEngine {
    pub fn new() -> Self {
        Self {
            vault: DashMap::new(),
        }
    }

    /// Generate a seed for `entity_id`, vault the plaintext, and return the
    /// commitment hash for publication. The seed itself never leaves here.
    pub fn commit_for(&self, entity_id: Uuid) -> String {
        let commitment = Self::generate_seed();
        self.vault.insert(entity_id, commitment.seed_hex);
        commitment.hash_hex
    }

    /// Look up the vaulted seed for `entity_id` without removing it.
    pub fn reveal_for(&self, entity_id: Uuid) -> Option<String> {
        self.vault.get(&entity_id).map(|s| s.clone())
    }

    /// Drop the vaulted seed once the entity reaches a terminal state.
    pub fn discard(&self, entity_id: Uuid) {
        self.vault.remove(&entity_id);
    }

    /// Generate a fresh seed/commitment pair from OS randomness.
    pub fn generate_seed() -> SeedCommitment {
        let mut seed = [0u8; SEED_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        SeedCommitment {
            seed_hex: hex::encode(seed),
            hash_hex: Self::commitment_hex(&seed),
        }
    }

    /// SHA-256 commitment over raw seed bytes, hex-encoded.
    pub fn commitment_hex(seed: &[u8]) -> String {
        hex::encode(Sha256::digest(seed))
    }

    /// Check a hex-encoded reveal against a published commitment.
    pub fn matches_commitment(seed_hex: &str, committed_hash_hex: &str) -> bool {
        match hex::decode(seed_hex) {
            Ok(bytes) => Self::commitment_hex(&bytes).eq_ignore_ascii_case(committed_hash_hex),
            Err(_) => false,
        }
    }

    /// Draw the winning ticket index for a pot.
    ///
    /// Fails `CommitmentMismatch` if `seed_hex` does not hash to
    /// `committed_hash_hex`. Otherwise the result is a deterministic index in
    /// `[0, tickets_sold)` derived from the seed and the pot id.
    pub fn draw_pot_winner(
        seed_hex: &str,
        committed_hash_hex: &str,
        pot_id: Uuid,
        tickets_sold: u32,
    ) -> EngineResult<u32> {
        if !Self::matches_commitment(seed_hex, committed_hash_hex) {
            return Err(EngineError::CommitmentMismatch {
                entity: "pot",
                id: pot_id,
            });
        }
        let message = Self::pot_draw_message(pot_id, seed_hex);
        Ok(Self::reduce(&message, tickets_sold as u64)? as u32)
    }

    /// Draw one weighted-roll value for a battle round.
    ///
    /// The round is addressed by `(case_index, participant_index)`; the
    /// participant's `client_seed` is mixed in so no two participants share a
    /// roll stream even within the same case.
    pub fn battle_roll(
        seed_hex: &str,
        committed_hash_hex: &str,
        battle_id: Uuid,
        client_seed: &str,
        case_index: u32,
        participant_index: u32,
        total_weight: u64,
    ) -> EngineResult<u64> {
        if !Self::matches_commitment(seed_hex, committed_hash_hex) {
            return Err(EngineError::CommitmentMismatch {
                entity: "battle",
                id: battle_id,
            });
        }
        let message =
            Self::battle_roll_message(battle_id, seed_hex, client_seed, case_index, participant_index);
        Self::reduce(&message, total_weight)
    }

    /// Pick one index among `tied_count` tied participants. Used when a
    /// battle's tie policy calls for a single winner.
    pub fn battle_draw_off(
        seed_hex: &str,
        committed_hash_hex: &str,
        battle_id: Uuid,
        tied_count: u32,
    ) -> EngineResult<u32> {
        if !Self::matches_commitment(seed_hex, committed_hash_hex) {
            return Err(EngineError::CommitmentMismatch {
                entity: "battle",
                id: battle_id,
            });
        }
        let message = format!("{}:{}:{}", BATTLE_DRAW_OFF_DOMAIN, battle_id, seed_hex);
        Ok(Self::reduce(&message, tied_count as u64)? as u32)
    }

    /// The exact preimage hashed for a pot draw. Published so third parties
    /// can replay the draw with nothing but a SHA-256 implementation.
    pub fn pot_draw_message(pot_id: Uuid, seed_hex: &str) -> String {
        format!("{}:{}:{}", POT_DRAW_DOMAIN, pot_id, seed_hex)
    }

    /// The exact preimage hashed for one battle roll.
    pub fn battle_roll_message(
        battle_id: Uuid,
        seed_hex: &str,
        client_seed: &str,
        case_index: u32,
        participant_index: u32,
    ) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            BATTLE_ROLL_DOMAIN, battle_id, seed_hex, client_seed, case_index, participant_index
        )
    }

    /// Hash `message` and reduce to `[0, range)`.
    ///
    /// The first 16 digest bytes are taken as a big-endian u128 before the
    /// modulo. A 128-bit sample against ranges up to 2^32 keeps the modulo
    /// bias below 2^-96, far past anything an observer could measure.
    fn reduce(message: &str, range: u64) -> EngineResult<u64> {
        if range == 0 {
            return Err(EngineError::InvalidArgument {
                field: "range",
                reason: "draw range must be non-zero".to_string(),
            });
        }
        let digest = Sha256::digest(message.as_bytes());
        let mut wide = [0u8; 16];
        wide.copy_from_slice(&digest[..16]);
        Ok((u128::from_be_bytes(wide) % range as u128) as u64)
    }
}

impl Default for FairnessEngine {
    fn default() -> Self {
        Self::new()
    }
}
