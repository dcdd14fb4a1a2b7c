//! Ledger gateway: the external balance authority.
//!
//! The lifecycle managers never touch balances directly; every movement goes
//! through this trait with a caller-supplied operation id, so a retried call
//! lands on the same idempotency key and cannot double-charge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};

/// Proof that a ledger operation was applied, or had already been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub op_id: Uuid,
    pub user_id: String,
    pub amount: u64,
    pub reason: String,
    pub applied_at: DateTime<Utc>,
}

/// Deterministic operation id for a logical funds movement, so every retry
/// of the same movement presents the same idempotency key.
pub fn operation_id(entity_id: Uuid, purpose: &str, user_id: &str) -> Uuid {
    let preimage = format!("ledger-op:{}:{}:{}", entity_id, purpose, user_id);
    let digest = Sha256::digest(preimage.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Balance read/debit/credit, atomic per user and idempotent per op id.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Remove `amount` from the user's balance. Fails `InsufficientBalance`
    /// when the balance cannot cover it. Replaying an applied `op_id`
    /// returns the original receipt without moving funds again.
    async fn debit(
        &self,
        op_id: Uuid,
        user_id: &str,
        amount: u64,
        reason: &str,
    ) -> EngineResult<Receipt>;

    /// Add `amount` to the user's balance. Idempotent per `op_id`.
    async fn credit(
        &self,
        op_id: Uuid,
        user_id: &str,
        amount: u64,
        reason: &str,
    ) -> EngineResult<Receipt>;

    /// Current available balance. Unknown users hold zero.
    async fn balance(&self, user_id: &str) -> EngineResult<u64>;
}

/// In-process ledger backing the single-node deployment and the test suite.
pub struct InMemoryLedger {
    balances: DashMap<String, u64>,
    receipts: DashMap<Uuid, Receipt>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            receipts: DashMap::new(),
        }
    }

    /// Set a user's balance directly. Deposit path and test setup only.
    pub fn seed_balance(&self, user_id: &str, amount: u64) {
        self.balances.insert(user_id.to_string(), amount);
    }

    fn make_receipt(op_id: Uuid, user_id: &str, amount: u64, reason: &str) -> Receipt {
        Receipt {
            op_id,
            user_id: user_id.to_string(),
            amount,
            reason: reason.to_string(),
            applied_at: Utc::now(),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn debit(
        &self,
        op_id: Uuid,
        user_id: &str,
        amount: u64,
        reason: &str,
    ) -> EngineResult<Receipt> {
        // The receipt entry is the idempotency gate; the balance entry is
        // only touched while the gate is held vacant.
        match self.receipts.entry(op_id) {
            Entry::Occupied(applied) => Ok(applied.get().clone()),
            Entry::Vacant(gate) => {
                let mut balance = self.balances.entry(user_id.to_string()).or_insert(0);
                if *balance < amount {
                    return Err(EngineError::InsufficientBalance {
                        user_id: user_id.to_string(),
                        needed: amount,
                        available: *balance,
                    });
                }
                *balance -= amount;
                drop(balance);

                let receipt = Self::make_receipt(op_id, user_id, amount, reason);
                gate.insert(receipt.clone());
                Ok(receipt)
            }
        }
    }

    async fn credit(
        &self,
        op_id: Uuid,
        user_id: &str,
        amount: u64,
        reason: &str,
    ) -> EngineResult<Receipt> {
        match self.receipts.entry(op_id) {
            Entry::Occupied(applied) => Ok(applied.get().clone()),
            Entry::Vacant(gate) => {
                let mut balance = self.balances.entry(user_id.to_string()).or_insert(0);
                *balance = balance.checked_add(amount).ok_or_else(|| {
                    EngineError::Ledger(format!("balance overflow for user {}", user_id))
                })?;
                drop(balance);

                let receipt = Self::make_receipt(op_id, user_id, amount, reason);
                gate.insert(receipt.clone());
                Ok(receipt)
            }
        }
    }

    async fn balance(&self, user_id: &str) -> EngineResult<u64> {
        Ok(self.balances.get(user_id).map(|b| *b).unwrap_or(0))
    }
}
