//! Engine error types
//!
//! Every fallible operation on the pot and battle services returns one of
//! these variants. Nothing is swallowed: callers always see the concrete
//! failure, and the HTTP layer maps the classification to a status code.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Classification of an [`EngineError`], used for status mapping and retry
/// decisions. Only `Infrastructure` failures are worth retrying as-is;
/// `State` failures call for a re-fetch, the rest for a changed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape or range. Caller's fault, not retryable.
    Validation,
    /// Entity exists but is not in the state the operation requires.
    State,
    /// Capacity or balance limit hit. Not retryable without changing the request.
    ResourceExhausted,
    /// Reveal seed does not hash to the published commitment. Fatal; alerted.
    CommitmentMismatch,
    /// Referenced entity does not exist.
    NotFound,
    /// Ledger or storage unavailable or timed out. Retryable with backoff.
    Infrastructure,
}

/// All failure modes of the pot and battle lifecycles.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("pot {0} not found")]
    PotNotFound(Uuid),

    #[error("battle {0} not found")]
    BattleNotFound(Uuid),

    #[error("case '{0}' not found")]
    CaseNotFound(String),

    #[error("pot {0} is not open for entries")]
    PotNotOpen(Uuid),

    #[error("pot {pot_id} expired at {expired_at}")]
    PotExpired {
        pot_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    #[error("pot {pot_id} has {remaining} tickets remaining, requested {requested}")]
    TicketsExhausted {
        pot_id: Uuid,
        remaining: u32,
        requested: u32,
    },

    #[error("per-user limit is {limit} tickets: user holds {held}, requested {requested} more")]
    PerUserLimitExceeded {
        pot_id: Uuid,
        limit: u32,
        held: u32,
        requested: u32,
    },

    #[error("pot {0} has no entries to draw from")]
    NoEntries(Uuid),

    #[error("pot {0} is not locked for settlement")]
    PotNotLocked(Uuid),

    #[error("battle {0} is not accepting participants")]
    BattleNotOpen(Uuid),

    #[error("battle {0} is full")]
    BattleFull(Uuid),

    #[error("user {user_id} already joined battle {battle_id}")]
    AlreadyParticipant { battle_id: Uuid, user_id: String },

    #[error("battle {battle_id} needs at least {required} participants, has {current}")]
    NotEnoughParticipants {
        battle_id: Uuid,
        required: u32,
        current: u32,
    },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    #[error("insufficient balance for user {user_id}: need {needed}, have {available}")]
    InsufficientBalance {
        user_id: String,
        needed: u64,
        available: u64,
    },

    #[error("reveal seed does not match the committed hash for {entity} {id}")]
    CommitmentMismatch { entity: &'static str, id: Uuid },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("ledger failure: {0}")]
    Ledger(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    GatewayTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl EngineError {
    /// Classify this error into the transport/retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            InvalidArgument { .. } => ErrorKind::Validation,
            PotNotFound(_) | BattleNotFound(_) | CaseNotFound(_) => ErrorKind::NotFound,
            PotNotOpen(_)
            | PotExpired { .. }
            | NoEntries(_)
            | PotNotLocked(_)
            | BattleNotOpen(_)
            | AlreadyParticipant { .. }
            | NotEnoughParticipants { .. }
            | InvalidTransition { .. } => ErrorKind::State,
            TicketsExhausted { .. }
            | PerUserLimitExceeded { .. }
            | BattleFull(_)
            | InsufficientBalance { .. } => ErrorKind::ResourceExhausted,
            CommitmentMismatch { .. } => ErrorKind::CommitmentMismatch,
            Storage(_) | Ledger(_) | GatewayTimeout { .. } => ErrorKind::Infrastructure,
        }
    }

    /// Whether retrying the same request unchanged can succeed.
    pub fn retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = EngineError::TicketsExhausted {
            pot_id: Uuid::new_v4(),
            remaining: 6,
            requested: 7,
        };
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(!err.retryable());

        let err = EngineError::GatewayTimeout {
            operation: "ledger.debit",
            timeout_ms: 5000,
        };
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.retryable());
    }

    #[test]
    fn test_error_display_names_the_limit() {
        let err = EngineError::PerUserLimitExceeded {
            pot_id: Uuid::new_v4(),
            limit: 5,
            held: 4,
            requested: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("limit is 5"));
        assert!(msg.contains("holds 4"));
    }

    #[test]
    fn test_commitment_mismatch_is_not_retryable() {
        let err = EngineError::CommitmentMismatch {
            entity: "pot",
            id: Uuid::new_v4(),
        };
        assert_eq!(err.kind(), ErrorKind::CommitmentMismatch);
        assert!(!err.retryable());
    }
}
