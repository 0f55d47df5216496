use ledger::LedgerError;
use model::{BetId, BetStatus, StoreError};
use scoring::ScoringError;
use thiserror::Error;
use uuid::Uuid;
use verification::VerificationError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("bet {bet_id} is {status:?}, cannot {action}")]
    InvalidTransition {
        bet_id: BetId,
        status: BetStatus,
        action: &'static str,
    },
    #[error("verification unavailable for bet {bet_id}: {reason}")]
    VerificationUnavailable {
        bet_id: BetId,
        deferred: bool,
        reason: String,
    },
    #[error("verification {0} was cancelled")]
    VerificationCancelled(Uuid),
    #[error("invalid reference: {0}")]
    InvalidBetReference(String),
    #[error("bet {0} is already settled")]
    SettlementConflict(BetId),
    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownUser(user) => {
                EngineError::InvalidBetReference(format!("unknown user {user}"))
            }
            StoreError::DuplicateUser(_) | StoreError::InsufficientPoints { .. } => {
                EngineError::Validation(err.to_string())
            }
            StoreError::Overflow(_) => EngineError::Storage(err.into()),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(store) => store.into(),
            Err(err) => EngineError::Storage(err),
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidBetReference(id) => {
                EngineError::InvalidBetReference(format!("bet {id} does not accept proof"))
            }
            LedgerError::BetMismatch { .. } => EngineError::InvalidBetReference(err.to_string()),
            LedgerError::Duplicate(_) => EngineError::Storage(anyhow::anyhow!(err.to_string())),
            LedgerError::Storage(inner) => inner.into(),
        }
    }
}

impl From<ScoringError> for EngineError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::InvalidThresholds(_) => EngineError::Validation(err.to_string()),
            ScoringError::UnknownUser(user) => {
                EngineError::InvalidBetReference(format!("unknown user {user}"))
            }
            ScoringError::Storage(inner) => inner.into(),
        }
    }
}

impl EngineError {
    /// Gateway errors that survive the retry loop without a policy applying.
    pub(crate) fn from_gateway(bet_id: BetId, err: VerificationError) -> Self {
        match err {
            VerificationError::InvalidRequest(msg) => EngineError::Validation(msg),
            other => EngineError::VerificationUnavailable {
                bet_id,
                deferred: false,
                reason: other.to_string(),
            },
        }
    }
}
