use async_trait::async_trait;
use model::{BetId, BetStore, ProofSubmission, SubmissionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

mod inflight;

pub use inflight::{InFlightEntry, InFlightGuard, InFlightRegistry, InFlightState};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("bet {0} does not accept proof")]
    InvalidBetReference(BetId),
    #[error("submission {submission} belongs to bet {actual}, not {expected}")]
    BetMismatch {
        submission: SubmissionId,
        expected: BetId,
        actual: BetId,
    },
    #[error("duplicate submission {0}")]
    Duplicate(SubmissionId),
    #[error("ledger storage: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Append-only record of resolved proof submissions.
#[async_trait]
pub trait ProofLedger: Send + Sync {
    async fn append(&self, bet_id: &BetId, submission: ProofSubmission) -> LedgerResult<SubmissionId>;
    async fn list_for(&self, bet_id: &BetId) -> LedgerResult<Vec<ProofSubmission>>;
    async fn get(&self, id: &SubmissionId) -> LedgerResult<Option<ProofSubmission>>;
}

#[derive(Default)]
struct LedgerBook {
    by_bet: HashMap<BetId, Vec<ProofSubmission>>,
    index: HashMap<SubmissionId, (BetId, usize)>,
}

#[derive(Clone)]
pub struct InMemoryLedger {
    store: Arc<dyn BetStore>,
    inner: Arc<Mutex<LedgerBook>>,
}

impl InMemoryLedger {
    pub fn new(store: Arc<dyn BetStore>) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(LedgerBook::default())),
        }
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, LedgerBook>> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Storage(anyhow::anyhow!("ledger lock poisoned")))
    }
}

#[async_trait]
impl ProofLedger for InMemoryLedger {
    async fn append(&self, bet_id: &BetId, submission: ProofSubmission) -> LedgerResult<SubmissionId> {
        if submission.bet_id != *bet_id {
            return Err(LedgerError::BetMismatch {
                submission: submission.id,
                expected: *bet_id,
                actual: submission.bet_id,
            });
        }
        let accepting = self
            .store
            .get_bet(bet_id)
            .await?
            .map(|bet| bet.status.accepts_proof())
            .unwrap_or(false);
        if !accepting {
            return Err(LedgerError::InvalidBetReference(*bet_id));
        }

        let mut guard = self.lock()?;
        if guard.index.contains_key(&submission.id) {
            return Err(LedgerError::Duplicate(submission.id));
        }
        let id = submission.id;
        let entries = guard.by_bet.entry(*bet_id).or_default();
        entries.push(submission);
        let position = entries.len() - 1;
        guard.index.insert(id, (*bet_id, position));
        tracing::debug!("ledger appended submission {} for bet {}", id, bet_id);
        Ok(id)
    }

    async fn list_for(&self, bet_id: &BetId) -> LedgerResult<Vec<ProofSubmission>> {
        let guard = self.lock()?;
        Ok(guard.by_bet.get(bet_id).cloned().unwrap_or_default())
    }

    async fn get(&self, id: &SubmissionId) -> LedgerResult<Option<ProofSubmission>> {
        let guard = self.lock()?;
        let Some((bet_id, position)) = guard.index.get(id) else {
            return Ok(None);
        };
        Ok(guard
            .by_bet
            .get(bet_id)
            .and_then(|entries| entries.get(*position))
            .cloned())
    }
}
