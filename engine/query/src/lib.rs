//! Read-only projections for the client. Every call takes short snapshots of
//! the store, ledger and in-flight registry and never writes.

use ledger::{InFlightRegistry, InFlightState, ProofLedger};
use model::{BetId, BetStatus, BetStore, User, UserId};
use scoring::{Aggregator, LeaderboardEntry, ScoringError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

mod views;

pub use views::{
    BetDetail, BetView, CounterpartyView, ParticipantView, PendingItem, PerformerView, Profile,
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("unknown bet {0}")]
    UnknownBet(BetId),
    #[error("query storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<ledger::LedgerError> for QueryError {
    fn from(err: ledger::LedgerError) -> Self {
        QueryError::Storage(anyhow::anyhow!(err.to_string()))
    }
}

impl From<ScoringError> for QueryError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::UnknownUser(id) => QueryError::UnknownUser(id),
            ScoringError::Storage(err) => QueryError::Storage(err),
            other => QueryError::Storage(anyhow::anyhow!(other.to_string())),
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<dyn BetStore>,
    ledger: Arc<dyn ProofLedger>,
    inflight: InFlightRegistry,
    aggregator: Aggregator,
}

impl QueryFacade {
    pub fn new(
        store: Arc<dyn BetStore>,
        ledger: Arc<dyn ProofLedger>,
        inflight: InFlightRegistry,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            store,
            ledger,
            inflight,
            aggregator,
        }
    }

    async fn users(&self) -> QueryResult<HashMap<UserId, User>> {
        Ok(self
            .store
            .list_users()
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect())
    }

    async fn user(&self, id: &str) -> QueryResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| QueryError::UnknownUser(id.to_string()))
    }

    /// Open bets the user takes part in, oldest first.
    pub async fn active_bets_for(&self, user_id: &str) -> QueryResult<Vec<BetView>> {
        self.user(user_id).await?;
        let users = self.users().await?;
        let bets = self.store.bets_for_user(user_id).await?;
        Ok(bets
            .iter()
            .filter(|b| b.status.is_open())
            .map(|b| BetView::render(b, &users))
            .collect())
    }

    /// Disputes and deferred verdicts the user can resolve, followed by the
    /// user's own attempts that are still waiting on a verdict.
    pub async fn pending_verifications_for(&self, user_id: &str) -> QueryResult<Vec<PendingItem>> {
        self.user(user_id).await?;
        let users = self.users().await?;
        let bets = self.store.bets_for_user(user_id).await?;
        let mut items = Vec::new();

        for bet in bets.iter().filter(|b| b.status.is_open()) {
            if let (BetStatus::Disputed, Some(dispute)) = (bet.status, &bet.dispute) {
                if bet.counterparties_of(&dispute.submitter).contains(user_id) {
                    items.push(PendingItem::Dispute {
                        bet_id: bet.id,
                        activity: bet.activity.clone(),
                        submission_id: dispute.submission_id,
                        submitter: ParticipantView::resolve(&dispute.submitter, &users),
                        opened_at: dispute.opened_at,
                    });
                }
            }
            for entry in self.inflight.deferred_for_bet(&bet.id) {
                if !bet.counterparties_of(&entry.submitter).contains(user_id) {
                    continue;
                }
                let reason = match &entry.state {
                    InFlightState::Deferred { reason } => reason.clone(),
                    InFlightState::Verifying => continue,
                };
                items.push(PendingItem::Deferred {
                    bet_id: bet.id,
                    activity: bet.activity.clone(),
                    verification_id: entry.id,
                    submitter: ParticipantView::resolve(&entry.submitter, &users),
                    reason,
                    started_at: entry.started_at,
                });
            }
        }

        let activities: HashMap<BetId, &str> =
            bets.iter().map(|b| (b.id, b.activity.as_str())).collect();
        for entry in self.inflight.entries() {
            if entry.submitter != user_id {
                continue;
            }
            items.push(PendingItem::OwnAttempt {
                bet_id: entry.bet_id,
                activity: activities
                    .get(&entry.bet_id)
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                verification_id: entry.id,
                state: entry.state,
                started_at: entry.started_at,
            });
        }
        Ok(items)
    }

    pub async fn leaderboard(&self, limit: usize) -> QueryResult<Vec<LeaderboardEntry>> {
        Ok(self.aggregator.leaderboard(limit).await?)
    }

    pub async fn profile(&self, user_id: &str) -> QueryResult<Profile> {
        let stats = self.aggregator.stats(user_id).await?;
        let open_bets = self
            .store
            .bets_for_user(user_id)
            .await?
            .iter()
            .filter(|b| b.status.is_open())
            .count();
        Ok(Profile {
            stats,
            open_bets,
        })
    }

    pub async fn bet_detail(&self, bet_id: &BetId) -> QueryResult<BetDetail> {
        let bet = self
            .store
            .get_bet(bet_id)
            .await?
            .ok_or(QueryError::UnknownBet(*bet_id))?;
        let users = self.users().await?;
        let submissions = self.ledger.list_for(bet_id).await?;
        tracing::debug!("bet detail for {} with {} submission(s)", bet_id, submissions.len());
        Ok(BetDetail {
            bet: BetView::render(&bet, &users),
            submissions,
            in_flight: self.inflight.entries_for_bet(bet_id),
            transitions: bet.transitions,
        })
    }
}
