use chrono::{DateTime, Utc};
use ledger::{InFlightEntry, InFlightState};
use model::{
    Bet, BetId, BetLength, BetStatus, Counterparty, Dispute, Frequency, Outcome, ProofSubmission,
    ProofType, SubmissionId, Transition, User, UserId,
};
use scoring::UserStats;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    pub id: UserId,
    pub display_name: String,
    pub departed: bool,
}

impl ParticipantView {
    pub(crate) fn resolve(id: &str, users: &HashMap<UserId, User>) -> Self {
        match users.get(id) {
            Some(user) => Self {
                id: user.id.clone(),
                display_name: user.display_name.clone(),
                departed: !user.active,
            },
            None => Self {
                id: id.to_string(),
                display_name: id.to_string(),
                departed: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CounterpartyView {
    Individual {
        user: ParticipantView,
    },
    Group {
        name: String,
        members: Vec<ParticipantView>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformerView {
    pub user: ParticipantView,
    pub current: u32,
    pub total: u32,
    pub misses: u32,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BetView {
    pub id: BetId,
    pub activity: String,
    pub status: BetStatus,
    pub outcome: Option<Outcome>,
    pub stake: u64,
    pub proof_type: ProofType,
    pub frequency: Frequency,
    pub length: BetLength,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub initiator: ParticipantView,
    pub counterparty: CounterpartyView,
    pub performers: Vec<PerformerView>,
    pub escrow_total: u64,
    pub settled: bool,
    pub dispute: Option<Dispute>,
}

impl BetView {
    pub(crate) fn render(bet: &Bet, users: &HashMap<UserId, User>) -> Self {
        let counterparty = match &bet.counterparty {
            Counterparty::Individual { user } => CounterpartyView::Individual {
                user: ParticipantView::resolve(user, users),
            },
            Counterparty::Group { name, members } => CounterpartyView::Group {
                name: name.clone(),
                members: members
                    .iter()
                    .map(|m| ParticipantView::resolve(m, users))
                    .collect(),
            },
        };
        Self {
            id: bet.id,
            activity: bet.activity.clone(),
            status: bet.status,
            outcome: bet.outcome,
            stake: bet.stake,
            proof_type: bet.proof_type,
            frequency: bet.frequency,
            length: bet.length,
            created_at: bet.created_at,
            deadline: bet.deadline,
            initiator: ParticipantView::resolve(&bet.initiator, users),
            counterparty,
            performers: bet
                .performers
                .values()
                .map(|p| PerformerView {
                    user: ParticipantView::resolve(&p.user, users),
                    current: p.progress.current,
                    total: p.progress.total,
                    misses: p.misses,
                    outcome: p.outcome,
                })
                .collect(),
            escrow_total: bet.escrow_total(),
            settled: bet.settled,
            dispute: bet.dispute.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BetDetail {
    pub bet: BetView,
    pub submissions: Vec<ProofSubmission>,
    pub in_flight: Vec<InFlightEntry>,
    pub transitions: Vec<Transition>,
}

/// Something waiting on a verdict that the user should know about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingItem {
    /// A flagged proof the user must accept or reject.
    Dispute {
        bet_id: BetId,
        activity: String,
        submission_id: SubmissionId,
        submitter: ParticipantView,
        opened_at: DateTime<Utc>,
    },
    /// A proof the verifier could not judge; the user can verify it by hand.
    Deferred {
        bet_id: BetId,
        activity: String,
        verification_id: Uuid,
        submitter: ParticipantView,
        reason: String,
        started_at: DateTime<Utc>,
    },
    /// One of the user's own proofs still being verified or deferred.
    OwnAttempt {
        bet_id: BetId,
        activity: String,
        verification_id: Uuid,
        state: InFlightState,
        started_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub stats: UserStats,
    pub open_bets: usize,
}
