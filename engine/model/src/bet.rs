use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{BetId, SubmissionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    #[serde(alias = "Live Photo")]
    LivePhoto,
    #[serde(alias = "Location")]
    LocationCheckin,
    #[serde(alias = "Screenshot")]
    Screenshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[serde(alias = "Daily")]
    Daily,
    #[serde(alias = "3x/week")]
    ThreeXWeek,
    #[serde(alias = "1x/week")]
    OneXWeek,
    #[serde(alias = "2x/month")]
    TwoXMonth,
    #[serde(alias = "1x/month")]
    OneXMonth,
}

impl Frequency {
    /// Number of proofs owed over `length`. A month counts as four weeks and
    /// month-based frequencies round up for shorter lengths.
    pub fn required_count(self, length: BetLength) -> u32 {
        let weeks = length.weeks();
        match self {
            Frequency::Daily => length.days() as u32,
            Frequency::ThreeXWeek => 3 * weeks,
            Frequency::OneXWeek => weeks,
            Frequency::TwoXMonth => (2 * weeks).div_ceil(4),
            Frequency::OneXMonth => weeks.div_ceil(4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetLength {
    #[serde(alias = "1 week")]
    OneWeek,
    #[serde(alias = "2 weeks")]
    TwoWeeks,
    #[serde(alias = "1 month")]
    OneMonth,
    #[serde(alias = "3 months")]
    ThreeMonths,
    #[serde(alias = "6 months")]
    SixMonths,
}

impl BetLength {
    pub fn days(self) -> i64 {
        match self {
            BetLength::OneWeek => 7,
            BetLength::TwoWeeks => 14,
            BetLength::OneMonth => 30,
            BetLength::ThreeMonths => 90,
            BetLength::SixMonths => 180,
        }
    }

    fn weeks(self) -> u32 {
        match self {
            BetLength::OneWeek => 1,
            BetLength::TwoWeeks => 2,
            BetLength::OneMonth => 4,
            BetLength::ThreeMonths => 12,
            BetLength::SixMonths => 24,
        }
    }

    pub fn deadline_from(self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::days(self.days())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Counterparty {
    Individual { user: UserId },
    Group { name: String, members: BTreeSet<UserId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Proposed,
    Active,
    PendingVerification,
    Disputed,
    Completed,
    Failed,
    Settled,
    Cancelled,
}

impl BetStatus {
    pub fn accepts_proof(self) -> bool {
        matches!(self, BetStatus::Active | BetStatus::PendingVerification)
    }

    /// Proposed, running or waiting on a verdict.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            BetStatus::Proposed
                | BetStatus::Active
                | BetStatus::PendingVerification
                | BetStatus::Disputed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

impl Progress {
    pub fn new(total: u32) -> Self {
        Self { current: 0, total }
    }

    /// Adds one proof. Returns false once the total is reached.
    pub fn increment(&mut self) -> bool {
        if self.current >= self.total {
            return false;
        }
        self.current += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// True when the deadline has been reached with proofs still owed.
pub fn deadline_passed(now: DateTime<Utc>, deadline: DateTime<Utc>, progress: &Progress) -> bool {
    now >= deadline && !progress.is_complete()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performer {
    pub user: UserId,
    pub progress: Progress,
    pub misses: u32,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub submission_id: SubmissionId,
    pub submitter: UserId,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: BetStatus,
    pub to: BetStatus,
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub initiator: UserId,
    pub counterparty: Counterparty,
    pub activity: String,
    pub stake: u64,
    pub proof_type: ProofType,
    pub frequency: Frequency,
    pub length: BetLength,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: BetStatus,
    pub outcome: Option<Outcome>,
    pub performers: BTreeMap<UserId, Performer>,
    pub acceptances: BTreeSet<UserId>,
    pub escrow: BTreeMap<UserId, u64>,
    pub settled: bool,
    pub submissions: Vec<SubmissionId>,
    pub dispute: Option<Dispute>,
    pub transitions: Vec<Transition>,
}

impl Bet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: BetId,
        initiator: UserId,
        counterparty: Counterparty,
        activity: String,
        stake: u64,
        proof_type: ProofType,
        frequency: Frequency,
        length: BetLength,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total = frequency.required_count(length);
        let mut performer_ids = vec![initiator.clone()];
        if let Counterparty::Group { members, .. } = &counterparty {
            performer_ids.extend(members.iter().cloned());
        }
        let performers = performer_ids
            .into_iter()
            .map(|user| {
                (
                    user.clone(),
                    Performer {
                        user,
                        progress: Progress::new(total),
                        misses: 0,
                        outcome: None,
                    },
                )
            })
            .collect();

        Self {
            id,
            initiator,
            counterparty,
            activity,
            stake,
            proof_type,
            frequency,
            length,
            created_at,
            deadline: length.deadline_from(created_at),
            status: BetStatus::Proposed,
            outcome: None,
            performers,
            acceptances: BTreeSet::new(),
            escrow: BTreeMap::new(),
            settled: false,
            submissions: Vec::new(),
            dispute: None,
            transitions: Vec::new(),
        }
    }

    /// Initiator plus every counterparty user, sorted and deduplicated.
    pub fn participants(&self) -> Vec<UserId> {
        let mut out: BTreeSet<UserId> = BTreeSet::new();
        out.insert(self.initiator.clone());
        out.extend(self.required_acceptors());
        out.into_iter().collect()
    }

    pub fn involves(&self, user: &str) -> bool {
        self.initiator == user || self.required_acceptors().contains(user)
    }

    /// Users whose acceptance turns the proposal into an active bet.
    pub fn required_acceptors(&self) -> BTreeSet<UserId> {
        match &self.counterparty {
            Counterparty::Individual { user } => BTreeSet::from([user.clone()]),
            Counterparty::Group { members, .. } => members.clone(),
        }
    }

    /// Users entitled to judge proofs submitted by `submitter`.
    pub fn counterparties_of(&self, submitter: &str) -> BTreeSet<UserId> {
        match &self.counterparty {
            Counterparty::Individual { user } if self.initiator == submitter => {
                BTreeSet::from([user.clone()])
            }
            Counterparty::Individual { .. } => BTreeSet::new(),
            Counterparty::Group { .. } => self
                .participants()
                .into_iter()
                .filter(|u| u != submitter)
                .collect(),
        }
    }

    pub fn performer(&self, user: &str) -> Option<&Performer> {
        self.performers.get(user)
    }

    pub fn performer_mut(&mut self, user: &str) -> Option<&mut Performer> {
        self.performers.get_mut(user)
    }

    pub fn escrow_total(&self) -> u64 {
        self.escrow.values().sum()
    }

    pub fn transition(&mut self, to: BetStatus, at: DateTime<Utc>, reason: impl Into<String>) {
        let from = self.status;
        self.transitions.push(Transition {
            from,
            to,
            at,
            reason: reason.into(),
        });
        self.status = to;
    }
}
