use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BetId, SubmissionId, UserId};

/// Reference to captured evidence. The core never owns the media itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceHandle {
    pub uri: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub suspicious: bool,
    pub confidence: f64,
    pub reason: String,
}

impl Verdict {
    pub fn authentic(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            suspicious: false,
            confidence,
            reason: reason.into(),
        }
    }

    pub fn suspicious(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            suspicious: true,
            confidence,
            reason: reason.into(),
        }
    }

    pub fn is_authentic(&self) -> bool {
        !self.suspicious
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Gateway,
    FailOpen,
    Unavailable,
    Counterparty,
}

/// Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofSubmission {
    pub id: SubmissionId,
    pub bet_id: BetId,
    pub submitter: UserId,
    pub evidence: EvidenceHandle,
    pub submitted_at: DateTime<Utc>,
    pub verdict: Verdict,
    pub source: VerdictSource,
}
