mod bet;
mod proof;
mod store;
mod user;

pub use bet::{
    deadline_passed, Bet, BetLength, BetStatus, Counterparty, Dispute, Frequency, Outcome,
    Performer, Progress, ProofType, Transition,
};
pub use proof::{EvidenceHandle, ProofSubmission, Verdict, VerdictSource};
pub use store::{BetStore, InMemoryBetStore, StoreError};
pub use user::{StatCounts, User};

pub type UserId = String;
pub type BetId = uuid::Uuid;
pub type SubmissionId = uuid::Uuid;
