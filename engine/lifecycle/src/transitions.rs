//! Pure bet-state rules. Nothing here touches storage.

use chrono::{DateTime, Utc};
use model::{deadline_passed, Bet, BetStatus, Outcome};

/// Marks every undecided performer whose deadline passed with proofs owed as
/// failed. Returns how many changed.
pub fn expire_performers(bet: &mut Bet, now: DateTime<Utc>) -> usize {
    let deadline = bet.deadline;
    let mut expired = 0;
    for performer in bet.performers.values_mut() {
        if performer.outcome.is_none() && deadline_passed(now, deadline, &performer.progress) {
            performer.outcome = Some(Outcome::Failed);
            expired += 1;
        }
    }
    expired
}

/// Counts one accepted proof for `user`. The performer completes when the
/// required count is reached. Returns false when nothing was counted.
pub fn credit_proof(bet: &mut Bet, user: &str) -> bool {
    let Some(performer) = bet.performer_mut(user) else {
        return false;
    };
    if performer.outcome.is_some() {
        return false;
    }
    let counted = performer.progress.increment();
    if performer.progress.is_complete() {
        performer.outcome = Some(Outcome::Completed);
    }
    counted
}

/// Counts a missed proof. Returns true if the performer just failed.
pub fn record_miss(bet: &mut Bet, user: &str, allowed_misses: u32) -> bool {
    let Some(performer) = bet.performer_mut(user) else {
        return false;
    };
    if performer.outcome.is_some() {
        return false;
    }
    performer.misses += 1;
    if performer.misses > allowed_misses {
        performer.outcome = Some(Outcome::Failed);
        return true;
    }
    false
}

/// Bet-level outcome from the performers. A single performer is the
/// degenerate case: failing means a failed fraction of 1.
pub fn decide(bet: &Bet, failure_quorum: f64) -> Option<Outcome> {
    let total = bet.performers.len();
    if total == 0 {
        return None;
    }
    let failed = bet
        .performers
        .values()
        .filter(|p| p.outcome == Some(Outcome::Failed))
        .count();
    if failed as f64 / total as f64 >= failure_quorum {
        return Some(Outcome::Failed);
    }
    if bet.performers.values().all(|p| p.outcome.is_some()) {
        return Some(Outcome::Completed);
    }
    None
}

/// Moves the bet to Completed or Failed once its outcome is decided.
pub fn conclude(
    bet: &mut Bet,
    now: DateTime<Utc>,
    failure_quorum: f64,
    reason: &str,
) -> Option<Outcome> {
    if bet.outcome.is_some() {
        return bet.outcome;
    }
    let outcome = decide(bet, failure_quorum)?;
    bet.outcome = Some(outcome);
    let to = match outcome {
        Outcome::Completed => BetStatus::Completed,
        Outcome::Failed => BetStatus::Failed,
    };
    bet.dispute = None;
    bet.transition(to, now, reason);
    Some(outcome)
}

/// Returns an undecided bet to Active, or PendingVerification while deferred
/// verdicts remain.
pub fn resume(bet: &mut Bet, has_deferred: bool, now: DateTime<Utc>, reason: &str) {
    let to = if has_deferred {
        BetStatus::PendingVerification
    } else {
        BetStatus::Active
    };
    if bet.status != to {
        bet.transition(to, now, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use model::{BetLength, Counterparty, Frequency, ProofType};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn group_bet(members: &[&str]) -> Bet {
        Bet::new(
            Uuid::new_v4(),
            "you".into(),
            Counterparty::Group {
                name: "Gym Buddies".into(),
                members: members.iter().map(|m| m.to_string()).collect::<BTreeSet<_>>(),
            },
            "Go to gym".into(),
            10,
            ProofType::LivePhoto,
            Frequency::OneXWeek,
            BetLength::OneWeek,
            Utc::now(),
        )
    }

    #[test]
    fn quorum_fails_group_before_everyone_decides() {
        let mut bet = group_bet(&["a", "b", "c"]);
        record_miss(&mut bet, "a", 0);
        assert_eq!(decide(&bet, 0.5), None);
        record_miss(&mut bet, "b", 0);
        assert_eq!(decide(&bet, 0.5), Some(Outcome::Failed));
    }

    #[test]
    fn group_completes_when_all_decided_below_quorum() {
        let mut bet = group_bet(&["a", "b", "c"]);
        for user in ["you", "a", "b"] {
            assert!(credit_proof(&mut bet, user));
        }
        record_miss(&mut bet, "c", 0);
        assert_eq!(decide(&bet, 0.5), Some(Outcome::Completed));
    }

    #[test]
    fn expiry_only_hits_performers_with_proofs_owed() {
        let mut bet = group_bet(&["a"]);
        credit_proof(&mut bet, "a");
        let late = bet.deadline + Duration::seconds(1);
        assert_eq!(expire_performers(&mut bet, late), 1);
        assert_eq!(bet.performer("you").and_then(|p| p.outcome), Some(Outcome::Failed));
        assert_eq!(bet.performer("a").and_then(|p| p.outcome), Some(Outcome::Completed));
    }
}
