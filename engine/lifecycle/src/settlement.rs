use model::{Bet, BetId, Counterparty, Outcome, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub user: UserId,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Settlement {
    Settled {
        bet_id: BetId,
        outcome: Outcome,
        payouts: Vec<Payout>,
    },
    AlreadySettled {
        bet_id: BetId,
    },
}

impl Settlement {
    pub fn is_noop(&self) -> bool {
        matches!(self, Settlement::AlreadySettled { .. })
    }
}

/// Distributes the escrow pot of a decided bet. The sum of payouts always
/// equals the escrow total.
pub fn payouts(bet: &Bet, outcome: Outcome) -> Vec<Payout> {
    let pot = bet.escrow_total();
    if pot == 0 {
        return Vec::new();
    }
    let mut out: BTreeMap<UserId, u64> = BTreeMap::new();
    match &bet.counterparty {
        Counterparty::Individual { user } => {
            let winner = match outcome {
                Outcome::Completed => bet.initiator.clone(),
                Outcome::Failed => user.clone(),
            };
            out.insert(winner, pot);
        }
        Counterparty::Group { .. } => {
            let winners: Vec<&UserId> = bet
                .performers
                .values()
                .filter(|p| p.outcome == Some(Outcome::Completed))
                .map(|p| &p.user)
                .collect();
            if winners.is_empty() {
                for (user, amount) in &bet.escrow {
                    *out.entry(user.clone()).or_default() += amount;
                }
            } else {
                let mut forfeited = 0u64;
                for (user, amount) in &bet.escrow {
                    match bet.performer(user).and_then(|p| p.outcome) {
                        Some(Outcome::Failed) => forfeited += amount,
                        // winners and undecided performers keep their own stake
                        _ => *out.entry(user.clone()).or_default() += amount,
                    }
                }
                let share = forfeited / winners.len() as u64;
                let remainder = forfeited % winners.len() as u64;
                for winner in &winners {
                    *out.entry((*winner).clone()).or_default() += share;
                }
                if let Some(first) = winners.first() {
                    *out.entry((*first).clone()).or_default() += remainder;
                }
            }
        }
    }
    out.into_iter()
        .filter(|(_, amount)| *amount > 0)
        .map(|(user, amount)| Payout { user, amount })
        .collect()
}
