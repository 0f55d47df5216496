use model::{Bet, BetStatus, BetStore, Outcome, StatCounts, User, UserId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankTier {
    Beginner,
    Intermediate,
    Advanced,
    Legendary,
}

/// Minimum successful bets for each tier above Beginner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub intermediate: u32,
    pub advanced: u32,
    pub legendary: u32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            intermediate: 5,
            advanced: 15,
            legendary: 30,
        }
    }
}

impl TierThresholds {
    pub fn tier_for(&self, bets_successful: u32) -> RankTier {
        if bets_successful >= self.legendary {
            RankTier::Legendary
        } else if bets_successful >= self.advanced {
            RankTier::Advanced
        } else if bets_successful >= self.intermediate {
            RankTier::Intermediate
        } else {
            RankTier::Beginner
        }
    }

    pub fn validate(&self) -> ScoringResult<()> {
        if self.intermediate == 0
            || self.intermediate >= self.advanced
            || self.advanced >= self.legendary
        {
            return Err(ScoringError::InvalidThresholds(*self));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("tier thresholds must be positive and strictly increasing: {0:?}")]
    InvalidThresholds(TierThresholds),
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("scoring storage: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type ScoringResult<T> = Result<T, ScoringError>;

pub fn success_rate(counts: &StatCounts) -> f64 {
    if counts.bets_made == 0 {
        return 0.0;
    }
    counts.bets_successful.min(counts.bets_made) as f64 / counts.bets_made as f64
}

/// Counts settled bets the user performed in, and those they completed.
pub fn count_for(user: &str, bets: &[Bet]) -> StatCounts {
    let mut counts = StatCounts::default();
    for bet in bets.iter().filter(|b| b.status == BetStatus::Settled) {
        let Some(performer) = bet.performer(user) else {
            continue;
        };
        counts.bets_made += 1;
        if performer.outcome == Some(Outcome::Completed) {
            counts.bets_successful += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: UserId,
    pub display_name: String,
    pub points: u64,
    pub bets_made: u32,
    pub bets_successful: u32,
    pub success_rate: f64,
    pub tier: RankTier,
    pub departed: bool,
}

impl UserStats {
    pub fn from_user(user: &User, thresholds: &TierThresholds) -> Self {
        Self {
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            points: user.points,
            bets_made: user.stats.bets_made,
            bets_successful: user.stats.bets_successful,
            success_rate: success_rate(&user.stats),
            tier: thresholds.tier_for(user.stats.bets_successful),
            departed: !user.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub display_name: String,
    pub success_rate: f64,
    pub bets_successful: u32,
    pub bets_made: u32,
    pub tier: RankTier,
}

fn rate_fraction(counts: &StatCounts) -> (u64, u64) {
    if counts.bets_made == 0 {
        (0, 1)
    } else {
        (
            counts.bets_successful.min(counts.bets_made) as u64,
            counts.bets_made as u64,
        )
    }
}

/// Success rate descending, then successful bets descending, then id ascending.
pub fn compare_standing(a: &User, b: &User) -> Ordering {
    let (an, ad) = rate_fraction(&a.stats);
    let (bn, bd) = rate_fraction(&b.stats);
    (bn * ad)
        .cmp(&(an * bd))
        .then(b.stats.bets_successful.cmp(&a.stats.bets_successful))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn rank(mut users: Vec<User>, thresholds: &TierThresholds, limit: usize) -> Vec<LeaderboardEntry> {
    users.retain(|u| u.active);
    users.sort_by(compare_standing);
    users
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(idx, user)| LeaderboardEntry {
            rank: idx + 1,
            success_rate: success_rate(&user.stats),
            bets_successful: user.stats.bets_successful,
            bets_made: user.stats.bets_made,
            tier: thresholds.tier_for(user.stats.bets_successful),
            user_id: user.id,
            display_name: user.display_name,
        })
        .collect()
}

/// Owns stat recomputation. Recomputes for one user are serialized so a
/// stale snapshot can never be written over a fresher one.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn BetStore>,
    thresholds: TierThresholds,
    user_locks: Arc<Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn BetStore>, thresholds: TierThresholds) -> Self {
        Self {
            store,
            thresholds,
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.user_locks.lock().unwrap_or_else(|p| p.into_inner());
        table.entry(user_id.to_string()).or_default().clone()
    }

    /// Counts are read and written while holding the user's lock.
    pub async fn recompute(&self, user_id: &str) -> ScoringResult<UserStats> {
        let slot = self.user_lock(user_id);
        let _guard = slot.lock().await;
        let bets = self.store.bets_for_user(user_id).await?;
        let counts = count_for(user_id, &bets);
        self.store.set_stats(user_id, counts).await?;
        tracing::debug!(
            "recomputed stats for {}: {}/{}",
            user_id,
            counts.bets_successful,
            counts.bets_made
        );
        self.stats(user_id).await
    }

    pub async fn stats(&self, user_id: &str) -> ScoringResult<UserStats> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ScoringError::UnknownUser(user_id.to_string()))?;
        Ok(UserStats::from_user(&user, &self.thresholds))
    }

    pub async fn leaderboard(&self, limit: usize) -> ScoringResult<Vec<LeaderboardEntry>> {
        let users = self.store.list_users().await?;
        Ok(rank(users, &self.thresholds, limit))
    }
}
