use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::{Bet, BetId, StatCounts, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("user {0} already exists")]
    DuplicateUser(String),
    #[error("insufficient points for {user}: has {available}, needs {required}")]
    InsufficientPoints {
        user: String,
        available: u64,
        required: u64,
    },
    #[error("point balance overflow for {0}")]
    Overflow(String),
}

/// Users and bets. Point balances and stats only move through the dedicated
/// calls so concurrent settlements never overwrite each other.
#[async_trait]
pub trait BetStore: Send + Sync {
    async fn insert_user(&self, user: User) -> anyhow::Result<()>;
    async fn get_user(&self, id: &str) -> anyhow::Result<Option<User>>;
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;
    async fn deactivate_user(&self, id: &str) -> anyhow::Result<()>;
    async fn set_stats(&self, id: &str, stats: StatCounts) -> anyhow::Result<()>;
    async fn credit(&self, id: &str, amount: u64) -> anyhow::Result<u64>;
    async fn debit(&self, id: &str, amount: u64) -> anyhow::Result<u64>;
    async fn get_bet(&self, id: &BetId) -> anyhow::Result<Option<Bet>>;
    async fn put_bet(&self, bet: Bet) -> anyhow::Result<()>;
    async fn list_bets(&self) -> anyhow::Result<Vec<Bet>>;
    async fn bets_for_user(&self, id: &str) -> anyhow::Result<Vec<Bet>>;
}

#[derive(Debug, Default)]
struct BookState {
    users: HashMap<String, User>,
    bets: HashMap<BetId, Bet>,
}

#[derive(Clone, Default)]
pub struct InMemoryBetStore {
    inner: Arc<Mutex<BookState>>,
}

impl InMemoryBetStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BookState::default())),
        }
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, BookState>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("bet store lock poisoned"))
    }
}

#[async_trait]
impl BetStore for InMemoryBetStore {
    async fn insert_user(&self, user: User) -> anyhow::Result<()> {
        let mut guard = self.lock()?;
        if guard.users.contains_key(&user.id) {
            return Err(StoreError::DuplicateUser(user.id).into());
        }
        guard.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        let guard = self.lock()?;
        Ok(guard.users.get(id).cloned())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let guard = self.lock()?;
        Ok(guard.users.values().cloned().collect())
    }

    async fn deactivate_user(&self, id: &str) -> anyhow::Result<()> {
        let mut guard = self.lock()?;
        let user = guard
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownUser(id.to_string()))?;
        user.active = false;
        Ok(())
    }

    async fn set_stats(&self, id: &str, stats: StatCounts) -> anyhow::Result<()> {
        let mut guard = self.lock()?;
        let user = guard
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownUser(id.to_string()))?;
        user.stats = stats;
        Ok(())
    }

    async fn credit(&self, id: &str, amount: u64) -> anyhow::Result<u64> {
        let mut guard = self.lock()?;
        let user = guard
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownUser(id.to_string()))?;
        user.points = user
            .points
            .checked_add(amount)
            .ok_or_else(|| StoreError::Overflow(id.to_string()))?;
        Ok(user.points)
    }

    async fn debit(&self, id: &str, amount: u64) -> anyhow::Result<u64> {
        let mut guard = self.lock()?;
        let user = guard
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownUser(id.to_string()))?;
        let available = user.points;
        user.points = available
            .checked_sub(amount)
            .ok_or_else(|| StoreError::InsufficientPoints {
                user: id.to_string(),
                available,
                required: amount,
            })?;
        Ok(user.points)
    }

    async fn get_bet(&self, id: &BetId) -> anyhow::Result<Option<Bet>> {
        let guard = self.lock()?;
        Ok(guard.bets.get(id).cloned())
    }

    async fn put_bet(&self, bet: Bet) -> anyhow::Result<()> {
        let mut guard = self.lock()?;
        guard.bets.insert(bet.id, bet);
        Ok(())
    }

    async fn list_bets(&self) -> anyhow::Result<Vec<Bet>> {
        let guard = self.lock()?;
        let mut bets: Vec<Bet> = guard.bets.values().cloned().collect();
        bets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(bets)
    }

    async fn bets_for_user(&self, id: &str) -> anyhow::Result<Vec<Bet>> {
        let mut bets = self.list_bets().await?;
        bets.retain(|b| b.involves(id));
        Ok(bets)
    }
}
