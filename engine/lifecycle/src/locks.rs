use model::BetId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
struct LockTable {
    slots: HashMap<BetId, Arc<AsyncMutex<()>>>,
    retired: HashSet<BetId>,
}

/// Lazily created per-bet mutexes. Holding the guard makes the caller the
/// single writer for that bet. Entries of settled or cancelled bets are
/// dropped once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct BetLocks {
    table: Arc<Mutex<LockTable>>,
}

impl BetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn lock(&self, bet_id: BetId) -> BetGuard {
        let slot = self.table().slots.entry(bet_id).or_default().clone();
        tracing::debug!("waiting for lock on bet {}", bet_id);
        let guard = slot.lock_owned().await;
        BetGuard {
            locks: self.clone(),
            bet_id,
            guard: Some(guard),
        }
    }

    /// Marks a bet that reached a terminal state. Its entry goes away when
    /// the last guard for it is dropped.
    pub fn retire(&self, bet_id: BetId) {
        self.table().retired.insert(bet_id);
    }

    pub fn len(&self) -> usize {
        self.table().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct BetGuard {
    locks: BetLocks,
    bet_id: BetId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BetGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.locks.table();
        if !table.retired.contains(&self.bet_id) {
            return;
        }
        let idle = table
            .slots
            .get(&self.bet_id)
            .map(|slot| Arc::strong_count(slot) == 1)
            .unwrap_or(true);
        if idle {
            table.slots.remove(&self.bet_id);
            table.retired.remove(&self.bet_id);
        }
    }
}
