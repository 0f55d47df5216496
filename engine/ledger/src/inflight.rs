use chrono::{DateTime, Utc};
use model::{BetId, EvidenceHandle, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InFlightState {
    Verifying,
    Deferred { reason: String },
}

/// A proof attempt whose verdict is not resolved yet. Never part of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightEntry {
    pub id: Uuid,
    pub bet_id: BetId,
    pub submitter: UserId,
    pub evidence: EvidenceHandle,
    pub started_at: DateTime<Utc>,
    pub state: InFlightState,
}

struct Slot {
    entry: InFlightEntry,
    cancel: Arc<Notify>,
}

#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Slot>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(
        &self,
        bet_id: BetId,
        submitter: UserId,
        evidence: EvidenceHandle,
        now: DateTime<Utc>,
    ) -> InFlightGuard {
        let id = Uuid::new_v4();
        let cancel = Arc::new(Notify::new());
        let entry = InFlightEntry {
            id,
            bet_id,
            submitter,
            evidence,
            started_at: now,
            state: InFlightState::Verifying,
        };
        self.slots().insert(
            id,
            Slot {
                entry,
                cancel: cancel.clone(),
            },
        );
        InFlightGuard {
            registry: self.clone(),
            id,
            cancel,
            keep: false,
        }
    }

    /// Wakes the waiting submission (if any) and forgets the entry.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.slots().remove(id) {
            Some(slot) => {
                slot.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<InFlightEntry> {
        self.slots().get(id).map(|slot| slot.entry.clone())
    }

    pub fn entries(&self) -> Vec<InFlightEntry> {
        let mut out: Vec<InFlightEntry> = self.slots().values().map(|s| s.entry.clone()).collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        out
    }

    pub fn entries_for_bet(&self, bet_id: &BetId) -> Vec<InFlightEntry> {
        let mut out = self.entries();
        out.retain(|e| e.bet_id == *bet_id);
        out
    }

    pub fn deferred_for_bet(&self, bet_id: &BetId) -> Vec<InFlightEntry> {
        let mut out = self.entries_for_bet(bet_id);
        out.retain(|e| matches!(e.state, InFlightState::Deferred { .. }));
        out
    }

    /// Removes an entry without waking anyone.
    pub fn take(&self, id: &Uuid) -> Option<InFlightEntry> {
        self.slots().remove(id).map(|slot| slot.entry)
    }

    /// Drops deferred attempts by `submitter` that a fresh verdict supersedes.
    pub fn clear_deferred(&self, bet_id: &BetId, submitter: &str) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| {
            !(slot.entry.bet_id == *bet_id
                && slot.entry.submitter == submitter
                && matches!(slot.entry.state, InFlightState::Deferred { .. }))
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds an in-flight entry for the duration of a verification. Dropping the
/// guard removes the entry unless it was deferred.
pub struct InFlightGuard {
    registry: InFlightRegistry,
    id: Uuid,
    cancel: Arc<Notify>,
    keep: bool,
}

impl InFlightGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves once [`InFlightRegistry::cancel`] is called for this entry.
    pub async fn cancelled(&self) {
        self.cancel.notified().await
    }

    pub fn defer(mut self, reason: impl Into<String>) {
        if let Some(slot) = self.registry.slots().get_mut(&self.id) {
            slot.entry.state = InFlightState::Deferred {
                reason: reason.into(),
            };
            self.keep = true;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.keep {
            self.registry.slots().remove(&self.id);
        }
    }
}
