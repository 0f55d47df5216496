use chrono::{DateTime, Duration, Utc};
use ledger::{InFlightRegistry, InFlightState, InMemoryLedger, ProofLedger};
use model::{
    Bet, BetId, BetLength, BetStatus, BetStore, Counterparty, Dispute, EvidenceHandle, Frequency,
    InMemoryBetStore, ProofSubmission, ProofType, User, Verdict, VerdictSource,
};
use scoring::Aggregator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use verification::{VerificationBackend, VerificationError, VerificationGateway, VerifyResult};

use crate::clock::Clock;
use crate::config::{EngineConfig, StakeModel, UnavailablePolicy};
use crate::error::{EngineError, EngineResult};
use crate::locks::BetLocks;
use crate::settlement::{self, Settlement};
use crate::transitions;

const UNAVAILABLE_REASON: &str = "verification unavailable";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeParams {
    pub counterparty: Counterparty,
    pub activity: String,
    pub stake: u64,
    pub proof_type: ProofType,
    pub frequency: Frequency,
    pub length: BetLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofReceipt {
    pub submission: ProofSubmission,
    pub bet: Bet,
    pub settlement: Option<Settlement>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: Vec<BetId>,
    pub failures: usize,
}

/// Owns every bet transition. Each write takes the bet's lock, so one bet has
/// a single writer while different bets proceed in parallel.
pub struct BetEngine {
    config: EngineConfig,
    store: Arc<dyn BetStore>,
    ledger: Arc<dyn ProofLedger>,
    gateway: VerificationGateway,
    aggregator: Aggregator,
    inflight: InFlightRegistry,
    locks: BetLocks,
    clock: Arc<dyn Clock>,
}

impl BetEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn BetStore>,
        ledger: Arc<dyn ProofLedger>,
        backend: Arc<dyn VerificationBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gateway = VerificationGateway::new(
            backend,
            Duration::seconds(config.verification.max_evidence_age_secs),
        );
        let aggregator = Aggregator::new(store.clone(), config.tiers);
        Self {
            config,
            store,
            ledger,
            gateway,
            aggregator,
            inflight: InFlightRegistry::new(),
            locks: BetLocks::new(),
            clock,
        }
    }

    pub fn in_memory(
        config: EngineConfig,
        backend: Arc<dyn VerificationBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store: Arc<dyn BetStore> = Arc::new(InMemoryBetStore::new());
        let ledger: Arc<dyn ProofLedger> = Arc::new(InMemoryLedger::new(store.clone()));
        Self::new(config, store, ledger, backend, clock)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn BetStore> {
        self.store.clone()
    }

    pub fn ledger(&self) -> Arc<dyn ProofLedger> {
        self.ledger.clone()
    }

    pub fn inflight(&self) -> &InFlightRegistry {
        &self.inflight
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn register_user(&self, id: &str, display_name: &str) -> EngineResult<User> {
        let id = id.trim();
        if id.is_empty() {
            return Err(EngineError::Validation("user id is required".into()));
        }
        let display_name = match display_name.trim() {
            "" => id.to_string(),
            name => name.to_string(),
        };
        let user = User::new(
            id.to_string(),
            display_name,
            self.config.starting_points,
            self.clock.now(),
        );
        self.store.insert_user(user.clone()).await?;
        info!("registered user {} with {} points", user.id, user.points);
        Ok(user)
    }

    pub async fn deactivate_user(&self, id: &str) -> EngineResult<()> {
        self.store.deactivate_user(id).await?;
        info!("user {} deactivated", id);
        Ok(())
    }

    pub async fn propose(&self, initiator: &str, params: ProposeParams) -> EngineResult<Bet> {
        let activity = params.activity.trim();
        if activity.is_empty() {
            return Err(EngineError::Validation("activity description is required".into()));
        }
        if params.stake == 0 {
            return Err(EngineError::Validation("stake must be positive".into()));
        }
        match &params.counterparty {
            Counterparty::Individual { user } => {
                if user == initiator {
                    return Err(EngineError::Validation("cannot bet against yourself".into()));
                }
            }
            Counterparty::Group { name, members } => {
                if name.trim().is_empty() {
                    return Err(EngineError::Validation("group name is required".into()));
                }
                if members.is_empty() {
                    return Err(EngineError::Validation("group has no members".into()));
                }
                if members.contains(initiator) {
                    return Err(EngineError::Validation(
                        "initiator cannot be listed as a group member".into(),
                    ));
                }
            }
        }

        let now = self.clock.now();
        let mut bet = Bet::new(
            Uuid::new_v4(),
            initiator.to_string(),
            params.counterparty,
            activity.to_string(),
            params.stake,
            params.proof_type,
            params.frequency,
            params.length,
            now,
        );
        for participant in bet.participants() {
            let user = self
                .store
                .get_user(&participant)
                .await?
                .ok_or_else(|| EngineError::Validation(format!("unknown participant {participant}")))?;
            if !user.active {
                return Err(EngineError::Validation(format!(
                    "participant {participant} has left"
                )));
            }
            let stakes = participant == initiator || self.config.stake_model == StakeModel::Matched;
            if stakes && user.points < bet.stake {
                return Err(EngineError::Validation(format!(
                    "{participant} has {} points, stake is {}",
                    user.points, bet.stake
                )));
            }
        }

        self.store.debit(initiator, bet.stake).await?;
        bet.escrow.insert(initiator.to_string(), bet.stake);
        self.store.put_bet(bet.clone()).await?;
        info!(
            "bet {} proposed by {}: {} ({} proofs by {})",
            bet.id,
            initiator,
            bet.activity,
            bet.frequency.required_count(bet.length),
            bet.deadline
        );
        Ok(bet)
    }

    pub async fn accept(&self, bet_id: BetId, participant: &str) -> EngineResult<Bet> {
        let _lock = self.locks.lock(bet_id).await;
        let now = self.clock.now();
        let mut bet = self.load_for_write(&bet_id, now).await?;
        if bet.status != BetStatus::Proposed {
            return Err(invalid(&bet, "accept"));
        }
        if !bet.required_acceptors().contains(participant) {
            return Err(EngineError::InvalidBetReference(format!(
                "{participant} is not a counterparty of bet {bet_id}"
            )));
        }
        if bet.acceptances.contains(participant) {
            return Ok(bet);
        }
        let user = self
            .store
            .get_user(participant)
            .await?
            .ok_or_else(|| EngineError::InvalidBetReference(format!("unknown user {participant}")))?;
        if !user.active {
            return Err(EngineError::Validation(format!("{participant} has left")));
        }
        if self.config.stake_model == StakeModel::Matched {
            self.store.debit(participant, bet.stake).await?;
            bet.escrow.insert(participant.to_string(), bet.stake);
        }
        bet.acceptances.insert(participant.to_string());
        if bet.required_acceptors().is_subset(&bet.acceptances) {
            bet.transition(BetStatus::Active, now, "all counterparties accepted");
            info!("bet {} is active", bet_id);
        }
        self.store.put_bet(bet.clone()).await?;
        Ok(bet)
    }

    pub async fn reject(&self, bet_id: BetId, participant: &str) -> EngineResult<Bet> {
        let _lock = self.locks.lock(bet_id).await;
        let now = self.clock.now();
        let mut bet = self.load_for_write(&bet_id, now).await?;
        if bet.status != BetStatus::Proposed {
            return Err(invalid(&bet, "reject"));
        }
        if !bet.required_acceptors().contains(participant) {
            return Err(EngineError::InvalidBetReference(format!(
                "{participant} is not a counterparty of bet {bet_id}"
            )));
        }
        self.cancel_locked(&mut bet, now, format!("rejected by {participant}"))
            .await?;
        Ok(bet)
    }

    /// Verifies a proof and applies the verdict. The verifier is called without
    /// the bet lock held; the state is re-checked before anything is recorded.
    pub async fn submit_proof(
        &self,
        bet_id: BetId,
        submitter: &str,
        evidence: EvidenceHandle,
    ) -> EngineResult<ProofReceipt> {
        let (guard, activity) = {
            let _lock = self.locks.lock(bet_id).await;
            let now = self.clock.now();
            let bet = self.load_for_write(&bet_id, now).await?;
            ensure_can_prove(&bet, submitter, "submit proof")?;
            self.gateway
                .validate(&evidence, &bet.activity, now)
                .map_err(|e| EngineError::from_gateway(bet_id, e))?;
            let guard = self
                .inflight
                .register(bet_id, submitter.to_string(), evidence.clone(), now);
            debug!("verification {} started for bet {}", guard.id(), bet_id);
            (guard, bet.activity)
        };

        let outcome = tokio::select! {
            _ = guard.cancelled() => {
                warn!("verification {} for bet {} cancelled", guard.id(), bet_id);
                return Err(EngineError::VerificationCancelled(guard.id()));
            }
            result = self.verify_with_retries(&evidence, &activity) => result,
        };

        let _lock = self.locks.lock(bet_id).await;
        if self.inflight.get(&guard.id()).is_none() {
            warn!("verification {} for bet {} cancelled", guard.id(), bet_id);
            return Err(EngineError::VerificationCancelled(guard.id()));
        }
        let now = self.clock.now();
        let mut bet = self.load_for_write(&bet_id, now).await?;
        if let Err(err) = ensure_can_prove(&bet, submitter, "apply verdict") {
            warn!("dropping verdict for bet {}: {}", bet_id, err);
            return Err(err);
        }

        let (verdict, source) = match outcome {
            Ok(verdict) => (verdict, VerdictSource::Gateway),
            Err(VerificationError::InvalidRequest(msg)) => {
                return Err(EngineError::Validation(msg));
            }
            Err(err) => match self.config.verification.on_unavailable {
                UnavailablePolicy::Defer => {
                    let reason = err.to_string();
                    warn!("verification for bet {} deferred: {}", bet_id, reason);
                    if bet.status != BetStatus::PendingVerification {
                        bet.transition(BetStatus::PendingVerification, now, "verification deferred");
                        self.store.put_bet(bet).await?;
                    }
                    guard.defer(reason.clone());
                    return Err(EngineError::VerificationUnavailable {
                        bet_id,
                        deferred: true,
                        reason,
                    });
                }
                UnavailablePolicy::FailOpen => {
                    warn!("verification for bet {} failed open: {}", bet_id, err);
                    (Verdict::authentic(0.0, UNAVAILABLE_REASON), VerdictSource::FailOpen)
                }
                UnavailablePolicy::Dispute => {
                    warn!("verification for bet {} unavailable, disputing: {}", bet_id, err);
                    (Verdict::suspicious(0.0, UNAVAILABLE_REASON), VerdictSource::Unavailable)
                }
            },
        };

        let submission = ProofSubmission {
            id: Uuid::new_v4(),
            bet_id,
            submitter: submitter.to_string(),
            evidence,
            submitted_at: now,
            verdict,
            source,
        };
        drop(guard);
        self.record_verdict(&mut bet, submission, now).await
    }

    pub async fn resolve_dispute(
        &self,
        bet_id: BetId,
        resolver: &str,
        resolution: Resolution,
    ) -> EngineResult<Bet> {
        let _lock = self.locks.lock(bet_id).await;
        let now = self.clock.now();
        let mut bet = self.load_for_write(&bet_id, now).await?;
        let allowed_misses = self.config.allowed_misses;

        match bet.status {
            BetStatus::Disputed => {
                let dispute = bet
                    .dispute
                    .clone()
                    .ok_or_else(|| invalid(&bet, "resolve dispute"))?;
                ensure_resolver(&bet, resolver, &dispute.submitter)?;
                match resolution {
                    Resolution::Accept => {
                        transitions::credit_proof(&mut bet, &dispute.submitter);
                    }
                    Resolution::Reject => {
                        transitions::record_miss(&mut bet, &dispute.submitter, allowed_misses);
                    }
                }
                bet.dispute = None;
                info!(
                    "dispute on bet {} resolved by {}: {:?}",
                    bet_id, resolver, resolution
                );
            }
            BetStatus::PendingVerification => {
                let entry = self
                    .inflight
                    .deferred_for_bet(&bet_id)
                    .into_iter()
                    .find(|e| bet.counterparties_of(&e.submitter).contains(resolver))
                    .ok_or_else(|| {
                        EngineError::InvalidBetReference(format!(
                            "{resolver} has no deferred verification to resolve on bet {bet_id}"
                        ))
                    })?;
                match resolution {
                    Resolution::Accept => {
                        let submission = ProofSubmission {
                            id: Uuid::new_v4(),
                            bet_id,
                            submitter: entry.submitter.clone(),
                            evidence: entry.evidence.clone(),
                            submitted_at: now,
                            verdict: Verdict::authentic(1.0, format!("accepted by {resolver}")),
                            source: VerdictSource::Counterparty,
                        };
                        self.ledger.append(&bet_id, submission.clone()).await?;
                        bet.submissions.push(submission.id);
                        transitions::credit_proof(&mut bet, &entry.submitter);
                    }
                    Resolution::Reject => {
                        transitions::record_miss(&mut bet, &entry.submitter, allowed_misses);
                    }
                }
                self.inflight.take(&entry.id);
                info!(
                    "deferred verification {} on bet {} resolved by {}: {:?}",
                    entry.id, bet_id, resolver, resolution
                );
            }
            _ => return Err(invalid(&bet, "resolve dispute")),
        }

        transitions::expire_performers(&mut bet, now);
        self.advance(&mut bet, now, "dispute resolved").await?;
        Ok(bet)
    }

    pub async fn settle(&self, bet_id: BetId) -> EngineResult<Settlement> {
        let _lock = self.locks.lock(bet_id).await;
        let now = self.clock.now();
        let mut bet = self.load_for_write(&bet_id, now).await?;
        self.settle_locked(&mut bet, now).await
    }

    /// Applies passed deadlines to every open bet except disputed ones.
    pub async fn sweep_deadlines(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let mut report = SweepReport::default();
        let candidates: Vec<BetId> = self
            .store
            .list_bets()
            .await?
            .into_iter()
            .filter(|b| {
                matches!(
                    b.status,
                    BetStatus::Proposed | BetStatus::Active | BetStatus::PendingVerification
                ) && now >= b.deadline
            })
            .map(|b| b.id)
            .collect();

        for bet_id in candidates {
            report.examined += 1;
            match self.expire_one(bet_id, now).await {
                Ok(true) => report.expired.push(bet_id),
                Ok(false) => {}
                Err(err) => {
                    warn!("deadline sweep failed for bet {}: {}", bet_id, err);
                    report.failures += 1;
                }
            }
        }
        if !report.expired.is_empty() {
            info!("deadline sweep expired {} bet(s)", report.expired.len());
        }
        Ok(report)
    }

    /// Cancels an in-flight or deferred verification. Returns false when the
    /// id is not known.
    pub async fn cancel_verification(&self, id: &Uuid) -> EngineResult<bool> {
        let Some(entry) = self.inflight.get(id) else {
            return Ok(false);
        };
        match entry.state {
            InFlightState::Verifying => Ok(self.inflight.cancel(id)),
            InFlightState::Deferred { .. } => {
                let _lock = self.locks.lock(entry.bet_id).await;
                let cancelled = self.inflight.cancel(id);
                let mut bet = self.load(&entry.bet_id).await?;
                if bet.status == BetStatus::PendingVerification
                    && self.inflight.deferred_for_bet(&bet.id).is_empty()
                {
                    bet.transition(BetStatus::Active, self.clock.now(), "deferred verification withdrawn");
                    self.store.put_bet(bet).await?;
                }
                info!("deferred verification {} withdrawn", id);
                Ok(cancelled)
            }
        }
    }

    async fn expire_one(&self, bet_id: BetId, now: DateTime<Utc>) -> EngineResult<bool> {
        let _lock = self.locks.lock(bet_id).await;
        let mut bet = self.load(&bet_id).await?;
        self.apply_deadline(&mut bet, now).await
    }

    async fn load(&self, bet_id: &BetId) -> EngineResult<Bet> {
        self.store
            .get_bet(bet_id)
            .await?
            .ok_or_else(|| EngineError::InvalidBetReference(format!("unknown bet {bet_id}")))
    }

    /// Loads a bet the caller holds the lock for and applies a passed deadline.
    async fn load_for_write(&self, bet_id: &BetId, now: DateTime<Utc>) -> EngineResult<Bet> {
        let mut bet = self.load(bet_id).await?;
        self.apply_deadline(&mut bet, now).await?;
        Ok(bet)
    }

    async fn apply_deadline(&self, bet: &mut Bet, now: DateTime<Utc>) -> EngineResult<bool> {
        match bet.status {
            BetStatus::Proposed if now >= bet.deadline => {
                self.cancel_locked(bet, now, "proposal expired".to_string())
                    .await?;
                Ok(true)
            }
            BetStatus::Active | BetStatus::PendingVerification => {
                let expired = transitions::expire_performers(bet, now);
                if expired == 0 {
                    return Ok(false);
                }
                info!("deadline passed on bet {} for {} performer(s)", bet.id, expired);
                self.advance(bet, now, "deadline passed").await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_verdict(
        &self,
        bet: &mut Bet,
        submission: ProofSubmission,
        now: DateTime<Utc>,
    ) -> EngineResult<ProofReceipt> {
        let submitter = submission.submitter.clone();
        self.ledger.append(&bet.id, submission.clone()).await?;
        bet.submissions.push(submission.id);
        let superseded = self.inflight.clear_deferred(&bet.id, &submitter);
        if superseded > 0 {
            debug!("{} deferred verification(s) superseded on bet {}", superseded, bet.id);
        }

        if submission.verdict.is_authentic() {
            transitions::credit_proof(bet, &submitter);
            info!(
                "proof {} accepted on bet {} ({:.2})",
                submission.id, bet.id, submission.verdict.confidence
            );
        } else {
            bet.dispute = Some(Dispute {
                submission_id: submission.id,
                submitter: submitter.clone(),
                opened_at: now,
            });
            bet.transition(
                BetStatus::Disputed,
                now,
                format!("proof flagged: {}", submission.verdict.reason),
            );
            warn!(
                "proof {} on bet {} flagged as suspicious: {}",
                submission.id, bet.id, submission.verdict.reason
            );
        }

        let settlement = self.advance(bet, now, "proof verified").await?;
        Ok(ProofReceipt {
            submission,
            bet: bet.clone(),
            settlement,
        })
    }

    /// Concludes the bet if its outcome is decided, otherwise resumes it, then
    /// persists. A bet with an open dispute waits for the resolution.
    async fn advance(
        &self,
        bet: &mut Bet,
        now: DateTime<Utc>,
        reason: &str,
    ) -> EngineResult<Option<Settlement>> {
        if bet.dispute.is_none() {
            if transitions::conclude(bet, now, self.config.failure_quorum, reason).is_some() {
                for entry in self.inflight.deferred_for_bet(&bet.id) {
                    self.inflight.take(&entry.id);
                }
                info!("bet {} reached {:?}", bet.id, bet.status);
            } else {
                let has_deferred = !self.inflight.deferred_for_bet(&bet.id).is_empty();
                transitions::resume(bet, has_deferred, now, reason);
            }
        }
        self.store.put_bet(bet.clone()).await?;
        let decided = matches!(bet.status, BetStatus::Completed | BetStatus::Failed);
        if decided && !bet.settled && self.config.auto_settle {
            return Ok(Some(self.settle_locked(bet, now).await?));
        }
        Ok(None)
    }

    async fn cancel_locked(
        &self,
        bet: &mut Bet,
        now: DateTime<Utc>,
        reason: String,
    ) -> EngineResult<()> {
        let refunds = std::mem::take(&mut bet.escrow);
        bet.transition(BetStatus::Cancelled, now, reason.clone());
        self.store.put_bet(bet.clone()).await?;
        self.locks.retire(bet.id);
        for (user, amount) in refunds {
            self.store.credit(&user, amount).await?;
        }
        info!("bet {} cancelled: {}", bet.id, reason);
        Ok(())
    }

    /// Moves escrow exactly once. The settled flag is persisted before any
    /// point moves, so a repeat can only ever observe it.
    async fn settle_locked(&self, bet: &mut Bet, now: DateTime<Utc>) -> EngineResult<Settlement> {
        if bet.settled {
            let conflict = EngineError::SettlementConflict(bet.id);
            warn!("{}", conflict);
            return Ok(Settlement::AlreadySettled { bet_id: bet.id });
        }
        let outcome = match (bet.status, bet.outcome) {
            (BetStatus::Completed | BetStatus::Failed, Some(outcome)) => outcome,
            _ => return Err(invalid(bet, "settle")),
        };

        let payouts = settlement::payouts(bet, outcome);
        bet.settled = true;
        bet.escrow.clear();
        bet.transition(BetStatus::Settled, now, format!("settled as {outcome:?}"));
        self.store.put_bet(bet.clone()).await?;
        self.locks.retire(bet.id);
        for payout in &payouts {
            self.store.credit(&payout.user, payout.amount).await?;
        }
        info!(
            "bet {} settled as {:?} with {} payout(s)",
            bet.id,
            outcome,
            payouts.len()
        );

        for user in bet.participants() {
            self.aggregator.recompute(&user).await?;
        }
        Ok(Settlement::Settled {
            bet_id: bet.id,
            outcome,
            payouts,
        })
    }

    async fn verify_with_retries(
        &self,
        evidence: &EvidenceHandle,
        activity: &str,
    ) -> VerifyResult<Verdict> {
        let policy = &self.config.verification;
        let timeout = StdDuration::from_millis(policy.timeout_ms);
        let mut last = None;
        for attempt in 0..=policy.retries {
            if attempt > 0 {
                tokio::time::sleep(StdDuration::from_millis(policy.backoff_ms)).await;
            }
            let now = self.clock.now();
            let err = match tokio::time::timeout(timeout, self.gateway.verify(evidence, activity, now)).await {
                Ok(Ok(verdict)) => return Ok(verdict),
                Ok(Err(err)) if !err.is_retryable() => return Err(err),
                Ok(Err(err)) => err,
                Err(_) => VerificationError::Timeout(policy.timeout_ms),
            };
            warn!(
                "verification attempt {} via {} failed: {}",
                attempt + 1,
                self.gateway.backend_id(),
                err
            );
            last = Some(err);
        }
        Err(last.unwrap_or_else(|| VerificationError::Unavailable("no attempt made".into())))
    }
}

fn invalid(bet: &Bet, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        bet_id: bet.id,
        status: bet.status,
        action,
    }
}

fn ensure_can_prove(bet: &Bet, submitter: &str, action: &'static str) -> EngineResult<()> {
    if !bet.status.accepts_proof() {
        return Err(invalid(bet, action));
    }
    let performer = bet.performer(submitter).ok_or_else(|| {
        EngineError::InvalidBetReference(format!("{submitter} does not perform bet {}", bet.id))
    })?;
    if let Some(outcome) = performer.outcome {
        return Err(EngineError::Validation(format!(
            "{submitter} already reached {outcome:?} on bet {}",
            bet.id
        )));
    }
    Ok(())
}

fn ensure_resolver(bet: &Bet, resolver: &str, submitter: &str) -> EngineResult<()> {
    if bet.counterparties_of(submitter).contains(resolver) {
        return Ok(());
    }
    Err(EngineError::InvalidBetReference(format!(
        "{resolver} cannot judge proofs from {submitter} on bet {}",
        bet.id
    )))
}
