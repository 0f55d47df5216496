use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use lifecycle::{
    BetEngine, Clock, EngineConfig, EngineError, ManualClock, ProposeParams, Resolution, Settlement,
    StakeModel, UnavailablePolicy,
};
use model::{
    Bet, BetLength, BetStatus, Counterparty, EvidenceHandle, Frequency, Outcome, ProofType,
    VerdictSource,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use verification::{
    VerificationBackend, VerificationError, VerificationRequest, VerificationResponse,
    VerifyResult,
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Authentic,
    Suspicious,
    Down,
    Hang,
}

struct Scripted {
    mode: Mutex<Mode>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
        })
    }

    fn set(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl VerificationBackend for Scripted {
    fn backend_id(&self) -> &'static str {
        "scripted"
    }

    async fn verify(&self, _request: &VerificationRequest) -> VerifyResult<VerificationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Authentic => Ok(VerificationResponse {
                success: true,
                is_suspicious: Some(false),
                confidence: Some(json!("0.91")),
                reason: Some("Image looks authentic.".into()),
                error: None,
            }),
            Mode::Suspicious => Ok(VerificationResponse {
                success: true,
                is_suspicious: Some(true),
                confidence: Some(json!(0.64)),
                reason: Some("Image appears to be from a different location or time.".into()),
                error: None,
            }),
            Mode::Down => Err(VerificationError::Unavailable("connection refused".into())),
            Mode::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Err(VerificationError::Timeout(60_000))
            }
        }
    }
}

struct Harness {
    engine: Arc<BetEngine>,
    backend: Arc<Scripted>,
    clock: ManualClock,
}

impl Harness {
    fn new(config: EngineConfig, mode: Mode) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap());
        let backend = Scripted::new(mode);
        let engine = BetEngine::in_memory(config, backend.clone(), Arc::new(clock.clone()));
        Self {
            engine: Arc::new(engine),
            backend,
            clock,
        }
    }

    fn evidence(&self, n: usize) -> EvidenceHandle {
        EvidenceHandle {
            uri: format!("file:///captures/proof-{n}.jpg"),
            captured_at: self.clock.now(),
        }
    }

    async fn points(&self, user: &str) -> u64 {
        self.engine
            .store()
            .get_user(user)
            .await
            .unwrap()
            .unwrap()
            .points
    }

    async fn bet(&self, bet: &Bet) -> Bet {
        self.engine.store().get_bet(&bet.id).await.unwrap().unwrap()
    }

    async fn individual_bet(&self, stake: u64, frequency: Frequency, length: BetLength) -> Bet {
        for (id, name) in [("you", "You"), ("sarah", "Sarah")] {
            let _ = self.engine.register_user(id, name).await;
        }
        let bet = self
            .engine
            .propose(
                "you",
                ProposeParams {
                    counterparty: Counterparty::Individual {
                        user: "sarah".into(),
                    },
                    activity: "Go to gym 3x/week".into(),
                    stake,
                    proof_type: ProofType::LivePhoto,
                    frequency,
                    length,
                },
            )
            .await
            .unwrap();
        let bet = self.engine.accept(bet.id, "sarah").await.unwrap();
        assert_eq!(bet.status, BetStatus::Active);
        bet
    }
}

fn fast_verification(mut config: EngineConfig) -> EngineConfig {
    config.verification.timeout_ms = 50;
    config.verification.backoff_ms = 10;
    config
}

#[tokio::test]
async fn twelve_authentic_proofs_complete_and_pay_once() {
    let h = Harness::new(EngineConfig::default(), Mode::Authentic);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;
    assert_eq!(h.points("you").await, 1_150);

    let mut last = None;
    for n in 0..12 {
        h.clock.advance(Duration::days(2));
        last = Some(
            h.engine
                .submit_proof(bet.id, "you", h.evidence(n))
                .await
                .unwrap(),
        );
    }
    let receipt = last.unwrap();
    assert!(matches!(
        receipt.settlement,
        Some(Settlement::Settled { outcome: Outcome::Completed, .. })
    ));
    let stored = h.bet(&bet).await;
    assert_eq!(stored.status, BetStatus::Settled);
    assert_eq!(stored.outcome, Some(Outcome::Completed));
    assert_eq!(stored.performer("you").unwrap().progress.current, 12);
    assert_eq!(h.points("you").await, 1_250);
    assert_eq!(h.points("sarah").await, 1_250);

    let again = h.engine.settle(bet.id).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(h.points("you").await, 1_250);

    assert_eq!(h.engine.ledger().list_for(&bet.id).await.unwrap().len(), 12);
    let you = h.engine.store().get_user("you").await.unwrap().unwrap();
    assert_eq!(you.stats.bets_made, 1);
    assert_eq!(you.stats.bets_successful, 1);
}

#[tokio::test]
async fn suspicious_proof_is_disputed_and_accept_counts_once() {
    let h = Harness::new(EngineConfig::default(), Mode::Suspicious);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;

    let receipt = h.engine.submit_proof(bet.id, "you", h.evidence(0)).await.unwrap();
    assert_eq!(receipt.bet.status, BetStatus::Disputed);
    assert_eq!(
        receipt.bet.dispute.as_ref().map(|d| d.submission_id),
        Some(receipt.submission.id)
    );
    assert!(receipt.submission.verdict.suspicious);

    let blocked = h.engine.submit_proof(bet.id, "you", h.evidence(1)).await;
    assert!(matches!(
        blocked,
        Err(EngineError::InvalidTransition { status: BetStatus::Disputed, .. })
    ));
    assert!(matches!(
        h.engine.resolve_dispute(bet.id, "you", Resolution::Accept).await,
        Err(EngineError::InvalidBetReference(_))
    ));

    let resolved = h
        .engine
        .resolve_dispute(bet.id, "sarah", Resolution::Accept)
        .await
        .unwrap();
    assert_eq!(resolved.status, BetStatus::Active);
    assert!(resolved.dispute.is_none());
    assert_eq!(resolved.performer("you").unwrap().progress.current, 1);
    // the suspicious proof stays on record
    assert_eq!(h.engine.ledger().list_for(&bet.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn deadline_at_eight_of_twelve_fails_and_forfeits_the_stake() {
    let h = Harness::new(EngineConfig::default(), Mode::Authentic);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;
    for n in 0..8 {
        h.clock.advance(Duration::days(1));
        h.engine.submit_proof(bet.id, "you", h.evidence(n)).await.unwrap();
    }

    h.clock.set(bet.deadline);
    let report = h.engine.sweep_deadlines(bet.deadline).await.unwrap();
    assert_eq!(report.expired, vec![bet.id]);

    let stored = h.bet(&bet).await;
    assert_eq!(stored.status, BetStatus::Settled);
    assert_eq!(stored.outcome, Some(Outcome::Failed));
    assert_eq!(stored.performer("you").unwrap().progress.current, 8);
    assert_eq!(h.points("you").await, 1_150);
    assert_eq!(h.points("sarah").await, 1_350);

    let you = h.engine.store().get_user("you").await.unwrap().unwrap();
    assert_eq!((you.stats.bets_made, you.stats.bets_successful), (1, 0));

    // a second sweep finds nothing left to do
    let report = h.engine.sweep_deadlines(bet.deadline).await.unwrap();
    assert!(report.expired.is_empty());
}

#[tokio::test]
async fn timeout_defers_and_fresh_evidence_appends_exactly_once() {
    let h = Harness::new(fast_verification(EngineConfig::default()), Mode::Hang);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;

    let err = h
        .engine
        .submit_proof(bet.id, "you", h.evidence(0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::VerificationUnavailable { deferred: true, .. }
    ));
    // one attempt plus one retry
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 2);
    assert!(h.engine.ledger().list_for(&bet.id).await.unwrap().is_empty());
    assert_eq!(h.bet(&bet).await.status, BetStatus::PendingVerification);
    assert_eq!(h.engine.inflight().deferred_for_bet(&bet.id).len(), 1);

    h.backend.set(Mode::Authentic);
    let receipt = h.engine.submit_proof(bet.id, "you", h.evidence(1)).await.unwrap();
    assert_eq!(receipt.bet.status, BetStatus::Active);
    assert_eq!(receipt.bet.performer("you").unwrap().progress.current, 1);
    assert_eq!(h.engine.ledger().list_for(&bet.id).await.unwrap().len(), 1);
    assert!(h.engine.inflight().is_empty());
}

#[tokio::test]
async fn counterparty_can_accept_a_deferred_proof() {
    let h = Harness::new(fast_verification(EngineConfig::default()), Mode::Down);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;
    let _ = h.engine.submit_proof(bet.id, "you", h.evidence(0)).await;

    let resolved = h
        .engine
        .resolve_dispute(bet.id, "sarah", Resolution::Accept)
        .await
        .unwrap();
    assert_eq!(resolved.status, BetStatus::Active);
    assert_eq!(resolved.performer("you").unwrap().progress.current, 1);
    let ledger = h.engine.ledger().list_for(&bet.id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].source, VerdictSource::Counterparty);
    assert!(h.engine.inflight().is_empty());
}

#[tokio::test]
async fn fail_open_counts_the_proof_with_zero_confidence() {
    let mut config = fast_verification(EngineConfig::default());
    config.verification.on_unavailable = UnavailablePolicy::FailOpen;
    let h = Harness::new(config, Mode::Down);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;

    let receipt = h.engine.submit_proof(bet.id, "you", h.evidence(0)).await.unwrap();
    assert_eq!(receipt.submission.source, VerdictSource::FailOpen);
    assert_eq!(receipt.submission.verdict.confidence, 0.0);
    assert_eq!(receipt.submission.verdict.reason, "verification unavailable");
    assert_eq!(receipt.bet.performer("you").unwrap().progress.current, 1);
}

#[tokio::test]
async fn dispute_policy_flags_the_proof() {
    let mut config = fast_verification(EngineConfig::default());
    config.verification.on_unavailable = UnavailablePolicy::Dispute;
    let h = Harness::new(config, Mode::Down);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;

    let receipt = h.engine.submit_proof(bet.id, "you", h.evidence(0)).await.unwrap();
    assert_eq!(receipt.submission.source, VerdictSource::Unavailable);
    assert_eq!(receipt.bet.status, BetStatus::Disputed);
}

#[tokio::test]
async fn rejected_proposal_is_cancelled_and_refunded() {
    let h = Harness::new(EngineConfig::default(), Mode::Authentic);
    h.engine.register_user("you", "You").await.unwrap();
    h.engine.register_user("sarah", "Sarah").await.unwrap();
    let bet = h
        .engine
        .propose(
            "you",
            ProposeParams {
                counterparty: Counterparty::Individual {
                    user: "sarah".into(),
                },
                activity: "Read 1 book/week".into(),
                stake: 50,
                proof_type: ProofType::Screenshot,
                frequency: Frequency::OneXWeek,
                length: BetLength::OneMonth,
            },
        )
        .await
        .unwrap();
    assert_eq!(h.points("you").await, 1_200);

    let cancelled = h.engine.reject(bet.id, "sarah").await.unwrap();
    assert_eq!(cancelled.status, BetStatus::Cancelled);
    assert!(cancelled.escrow.is_empty());
    assert_eq!(h.points("you").await, 1_250);
    assert!(matches!(
        h.engine.accept(bet.id, "sarah").await,
        Err(EngineError::InvalidTransition { status: BetStatus::Cancelled, .. })
    ));
}

#[tokio::test]
async fn proposals_are_validated_before_any_points_move() {
    let h = Harness::new(EngineConfig::default(), Mode::Authentic);
    h.engine.register_user("you", "You").await.unwrap();
    h.engine.register_user("sarah", "Sarah").await.unwrap();
    let params = |counterparty: Counterparty, activity: &str, stake: u64| ProposeParams {
        counterparty,
        activity: activity.into(),
        stake,
        proof_type: ProofType::LivePhoto,
        frequency: Frequency::Daily,
        length: BetLength::OneWeek,
    };
    let sarah = || Counterparty::Individual {
        user: "sarah".into(),
    };

    let cases = vec![
        params(sarah(), "   ", 10),
        params(sarah(), "Run", 0),
        params(sarah(), "Run", 5_000),
        params(Counterparty::Individual { user: "you".into() }, "Run", 10),
        params(Counterparty::Individual { user: "ghost".into() }, "Run", 10),
        params(
            Counterparty::Group {
                name: "Gym Buddies".into(),
                members: BTreeSet::new(),
            },
            "Run",
            10,
        ),
    ];
    for case in cases {
        assert!(matches!(
            h.engine.propose("you", case).await,
            Err(EngineError::Validation(_))
        ));
    }
    assert_eq!(h.points("you").await, 1_250);
    assert!(h.engine.store().list_bets().await.unwrap().is_empty());

    h.engine.deactivate_user("sarah").await.unwrap();
    assert!(matches!(
        h.engine.propose("you", params(sarah(), "Run", 10)).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        h.engine.register_user("you", "Again").await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn matched_stakes_go_to_the_winner() {
    let config = EngineConfig {
        stake_model: StakeModel::Matched,
        ..EngineConfig::default()
    };
    let h = Harness::new(config, Mode::Authentic);
    let bet = h
        .individual_bet(100, Frequency::OneXWeek, BetLength::OneWeek)
        .await;
    assert_eq!(h.points("sarah").await, 1_150);

    let receipt = h.engine.submit_proof(bet.id, "you", h.evidence(0)).await.unwrap();
    assert!(receipt.settlement.is_some());
    assert_eq!(h.points("you").await, 1_350);
    assert_eq!(h.points("sarah").await, 1_150);
}

#[tokio::test]
async fn group_fails_at_quorum_and_winners_split_forfeits() {
    let config = EngineConfig {
        stake_model: StakeModel::Matched,
        ..EngineConfig::default()
    };
    let h = Harness::new(config, Mode::Authentic);
    for id in ["you", "ana", "ben", "cat"] {
        h.engine.register_user(id, "").await.unwrap();
    }
    let members: BTreeSet<String> = ["ana", "ben", "cat"].iter().map(|s| s.to_string()).collect();
    let bet = h
        .engine
        .propose(
            "you",
            ProposeParams {
                counterparty: Counterparty::Group {
                    name: "Gym Buddies".into(),
                    members,
                },
                activity: "Go to gym".into(),
                stake: 100,
                proof_type: ProofType::LocationCheckin,
                frequency: Frequency::OneXWeek,
                length: BetLength::OneWeek,
            },
        )
        .await
        .unwrap();
    for member in ["ana", "ben"] {
        let pending = h.engine.accept(bet.id, member).await.unwrap();
        assert_eq!(pending.status, BetStatus::Proposed);
    }
    let active = h.engine.accept(bet.id, "cat").await.unwrap();
    assert_eq!(active.status, BetStatus::Active);

    h.engine.submit_proof(bet.id, "you", h.evidence(0)).await.unwrap();
    let receipt = h.engine.submit_proof(bet.id, "ana", h.evidence(1)).await.unwrap();
    assert_eq!(receipt.bet.status, BetStatus::Active);

    h.clock.set(bet.deadline);
    h.engine.sweep_deadlines(bet.deadline).await.unwrap();
    let stored = h.bet(&bet).await;
    assert_eq!(stored.outcome, Some(Outcome::Failed));
    assert_eq!(stored.status, BetStatus::Settled);

    assert_eq!(h.points("you").await, 1_350);
    assert_eq!(h.points("ana").await, 1_350);
    assert_eq!(h.points("ben").await, 1_150);
    assert_eq!(h.points("cat").await, 1_150);
    let ana = h.engine.store().get_user("ana").await.unwrap().unwrap();
    assert_eq!((ana.stats.bets_made, ana.stats.bets_successful), (1, 1));
}

#[tokio::test]
async fn disputed_bets_wait_for_resolution_before_expiring() {
    let h = Harness::new(EngineConfig::default(), Mode::Suspicious);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;
    h.engine.submit_proof(bet.id, "you", h.evidence(0)).await.unwrap();

    let late = bet.deadline + Duration::hours(1);
    h.clock.set(late);
    let report = h.engine.sweep_deadlines(late).await.unwrap();
    assert!(report.expired.is_empty());
    assert_eq!(h.bet(&bet).await.status, BetStatus::Disputed);

    let resolved = h
        .engine
        .resolve_dispute(bet.id, "sarah", Resolution::Accept)
        .await
        .unwrap();
    assert_eq!(resolved.status, BetStatus::Settled);
    assert_eq!(resolved.outcome, Some(Outcome::Failed));
}

#[tokio::test]
async fn too_many_rejected_proofs_fail_the_bet() {
    let h = Harness::new(EngineConfig::default(), Mode::Suspicious);
    let bet = h
        .individual_bet(100, Frequency::Daily, BetLength::TwoWeeks)
        .await;
    for n in 0..3 {
        h.engine.submit_proof(bet.id, "you", h.evidence(n)).await.unwrap();
        h.engine
            .resolve_dispute(bet.id, "sarah", Resolution::Reject)
            .await
            .unwrap();
    }
    let stored = h.bet(&bet).await;
    assert_eq!(stored.performer("you").unwrap().misses, 3);
    assert_eq!(stored.outcome, Some(Outcome::Failed));
    assert_eq!(stored.status, BetStatus::Settled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_proofs_never_overshoot_the_total() {
    let h = Harness::new(EngineConfig::default(), Mode::Authentic);
    let bet = h
        .individual_bet(100, Frequency::OneXWeek, BetLength::TwoWeeks)
        .await;

    let bet_id = bet.id;
    let mut handles = Vec::new();
    for n in 0..10 {
        let engine = h.engine.clone();
        let evidence = h.evidence(n);
        handles.push(tokio::spawn(async move {
            engine.submit_proof(bet_id, "you", evidence).await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    let stored = h.bet(&bet).await;
    let progress = stored.performer("you").unwrap().progress;
    assert_eq!(progress.current, progress.total);
    assert_eq!(accepted, 2);
    assert_eq!(h.engine.ledger().list_for(&bet.id).await.unwrap().len(), 2);
    assert_eq!(h.points("you").await, 1_250);
}

#[tokio::test]
async fn cancelled_verification_leaves_no_trace() {
    let h = Harness::new(EngineConfig::default(), Mode::Hang);
    let bet = h
        .individual_bet(100, Frequency::ThreeXWeek, BetLength::OneMonth)
        .await;

    let bet_id = bet.id;
    let engine = h.engine.clone();
    let evidence = h.evidence(0);
    let pending = tokio::spawn(async move { engine.submit_proof(bet_id, "you", evidence).await });

    let id = loop {
        if let Some(entry) = h.engine.inflight().entries_for_bet(&bet.id).first() {
            break entry.id;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    };
    assert!(h.engine.cancel_verification(&id).await.unwrap());
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(EngineError::VerificationCancelled(cancelled)) if cancelled == id));
    assert!(h.engine.inflight().is_empty());
    assert!(h.engine.ledger().list_for(&bet.id).await.unwrap().is_empty());
    assert_eq!(h.bet(&bet).await.status, BetStatus::Active);
    assert!(!h.engine.cancel_verification(&id).await.unwrap());
}
