use chrono::Utc;
use model::{
    Bet, BetLength, BetStatus, BetStore, Counterparty, Frequency, InMemoryBetStore, Outcome,
    ProofType, StatCounts, User,
};
use proptest::prelude::*;
use scoring::{
    count_for, rank, success_rate, Aggregator, RankTier, ScoringError, TierThresholds,
};
use std::sync::Arc;
use uuid::Uuid;

fn user(id: &str, made: u32, successful: u32) -> User {
    let mut u = User::new(id.into(), id.to_uppercase(), 0, Utc::now());
    u.stats = StatCounts {
        bets_made: made,
        bets_successful: successful,
    };
    u
}

fn settled_bet(performer: &str, outcome: Outcome) -> Bet {
    let mut bet = Bet::new(
        Uuid::new_v4(),
        performer.into(),
        Counterparty::Individual {
            user: "referee".into(),
        },
        "Read 1 book/week".into(),
        10,
        ProofType::Screenshot,
        Frequency::OneXWeek,
        BetLength::OneMonth,
        Utc::now(),
    );
    if let Some(p) = bet.performer_mut(performer) {
        p.outcome = Some(outcome);
    }
    bet.status = BetStatus::Settled;
    bet
}

#[test]
fn tiers_follow_default_thresholds() {
    let t = TierThresholds::default();
    assert_eq!(t.tier_for(0), RankTier::Beginner);
    assert_eq!(t.tier_for(4), RankTier::Beginner);
    assert_eq!(t.tier_for(5), RankTier::Intermediate);
    assert_eq!(t.tier_for(14), RankTier::Intermediate);
    assert_eq!(t.tier_for(15), RankTier::Advanced);
    assert_eq!(t.tier_for(30), RankTier::Legendary);
    assert!(TierThresholds {
        intermediate: 5,
        advanced: 5,
        legendary: 30
    }
    .validate()
    .is_err());
}

#[test]
fn ordering_uses_rate_then_successes_then_id() {
    let users = vec![
        user("eve", 50, 30),   // 0.60
        user("diana", 8, 8),   // 1.00
        user("bob", 4, 2),     // 0.50, 2 wins
        user("alice", 8, 4),   // 0.50, 4 wins
        user("carl", 2, 1),    // 0.50, 1 win
        user("aaron", 2, 1),   // ties carl, wins on id
        user("newbie", 0, 0),  // 0.00
    ];
    let board = rank(users, &TierThresholds::default(), 10);
    let ids: Vec<&str> = board.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["diana", "eve", "alice", "bob", "aaron", "carl", "newbie"]
    );
    assert_eq!(board[0].rank, 1);
    assert_eq!(board[1].tier, RankTier::Legendary);
    assert_eq!(rank(board_users(), &TierThresholds::default(), 2).len(), 2);
}

fn board_users() -> Vec<User> {
    vec![user("a", 1, 1), user("b", 1, 0), user("c", 3, 2)]
}

#[test]
fn departed_users_leave_the_board() {
    let mut gone = user("gone", 10, 10);
    gone.active = false;
    let board = rank(vec![gone, user("here", 1, 0)], &TierThresholds::default(), 10);
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].user_id, "here");
}

#[test]
fn counts_only_settled_bets_the_user_performed() {
    let mut open = settled_bet("you", Outcome::Completed);
    open.status = BetStatus::Completed;
    let bets = vec![
        settled_bet("you", Outcome::Completed),
        settled_bet("you", Outcome::Failed),
        settled_bet("other", Outcome::Completed),
        open,
    ];
    let counts = count_for("you", &bets);
    assert_eq!(counts.bets_made, 2);
    assert_eq!(counts.bets_successful, 1);
    assert_eq!(count_for("referee", &bets), StatCounts::default());
}

#[tokio::test]
async fn recompute_writes_counts_back() {
    let store = Arc::new(InMemoryBetStore::new());
    store
        .insert_user(User::new("you".into(), "You".into(), 0, Utc::now()))
        .await
        .unwrap();
    store.put_bet(settled_bet("you", Outcome::Completed)).await.unwrap();
    let aggregator = Aggregator::new(store.clone(), TierThresholds::default());

    let stats = aggregator.recompute("you").await.unwrap();
    assert_eq!(stats.bets_made, 1);
    assert_eq!(stats.success_rate, 1.0);
    let stored = store.get_user("you").await.unwrap().unwrap();
    assert_eq!(stored.stats.bets_successful, 1);

    assert!(matches!(
        aggregator.recompute("ghost").await,
        Err(ScoringError::Storage(_)) | Err(ScoringError::UnknownUser(_))
    ));
}

fn arb_user() -> impl Strategy<Value = User> {
    ("[a-f]{1,3}", 0u32..40, 0u32..40).prop_map(|(id, made, successful)| {
        user(&id, made, successful.min(made))
    })
}

proptest! {
    #[test]
    fn success_rate_is_a_fraction(made in 0u32..1000, successful in 0u32..1000) {
        let rate = success_rate(&StatCounts { bets_made: made, bets_successful: successful });
        prop_assert!((0.0..=1.0).contains(&rate));
        if made == 0 {
            prop_assert_eq!(rate, 0.0);
        }
    }

    #[test]
    fn leaderboard_order_ignores_input_order(mut users in prop::collection::vec(arb_user(), 0..20)) {
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users.dedup_by(|a, b| a.id == b.id);
        let forward = rank(users.clone(), &TierThresholds::default(), usize::MAX);
        let mut reversed_input = users.clone();
        reversed_input.reverse();
        let backward = rank(reversed_input, &TierThresholds::default(), usize::MAX);
        prop_assert_eq!(forward, backward);
    }
}
