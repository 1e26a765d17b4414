//! Integration tests for the draw lifecycle: ticket sales, winner selection,
//! payouts, concurrent draws and resuming an interrupted draw.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{dollars, setup};
use jackpot::{
    db::{DrawRepository, JackpotRepository, MemoryStore},
    draw::{
        ClaimOutcome, DrawEngine, DrawError, DrawOutcome, DrawResult, payout_key, select_winners,
    },
    ledger::{Posting, TransactionType, WalletType},
    notify,
    tickets::{Jackpot, JackpotId, JackpotStatus, TicketId, TicketStatus},
};
use rust_decimal::Decimal;
use std::{collections::HashSet, sync::Arc, time::Duration};

/// Draw store that stalls before closing losers, so overlapping runs
/// reach `complete_draw` back to back
struct SlowCloseStore(Arc<MemoryStore>);

#[async_trait]
impl DrawRepository for SlowCloseStore {
    async fn claim_draw(
        &self,
        jackpot_id: JackpotId,
        seed: i64,
        now: DateTime<Utc>,
    ) -> DrawResult<ClaimOutcome> {
        self.0.claim_draw(jackpot_id, seed, now).await
    }

    async fn settle_winner(
        &self,
        ticket_id: TicketId,
        winning_amount: Decimal,
        payout: &Posting,
    ) -> DrawResult<bool> {
        self.0.settle_winner(ticket_id, winning_amount, payout).await
    }

    async fn close_losers(&self, jackpot_id: JackpotId) -> DrawResult<u64> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.0.close_losers(jackpot_id).await
    }

    async fn complete_draw(
        &self,
        jackpot_id: JackpotId,
        winners_selected: i32,
        now: DateTime<Utc>,
    ) -> DrawResult<Jackpot> {
        self.0.complete_draw(jackpot_id, winners_selected, now).await
    }

    async fn due_jackpots(&self, now: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        self.0.due_jackpots(now).await
    }

    async fn stale_draws(&self, started_before: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        self.0.stale_draws(started_before).await
    }
}

#[tokio::test]
async fn test_twenty_winners_split_full_pool() {
    let t = setup();
    let jackpot = t.jackpot(dollars(100_000), dollars(3), 20).await;

    let mut users = Vec::new();
    for i in 0..20 {
        let user = t.funded_user(&format!("player{i}"), dollars(10)).await;
        t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
        users.push(user);
    }
    t.make_due(&jackpot).await;

    let summary = match t.platform.draws.execute_draw(jackpot.id).await.unwrap() {
        DrawOutcome::Completed(summary) => summary,
        DrawOutcome::AlreadyDrawn => panic!("first draw must run"),
    };
    assert_eq!(summary.winners.len(), 20);
    assert_eq!(summary.share, dollars(5_000));
    assert_eq!(summary.unclaimed, Decimal::ZERO);
    assert_eq!(summary.dust, Decimal::ZERO);
    assert_eq!(summary.losers, 0);

    for user in &users {
        assert_eq!(t.balance(user, WalletType::Winnings).await, dollars(5_000));
        assert_eq!(t.balance(user, WalletType::Deposit).await, dollars(7));
        t.assert_reconciled(user).await;
    }

    let jackpot = t.platform.tickets.jackpot(jackpot.id).await.unwrap();
    assert_eq!(jackpot.status, JackpotStatus::Completed);
    assert_eq!(jackpot.winners_selected, 20);
    assert_eq!(jackpot.total_tickets_sold, 20);
    assert_eq!(jackpot.total_revenue, dollars(60));
}

#[tokio::test]
async fn test_more_tickets_than_winners() {
    let t = setup();
    let jackpot = t.jackpot(dollars(1_000), dollars(1), 3).await;

    let user = t.funded_user("bulk", dollars(50)).await;
    for _ in 0..12 {
        t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
    }
    t.make_due(&jackpot).await;

    let summary = t
        .platform
        .draws
        .execute_draw_with_seed(jackpot.id, 2024)
        .await
        .unwrap()
        .summary()
        .cloned()
        .unwrap();
    assert_eq!(summary.winners.len(), 3);
    assert_eq!(summary.share, Decimal::new(33_333, 2));
    assert_eq!(summary.dust, Decimal::new(1, 2));
    assert_eq!(summary.losers, 9);

    let tickets = t.platform.tickets.tickets_for_jackpot(jackpot.id).await.unwrap();
    let won = tickets.iter().filter(|t| t.status == TicketStatus::Won).count();
    let lost = tickets.iter().filter(|t| t.status == TicketStatus::Lost).count();
    assert_eq!((won, lost), (3, 9));
    assert!(tickets.iter().all(|t| t.status != TicketStatus::Active));

    // Same seed over the same ticket ids reproduces the winners
    let mut ids: Vec<i64> = tickets.iter().map(|t| t.id).collect();
    ids.sort_unstable();
    let expected: HashSet<i64> = select_winners(&ids, 3, 2024).into_iter().collect();
    let actual: HashSet<i64> = summary.winners.iter().map(|w| w.ticket_id).collect();
    assert_eq!(expected, actual);

    assert_eq!(
        t.balance(&user, WalletType::Winnings).await,
        Decimal::new(99_999, 2)
    );
}

#[tokio::test]
async fn test_fewer_tickets_than_winners_forfeits_rest() {
    let t = setup();
    let jackpot = t.jackpot(dollars(500), dollars(2), 5).await;
    let user = t.funded_user("solo", dollars(10)).await;
    t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
    t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
    t.make_due(&jackpot).await;

    let outcome = t.platform.draws.execute_draw(jackpot.id).await.unwrap();
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.winners.len(), 2);
    assert_eq!(summary.share, dollars(100));
    assert_eq!(summary.unclaimed, dollars(300));
    assert_eq!(t.balance(&user, WalletType::Winnings).await, dollars(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_draws_pay_once() {
    let t = setup();
    let jackpot = t.jackpot(dollars(900), dollars(1), 3).await;
    let mut users = Vec::new();
    for i in 0..6 {
        let user = t.funded_user(&format!("racer{i}"), dollars(5)).await;
        t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
        users.push(user);
    }
    t.make_due(&jackpot).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let draws = t.platform.draws.clone();
        let id = jackpot.id;
        handles.push(tokio::spawn(async move { draws.execute_draw(id).await }));
    }

    let mut completed = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            DrawOutcome::Completed(_) => completed += 1,
            DrawOutcome::AlreadyDrawn => already += 1,
        }
    }
    assert_eq!((completed, already), (1, 7));

    let mut total = Decimal::ZERO;
    for user in &users {
        total += t.balance(user, WalletType::Winnings).await;
        t.assert_reconciled(user).await;
    }
    assert_eq!(total, dollars(900));
}

#[tokio::test]
async fn test_draw_before_time_refused() {
    let t = setup();
    let jackpot = t.jackpot(dollars(100), dollars(1), 1).await;

    let result = t.platform.draws.execute_draw(jackpot.id).await;
    assert!(matches!(result, Err(DrawError::DrawNotDue { .. })));

    let unchanged = t.platform.tickets.jackpot(jackpot.id).await.unwrap();
    assert_eq!(unchanged.status, JackpotStatus::Active);
}

#[tokio::test]
async fn test_sales_close_at_draw_time() {
    let t = setup();
    let jackpot = t.jackpot(dollars(100), dollars(1), 1).await;
    let user = t.funded_user("late", dollars(5)).await;
    t.make_due(&jackpot).await;

    let result = t.platform.tickets.purchase(user.id, jackpot.id).await;
    assert!(result.is_err());
    assert_eq!(t.balance(&user, WalletType::Deposit).await, dollars(5));
}

#[tokio::test]
async fn test_resume_after_interrupted_draw() {
    let t = setup();
    let jackpot = t.jackpot(dollars(400), dollars(1), 4).await;
    let mut users = Vec::new();
    for i in 0..8 {
        let user = t.funded_user(&format!("resume{i}"), dollars(2)).await;
        t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
        users.push(user);
    }
    t.make_due(&jackpot).await;

    // Claim and pay the first winner, then stop as if the process died
    let seed = 77;
    let claimed = t.store.claim_draw(jackpot.id, seed, Utc::now()).await.unwrap();
    assert!(matches!(claimed, ClaimOutcome::Claimed(_)));

    let mut tickets = t.store.jackpot_tickets(jackpot.id).await.unwrap();
    tickets.sort_by_key(|ticket| ticket.id);
    let ids: Vec<i64> = tickets.iter().map(|ticket| ticket.id).collect();
    let winners = select_winners(&ids, 4, seed as u64);
    let first = tickets
        .iter()
        .find(|ticket| ticket.id == winners[0])
        .unwrap();
    let wallet = t
        .platform
        .ledger
        .open_wallet(first.user_id, WalletType::Winnings)
        .await
        .unwrap();
    let payout = Posting::credit(
        wallet.id,
        dollars(100),
        TransactionType::Winning,
        None,
        payout_key(jackpot.id, first.id),
    )
    .unwrap();
    assert!(t.store.settle_winner(first.id, dollars(100), &payout).await.unwrap());

    // Fresh draws are refused while drawing
    assert!(matches!(
        t.platform.draws.execute_draw(jackpot.id).await.unwrap(),
        DrawOutcome::AlreadyDrawn
    ));

    let stale = t
        .platform
        .draws
        .stale_draws(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stale, vec![jackpot.id]);

    let summary = t
        .platform
        .draws
        .resume_draw(jackpot.id)
        .await
        .unwrap()
        .summary()
        .cloned()
        .unwrap();
    assert_eq!(summary.seed, 77);
    assert_eq!(summary.winners.len(), 4);
    assert_eq!(summary.credited_now, 3);

    let mut total = Decimal::ZERO;
    for user in &users {
        let won = t.balance(user, WalletType::Winnings).await;
        assert!(won == Decimal::ZERO || won == dollars(100));
        total += won;
        t.assert_reconciled(user).await;
    }
    assert_eq!(total, dollars(400));

    assert!(matches!(
        t.platform.draws.resume_draw(jackpot.id).await.unwrap(),
        DrawOutcome::AlreadyDrawn
    ));
}

#[tokio::test]
async fn test_overlapping_resumes_complete_once() {
    let t = setup();
    let jackpot = t.jackpot(dollars(400), dollars(1), 4).await;
    let mut users = Vec::new();
    for i in 0..8 {
        let user = t.funded_user(&format!("overlap{i}"), dollars(2)).await;
        t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
        users.push(user);
    }
    t.make_due(&jackpot).await;
    let claimed = t.store.claim_draw(jackpot.id, 5, Utc::now()).await.unwrap();
    assert!(matches!(claimed, ClaimOutcome::Claimed(_)));

    let engine = DrawEngine::new(
        Arc::new(SlowCloseStore(t.store.clone())),
        t.store.clone(),
        t.platform.ledger.clone(),
        t.notifier.clone(),
    );
    let (a, b) = tokio::join!(engine.resume_draw(jackpot.id), engine.resume_draw(jackpot.id));
    let outcomes = [a.unwrap(), b.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, DrawOutcome::Completed(_)))
        .count();
    let already = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, DrawOutcome::AlreadyDrawn))
        .count();
    assert_eq!((completed, already), (1, 1));

    let finished = t.platform.tickets.jackpot(jackpot.id).await.unwrap();
    assert_eq!(finished.status, JackpotStatus::Completed);
    let mut total = Decimal::ZERO;
    for user in &users {
        total += t.balance(user, WalletType::Winnings).await;
        t.assert_reconciled(user).await;
    }
    assert_eq!(total, dollars(400));
}

#[tokio::test]
async fn test_winners_notified() {
    let t = setup();
    let jackpot = t.jackpot(dollars(50), dollars(1), 2).await;
    for i in 0..2 {
        let user = t.funded_user(&format!("notify{i}"), dollars(1)).await;
        t.platform.tickets.purchase(user.id, jackpot.id).await.unwrap();
    }
    t.make_due(&jackpot).await;
    t.platform.draws.execute_draw(jackpot.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(t.notifier.count(notify::TICKET_PURCHASED), 2);
    assert_eq!(t.notifier.count(notify::TICKET_WON), 2);
}

#[tokio::test]
async fn test_scheduler_tick_draws_due_jackpots() {
    let t = setup();
    let due = t.jackpot(dollars(10), dollars(1), 1).await;
    let later = t.jackpot(dollars(10), dollars(1), 1).await;
    let user = t.funded_user("sched", dollars(2)).await;
    t.platform.tickets.purchase(user.id, due.id).await.unwrap();
    t.make_due(&due).await;

    let scheduler = t.platform.scheduler(Default::default());
    let report = scheduler.run_once(Utc::now()).await;
    assert_eq!(report.drawn, 1);
    assert_eq!(report.failed, 0);

    let later = t.platform.tickets.jackpot(later.id).await.unwrap();
    assert_eq!(later.status, JackpotStatus::Active);
    assert_eq!(t.balance(&user, WalletType::Winnings).await, dollars(10));
}
