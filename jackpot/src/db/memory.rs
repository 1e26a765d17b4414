//! In-process store.
//!
//! Every unit runs under one `tokio::sync::Mutex`, which gives the global
//! serialization discipline: no two units interleave, so no update is lost.
//! Each unit validates everything before its first write, so a failing unit
//! leaves the state untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repository::{DrawRepository, JackpotRepository, LedgerRepository, UserRepository};
use crate::draw::{ClaimOutcome, DrawError, DrawResult};
use crate::ledger::{
    LedgerError, LedgerResult, Posting, Transaction, TransactionId, TransactionStatus, Wallet,
    WalletId, WalletType, apply_entry,
};
use crate::tickets::{
    Jackpot, JackpotId, JackpotStatus, NewJackpot, NewTicket, Ticket, TicketError, TicketId,
    TicketResult, TicketStatus,
};
use crate::users::{
    NewUser, Plan, PlanId, PlanVerification, User, UserError, UserId, UserPlan, UserResult,
    UserStatus,
};

#[derive(Default)]
struct State {
    sequence: i64,
    users: BTreeMap<UserId, User>,
    plans: BTreeMap<PlanId, Plan>,
    user_plans: BTreeMap<i64, UserPlan>,
    wallets: BTreeMap<WalletId, Wallet>,
    transactions: BTreeMap<TransactionId, Transaction>,
    idempotency_keys: HashMap<String, TransactionId>,
    jackpots: BTreeMap<JackpotId, Jackpot>,
    tickets: BTreeMap<TicketId, Ticket>,
    ticket_numbers: HashSet<String>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    /// Apply postings as one unit: check every key and balance first, then write.
    fn apply_postings(
        &mut self,
        postings: &[Posting],
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        let mut batch_keys = HashSet::new();
        let mut balances: HashMap<WalletId, Decimal> = HashMap::new();
        let mut balances_after = Vec::with_capacity(postings.len());

        for posting in postings {
            if self.idempotency_keys.contains_key(&posting.idempotency_key)
                || !batch_keys.insert(posting.idempotency_key.as_str())
            {
                return Err(LedgerError::DuplicateTransaction(
                    posting.idempotency_key.clone(),
                ));
            }

            let wallet = self
                .wallets
                .get(&posting.wallet_id)
                .ok_or(LedgerError::WalletNotFound(posting.wallet_id))?;
            let current = balances
                .get(&posting.wallet_id)
                .copied()
                .unwrap_or(wallet.balance);
            let next = posting.apply_to(current)?;
            balances.insert(posting.wallet_id, next);
            balances_after.push(next);
        }

        let mut recorded = Vec::with_capacity(postings.len());
        for (posting, balance_after) in postings.iter().zip(balances_after) {
            let id = self.next_id();
            let wallet = self
                .wallets
                .get_mut(&posting.wallet_id)
                .ok_or(LedgerError::WalletNotFound(posting.wallet_id))?;
            wallet.balance = balance_after;
            wallet.updated_at = now;

            let transaction = Transaction {
                id,
                user_id: wallet.user_id,
                wallet_id: posting.wallet_id,
                transaction_type: posting.transaction_type,
                direction: posting.direction,
                amount: posting.amount,
                status: TransactionStatus::Completed,
                reference: posting.reference.clone(),
                idempotency_key: posting.idempotency_key.clone(),
                balance_after: Some(balance_after),
                created_at: now,
                updated_at: now,
            };
            self.idempotency_keys
                .insert(posting.idempotency_key.clone(), id);
            self.transactions.insert(id, transaction.clone());
            recorded.push(transaction);
        }

        Ok(recorded)
    }
}

/// In-process implementation of every repository trait
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a jackpot's draw time, for tests and demos that need a due draw
    pub async fn set_draw_at(&self, jackpot_id: JackpotId, draw_at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        match state.jackpots.get_mut(&jackpot_id) {
            Some(jackpot) => {
                jackpot.draw_at = draw_at;
                true
            }
            None => false,
        }
    }

    /// Overwrite a ticket's status outside the draw, simulating a unit that
    /// committed before a crash
    pub async fn force_ticket_status(&self, ticket_id: TicketId, status: TicketStatus) -> bool {
        let mut state = self.state.lock().await;
        match state.tickets.get_mut(&ticket_id) {
            Some(ticket) => {
                ticket.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: &NewUser) -> UserResult<User> {
        let mut state = self.state.lock().await;

        if state.users.values().any(|u| u.email == user.email) {
            return Err(UserError::EmailTaken);
        }
        if state.users.values().any(|u| u.member_id == user.member_id) {
            return Err(UserError::MemberIdTaken);
        }
        if state
            .users
            .values()
            .any(|u| u.referral_code == user.referral_code)
        {
            return Err(UserError::ReferralCodeTaken(user.referral_code.clone()));
        }
        if let Some(referrer) = user.referred_by
            && !state.users.contains_key(&referrer)
        {
            return Err(UserError::UserNotFound(referrer));
        }

        let id = state.next_id();
        let created = User {
            id,
            member_id: user.member_id.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            status: user.status,
            referred_by: user.referred_by,
            role: user.role.clone(),
            referral_code: user.referral_code.clone(),
            created_at: Utc::now(),
        };
        state.users.insert(id, created.clone());
        Ok(created)
    }

    async fn find_user(&self, user_id: UserId) -> UserResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_by_referral_code(&self, code: &str) -> UserResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.referral_code == code)
            .cloned())
    }

    async fn anonymize_user(&self, user_id: UserId) -> UserResult<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(UserError::UserNotFound(user_id))?;

        let tombstone = Uuid::new_v4().simple().to_string();
        user.email = format!("deleted-{tombstone}@invalid");
        user.member_id = format!("deleted-{tombstone}");
        user.password_hash = String::new();
        user.status = UserStatus::Suspended;
        Ok(user.clone())
    }

    async fn create_plan(
        &self,
        name: &str,
        price: Decimal,
        duration_days: i32,
        payout_percentage: Decimal,
    ) -> UserResult<Plan> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let plan = Plan {
            id,
            name: name.to_string(),
            price,
            duration_days,
            payout_percentage,
        };
        state.plans.insert(id, plan.clone());
        Ok(plan)
    }

    async fn record_user_plan(
        &self,
        user_id: UserId,
        plan_id: PlanId,
        purchased_at: DateTime<Utc>,
    ) -> UserResult<UserPlan> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(UserError::UserNotFound(user_id));
        }
        let plan = state
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or(UserError::PlanNotFound(plan_id))?;

        let id = state.next_id();
        let user_plan = UserPlan {
            id,
            user_id,
            plan_id,
            purchase_price: plan.price,
            verification: PlanVerification::Pending,
            purchased_at,
            expires_at: purchased_at + chrono::Duration::days(i64::from(plan.duration_days)),
        };
        state.user_plans.insert(id, user_plan.clone());
        Ok(user_plan)
    }

    async fn update_plan_verification(
        &self,
        user_plan_id: i64,
        verification: PlanVerification,
    ) -> UserResult<UserPlan> {
        let mut state = self.state.lock().await;
        let user_plan = state
            .user_plans
            .get_mut(&user_plan_id)
            .ok_or(UserError::PlanNotFound(user_plan_id))?;

        if !user_plan.verification.can_transition_to(verification) {
            return Err(UserError::InvalidTransition {
                from: user_plan.verification,
                to: verification,
            });
        }
        user_plan.verification = verification;
        Ok(user_plan.clone())
    }

    async fn user_plans(&self, user_id: UserId) -> UserResult<Vec<UserPlan>> {
        let state = self.state.lock().await;
        Ok(state
            .user_plans
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn open_wallet(
        &self,
        user_id: UserId,
        wallet_type: WalletType,
        currency: &str,
    ) -> LedgerResult<Wallet> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .wallets
            .values()
            .find(|w| w.user_id == user_id && w.wallet_type == wallet_type)
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let id = state.next_id();
        let wallet = Wallet {
            id,
            user_id,
            wallet_type,
            balance: Decimal::ZERO,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.wallets.insert(id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> LedgerResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&wallet_id).cloned())
    }

    async fn find_user_wallet(
        &self,
        user_id: UserId,
        wallet_type: WalletType,
    ) -> LedgerResult<Option<Wallet>> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .values()
            .find(|w| w.user_id == user_id && w.wallet_type == wallet_type)
            .cloned())
    }

    async fn user_wallets(&self, user_id: UserId) -> LedgerResult<Vec<Wallet>> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn post(&self, postings: &[Posting]) -> LedgerResult<Vec<Transaction>> {
        let mut state = self.state.lock().await;
        state.apply_postings(postings, Utc::now())
    }

    async fn record_pending(&self, posting: &Posting) -> LedgerResult<Transaction> {
        let mut state = self.state.lock().await;
        if state
            .idempotency_keys
            .contains_key(&posting.idempotency_key)
        {
            return Err(LedgerError::DuplicateTransaction(
                posting.idempotency_key.clone(),
            ));
        }
        let user_id = state
            .wallets
            .get(&posting.wallet_id)
            .map(|w| w.user_id)
            .ok_or(LedgerError::WalletNotFound(posting.wallet_id))?;

        let now = Utc::now();
        let id = state.next_id();
        let transaction = Transaction {
            id,
            user_id,
            wallet_id: posting.wallet_id,
            transaction_type: posting.transaction_type,
            direction: posting.direction,
            amount: posting.amount,
            status: TransactionStatus::Pending,
            reference: posting.reference.clone(),
            idempotency_key: posting.idempotency_key.clone(),
            balance_after: None,
            created_at: now,
            updated_at: now,
        };
        state
            .idempotency_keys
            .insert(posting.idempotency_key.clone(), id);
        state.transactions.insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn settle(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let pending = state
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        if !pending.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                from: pending.status,
                to: status,
            });
        }

        let mut balance_after = None;
        if status == TransactionStatus::Completed {
            let wallet = state
                .wallets
                .get(&pending.wallet_id)
                .ok_or(LedgerError::WalletNotFound(pending.wallet_id))?;
            match apply_entry(
                pending.wallet_id,
                pending.direction,
                pending.amount,
                wallet.balance,
            ) {
                Ok(next) => balance_after = Some(next),
                Err(e @ LedgerError::InsufficientBalance { .. }) => {
                    if let Some(tx) = state.transactions.get_mut(&transaction_id) {
                        tx.status = TransactionStatus::Failed;
                        tx.updated_at = now;
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(next) = balance_after
            && let Some(wallet) = state.wallets.get_mut(&pending.wallet_id)
        {
            wallet.balance = next;
            wallet.updated_at = now;
        }

        let tx = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        tx.status = status;
        tx.balance_after = balance_after;
        tx.updated_at = now;
        Ok(tx.clone())
    }

    async fn find_transaction(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .idempotency_keys
            .get(key)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn wallet_transactions(
        &self,
        wallet_id: WalletId,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .transactions
            .values()
            .rev()
            .filter(|t| t.wallet_id == wallet_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn balance_snapshot(&self, wallet_id: WalletId) -> LedgerResult<(Decimal, Decimal)> {
        let state = self.state.lock().await;
        let wallet = state
            .wallets
            .get(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        let ledger_balance = state
            .transactions
            .values()
            .filter(|t| t.wallet_id == wallet_id && t.status == TransactionStatus::Completed)
            .map(Transaction::signed_amount)
            .sum();
        Ok((wallet.balance, ledger_balance))
    }
}

#[async_trait]
impl JackpotRepository for MemoryStore {
    async fn create_jackpot(&self, jackpot: &NewJackpot) -> TicketResult<Jackpot> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let created = Jackpot {
            id,
            name: jackpot.name.clone(),
            amount: jackpot.amount,
            ticket_price: jackpot.ticket_price,
            max_winners: jackpot.max_winners,
            draw_at: jackpot.draw_at,
            status: JackpotStatus::Active,
            total_tickets_sold: 0,
            total_revenue: Decimal::ZERO,
            winners_selected: 0,
            draw_seed: None,
            draw_started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        state.jackpots.insert(id, created.clone());
        Ok(created)
    }

    async fn find_jackpot(&self, jackpot_id: JackpotId) -> TicketResult<Option<Jackpot>> {
        Ok(self.state.lock().await.jackpots.get(&jackpot_id).cloned())
    }

    async fn list_jackpots(&self, status: Option<JackpotStatus>) -> TicketResult<Vec<Jackpot>> {
        let state = self.state.lock().await;
        let mut jackpots: Vec<Jackpot> = state
            .jackpots
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jackpots.sort_by_key(|j| (j.draw_at, j.id));
        Ok(jackpots)
    }

    async fn issue_ticket(
        &self,
        ticket: &NewTicket,
        payment: &Posting,
        now: DateTime<Utc>,
    ) -> TicketResult<(Ticket, Transaction)> {
        let mut state = self.state.lock().await;

        let jackpot = state
            .jackpots
            .get(&ticket.jackpot_id)
            .ok_or(TicketError::JackpotNotFound(ticket.jackpot_id))?;
        if !jackpot.is_open_for_sales(now) {
            return Err(TicketError::JackpotNotActive {
                jackpot_id: jackpot.id,
                status: jackpot.status,
            });
        }
        if state.ticket_numbers.contains(&ticket.ticket_number) {
            return Err(TicketError::TicketNumberTaken(ticket.ticket_number.clone()));
        }

        let transaction = state
            .apply_postings(std::slice::from_ref(payment), now)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                LedgerError::InvariantViolation("posting produced no transaction".to_string())
            })?;

        let id = state.next_id();
        let issued = Ticket {
            id,
            ticket_number: ticket.ticket_number.clone(),
            user_id: ticket.user_id,
            jackpot_id: ticket.jackpot_id,
            status: TicketStatus::Active,
            price: ticket.price,
            winning_amount: None,
            purchased_at: now,
        };
        state.ticket_numbers.insert(ticket.ticket_number.clone());
        state.tickets.insert(id, issued.clone());

        if let Some(jackpot) = state.jackpots.get_mut(&ticket.jackpot_id) {
            jackpot.total_tickets_sold += 1;
            jackpot.total_revenue += ticket.price;
        }

        Ok((issued, transaction))
    }

    async fn find_ticket(&self, ticket_id: TicketId) -> TicketResult<Option<Ticket>> {
        Ok(self.state.lock().await.tickets.get(&ticket_id).cloned())
    }

    async fn user_tickets(&self, user_id: UserId) -> TicketResult<Vec<Ticket>> {
        let state = self.state.lock().await;
        Ok(state
            .tickets
            .values()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn jackpot_tickets(&self, jackpot_id: JackpotId) -> TicketResult<Vec<Ticket>> {
        let state = self.state.lock().await;
        Ok(state
            .tickets
            .values()
            .filter(|t| t.jackpot_id == jackpot_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DrawRepository for MemoryStore {
    async fn claim_draw(
        &self,
        jackpot_id: JackpotId,
        seed: i64,
        now: DateTime<Utc>,
    ) -> DrawResult<ClaimOutcome> {
        let mut state = self.state.lock().await;
        let jackpot = state
            .jackpots
            .get_mut(&jackpot_id)
            .ok_or(DrawError::JackpotNotFound(jackpot_id))?;

        if jackpot.is_due(now) {
            jackpot.status = JackpotStatus::Drawing;
            jackpot.draw_seed = Some(seed);
            jackpot.draw_started_at = Some(now);
            return Ok(ClaimOutcome::Claimed(jackpot.clone()));
        }

        Ok(match jackpot.status {
            JackpotStatus::Active => ClaimOutcome::NotDue {
                draw_at: jackpot.draw_at,
            },
            other => ClaimOutcome::Busy(other),
        })
    }

    async fn settle_winner(
        &self,
        ticket_id: TicketId,
        winning_amount: Decimal,
        payout: &Posting,
    ) -> DrawResult<bool> {
        let mut state = self.state.lock().await;
        let ticket = state
            .tickets
            .get(&ticket_id)
            .ok_or(TicketError::TicketNotFound(ticket_id))?;
        if ticket.status != TicketStatus::Active {
            return Ok(false);
        }

        state.apply_postings(std::slice::from_ref(payout), Utc::now())?;

        if let Some(ticket) = state.tickets.get_mut(&ticket_id) {
            ticket.status = TicketStatus::Won;
            ticket.winning_amount = Some(winning_amount);
        }
        Ok(true)
    }

    async fn close_losers(&self, jackpot_id: JackpotId) -> DrawResult<u64> {
        let mut state = self.state.lock().await;
        let mut closed = 0;
        for ticket in state
            .tickets
            .values_mut()
            .filter(|t| t.jackpot_id == jackpot_id && t.status == TicketStatus::Active)
        {
            ticket.status = TicketStatus::Lost;
            closed += 1;
        }
        Ok(closed)
    }

    async fn complete_draw(
        &self,
        jackpot_id: JackpotId,
        winners_selected: i32,
        now: DateTime<Utc>,
    ) -> DrawResult<Jackpot> {
        let mut state = self.state.lock().await;
        let jackpot = state
            .jackpots
            .get_mut(&jackpot_id)
            .ok_or(DrawError::JackpotNotFound(jackpot_id))?;

        if jackpot.status != JackpotStatus::Drawing {
            return Err(DrawError::InvalidState {
                jackpot_id,
                expected: JackpotStatus::Drawing,
                actual: jackpot.status,
            });
        }
        jackpot.status = JackpotStatus::Completed;
        jackpot.winners_selected = winners_selected;
        jackpot.completed_at = Some(now);
        Ok(jackpot.clone())
    }

    async fn due_jackpots(&self, now: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        let state = self.state.lock().await;
        let mut due: Vec<&Jackpot> = state.jackpots.values().filter(|j| j.is_due(now)).collect();
        due.sort_by_key(|j| (j.draw_at, j.id));
        Ok(due.into_iter().map(|j| j.id).collect())
    }

    async fn stale_draws(&self, started_before: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        let state = self.state.lock().await;
        Ok(state
            .jackpots
            .values()
            .filter(|j| {
                j.status == JackpotStatus::Drawing
                    && j.draw_started_at.is_some_and(|t| t < started_before)
            })
            .map(|j| j.id)
            .collect())
    }
}
