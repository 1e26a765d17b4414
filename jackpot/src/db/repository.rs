//! Repository trait definitions for testability and dependency injection.
//!
//! Each method is one storage unit: it either applies completely or not at
//! all. Methods that move money take validated [`Posting`]s and apply them in
//! the same unit as the entity change they pay for.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::draw::{ClaimOutcome, DrawResult};
use crate::ledger::{
    LedgerResult, Posting, Transaction, TransactionId, TransactionStatus, Wallet, WalletId,
    WalletType,
};
use crate::tickets::{
    Jackpot, JackpotId, JackpotStatus, NewJackpot, NewTicket, Ticket, TicketId, TicketResult,
};
use crate::users::{NewUser, Plan, PlanId, PlanVerification, User, UserId, UserPlan, UserResult};

/// Trait for user, referral and plan storage
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create_user(&self, user: &NewUser) -> UserResult<User>;

    /// Find user by ID
    async fn find_user(&self, user_id: UserId) -> UserResult<Option<User>>;

    /// Find user by referral code
    async fn find_by_referral_code(&self, code: &str) -> UserResult<Option<User>>;

    /// Replace identifying fields with tombstones and suspend the account.
    /// Wallets, tickets and transactions are retained.
    async fn anonymize_user(&self, user_id: UserId) -> UserResult<User>;

    /// Create a plan
    async fn create_plan(
        &self,
        name: &str,
        price: Decimal,
        duration_days: i32,
        payout_percentage: Decimal,
    ) -> UserResult<Plan>;

    /// Record a pending plan purchase
    async fn record_user_plan(
        &self,
        user_id: UserId,
        plan_id: PlanId,
        purchased_at: DateTime<Utc>,
    ) -> UserResult<UserPlan>;

    /// Move a plan purchase out of `pending`
    async fn update_plan_verification(
        &self,
        user_plan_id: i64,
        verification: PlanVerification,
    ) -> UserResult<UserPlan>;

    /// All plan purchases of a user
    async fn user_plans(&self, user_id: UserId) -> UserResult<Vec<UserPlan>>;
}

/// Trait for wallet and transaction storage
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Get or create the user's wallet of the given type
    async fn open_wallet(
        &self,
        user_id: UserId,
        wallet_type: WalletType,
        currency: &str,
    ) -> LedgerResult<Wallet>;

    /// Find wallet by ID
    async fn find_wallet(&self, wallet_id: WalletId) -> LedgerResult<Option<Wallet>>;

    /// Find the user's wallet of the given type
    async fn find_user_wallet(
        &self,
        user_id: UserId,
        wallet_type: WalletType,
    ) -> LedgerResult<Option<Wallet>>;

    /// All wallets of a user
    async fn user_wallets(&self, user_id: UserId) -> LedgerResult<Vec<Wallet>>;

    /// Apply every posting and record a completed transaction for each, or
    /// change nothing.
    async fn post(&self, postings: &[Posting]) -> LedgerResult<Vec<Transaction>>;

    /// Record a pending transaction without touching the balance
    async fn record_pending(&self, posting: &Posting) -> LedgerResult<Transaction>;

    /// Move a pending transaction to a terminal status. Completing applies the
    /// balance effect in the same unit; an uncoverable debit is stored as
    /// `failed` and reported as `InsufficientBalance`.
    async fn settle(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction>;

    /// Find transaction by ID
    async fn find_transaction(&self, id: TransactionId) -> LedgerResult<Option<Transaction>>;

    /// Find transaction by idempotency key
    async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<Transaction>>;

    /// Transactions of a wallet, newest first
    async fn wallet_transactions(
        &self,
        wallet_id: WalletId,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Stored balance and the signed sum of completed transactions, read in
    /// one consistent snapshot
    async fn balance_snapshot(&self, wallet_id: WalletId) -> LedgerResult<(Decimal, Decimal)>;
}

/// Trait for jackpot and ticket storage
#[async_trait]
pub trait JackpotRepository: Send + Sync {
    /// Create a jackpot in `active` status
    async fn create_jackpot(&self, jackpot: &NewJackpot) -> TicketResult<Jackpot>;

    /// Find jackpot by ID
    async fn find_jackpot(&self, jackpot_id: JackpotId) -> TicketResult<Option<Jackpot>>;

    /// Jackpots, optionally filtered by status, soonest draw first
    async fn list_jackpots(&self, status: Option<JackpotStatus>) -> TicketResult<Vec<Jackpot>>;

    /// Sell one ticket: re-check the jackpot is open at `now` under its lock,
    /// apply `payment`, insert the ticket and bump the jackpot counters.
    async fn issue_ticket(
        &self,
        ticket: &NewTicket,
        payment: &Posting,
        now: DateTime<Utc>,
    ) -> TicketResult<(Ticket, Transaction)>;

    /// Find ticket by ID
    async fn find_ticket(&self, ticket_id: TicketId) -> TicketResult<Option<Ticket>>;

    /// Tickets of a user, newest first
    async fn user_tickets(&self, user_id: UserId) -> TicketResult<Vec<Ticket>>;

    /// Tickets of a jackpot ordered by ID
    async fn jackpot_tickets(&self, jackpot_id: JackpotId) -> TicketResult<Vec<Ticket>>;
}

/// Trait for the draw state machine
#[async_trait]
pub trait DrawRepository: Send + Sync {
    /// Compare-and-set `active -> drawing` for a due jackpot, recording the seed
    async fn claim_draw(
        &self,
        jackpot_id: JackpotId,
        seed: i64,
        now: DateTime<Utc>,
    ) -> DrawResult<ClaimOutcome>;

    /// Mark one ticket `won` and credit its payout in one unit. Returns
    /// `false` when the ticket was already decided.
    async fn settle_winner(
        &self,
        ticket_id: TicketId,
        winning_amount: Decimal,
        payout: &Posting,
    ) -> DrawResult<bool>;

    /// Mark every still-active ticket of the jackpot `lost`
    async fn close_losers(&self, jackpot_id: JackpotId) -> DrawResult<u64>;

    /// `drawing -> completed`
    async fn complete_draw(
        &self,
        jackpot_id: JackpotId,
        winners_selected: i32,
        now: DateTime<Utc>,
    ) -> DrawResult<Jackpot>;

    /// Active jackpots whose draw time has passed
    async fn due_jackpots(&self, now: DateTime<Utc>) -> DrawResult<Vec<JackpotId>>;

    /// Jackpots stuck in `drawing` since before `started_before`
    async fn stale_draws(&self, started_before: DateTime<Utc>) -> DrawResult<Vec<JackpotId>>;
}
