//! PostgreSQL store.
//!
//! Each repository method is one database transaction run under a deadline.
//! Balance changes lock the affected wallet rows (`FOR UPDATE`, ascending id)
//! before computing new balances, and the `CHECK (balance >= 0)` constraint
//! backs the ledger's own refusal of overdrafts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

use super::{
    Database,
    repository::{DrawRepository, JackpotRepository, LedgerRepository, UserRepository},
    timeouts::{DEFAULT_QUERY_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT, LONG_OPERATION_TIMEOUT, within},
};
use crate::{
    draw::{ClaimOutcome, DrawError, DrawResult},
    errors::UnknownVariant,
    ledger::{
        LedgerError, LedgerResult, Posting, Transaction, TransactionId, TransactionStatus, Wallet,
        WalletId, WalletType, apply_entry,
    },
    tickets::{
        Jackpot, JackpotId, JackpotStatus, NewJackpot, NewTicket, Ticket, TicketError, TicketId,
        TicketResult, TicketStatus,
    },
    users::{
        NewUser, Plan, PlanId, PlanVerification, User, UserError, UserId, UserPlan, UserResult,
    },
};

const USER_COLUMNS: &str = "id, member_id, email, password_hash, status, referred_by, role, \
                            referral_code, created_at";
const WALLET_COLUMNS: &str = "id, user_id, wallet_type, balance, currency, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, user_id, wallet_id, transaction_type, direction, amount, \
                                   status, reference, idempotency_key, balance_after, created_at, \
                                   updated_at";
const JACKPOT_COLUMNS: &str = "id, name, amount, ticket_price, max_winners, draw_at, status, \
                               total_tickets_sold, total_revenue, winners_selected, draw_seed, \
                               draw_started_at, completed_at, created_at";
const TICKET_COLUMNS: &str =
    "id, ticket_number, user_id, jackpot_id, status, price, winning_amount, purchased_at";
const USER_PLAN_COLUMNS: &str =
    "id, user_id, plan_id, purchase_price, verification, purchased_at, expires_at";

/// Read a text column into one of the model enums
fn enum_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: UnknownVariant| sqlx::Error::Decode(Box::new(e)))
}

/// Name of the unique constraint `e` violated, if any
fn unique_violation(e: &sqlx::Error) -> Option<String> {
    e.as_database_error()
        .filter(|db| db.is_unique_violation())
        .map(|db| db.constraint().unwrap_or_default().to_string())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_foreign_key_violation())
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        member_id: row.try_get("member_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        status: enum_column(row, "status")?,
        referred_by: row.try_get("referred_by")?,
        role: row.try_get("role")?,
        referral_code: row.try_get("referral_code")?,
        created_at: row.try_get("created_at")?,
    })
}

fn plan_from_row(row: &PgRow) -> Result<Plan, sqlx::Error> {
    Ok(Plan {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        duration_days: row.try_get("duration_days")?,
        payout_percentage: row.try_get("payout_percentage")?,
    })
}

fn user_plan_from_row(row: &PgRow) -> Result<UserPlan, sqlx::Error> {
    Ok(UserPlan {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        plan_id: row.try_get("plan_id")?,
        purchase_price: row.try_get("purchase_price")?,
        verification: enum_column(row, "verification")?,
        purchased_at: row.try_get("purchased_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, sqlx::Error> {
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        wallet_type: enum_column(row, "wallet_type")?,
        balance: row.try_get("balance")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, sqlx::Error> {
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        wallet_id: row.try_get("wallet_id")?,
        transaction_type: enum_column(row, "transaction_type")?,
        direction: enum_column(row, "direction")?,
        amount: row.try_get("amount")?,
        status: enum_column(row, "status")?,
        reference: row.try_get("reference")?,
        idempotency_key: row.try_get("idempotency_key")?,
        balance_after: row.try_get("balance_after")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn jackpot_from_row(row: &PgRow) -> Result<Jackpot, sqlx::Error> {
    Ok(Jackpot {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        amount: row.try_get("amount")?,
        ticket_price: row.try_get("ticket_price")?,
        max_winners: row.try_get("max_winners")?,
        draw_at: row.try_get("draw_at")?,
        status: enum_column(row, "status")?,
        total_tickets_sold: row.try_get("total_tickets_sold")?,
        total_revenue: row.try_get("total_revenue")?,
        winners_selected: row.try_get("winners_selected")?,
        draw_seed: row.try_get("draw_seed")?,
        draw_started_at: row.try_get("draw_started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket, sqlx::Error> {
    Ok(Ticket {
        id: row.try_get("id")?,
        ticket_number: row.try_get("ticket_number")?,
        user_id: row.try_get("user_id")?,
        jackpot_id: row.try_get("jackpot_id")?,
        status: enum_column(row, "status")?,
        price: row.try_get("price")?,
        winning_amount: row.try_get("winning_amount")?,
        purchased_at: row.try_get("purchased_at")?,
    })
}

/// Apply postings inside an open database transaction.
///
/// Locks every touched wallet in ascending id order, refuses reused keys and
/// overdrafts before writing anything, then updates balances and inserts one
/// completed transaction row per posting.
async fn apply_postings(
    conn: &mut PgConnection,
    postings: &[Posting],
) -> LedgerResult<Vec<Transaction>> {
    let mut wallet_ids: Vec<WalletId> = postings.iter().map(|p| p.wallet_id).collect();
    wallet_ids.sort_unstable();
    wallet_ids.dedup();

    let locked = sqlx::query(
        "SELECT id, user_id, balance FROM wallets WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(&wallet_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut wallets: HashMap<WalletId, (UserId, Decimal)> = HashMap::new();
    for row in &locked {
        wallets.insert(
            row.try_get("id")?,
            (row.try_get("user_id")?, row.try_get("balance")?),
        );
    }

    let mut batch_keys = HashSet::new();
    for posting in postings {
        if !batch_keys.insert(posting.idempotency_key.as_str()) {
            return Err(LedgerError::DuplicateTransaction(
                posting.idempotency_key.clone(),
            ));
        }
    }
    let keys: Vec<String> = postings
        .iter()
        .map(|p| p.idempotency_key.clone())
        .collect();
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT idempotency_key FROM transactions WHERE idempotency_key = ANY($1) LIMIT 1",
    )
    .bind(&keys)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(key) = existing {
        return Err(LedgerError::DuplicateTransaction(key));
    }

    let mut planned = Vec::with_capacity(postings.len());
    for posting in postings {
        let (user_id, balance) = wallets
            .get_mut(&posting.wallet_id)
            .ok_or(LedgerError::WalletNotFound(posting.wallet_id))?;
        let next = posting.apply_to(*balance)?;
        *balance = next;
        planned.push((*user_id, next));
    }

    let insert = format!(
        "INSERT INTO transactions
             (user_id, wallet_id, transaction_type, direction, amount, status, reference,
              idempotency_key, balance_after)
         VALUES ($1, $2, $3, $4, $5, 'completed', $6, $7, $8)
         RETURNING {TRANSACTION_COLUMNS}"
    );

    let mut recorded = Vec::with_capacity(postings.len());
    for (posting, (user_id, balance_after)) in postings.iter().zip(planned) {
        sqlx::query("UPDATE wallets SET balance = $1, updated_at = NOW() WHERE id = $2")
            .bind(balance_after)
            .bind(posting.wallet_id)
            .execute(&mut *conn)
            .await?;

        let row = sqlx::query(&insert)
            .bind(user_id)
            .bind(posting.wallet_id)
            .bind(posting.transaction_type.to_string())
            .bind(posting.direction.to_string())
            .bind(posting.amount)
            .bind(&posting.reference)
            .bind(&posting.idempotency_key)
            .bind(balance_after)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(_) => LedgerError::DuplicateTransaction(posting.idempotency_key.clone()),
                None => LedgerError::Database(e),
            })?;
        recorded.push(transaction_from_row(&row)?);
    }

    Ok(recorded)
}

/// PostgreSQL implementation of every repository trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_database(database: &Database) -> Self {
        Self::new(database.pool().clone())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, user: &NewUser) -> UserResult<User> {
        let sql = format!(
            "INSERT INTO users
                 (member_id, email, password_hash, status, referred_by, role, referral_code)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {USER_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(&user.member_id)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(user.status.to_string())
                .bind(user.referred_by)
                .bind(&user.role)
                .bind(&user.referral_code)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    if let Some(constraint) = unique_violation(&e) {
                        return match constraint.as_str() {
                            "users_email_key" => UserError::EmailTaken,
                            "users_member_id_key" => UserError::MemberIdTaken,
                            _ => UserError::ReferralCodeTaken(user.referral_code.clone()),
                        };
                    }
                    if is_foreign_key_violation(&e)
                        && let Some(referrer) = user.referred_by
                    {
                        return UserError::UserNotFound(referrer);
                    }
                    UserError::Database(e)
                })?;
            Ok(user_from_row(&row)?)
        })
        .await
    }

    async fn find_user(&self, user_id: UserId) -> UserResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(user_from_row).transpose()?)
        })
        .await
    }

    async fn find_by_referral_code(&self, code: &str) -> UserResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE referral_code = $1");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(user_from_row).transpose()?)
        })
        .await
    }

    async fn anonymize_user(&self, user_id: UserId) -> UserResult<User> {
        let tombstone = Uuid::new_v4().simple().to_string();
        let sql = format!(
            "UPDATE users
             SET email = $2, member_id = $3, password_hash = '', status = 'suspended'
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(user_id)
                .bind(format!("deleted-{tombstone}@invalid"))
                .bind(format!("deleted-{tombstone}"))
                .fetch_optional(&self.pool)
                .await?
                .ok_or(UserError::UserNotFound(user_id))?;
            Ok(user_from_row(&row)?)
        })
        .await
    }

    async fn create_plan(
        &self,
        name: &str,
        price: Decimal,
        duration_days: i32,
        payout_percentage: Decimal,
    ) -> UserResult<Plan> {
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(
                "INSERT INTO plans (name, price, duration_days, payout_percentage)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, name, price, duration_days, payout_percentage",
            )
            .bind(name)
            .bind(price)
            .bind(duration_days)
            .bind(payout_percentage)
            .fetch_one(&self.pool)
            .await?;
            Ok(plan_from_row(&row)?)
        })
        .await
    }

    async fn record_user_plan(
        &self,
        user_id: UserId,
        plan_id: PlanId,
        purchased_at: DateTime<Utc>,
    ) -> UserResult<UserPlan> {
        let sql = format!(
            "INSERT INTO user_plans (user_id, plan_id, purchase_price, purchased_at, expires_at)
             SELECT $1, p.id, p.price, $3, $3 + make_interval(days => p.duration_days)
             FROM plans p WHERE p.id = $2
             RETURNING {USER_PLAN_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(user_id)
                .bind(plan_id)
                .bind(purchased_at)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    if is_foreign_key_violation(&e) {
                        UserError::UserNotFound(user_id)
                    } else {
                        UserError::Database(e)
                    }
                })?
                .ok_or(UserError::PlanNotFound(plan_id))?;
            Ok(user_plan_from_row(&row)?)
        })
        .await
    }

    async fn update_plan_verification(
        &self,
        user_plan_id: i64,
        verification: PlanVerification,
    ) -> UserResult<UserPlan> {
        let select = format!("SELECT {USER_PLAN_COLUMNS} FROM user_plans WHERE id = $1 FOR UPDATE");
        let update = format!(
            "UPDATE user_plans SET verification = $2 WHERE id = $1 RETURNING {USER_PLAN_COLUMNS}"
        );
        within(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(&select)
                .bind(user_plan_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(UserError::PlanNotFound(user_plan_id))?;
            let current = user_plan_from_row(&row)?;
            if !current.verification.can_transition_to(verification) {
                return Err(UserError::InvalidTransition {
                    from: current.verification,
                    to: verification,
                });
            }

            let row = sqlx::query(&update)
                .bind(user_plan_id)
                .bind(verification.to_string())
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(user_plan_from_row(&row)?)
        })
        .await
    }

    async fn user_plans(&self, user_id: UserId) -> UserResult<Vec<UserPlan>> {
        let sql = format!("SELECT {USER_PLAN_COLUMNS} FROM user_plans WHERE user_id = $1 ORDER BY id");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let rows = sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows
                .iter()
                .map(user_plan_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn open_wallet(
        &self,
        user_id: UserId,
        wallet_type: WalletType,
        currency: &str,
    ) -> LedgerResult<Wallet> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let sql = format!(
            "INSERT INTO wallets (user_id, wallet_type, currency)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id, wallet_type)
             DO UPDATE SET updated_at = wallets.updated_at
             RETURNING {WALLET_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(user_id)
                .bind(wallet_type.to_string())
                .bind(currency)
                .fetch_one(&self.pool)
                .await?;
            Ok(wallet_from_row(&row)?)
        })
        .await
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> LedgerResult<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(wallet_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(wallet_from_row).transpose()?)
        })
        .await
    }

    async fn find_user_wallet(
        &self,
        user_id: UserId,
        wallet_type: WalletType,
    ) -> LedgerResult<Option<Wallet>> {
        let sql =
            format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 AND wallet_type = $2");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(user_id)
                .bind(wallet_type.to_string())
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(wallet_from_row).transpose()?)
        })
        .await
    }

    async fn user_wallets(&self, user_id: UserId) -> LedgerResult<Vec<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 ORDER BY id");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let rows = sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows
                .iter()
                .map(wallet_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn post(&self, postings: &[Posting]) -> LedgerResult<Vec<Transaction>> {
        within(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;
            let recorded = apply_postings(&mut tx, postings).await?;
            tx.commit().await?;
            Ok(recorded)
        })
        .await
    }

    async fn record_pending(&self, posting: &Posting) -> LedgerResult<Transaction> {
        let sql = format!(
            "INSERT INTO transactions
                 (user_id, wallet_id, transaction_type, direction, amount, status, reference,
                  idempotency_key)
             SELECT w.user_id, w.id, $2, $3, $4, 'pending', $5, $6
             FROM wallets w WHERE w.id = $1
             RETURNING {TRANSACTION_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(posting.wallet_id)
                .bind(posting.transaction_type.to_string())
                .bind(posting.direction.to_string())
                .bind(posting.amount)
                .bind(&posting.reference)
                .bind(&posting.idempotency_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| match unique_violation(&e) {
                    Some(_) => LedgerError::DuplicateTransaction(posting.idempotency_key.clone()),
                    None => LedgerError::Database(e),
                })?
                .ok_or(LedgerError::WalletNotFound(posting.wallet_id))?;
            Ok(transaction_from_row(&row)?)
        })
        .await
    }

    async fn settle(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        let select = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE");
        let update = format!(
            "UPDATE transactions SET status = $2, balance_after = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {TRANSACTION_COLUMNS}"
        );
        within(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(&select)
                .bind(transaction_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
            let pending = transaction_from_row(&row)?;
            if !pending.status.can_transition_to(status) {
                return Err(LedgerError::InvalidTransition {
                    from: pending.status,
                    to: status,
                });
            }

            let mut balance_after = None;
            if status == TransactionStatus::Completed {
                let balance: Decimal =
                    sqlx::query_scalar("SELECT balance FROM wallets WHERE id = $1 FOR UPDATE")
                        .bind(pending.wallet_id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or(LedgerError::WalletNotFound(pending.wallet_id))?;

                match apply_entry(pending.wallet_id, pending.direction, pending.amount, balance) {
                    Ok(next) => {
                        sqlx::query(
                            "UPDATE wallets SET balance = $1, updated_at = NOW() WHERE id = $2",
                        )
                        .bind(next)
                        .bind(pending.wallet_id)
                        .execute(&mut *tx)
                        .await?;
                        balance_after = Some(next);
                    }
                    Err(e @ LedgerError::InsufficientBalance { .. }) => {
                        sqlx::query(
                            "UPDATE transactions SET status = 'failed', updated_at = NOW()
                             WHERE id = $1",
                        )
                        .bind(transaction_id)
                        .execute(&mut *tx)
                        .await?;
                        tx.commit().await?;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            let row = sqlx::query(&update)
                .bind(transaction_id)
                .bind(status.to_string())
                .bind(balance_after)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(transaction_from_row(&row)?)
        })
        .await
    }

    async fn find_transaction(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(transaction_from_row).transpose()?)
        })
        .await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(transaction_from_row).transpose()?)
        })
        .await
    }

    async fn wallet_transactions(
        &self,
        wallet_id: WalletId,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE wallet_id = $1
             ORDER BY id DESC
             LIMIT $2"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let rows = sqlx::query(&sql)
                .bind(wallet_id)
                .bind(limit.max(0))
                .fetch_all(&self.pool)
                .await?;
            Ok(rows
                .iter()
                .map(transaction_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn balance_snapshot(&self, wallet_id: WalletId) -> LedgerResult<(Decimal, Decimal)> {
        // One statement, one snapshot
        within(LONG_OPERATION_TIMEOUT, async {
            let row = sqlx::query(
                "SELECT w.balance,
                        COALESCE(SUM(CASE WHEN t.direction = 'credit' THEN t.amount
                                          ELSE -t.amount END)
                                 FILTER (WHERE t.status = 'completed'), 0) AS ledger_balance
                 FROM wallets w
                 LEFT JOIN transactions t ON t.wallet_id = w.id
                 WHERE w.id = $1
                 GROUP BY w.id, w.balance",
            )
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
            Ok((row.try_get("balance")?, row.try_get("ledger_balance")?))
        })
        .await
    }
}

#[async_trait]
impl JackpotRepository for PgStore {
    async fn create_jackpot(&self, jackpot: &NewJackpot) -> TicketResult<Jackpot> {
        let sql = format!(
            "INSERT INTO jackpots (name, amount, ticket_price, max_winners, draw_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {JACKPOT_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(&jackpot.name)
                .bind(jackpot.amount)
                .bind(jackpot.ticket_price)
                .bind(jackpot.max_winners)
                .bind(jackpot.draw_at)
                .fetch_one(&self.pool)
                .await?;
            Ok(jackpot_from_row(&row)?)
        })
        .await
    }

    async fn find_jackpot(&self, jackpot_id: JackpotId) -> TicketResult<Option<Jackpot>> {
        let sql = format!("SELECT {JACKPOT_COLUMNS} FROM jackpots WHERE id = $1");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(jackpot_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(jackpot_from_row).transpose()?)
        })
        .await
    }

    async fn list_jackpots(&self, status: Option<JackpotStatus>) -> TicketResult<Vec<Jackpot>> {
        let sql = format!(
            "SELECT {JACKPOT_COLUMNS} FROM jackpots
             WHERE ($1::TEXT IS NULL OR status = $1)
             ORDER BY draw_at, id"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            let rows = sqlx::query(&sql)
                .bind(status.map(|s| s.to_string()))
                .fetch_all(&self.pool)
                .await?;
            Ok(rows
                .iter()
                .map(jackpot_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn issue_ticket(
        &self,
        ticket: &NewTicket,
        payment: &Posting,
        now: DateTime<Utc>,
    ) -> TicketResult<(Ticket, Transaction)> {
        let lock = format!("SELECT {JACKPOT_COLUMNS} FROM jackpots WHERE id = $1 FOR UPDATE");
        let insert = format!(
            "INSERT INTO tickets (ticket_number, user_id, jackpot_id, price, purchased_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {TICKET_COLUMNS}"
        );
        within(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(&lock)
                .bind(ticket.jackpot_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(TicketError::JackpotNotFound(ticket.jackpot_id))?;
            let jackpot = jackpot_from_row(&row)?;
            if !jackpot.is_open_for_sales(now) {
                return Err(TicketError::JackpotNotActive {
                    jackpot_id: jackpot.id,
                    status: jackpot.status,
                });
            }

            let transaction = apply_postings(&mut tx, std::slice::from_ref(payment))
                .await?
                .pop()
                .ok_or_else(|| {
                    LedgerError::InvariantViolation("posting produced no transaction".to_string())
                })?;

            let row = sqlx::query(&insert)
                .bind(&ticket.ticket_number)
                .bind(ticket.user_id)
                .bind(ticket.jackpot_id)
                .bind(ticket.price)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| match unique_violation(&e) {
                    Some(_) => TicketError::TicketNumberTaken(ticket.ticket_number.clone()),
                    None => TicketError::Database(e),
                })?;
            let issued = ticket_from_row(&row)?;

            sqlx::query(
                "UPDATE jackpots
                 SET total_tickets_sold = total_tickets_sold + 1,
                     total_revenue = total_revenue + $2
                 WHERE id = $1",
            )
            .bind(ticket.jackpot_id)
            .bind(ticket.price)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((issued, transaction))
        })
        .await
    }

    async fn find_ticket(&self, ticket_id: TicketId) -> TicketResult<Option<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let row = sqlx::query(&sql)
                .bind(ticket_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(ticket_from_row).transpose()?)
        })
        .await
    }

    async fn user_tickets(&self, user_id: UserId) -> TicketResult<Vec<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE user_id = $1 ORDER BY id DESC");
        within(DEFAULT_QUERY_TIMEOUT, async {
            let rows = sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows
                .iter()
                .map(ticket_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn jackpot_tickets(&self, jackpot_id: JackpotId) -> TicketResult<Vec<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE jackpot_id = $1 ORDER BY id");
        within(LONG_OPERATION_TIMEOUT, async {
            let rows = sqlx::query(&sql)
                .bind(jackpot_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows
                .iter()
                .map(ticket_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[async_trait]
impl DrawRepository for PgStore {
    async fn claim_draw(
        &self,
        jackpot_id: JackpotId,
        seed: i64,
        now: DateTime<Utc>,
    ) -> DrawResult<ClaimOutcome> {
        let claim = format!(
            "UPDATE jackpots
             SET status = 'drawing', draw_seed = $2, draw_started_at = $3
             WHERE id = $1 AND status = 'active' AND draw_at <= $3
             RETURNING {JACKPOT_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            if let Some(row) = sqlx::query(&claim)
                .bind(jackpot_id)
                .bind(seed)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?
            {
                return Ok(ClaimOutcome::Claimed(jackpot_from_row(&row)?));
            }

            let row = sqlx::query("SELECT status, draw_at FROM jackpots WHERE id = $1")
                .bind(jackpot_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(DrawError::JackpotNotFound(jackpot_id))?;
            let status: JackpotStatus = enum_column(&row, "status")?;
            Ok(match status {
                JackpotStatus::Active => ClaimOutcome::NotDue {
                    draw_at: row.try_get("draw_at")?,
                },
                other => ClaimOutcome::Busy(other),
            })
        })
        .await
    }

    async fn settle_winner(
        &self,
        ticket_id: TicketId,
        winning_amount: Decimal,
        payout: &Posting,
    ) -> DrawResult<bool> {
        within(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query("SELECT status FROM tickets WHERE id = $1 FOR UPDATE")
                .bind(ticket_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(TicketError::TicketNotFound(ticket_id))?;
            let status: TicketStatus = enum_column(&row, "status")?;
            if status != TicketStatus::Active {
                return Ok(false);
            }

            apply_postings(&mut tx, std::slice::from_ref(payout)).await?;
            sqlx::query("UPDATE tickets SET status = 'won', winning_amount = $2 WHERE id = $1")
                .bind(ticket_id)
                .bind(winning_amount)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn close_losers(&self, jackpot_id: JackpotId) -> DrawResult<u64> {
        within(LONG_OPERATION_TIMEOUT, async {
            let result = sqlx::query(
                "UPDATE tickets SET status = 'lost' WHERE jackpot_id = $1 AND status = 'active'",
            )
            .bind(jackpot_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn complete_draw(
        &self,
        jackpot_id: JackpotId,
        winners_selected: i32,
        now: DateTime<Utc>,
    ) -> DrawResult<Jackpot> {
        let sql = format!(
            "UPDATE jackpots
             SET status = 'completed', winners_selected = $2, completed_at = $3
             WHERE id = $1 AND status = 'drawing'
             RETURNING {JACKPOT_COLUMNS}"
        );
        within(DEFAULT_QUERY_TIMEOUT, async {
            if let Some(row) = sqlx::query(&sql)
                .bind(jackpot_id)
                .bind(winners_selected)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?
            {
                return Ok(jackpot_from_row(&row)?);
            }

            let row = sqlx::query("SELECT status FROM jackpots WHERE id = $1")
                .bind(jackpot_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(DrawError::JackpotNotFound(jackpot_id))?;
            Err(DrawError::InvalidState {
                jackpot_id,
                expected: JackpotStatus::Drawing,
                actual: enum_column(&row, "status")?,
            })
        })
        .await
    }

    async fn due_jackpots(&self, now: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        within(DEFAULT_QUERY_TIMEOUT, async {
            Ok(sqlx::query_scalar(
                "SELECT id FROM jackpots
                 WHERE status = 'active' AND draw_at <= $1
                 ORDER BY draw_at, id",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    async fn stale_draws(&self, started_before: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        within(DEFAULT_QUERY_TIMEOUT, async {
            Ok(sqlx::query_scalar(
                "SELECT id FROM jackpots
                 WHERE status = 'drawing' AND draw_started_at < $1
                 ORDER BY id",
            )
            .bind(started_before)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }
}
