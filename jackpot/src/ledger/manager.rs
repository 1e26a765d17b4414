//! Ledger service: the only way balances change.

use super::{
    errors::{LedgerError, LedgerResult},
    models::{
        DEFAULT_CURRENCY, Posting, Reconciliation, Transaction, TransactionId, TransactionStatus,
        TransactionType, Wallet, WalletId, WalletType,
    },
};
use crate::{db::LedgerRepository, users::UserId};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Default page size for [`Ledger::history`]
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Ledger service
#[derive(Clone)]
pub struct Ledger {
    repo: Arc<dyn LedgerRepository>,
}

impl Ledger {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// Fresh idempotency key for callers that have no natural one
    fn generated_key() -> String {
        format!("ledger:{}", Uuid::new_v4())
    }

    /// Credit a wallet.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - amount is not a positive whole-cent value
    /// * `LedgerError::WalletNotFound` - unknown wallet
    pub async fn credit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
    ) -> LedgerResult<Transaction> {
        self.credit_idempotent(
            wallet_id,
            amount,
            transaction_type,
            reference,
            Self::generated_key(),
        )
        .await
    }

    /// Debit a wallet. On failure nothing is recorded.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientBalance` - amount exceeds the balance
    /// * `LedgerError::InvalidAmount` - amount is not a positive whole-cent value
    /// * `LedgerError::WalletNotFound` - unknown wallet
    pub async fn debit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
    ) -> LedgerResult<Transaction> {
        self.debit_idempotent(
            wallet_id,
            amount,
            transaction_type,
            reference,
            Self::generated_key(),
        )
        .await
    }

    /// Credit under a caller-supplied key; a reused key is `DuplicateTransaction`.
    pub async fn credit_idempotent(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        idempotency_key: String,
    ) -> LedgerResult<Transaction> {
        let posting = Posting::credit(
            wallet_id,
            amount,
            transaction_type,
            reference,
            idempotency_key,
        )?;
        self.post_one(posting).await
    }

    /// Debit under a caller-supplied key; a reused key is `DuplicateTransaction`.
    pub async fn debit_idempotent(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        idempotency_key: String,
    ) -> LedgerResult<Transaction> {
        let posting = Posting::debit(
            wallet_id,
            amount,
            transaction_type,
            reference,
            idempotency_key,
        )?;
        self.post_one(posting).await
    }

    async fn post_one(&self, posting: Posting) -> LedgerResult<Transaction> {
        let result = self.repo.post(std::slice::from_ref(&posting)).await;
        match result {
            Ok(mut recorded) => recorded.pop().ok_or_else(|| {
                LedgerError::InvariantViolation("posting produced no transaction".to_string())
            }),
            Err(e) => {
                log_refusal(&e);
                Err(e)
            }
        }
    }

    /// Move money between two wallets of the same currency; both entries or
    /// neither.
    pub async fn transfer(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
    ) -> LedgerResult<(Transaction, Transaction)> {
        if from == to {
            return Err(LedgerError::Validation(
                "cannot transfer to the same wallet".to_string(),
            ));
        }

        let source = self.wallet(from).await?;
        let target = self.wallet(to).await?;
        if source.currency != target.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: source.currency,
                got: target.currency,
            });
        }

        let key = Self::generated_key();
        let postings = [
            Posting::debit(
                from,
                amount,
                transaction_type,
                reference.clone(),
                format!("{key}:debit"),
            )?,
            Posting::credit(
                to,
                amount,
                transaction_type,
                reference,
                format!("{key}:credit"),
            )?,
        ];

        let mut recorded = match self.repo.post(&postings).await {
            Ok(recorded) => recorded,
            Err(e) => {
                log_refusal(&e);
                return Err(e);
            }
        };
        let credit = recorded.pop();
        let debit = recorded.pop();
        match (debit, credit) {
            (Some(debit), Some(credit)) => Ok((debit, credit)),
            _ => Err(LedgerError::InvariantViolation(
                "transfer produced fewer than two transactions".to_string(),
            )),
        }
    }

    /// Get or create the user's wallet of `wallet_type`
    pub async fn open_wallet(&self, user_id: UserId, wallet_type: WalletType) -> LedgerResult<Wallet> {
        self.repo
            .open_wallet(user_id, wallet_type, DEFAULT_CURRENCY)
            .await
    }

    pub async fn wallet(&self, wallet_id: WalletId) -> LedgerResult<Wallet> {
        self.repo
            .find_wallet(wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }

    pub async fn wallet_for(
        &self,
        user_id: UserId,
        wallet_type: WalletType,
    ) -> LedgerResult<Option<Wallet>> {
        self.repo.find_user_wallet(user_id, wallet_type).await
    }

    pub async fn wallets_for_user(&self, user_id: UserId) -> LedgerResult<Vec<Wallet>> {
        self.repo.user_wallets(user_id).await
    }

    /// Transactions of a wallet, newest first
    pub async fn history(&self, wallet_id: WalletId, limit: i64) -> LedgerResult<Vec<Transaction>> {
        self.wallet(wallet_id).await?;
        self.repo.wallet_transactions(wallet_id, limit).await
    }

    pub async fn transaction(&self, id: TransactionId) -> LedgerResult<Transaction> {
        self.repo
            .find_transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<Transaction>> {
        self.repo.find_by_idempotency_key(key).await
    }

    /// Record a `pending` transaction; the balance moves only when it is
    /// settled as `completed`.
    pub async fn record_pending(&self, posting: Posting) -> LedgerResult<Transaction> {
        self.repo.record_pending(&posting).await
    }

    /// Forward-only status change of a pending transaction.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidTransition` - the transaction is already terminal
    /// * `LedgerError::InsufficientBalance` - a pending debit could not be
    ///   covered; it is stored as `failed`
    pub async fn settle(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        match self.repo.settle(transaction_id, status).await {
            Ok(tx) => {
                log::info!(
                    "Transaction {} settled as {} ({} {})",
                    tx.id,
                    tx.status,
                    tx.direction,
                    tx.amount
                );
                Ok(tx)
            }
            Err(e) => {
                log_refusal(&e);
                Err(e)
            }
        }
    }

    /// Recompute the balance from completed transactions and compare it with
    /// the stored one.
    pub async fn verify_wallet(&self, wallet_id: WalletId) -> LedgerResult<Reconciliation> {
        let (stored_balance, ledger_balance) = self.repo.balance_snapshot(wallet_id).await?;
        let reconciliation = Reconciliation {
            wallet_id,
            stored_balance,
            ledger_balance,
        };

        if !reconciliation.is_consistent() {
            log::error!(
                "Wallet {} out of balance: stored {}, ledger {}",
                wallet_id,
                stored_balance,
                ledger_balance
            );
            return Err(LedgerError::InvariantViolation(format!(
                "wallet {wallet_id} stored balance {stored_balance} != ledger balance {ledger_balance}"
            )));
        }
        Ok(reconciliation)
    }
}

/// Refusals are ordinary outcomes; only unexpected failures are errors.
fn log_refusal(e: &LedgerError) {
    if e.kind().is_expected() {
        log::info!("Ledger operation refused: {e}");
    } else {
        log::error!("Ledger operation failed: {e}");
    }
}
