//! Ledger error types.

use super::models::{TransactionId, TransactionStatus, WalletId, WalletType};
use crate::{db::timeouts::TimeoutError, errors::ErrorKind, users::UserId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage unit exceeded its deadline
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Insufficient balance
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        wallet_id: WalletId,
        available: Decimal,
        required: Decimal,
    },

    /// Wallet not found
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// User has no wallet of this type
    #[error("User {user_id} has no {wallet_type} wallet")]
    NoWallet {
        user_id: UserId,
        wallet_type: WalletType,
    },

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Duplicate transaction (idempotency key already used)
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Invalid amount (must be positive, at most two decimal places)
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Malformed request
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Currency mismatch
    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: String, got: String },

    /// Status can only move forward out of pending
    #[error("Invalid transaction status transition: {from} -> {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Balance arithmetic overflowed
    #[error("Balance overflow on wallet {0}")]
    BalanceOverflow(WalletId),

    /// Stored state contradicts the ledger; indicates a bug
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Database(_) | LedgerError::Timeout(_) => ErrorKind::Internal,
            LedgerError::WalletNotFound(_)
            | LedgerError::NoWallet { .. }
            | LedgerError::TransactionNotFound(_) => ErrorKind::NotFound,
            LedgerError::InvalidAmount(_)
            | LedgerError::Validation(_)
            | LedgerError::CurrencyMismatch { .. } => ErrorKind::Validation,
            LedgerError::InsufficientBalance { .. }
            | LedgerError::DuplicateTransaction(_)
            | LedgerError::InvalidTransition { .. } => ErrorKind::Conflict,
            LedgerError::BalanceOverflow(_) | LedgerError::InvariantViolation(_) => {
                ErrorKind::InvariantViolation
            }
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database errors are sanitized to prevent information disclosure about
    /// the internal system structure, and wallet ids are redacted.
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Database(_) | LedgerError::Timeout(_) => {
                "Internal server error".to_string()
            }
            LedgerError::WalletNotFound(_) | LedgerError::NoWallet { .. } => {
                "Wallet not found".to_string()
            }
            LedgerError::InvariantViolation(_) | LedgerError::BalanceOverflow(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
