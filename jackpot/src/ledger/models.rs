//! Ledger data models.

use super::errors::{LedgerError, LedgerResult};
use crate::{errors::UnknownVariant, users::UserId};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Wallet ID type
pub type WalletId = i64;

/// Transaction ID type
pub type TransactionId = i64;

/// Currency new wallets are opened in
pub const DEFAULT_CURRENCY: &str = "USD";

/// Decimal places every stored amount is held to
pub const MONEY_SCALE: u32 = 2;

/// Truncate an amount to whole cents, never rounding up.
pub fn truncate_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero)
}

/// Wallet type; at most one wallet per (user, type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    Deposit,
    Winnings,
    TicketBonus,
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletType::Deposit => write!(f, "deposit"),
            WalletType::Winnings => write!(f, "winnings"),
            WalletType::TicketBonus => write!(f, "ticket_bonus"),
        }
    }
}

impl FromStr for WalletType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(WalletType::Deposit),
            "winnings" => Ok(WalletType::Winnings),
            "ticket_bonus" => Ok(WalletType::TicketBonus),
            other => Err(UnknownVariant::new("wallet type", other)),
        }
    }
}

/// Wallet model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub wallet_type: WalletType,
    pub balance: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl std::fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryDirection::Debit => write!(f, "debit"),
            EntryDirection::Credit => write!(f, "credit"),
        }
    }
}

impl FromStr for EntryDirection {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryDirection::Debit),
            "credit" => Ok(EntryDirection::Credit),
            other => Err(UnknownVariant::new("entry direction", other)),
        }
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    TicketPurchase,
    Winning,
    Commission,
    Bonus,
    Refund,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdrawal => write!(f, "withdrawal"),
            TransactionType::TicketPurchase => write!(f, "ticket_purchase"),
            TransactionType::Winning => write!(f, "winning"),
            TransactionType::Commission => write!(f, "commission"),
            TransactionType::Bonus => write!(f, "bonus"),
            TransactionType::Refund => write!(f, "refund"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "ticket_purchase" => Ok(TransactionType::TicketPurchase),
            "winning" => Ok(TransactionType::Winning),
            "commission" => Ok(TransactionType::Commission),
            "bonus" => Ok(TransactionType::Bonus),
            "refund" => Ok(TransactionType::Refund),
            other => Err(UnknownVariant::new("transaction type", other)),
        }
    }
}

/// Transaction status; `pending` is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Status only moves forward, out of `pending`.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self == TransactionStatus::Pending && next.is_terminal()
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
            TransactionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(UnknownVariant::new("transaction status", other)),
        }
    }
}

/// Transaction model (one row per balance-affecting event)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub transaction_type: TransactionType,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub reference: Option<String>,
    pub idempotency_key: String,
    /// Wallet balance right after this entry was applied; unset until completed
    pub balance_after: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount signed by direction: credits positive, debits negative
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}

/// A validated instruction to move money into or out of one wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub wallet_id: WalletId,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub reference: Option<String>,
    pub idempotency_key: String,
}

impl Posting {
    /// Build a posting, rejecting non-positive amounts and sub-cent precision.
    pub fn new(
        wallet_id: WalletId,
        direction: EntryDirection,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        idempotency_key: String,
    ) -> LedgerResult<Self> {
        if amount <= Decimal::ZERO || amount.normalize().scale() > MONEY_SCALE {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if idempotency_key.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            wallet_id,
            direction,
            amount,
            transaction_type,
            reference,
            idempotency_key,
        })
    }

    pub fn credit(
        wallet_id: WalletId,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        idempotency_key: String,
    ) -> LedgerResult<Self> {
        Self::new(
            wallet_id,
            EntryDirection::Credit,
            amount,
            transaction_type,
            reference,
            idempotency_key,
        )
    }

    pub fn debit(
        wallet_id: WalletId,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        idempotency_key: String,
    ) -> LedgerResult<Self> {
        Self::new(
            wallet_id,
            EntryDirection::Debit,
            amount,
            transaction_type,
            reference,
            idempotency_key,
        )
    }

    /// Balance after applying this posting to `balance`.
    ///
    /// Debits that would take the balance below zero are refused.
    pub fn apply_to(&self, balance: Decimal) -> LedgerResult<Decimal> {
        apply_entry(self.wallet_id, self.direction, self.amount, balance)
    }
}

/// Balance after moving `amount` in `direction`; never below zero.
pub fn apply_entry(
    wallet_id: WalletId,
    direction: EntryDirection,
    amount: Decimal,
    balance: Decimal,
) -> LedgerResult<Decimal> {
    match direction {
        EntryDirection::Credit => balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow(wallet_id)),
        EntryDirection::Debit if amount > balance => Err(LedgerError::InsufficientBalance {
            wallet_id,
            available: balance,
            required: amount,
        }),
        EntryDirection::Debit => Ok(balance - amount),
    }
}

/// Stored balance compared against the sum of completed entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub wallet_id: WalletId,
    pub stored_balance: Decimal,
    pub ledger_balance: Decimal,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.ledger_balance && self.stored_balance >= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dollars(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[test]
    fn test_posting_rejects_bad_amounts() {
        let zero = Posting::credit(1, Decimal::ZERO, TransactionType::Bonus, None, "k".into());
        assert!(matches!(zero, Err(LedgerError::InvalidAmount(_))));

        let negative = Posting::debit(1, dollars(-5), TransactionType::Bonus, None, "k".into());
        assert!(matches!(negative, Err(LedgerError::InvalidAmount(_))));

        let sub_cent = Posting::credit(
            1,
            Decimal::new(1005, 3),
            TransactionType::Bonus,
            None,
            "k".into(),
        );
        assert!(matches!(sub_cent, Err(LedgerError::InvalidAmount(_))));

        // Trailing zeros beyond two places are fine
        let padded = Posting::credit(
            1,
            Decimal::new(1000, 3),
            TransactionType::Bonus,
            None,
            "k".into(),
        );
        assert!(padded.is_ok());
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let posting =
            Posting::debit(7, dollars(15), TransactionType::Withdrawal, None, "k".into()).unwrap();

        match posting.apply_to(dollars(10)) {
            Err(LedgerError::InsufficientBalance {
                wallet_id,
                available,
                required,
            }) => {
                assert_eq!(wallet_id, 7);
                assert_eq!(available, dollars(10));
                assert_eq!(required, dollars(15));
            }
            other => panic!("Expected InsufficientBalance, got {other:?}"),
        }

        assert_eq!(posting.apply_to(dollars(15)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_status_transitions() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Completed));
    }

    #[test]
    fn test_truncate_to_cents() {
        assert_eq!(truncate_to_cents(Decimal::new(33339, 3)), Decimal::new(3333, 2));
        assert_eq!(truncate_to_cents(Decimal::new(5000, 0)), Decimal::new(5000, 0));
    }

    #[test]
    fn test_enum_round_trip_through_text() {
        for t in [WalletType::Deposit, WalletType::Winnings, WalletType::TicketBonus] {
            assert_eq!(t.to_string().parse::<WalletType>().unwrap(), t);
        }
        assert_eq!(
            "ticket_purchase".parse::<TransactionType>().unwrap(),
            TransactionType::TicketPurchase
        );
        assert!("chargeback".parse::<TransactionType>().is_err());
    }
}
