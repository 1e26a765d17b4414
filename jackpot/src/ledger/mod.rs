//! Account ledger: wallets, transactions and every balance change.
//!
//! This module implements:
//! - Credits, debits and two-wallet transfers, each applied atomically
//! - Idempotency keys so a replayed request posts nothing
//! - Pending transactions with forward-only settlement
//! - Reconciliation of stored balances against the transaction history
//!
//! ## Example
//!
//! ```no_run
//! use jackpot::db::MemoryStore;
//! use jackpot::ledger::{Ledger, TransactionType, WalletType};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ledger = Ledger::new(Arc::new(MemoryStore::new()));
//!     let wallet = ledger.open_wallet(1, WalletType::Deposit).await?;
//!
//!     ledger
//!         .credit(wallet.id, Decimal::from(25), TransactionType::Deposit, None)
//!         .await?;
//!     println!("Balance: {}", ledger.wallet(wallet.id).await?.balance);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{LedgerError, LedgerResult};
pub use manager::{DEFAULT_HISTORY_LIMIT, Ledger};
pub use models::{
    DEFAULT_CURRENCY, EntryDirection, MONEY_SCALE, Posting, Reconciliation, Transaction,
    TransactionId, TransactionStatus, TransactionType, Wallet, WalletId, WalletType, apply_entry,
    truncate_to_cents,
};
