//! # Jackpot
//!
//! Ledger-backed lottery platform: users hold wallets, buy numbered tickets
//! into jackpots, and a draw engine pays randomly selected winners.
//!
//! ## Architecture
//!
//! Every balance change goes through the [`ledger`], which records one
//! transaction per change and never lets a balance go negative. The other
//! components move money only through it:
//!
//! - **Ticket issuance**: debit and ticket row commit together
//! - **Draw engine**: `active -> drawing -> completed`, exactly once per jackpot
//! - **Referral commission**: a percentage of referred deposits, paid once
//! - **Payments**: gateway callbacks settle pending deposits and withdrawals
//!
//! ## Core Modules
//!
//! - [`db`]: Repository traits, PostgreSQL and in-process stores
//! - [`ledger`]: Wallets, transactions, reconciliation
//! - [`tickets`]: Jackpots and ticket sales
//! - [`draw`]: Winner selection, payouts and the draw scheduler
//! - [`referral`]: Referral codes and commissions
//! - [`payments`]: NOWPayments IPN handling
//!
//! ## Example
//!
//! ```no_run
//! use jackpot::{Platform, PlatformConfig, db::MemoryStore, notify::LogNotifier};
//! use std::sync::Arc;
//!
//! let platform = Platform::new(
//!     Arc::new(MemoryStore::new()),
//!     PlatformConfig::default(),
//!     Arc::new(LogNotifier),
//! );
//! ```

/// Caller identity from access tokens.
pub mod auth;

/// Read-through cache for non-monetary reads.
pub mod cache;

/// Persistence: repository traits and stores.
pub mod db;

/// Draw engine and scheduler.
pub mod draw;

/// Shared error classification.
pub mod errors;

/// Wallets and transactions.
pub mod ledger;

/// Fire-and-forget user notifications.
pub mod notify;

/// Payment gateway events.
pub mod payments;

/// Component wiring.
pub mod platform;

/// Referral codes and commissions.
pub mod referral;

/// Jackpots and ticket sales.
pub mod tickets;

/// Users and plans.
pub mod users;

pub use errors::ErrorKind;
pub use platform::{Platform, PlatformConfig};
