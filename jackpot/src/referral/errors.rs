//! Referral error types.

use crate::{errors::ErrorKind, ledger::LedgerError, users::UserError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Referral errors
#[derive(Debug, Error)]
pub enum ReferralError {
    /// Crediting the commission failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Loading or creating the user failed
    #[error(transparent)]
    Users(#[from] UserError),

    /// Commission percentage outside `0..=100`
    #[error("Invalid referral bonus percentage: {0}")]
    InvalidPercentage(Decimal),

    /// Every generated referral code collided
    #[error("Could not allocate a unique referral code after {0} attempts")]
    CodeExhausted(u32),
}

impl ReferralError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReferralError::Ledger(e) => e.kind(),
            ReferralError::Users(e) => e.kind(),
            ReferralError::InvalidPercentage(_) => ErrorKind::Validation,
            ReferralError::CodeExhausted(_) => ErrorKind::Conflict,
        }
    }

    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            ReferralError::Ledger(e) => e.client_message(),
            ReferralError::Users(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for referral operations
pub type ReferralResult<T> = Result<T, ReferralError>;
