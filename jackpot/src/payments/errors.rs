//! Payment event error types.

use crate::{errors::ErrorKind, ledger::LedgerError, referral::ReferralError, users::UserError};
use thiserror::Error;

/// Payment errors
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Referral(#[from] ReferralError),

    /// The order names a user we do not know
    #[error(transparent)]
    Users(#[from] UserError),

    /// IPN signature missing, malformed or wrong
    #[error("Invalid IPN signature")]
    InvalidSignature,

    /// Gateway status string we do not know
    #[error("Unknown payment status: {0}")]
    UnknownStatus(String),

    /// Body or order id could not be interpreted
    #[error("Invalid payment payload: {0}")]
    InvalidPayload(String),

    /// A payment id already recorded for a different user, amount or kind
    #[error("Payment {0} does not match its recorded transaction")]
    Mismatch(String),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Ledger(e) => e.kind(),
            PaymentError::Referral(e) => e.kind(),
            PaymentError::Users(e) => e.kind(),
            PaymentError::InvalidSignature
            | PaymentError::UnknownStatus(_)
            | PaymentError::InvalidPayload(_) => ErrorKind::Validation,
            PaymentError::Mismatch(_) => ErrorKind::Conflict,
        }
    }

    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            PaymentError::Ledger(e) => e.client_message(),
            PaymentError::Referral(e) => e.client_message(),
            PaymentError::Users(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
