//! Ticket issuance error types.

use super::models::{JackpotId, JackpotStatus, TicketId};
use crate::{db::timeouts::TimeoutError, errors::ErrorKind, ledger::LedgerError};
use thiserror::Error;

/// Ticket errors
#[derive(Debug, Error)]
pub enum TicketError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage unit exceeded its deadline
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Payment failed in the ledger (insufficient balance, missing wallet)
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Jackpot not found
    #[error("Jackpot not found: {0}")]
    JackpotNotFound(JackpotId),

    /// Jackpot is not selling tickets
    #[error("Jackpot {jackpot_id} is not accepting tickets (status {status})")]
    JackpotNotActive {
        jackpot_id: JackpotId,
        status: JackpotStatus,
    },

    /// Ticket not found
    #[error("Ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// Generated ticket number already exists
    #[error("Ticket number already taken: {0}")]
    TicketNumberTaken(String),

    /// Every generated ticket number collided
    #[error("Could not allocate a unique ticket number after {0} attempts")]
    TicketNumberExhausted(u32),

    /// Invalid jackpot definition
    #[error("Invalid jackpot: {0}")]
    Validation(String),
}

impl TicketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TicketError::Database(_) | TicketError::Timeout(_) => ErrorKind::Internal,
            TicketError::Ledger(e) => e.kind(),
            TicketError::JackpotNotFound(_) | TicketError::TicketNotFound(_) => {
                ErrorKind::NotFound
            }
            TicketError::JackpotNotActive { .. }
            | TicketError::TicketNumberTaken(_)
            | TicketError::TicketNumberExhausted(_) => ErrorKind::Conflict,
            TicketError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            TicketError::Database(_) | TicketError::Timeout(_) => {
                "Internal server error".to_string()
            }
            TicketError::Ledger(e) => e.client_message(),
            TicketError::JackpotNotActive { .. } => "Jackpot is closed for sales".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for ticket operations
pub type TicketResult<T> = Result<T, TicketError>;
