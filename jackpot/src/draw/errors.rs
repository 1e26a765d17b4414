//! Draw engine error types.

use crate::{
    db::timeouts::TimeoutError,
    errors::ErrorKind,
    ledger::LedgerError,
    tickets::{JackpotId, JackpotStatus, TicketError},
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Draw errors
#[derive(Debug, Error)]
pub enum DrawError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Crediting a winner failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Loading jackpot or tickets failed
    #[error(transparent)]
    Tickets(#[from] TicketError),

    #[error("Jackpot not found: {0}")]
    JackpotNotFound(JackpotId),

    #[error("Draw for jackpot {jackpot_id} not due until {draw_at}")]
    DrawNotDue {
        jackpot_id: JackpotId,
        draw_at: DateTime<Utc>,
    },

    #[error("Jackpot {jackpot_id} is {actual}, expected {expected}")]
    InvalidState {
        jackpot_id: JackpotId,
        expected: JackpotStatus,
        actual: JackpotStatus,
    },

    /// Stored draw state contradicts itself; the draw is aborted
    #[error("Draw invariant violated: {0}")]
    InvariantViolation(String),
}

impl DrawError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DrawError::Database(_) | DrawError::Timeout(_) => ErrorKind::Internal,
            DrawError::Ledger(e) => e.kind(),
            DrawError::Tickets(e) => e.kind(),
            DrawError::JackpotNotFound(_) => ErrorKind::NotFound,
            DrawError::DrawNotDue { .. } | DrawError::InvalidState { .. } => ErrorKind::Conflict,
            DrawError::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            DrawError::Database(_) | DrawError::Timeout(_) | DrawError::InvariantViolation(_) => {
                "Internal server error".to_string()
            }
            DrawError::Ledger(e) => e.client_message(),
            DrawError::Tickets(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for draw operations
pub type DrawResult<T> = Result<T, DrawError>;
