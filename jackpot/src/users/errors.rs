//! User error types.

use super::models::{PlanVerification, UserId};
use crate::{db::timeouts::TimeoutError, errors::ErrorKind};
use thiserror::Error;

/// User errors
#[derive(Debug, Error)]
pub enum UserError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage unit exceeded its deadline
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Email already registered
    #[error("Email already registered")]
    EmailTaken,

    /// Member id already registered
    #[error("Member id already registered")]
    MemberIdTaken,

    /// Referral code collision
    #[error("Referral code already in use: {0}")]
    ReferralCodeTaken(String),

    /// Unknown referral code supplied at registration
    #[error("Unknown referral code: {0}")]
    UnknownReferralCode(String),

    /// Plan not found
    #[error("Plan not found: {0}")]
    PlanNotFound(i64),

    /// Plan verification cannot move backwards
    #[error("Invalid plan verification transition: {from} -> {to}")]
    InvalidTransition {
        from: PlanVerification,
        to: PlanVerification,
    },
}

impl UserError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UserError::Database(_) | UserError::Timeout(_) => ErrorKind::Internal,
            UserError::UserNotFound(_) | UserError::PlanNotFound(_) => ErrorKind::NotFound,
            UserError::UnknownReferralCode(_) => ErrorKind::Validation,
            UserError::EmailTaken
            | UserError::MemberIdTaken
            | UserError::ReferralCodeTaken(_)
            | UserError::InvalidTransition { .. } => ErrorKind::Conflict,
        }
    }

    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            UserError::Database(_) | UserError::Timeout(_) => "Internal server error".to_string(),
            UserError::UserNotFound(_) => "User not found".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for user operations
pub type UserResult<T> = Result<T, UserError>;
