//! Authentication error types.

use crate::errors::ErrorKind;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// JWT token error
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// Token lacks a `Bearer` credential
    #[error("Missing bearer token")]
    MissingToken,

    /// Token carries a role this service does not know
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// Authenticated but not allowed
    #[error("Admin privileges required")]
    Forbidden,

    /// Signing secret too short to be safe
    #[error("JWT secret must be at least {0} characters")]
    WeakSecret(usize),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::WeakSecret(_) => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// JWT errors are sanitized to prevent information disclosure about the
    /// token structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::JwtError(_) | AuthError::UnknownRole(_) => {
                "Authentication failed".to_string()
            }
            AuthError::WeakSecret(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
