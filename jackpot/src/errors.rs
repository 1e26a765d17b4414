//! Error taxonomy shared by every component.
//!
//! Each module owns its own `thiserror` enum; [`ErrorKind`] is the coarse
//! classification callers (route handlers) use to pick a response code.

use serde::Serialize;

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input
    Validation,
    /// Entity missing
    NotFound,
    /// Uniqueness or state-transition violation
    Conflict,
    /// Gateway or notification service unavailable
    ExternalService,
    /// Should never happen; indicates a bug
    InvariantViolation,
    /// Storage failures and timeouts
    Internal,
}

impl ErrorKind {
    /// Whether the condition is expected during normal operation.
    ///
    /// Expected conditions are logged at info level, never as errors.
    pub fn is_expected(self) -> bool {
        matches!(
            self,
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::ExternalService => write!(f, "external_service"),
            ErrorKind::InvariantViolation => write!(f, "invariant_violation"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// A stored enum column held a value no variant matches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_kinds() {
        assert!(ErrorKind::Conflict.is_expected());
        assert!(ErrorKind::NotFound.is_expected());
        assert!(!ErrorKind::InvariantViolation.is_expected());
        assert!(!ErrorKind::Internal.is_expected());
    }

    #[test]
    fn test_unknown_variant_display() {
        let err = UnknownVariant::new("wallet type", "savings");
        assert_eq!(err.to_string(), "Unknown wallet type value: savings");
    }
}
