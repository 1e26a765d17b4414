//! Mapping from component errors to HTTP responses.
//!
//! Every component error carries an [`ErrorKind`]; the kind picks the status
//! code and `client_message()` the body, so database detail never reaches a
//! client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jackpot::{
    ErrorKind,
    auth::AuthError,
    draw::DrawError,
    ledger::LedgerError,
    payments::PaymentError,
    referral::ReferralError,
    tickets::TicketError,
    users::UserError,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn from_kind(kind: ErrorKind, detail: &dyn std::fmt::Display, client_message: String) -> Self {
        if kind.is_expected() {
            tracing::info!(kind = %kind, "Request refused: {}", detail);
        } else {
            tracing::error!(kind = %kind, "Request failed: {}", detail);
        }
        Self::new(status_for(kind), client_message)
    }
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::ExternalService => StatusCode::BAD_GATEWAY,
        ErrorKind::InvariantViolation | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

macro_rules! impl_from_component_error {
    ($($error:ty),+ $(,)?) => {
        $(
            impl From<$error> for ApiError {
                fn from(e: $error) -> Self {
                    ApiError::from_kind(e.kind(), &e, e.client_message())
                }
            }
        )+
    };
}

impl_from_component_error!(
    LedgerError,
    TicketError,
    DrawError,
    PaymentError,
    ReferralError,
    UserError,
);

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Forbidden => ApiError::new(StatusCode::FORBIDDEN, e.client_message()),
            AuthError::WeakSecret(_) => {
                ApiError::from_kind(e.kind(), &e, e.client_message())
            }
            _ => ApiError::new(StatusCode::UNAUTHORIZED, e.client_message()),
        }
    }
}
