//! Authentication and metrics middleware.
//!
//! [`auth_middleware`] validates the `Authorization: Bearer <token>` header
//! and injects the caller's [`Identity`] into request extensions;
//! [`admin_middleware`] additionally requires the admin role.
//!
//! # Extracting the caller
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use jackpot::auth::Identity;
//!
//! async fn protected_handler(Extension(identity): Extension<Identity>) -> String {
//!     format!("Authenticated as user {}", identity.user_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{MatchedPath, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jackpot::auth::{AuthError, Identity};
use std::time::Instant;

use super::{AppState, error::ApiError};
use crate::{logging, metrics};

/// Validate the bearer token and inject the caller's identity.
///
/// - **Missing or malformed header**: `401 Unauthorized`
/// - **Invalid/expired token**: `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let identity = state.verifier.verify_bearer(header)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Require the admin role. Must run inside [`auth_middleware`].
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .copied()
        .ok_or(AuthError::MissingToken)?;

    if !identity.is_admin() {
        logging::log_security_event(
            "admin_forbidden",
            Some(identity.user_id),
            &format!("{} {}", request.method(), request.uri().path()),
        );
        return Err(AuthError::Forbidden.into());
    }
    Ok(next.run(request).await)
}

/// Count and time every request by matched route
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    metrics::http_requests_total(&method, &path, status);
    metrics::http_request_duration_ms(&method, &path, elapsed.as_secs_f64() * 1000.0);
    logging::log_api_request(&method, &path, status, elapsed.as_millis() as u64);

    response
}
