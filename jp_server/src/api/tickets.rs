//! Ticket purchase and listing.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/jackpots/1/tickets \
//!   -H "Authorization: Bearer TOKEN"
//! ```

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use jackpot::{
    auth::Identity,
    tickets::{JackpotId, Ticket},
};

use super::{AppState, error::ApiError, jackpots};
use crate::metrics;

/// Buy one ticket for the caller.
///
/// Returns `201 Created` with the issued ticket.
///
/// # Errors
///
/// - `404 Not Found`: unknown jackpot, or the caller has no deposit wallet
/// - `409 Conflict`: sales closed or insufficient balance
pub async fn purchase_ticket(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(jackpot_id): Path<JackpotId>,
) -> Result<(StatusCode, Json<Ticket>), ApiError> {
    let result = state
        .platform
        .tickets
        .purchase(identity.user_id, jackpot_id)
        .await;
    metrics::ticket_purchases_total(result.is_ok());

    let ticket = result?;
    jackpots::invalidate(&state, jackpot_id).await;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// List the caller's tickets, newest first
pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    let tickets = state
        .platform
        .tickets
        .tickets_for_user(identity.user_id)
        .await?;
    Ok(Json(tickets))
}
