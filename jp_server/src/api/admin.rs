//! Operator endpoints. Every route here sits behind the admin gate.
//!
//! Draws are idempotent: asking twice answers `already_drawn` the second
//! time and moves no money.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/admin/jackpots/1/draw \
//!   -H "Authorization: Bearer ADMIN_TOKEN"
//! ```

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use jackpot::{
    auth::Identity,
    draw::{DrawOutcome, DrawResult},
    ledger::{LedgerError, Reconciliation, Transaction, TransactionType, WalletId},
    tickets::{Jackpot, JackpotId, NewJackpot},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AppState, error::ApiError, jackpots};
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub amount: Decimal,
    pub reference: Option<String>,
    /// Retrying with the same key answers `409` instead of crediting twice
    pub idempotency_key: Option<String>,
    #[serde(default = "default_credit_type")]
    pub transaction_type: TransactionType,
}

fn default_credit_type() -> TransactionType {
    TransactionType::Bonus
}

/// Create a jackpot open for sales until `draw_at`.
///
/// # Errors
///
/// - `400 Bad Request`: non-positive amount or price, `max_winners < 1`,
///   `draw_at` in the past
pub async fn create_jackpot(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<NewJackpot>,
) -> Result<(StatusCode, Json<Jackpot>), ApiError> {
    let jackpot = state.platform.tickets.create_jackpot(request).await?;
    tracing::info!(
        admin_id = identity.user_id,
        jackpot_id = jackpot.id,
        "Jackpot created"
    );
    jackpots::invalidate(&state, jackpot.id).await;
    Ok((StatusCode::CREATED, Json(jackpot)))
}

fn draw_response(result: DrawResult<DrawOutcome>) -> Result<Json<Value>, ApiError> {
    match result {
        Ok(DrawOutcome::Completed(summary)) => {
            metrics::draws_total("completed");
            metrics::winners_credited_total(summary.credited_now);
            Ok(Json(json!({ "status": "completed", "summary": summary })))
        }
        Ok(DrawOutcome::AlreadyDrawn) => {
            metrics::draws_total("already_drawn");
            Ok(Json(json!({ "status": "already_drawn" })))
        }
        Err(e) => {
            metrics::draws_total("failed");
            Err(e.into())
        }
    }
}

/// Run the draw for a due jackpot.
///
/// # Errors
///
/// - `404 Not Found`: unknown jackpot
/// - `409 Conflict`: draw time not reached
pub async fn execute_draw(
    State(state): State<AppState>,
    Path(jackpot_id): Path<JackpotId>,
) -> Result<Json<Value>, ApiError> {
    let result = state.platform.draws.execute_draw(jackpot_id).await;
    jackpots::invalidate(&state, jackpot_id).await;
    draw_response(result)
}

/// Finish a draw that was interrupted after its claim.
///
/// # Errors
///
/// - `404 Not Found`: unknown jackpot
/// - `409 Conflict`: the jackpot was never claimed
pub async fn resume_draw(
    State(state): State<AppState>,
    Path(jackpot_id): Path<JackpotId>,
) -> Result<Json<Value>, ApiError> {
    let result = state.platform.draws.resume_draw(jackpot_id).await;
    jackpots::invalidate(&state, jackpot_id).await;
    draw_response(result)
}

/// Credit a wallet by hand (goodwill bonuses, refunds).
///
/// # Errors
///
/// - `400 Bad Request`: amount not a positive whole-cent value
/// - `404 Not Found`: unknown wallet
/// - `409 Conflict`: idempotency key already used
pub async fn credit_wallet(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(wallet_id): Path<WalletId>,
    Json(request): Json<CreditRequest>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let ledger = &state.platform.ledger;
    let transaction = match request.idempotency_key {
        Some(key) => {
            ledger
                .credit_idempotent(
                    wallet_id,
                    request.amount,
                    request.transaction_type,
                    request.reference,
                    key,
                )
                .await?
        }
        None => {
            ledger
                .credit(
                    wallet_id,
                    request.amount,
                    request.transaction_type,
                    request.reference,
                )
                .await?
        }
    };

    metrics::ledger_postings_total(&transaction.transaction_type.to_string());
    tracing::info!(
        admin_id = identity.user_id,
        wallet_id,
        transaction_id = transaction.id,
        amount = %transaction.amount,
        "Manual credit posted"
    );
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Recompute a wallet's balance from its completed transactions.
///
/// # Errors
///
/// - `404 Not Found`: unknown wallet
/// - `500 Internal Server Error`: stored and ledger balances disagree (the
///   figures are logged, not returned)
pub async fn reconcile_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<WalletId>,
) -> Result<Json<Reconciliation>, ApiError> {
    match state.platform.ledger.verify_wallet(wallet_id).await {
        Ok(reconciliation) => {
            metrics::reconciliations_total(true);
            Ok(Json(reconciliation))
        }
        Err(e @ LedgerError::InvariantViolation(_)) => {
            metrics::reconciliations_total(false);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
