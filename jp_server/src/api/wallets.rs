//! The caller's wallets and their history.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};
use jackpot::{
    auth::Identity,
    ledger::{DEFAULT_HISTORY_LIMIT, Transaction, Wallet, WalletId},
};
use serde::Deserialize;

use super::{AppState, error::ApiError};

/// Largest page the history endpoint returns
pub const MAX_HISTORY_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// List the caller's wallets
pub async fn list_wallets(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Wallet>>, ApiError> {
    let wallets = state.platform.ledger.wallets_for_user(identity.user_id).await?;
    Ok(Json(wallets))
}

/// Transactions of one of the caller's wallets, newest first.
///
/// Another user's wallet answers `404` exactly like a missing one.
///
/// # Errors
///
/// - `400 Bad Request`: `limit` outside `1..=500`
/// - `404 Not Found`: unknown wallet, or not the caller's
pub async fn wallet_history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(wallet_id): Path<WalletId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_HISTORY_LIMIT}"
        )));
    }

    let wallet = state.platform.ledger.wallet(wallet_id).await?;
    if wallet.user_id != identity.user_id {
        return Err(ApiError::not_found("Wallet not found"));
    }

    let history = state.platform.ledger.history(wallet_id, limit).await?;
    Ok(Json(history))
}
