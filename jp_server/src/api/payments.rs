//! NOWPayments IPN callback.
//!
//! The body is verified against `x-nowpayments-sig` before it is parsed.
//! Replayed callbacks answer `200` with `already_settled` so the gateway stops
//! retrying.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use jackpot::payments::{
    IpnPayload, PaymentError, PaymentOutcome, SIGNATURE_HEADER, verify_ipn_signature,
};
use serde_json::{Value, json};

use super::{AppState, error::ApiError};
use crate::{logging, metrics};

fn outcome_label(outcome: &PaymentOutcome) -> &'static str {
    match outcome {
        PaymentOutcome::Pending(_) => "pending",
        PaymentOutcome::Settled(_) => "settled",
        PaymentOutcome::AlreadySettled(_) => "already_settled",
    }
}

/// Record one gateway status report.
///
/// # Errors
///
/// - `400 Bad Request`: missing or wrong signature, unreadable payload
/// - `409 Conflict`: payment id reused with different details, or a
///   withdrawal the balance no longer covers
pub async fn ipn_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        metrics::payment_events_total("rejected");
        logging::log_security_event("ipn_missing_signature", None, "IPN callback without signature");
        return Err(ApiError::bad_request("Missing IPN signature"));
    };

    if let Err(e) = verify_ipn_signature(&state.ipn_secret, &body, signature) {
        metrics::payment_events_total("rejected");
        logging::log_security_event("ipn_bad_signature", None, "IPN signature did not verify");
        return Err(e.into());
    }

    let event = serde_json::from_slice::<IpnPayload>(&body)
        .map_err(|e| PaymentError::InvalidPayload(e.to_string()))
        .and_then(IpnPayload::into_event)
        .inspect_err(|_| metrics::payment_events_total("rejected"))?;

    let outcome = state
        .platform
        .payments
        .record_payment_event(event)
        .await
        .inspect_err(|_| metrics::payment_events_total("rejected"))?;

    let label = outcome_label(&outcome);
    metrics::payment_events_total(label);

    let transaction = outcome.transaction();
    Ok(Json(json!({
        "status": label,
        "transaction_id": transaction.id,
        "transaction_status": transaction.status,
    })))
}
