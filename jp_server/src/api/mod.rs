//! HTTP API for the jackpot server.
//!
//! # Modules
//!
//! - [`jackpots`]: Jackpot listing and detail (public, cached)
//! - [`wallets`]: The caller's wallets and transaction history
//! - [`tickets`]: Ticket purchase and the caller's tickets
//! - [`payments`]: NOWPayments IPN callback
//! - [`admin`]: Jackpot creation, draws, manual credits, reconciliation
//! - [`middleware`]: Bearer authentication, admin gate, request metrics
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                                   - Health check (public)
//! GET  /api/v1/jackpots?status=<status>          - List jackpots (public)
//! GET  /api/v1/jackpots/{id}                     - Jackpot detail (public)
//! POST /api/v1/payments/ipn                      - Gateway callback (signed)
//! GET  /api/v1/wallets                           - Caller's wallets (auth)
//! GET  /api/v1/wallets/{id}/transactions?limit=  - Wallet history (auth)
//! POST /api/v1/jackpots/{id}/tickets             - Buy a ticket (auth)
//! GET  /api/v1/tickets                           - Caller's tickets (auth)
//! POST /api/v1/admin/jackpots                    - Create jackpot (admin)
//! POST /api/v1/admin/jackpots/{id}/draw          - Run a draw (admin)
//! POST /api/v1/admin/jackpots/{id}/resume        - Resume a stuck draw (admin)
//! POST /api/v1/admin/wallets/{id}/credit         - Manual credit (admin)
//! GET  /api/v1/admin/wallets/{id}/reconcile      - Reconcile a wallet (admin)
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod admin;
pub mod error;
pub mod jackpots;
pub mod middleware;
pub mod payments;
pub mod request_id;
pub mod tickets;
pub mod wallets;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use jackpot::{Platform, auth::TokenVerifier, cache::Cache, db::Database};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tower_http::cors::CorsLayer;

/// Application state shared across all handlers.
///
/// Cloned per request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub platform: Platform,
    pub verifier: Arc<TokenVerifier>,
    pub cache: Arc<dyn Cache>,
    pub cache_ttl: Duration,
    pub ipn_secret: Arc<str>,
    /// Set when running on PostgreSQL; checked by `/health`
    pub database: Option<Database>,
}

/// Create the API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use jp_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/jackpots", get(jackpots::list_jackpots))
        .route("/jackpots/{id}", get(jackpots::get_jackpot))
        .route("/payments/ipn", post(payments::ipn_callback));

    let user_routes = Router::new()
        .route("/wallets", get(wallets::list_wallets))
        .route("/wallets/{id}/transactions", get(wallets::wallet_history))
        .route("/jackpots/{id}/tickets", post(tickets::purchase_ticket))
        .route("/tickets", get(tickets::list_tickets))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Layers run outside-in: authenticate first, then check the role
    let admin_routes = Router::new()
        .route("/admin/jackpots", post(admin::create_jackpot))
        .route("/admin/jackpots/{id}/draw", post(admin::execute_draw))
        .route("/admin/jackpots/{id}/resume", post(admin::resume_draw))
        .route("/admin/wallets/{id}/credit", post(admin::credit_wallet))
        .route("/admin/wallets/{id}/reconcile", get(admin::reconcile_wallet))
        .layer(axum::middleware::from_fn(middleware::admin_middleware))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let v1_routes = Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
///
/// Returns `503 Service Unavailable` when the database does not answer.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage = if state.database.is_some() {
        "postgres"
    } else {
        "memory"
    };

    let (status, health) = match &state.database {
        Some(db) => match db.health_check().await {
            Ok(()) => (StatusCode::OK, "healthy"),
            Err(e) => {
                tracing::error!("Database health check failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
            }
        },
        None => (StatusCode::OK, "healthy"),
    };

    (
        status,
        Json(json!({
            "status": health,
            "version": env!("CARGO_PKG_VERSION"),
            "storage": storage,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}
