//! Public jackpot reads.
//!
//! Listings and detail are served through the read-through cache; a cache
//! failure falls back to the store. Anything that changes a jackpot's
//! counters or status calls [`invalidate`]. Draws run by the background
//! scheduler do not, so a cached view never outlives the next draw time of
//! a jackpot it shows.
//!
//! ```bash
//! curl http://localhost:8080/api/v1/jackpots?status=active
//! ```

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use jackpot::tickets::{Jackpot, JackpotId, JackpotStatus};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

use super::{AppState, error::ApiError};

const LIST_STATUSES: [&str; 4] = ["all", "active", "drawing", "completed"];

#[derive(Debug, Deserialize)]
pub struct ListJackpotsQuery {
    pub status: Option<String>,
}

fn list_key(status: Option<JackpotStatus>) -> String {
    match status {
        Some(status) => format!("jackpots:{status}"),
        None => "jackpots:all".to_string(),
    }
}

fn detail_key(jackpot_id: JackpotId) -> String {
    format!("jackpot:{jackpot_id}")
}

async fn cached<T: DeserializeOwned>(state: &AppState, key: &str) -> Option<T> {
    match state.cache.get_json(key).await {
        Ok(Some(value)) => serde_json::from_value(value).ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Cache read failed for {}: {}", key, e);
            None
        }
    }
}

/// How long a view of `jackpots` may be cached at `now`: `ttl`, cut short at
/// the earliest pending draw. `None` while a draw is due or running.
fn cache_lifetime(jackpots: &[Jackpot], ttl: Duration, now: DateTime<Utc>) -> Option<Duration> {
    let mut lifetime = ttl;
    for jackpot in jackpots {
        match jackpot.status {
            JackpotStatus::Drawing => return None,
            JackpotStatus::Active => {
                let until_draw = (jackpot.draw_at - now)
                    .to_std()
                    .ok()
                    .filter(|d| !d.is_zero())?;
                lifetime = lifetime.min(until_draw);
            }
            JackpotStatus::Completed => {}
        }
    }
    Some(lifetime)
}

async fn store<T: Serialize>(state: &AppState, key: &str, value: &T, jackpots: &[Jackpot]) {
    let Some(ttl) = cache_lifetime(jackpots, state.cache_ttl, Utc::now()) else {
        tracing::debug!("Not caching {}: a draw is due", key);
        return;
    };
    let Ok(json) = serde_json::to_value(value) else {
        return;
    };
    if let Err(e) = state.cache.set_json(key, json, ttl).await {
        tracing::warn!("Cache write failed for {}: {}", key, e);
    }
}

/// Drop every cached view of a jackpot
pub async fn invalidate(state: &AppState, jackpot_id: JackpotId) {
    let keys = LIST_STATUSES
        .iter()
        .map(|status| format!("jackpots:{status}"))
        .chain(std::iter::once(detail_key(jackpot_id)));

    for key in keys {
        if let Err(e) = state.cache.delete(&key).await {
            tracing::warn!("Cache invalidation failed for {}: {}", key, e);
        }
    }
}

/// List jackpots, optionally filtered by `status`.
///
/// # Errors
///
/// - `400 Bad Request`: unknown status
pub async fn list_jackpots(
    State(state): State<AppState>,
    Query(query): Query<ListJackpotsQuery>,
) -> Result<Json<Vec<Jackpot>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JackpotStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let key = list_key(status);
    if let Some(jackpots) = cached::<Vec<Jackpot>>(&state, &key).await {
        return Ok(Json(jackpots));
    }

    let jackpots = state.platform.tickets.list_jackpots(status).await?;
    store(&state, &key, &jackpots, &jackpots).await;
    Ok(Json(jackpots))
}

/// Get one jackpot.
///
/// # Errors
///
/// - `404 Not Found`: unknown jackpot
pub async fn get_jackpot(
    State(state): State<AppState>,
    Path(jackpot_id): Path<JackpotId>,
) -> Result<Json<Jackpot>, ApiError> {
    let key = detail_key(jackpot_id);
    if let Some(jackpot) = cached::<Jackpot>(&state, &key).await {
        return Ok(Json(jackpot));
    }

    let jackpot = state.platform.tickets.jackpot(jackpot_id).await?;
    store(&state, &key, &jackpot, std::slice::from_ref(&jackpot)).await;
    Ok(Json(jackpot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;

    fn jackpot(status: JackpotStatus, draw_at: DateTime<Utc>) -> Jackpot {
        Jackpot {
            id: 1,
            name: "Weekly".to_string(),
            amount: Decimal::from(100),
            ticket_price: Decimal::from(1),
            max_winners: 1,
            draw_at,
            status,
            total_tickets_sold: 0,
            total_revenue: Decimal::ZERO,
            winners_selected: 0,
            draw_seed: None,
            draw_started_at: None,
            completed_at: None,
            created_at: draw_at,
        }
    }

    #[test]
    fn test_cache_lifetime_stops_at_next_draw() {
        let now = Utc::now();
        let ttl = Duration::from_secs(10);

        let far = jackpot(JackpotStatus::Active, now + ChronoDuration::hours(1));
        assert_eq!(cache_lifetime(&[far.clone()], ttl, now), Some(ttl));

        let soon = jackpot(JackpotStatus::Active, now + ChronoDuration::seconds(3));
        assert_eq!(
            cache_lifetime(&[far, soon], ttl, now),
            Some(Duration::from_secs(3))
        );

        let done = jackpot(JackpotStatus::Completed, now - ChronoDuration::hours(1));
        assert_eq!(cache_lifetime(&[done], ttl, now), Some(ttl));
        assert_eq!(cache_lifetime(&[], ttl, now), Some(ttl));
    }

    #[test]
    fn test_due_or_drawing_views_are_not_cached() {
        let now = Utc::now();
        let ttl = Duration::from_secs(10);

        let due = jackpot(JackpotStatus::Active, now - ChronoDuration::seconds(1));
        assert_eq!(cache_lifetime(&[due], ttl, now), None);

        let drawing = jackpot(JackpotStatus::Drawing, now - ChronoDuration::seconds(1));
        assert_eq!(cache_lifetime(&[drawing], ttl, now), None);
    }

    #[test]
    fn test_list_keys_cover_every_status() {
        for status in [
            JackpotStatus::Active,
            JackpotStatus::Drawing,
            JackpotStatus::Completed,
        ] {
            let key = list_key(Some(status));
            assert!(LIST_STATUSES.iter().any(|s| format!("jackpots:{s}") == key));
        }
        assert_eq!(list_key(None), "jackpots:all");
    }
}
