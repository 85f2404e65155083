//! Health, readiness, and statistics endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Dependency status; always 200
//! - `GET /ready` - Readiness probe; 503 when the task database is down
//! - `GET /stats` - Task counts from the background cache
//!
//! # Health vs Readiness
//!
//! The audit store is best-effort, so losing it degrades `/health` but
//! does not make the service unready. The database is required.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::models::{HealthResponse, StatsResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// ```json
/// {
///   "status": "healthy",
///   "database": true,
///   "audit_store": true,
///   "audit_backend": "iggy",
///   "counter_backend": "memory",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.tasks.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Health check: database ping failed");
            false
        }
    };
    let audit_store = state.audit.is_healthy().await;

    Json(HealthResponse {
        status: if database && audit_store {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        database,
        audit_store,
        audit_backend: state.audit.backend().to_string(),
        counter_backend: state.counters.backend().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Readiness probe.
///
/// ```yaml
/// readinessProbe:
///   httpGet:
///     path: /ready
///     port: 3000
/// ```
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.tasks.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ready": true }))),
        Err(e) => {
            warn!(error = %e, "Readiness check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ready": false })),
            )
        }
    }
}

/// Cached task statistics.
///
/// Refreshed in the background every `STATS_CACHE_TTL_SECS`.
#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let cached = state.cached_stats().await;
    let ttl = state.config.stats_cache_ttl;

    let cache_age_seconds = cached
        .last_updated
        .map(|t| t.elapsed().as_secs())
        .unwrap_or(u64::MAX); // Never updated = infinitely old

    Json(StatsResponse {
        cache_stale: cached.is_stale(ttl),
        tasks: cached.tasks,
        uptime_seconds: state.uptime_seconds(),
        cache_age_seconds,
    })
}
