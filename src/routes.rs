//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id on request and response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security headers │ ← nosniff, DENY, CSP, HSTS ...
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response span
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Metrics      │ ← request duration histogram
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (bypassed for /health, /ready)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Threat guard    │ ← 400 suspicious input, 403 repeat offender
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body limit     │ ← 413 above MAX_REQUEST_BODY_SIZE
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready`, `/stats` - Health & monitoring
//! - `/api/tasks` - Task CRUD, trash and restore
//! - `/api/tasks/{id}/logs`, `/api/logs` - Audit trail

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    RateLimitLayer, RequestIdLayer, SecurityHeadersLayer, ThreatGuardLayer,
    request_id_from_headers, track_metrics,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Rate limiting and the threat guard are skipped when
/// `RATE_LIMIT_ENABLED` / `SECURITY_GUARD_ENABLED` are false.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut router = Router::new()
        // Health and status endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/stats", get(handlers::stats))
        // Tasks
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route(
            "/api/tasks/{id}",
            get(handlers::show_task)
                .put(handlers::update_task)
                .patch(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route("/api/tasks/{id}/restore", post(handlers::restore_task))
        .route("/api/tasks/{id}/force", delete(handlers::force_delete_task))
        // Audit trail
        .route("/api/tasks/{id}/logs", get(handlers::task_logs))
        .route("/api/logs", get(handlers::recent_logs))
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed);

    // =========================================================================
    // Apply Middleware Stack (order matters - last added runs first)
    // =========================================================================

    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    if config.security_guard_enabled {
        info!(
            block_score = config.threat_block_score,
            warn_score = config.threat_warn_score,
            offender_limit = config.threat_offender_limit,
            "SQL injection guard enabled"
        );
        router = router.layer(ThreatGuardLayer::new(
            &config,
            state.threat_detector.clone(),
            state.counters.clone(),
            state.trusted_proxies.clone(),
        ));
    } else {
        info!("SQL injection guard disabled (SECURITY_GUARD_ENABLED=false)");
    }

    if config.rate_limit_enabled {
        info!(
            read_limit = config.rate_limit_max_requests,
            write_limit = config.rate_limit_write_max_requests,
            window_secs = config.rate_limit_window.as_secs(),
            backend = state.counters.backend(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        router = router.layer(RateLimitLayer::new(
            &config,
            state.counters.clone(),
            state.trusted_proxies.clone(),
        ));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_ENABLED=false)");
    }

    router = router.layer(axum::middleware::from_fn(track_metrics));

    router = router.layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let request_id = request_id_from_headers(req.headers()).unwrap_or_default();
        tracing::info_span!(
            "http_request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id,
        )
    }));

    router = router.layer(SecurityHeadersLayer::new(
        config.hsts_enabled,
        config.hsts_max_age,
    ));

    router = router.layer(RequestIdLayer::new());

    router.with_state(state)
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin; otherwise only the listed origins are allowed.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
