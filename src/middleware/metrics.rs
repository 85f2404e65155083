//! Request duration histogram.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::metrics::record_request_duration;

/// Label for requests that matched no route.
const UNMATCHED: &str = "unmatched";

/// Records `taskboard_request_duration_seconds` for every request.
///
/// The endpoint label is the route template (`/api/tasks/{id}`), never the
/// raw path, so ids do not explode label cardinality.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED.to_string());

    let response = next.run(request).await;

    record_request_duration(
        &endpoint,
        method.as_str(),
        response.status().as_str(),
        started.elapsed().as_secs_f64(),
    );

    response
}
