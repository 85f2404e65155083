//! Request ID middleware.
//!
//! Reuses a client-supplied `X-Request-Id` when it is short visible ASCII,
//! otherwise generates a UUIDv4. The id is written back onto the request so
//! handlers (and the audit trail) see it, recorded on the current span, and
//! echoed on the response.
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:3000/api/tasks
//! ```

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{HeaderMap, Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied id that is propagated as-is.
pub const MAX_REQUEST_ID_LENGTH: usize = 128;

#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let request_id = accepted_request_id(req.headers())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Accepted ids are visible ASCII and UUIDs always are, so this parse
        // only fails if that invariant is broken.
        let header_value = HeaderValue::from_str(&request_id).ok();

        if let Some(value) = &header_value {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }

        Span::current().record("request_id", &request_id);
        debug!(request_id = %request_id, "Processing request");

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            if let Some(value) = header_value {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            Ok(response)
        })
    }
}

/// The client's id if it is non-empty, short enough and visible ASCII.
fn accepted_request_id(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();

    let acceptable = !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LENGTH
        && value.bytes().all(|b| b.is_ascii_graphic());

    acceptable.then_some(value)
}

/// Request id as set by [`RequestIdLayer`], for code running behind it.
pub fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn with_id(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_existing_request_id_is_kept() {
        let headers = with_id("existing-id-123");
        assert_eq!(accepted_request_id(&headers), Some("existing-id-123"));
    }

    #[test]
    fn test_missing_request_id() {
        assert_eq!(accepted_request_id(&HeaderMap::new()), None);
        assert_eq!(request_id_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn test_unacceptable_request_ids_are_replaced() {
        assert_eq!(accepted_request_id(&with_id("")), None);
        assert_eq!(accepted_request_id(&with_id("has space")), None);
        assert_eq!(accepted_request_id(&with_id(&"a".repeat(129))), None);
        assert!(accepted_request_id(&with_id(&"a".repeat(128))).is_some());
    }

    #[tokio::test]
    async fn test_layer_generates_and_echoes_id() {
        use tower::ServiceExt;

        let service = RequestIdLayer::new().layer(tower::service_fn(
            |req: Request<Body>| async move {
                let seen = request_id_from_headers(req.headers()).unwrap_or_default();
                Ok::<_, std::convert::Infallible>(Response::new(Body::from(seen)))
            },
        ));

        let response = service
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();

        let echoed = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&echoed).is_ok());

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, echoed.as_bytes());
    }
}
