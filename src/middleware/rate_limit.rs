//! Fixed-window rate limiting on top of a [`CounterStore`].
//!
//! # Algorithm
//!
//! Time is cut into windows of `RATE_LIMIT_WINDOW_SECS`. Each client IP gets
//! one counter per scope and window, keyed
//! `rate_limit:{scope}:{ip}:{window_index}` with
//! `window_index = unix_seconds / window`. The counter expires at the window
//! boundary, so no cleanup is needed beyond the store's own sweeping.
//!
//! Writes (`POST`, `PUT`, `PATCH`, `DELETE`) and reads are counted
//! separately and have separate limits.
//!
//! # Response Headers
//!
//! Allowed responses carry `X-RateLimit-Limit` and `X-RateLimit-Remaining`.
//! On 429 the envelope additionally carries `Retry-After` and
//! `X-RateLimit-Reset` (unix seconds of the next window).
//!
//! # Failure Mode
//!
//! Counter store errors are logged, counted, and the request is let through.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response};
use axum::response::IntoResponse;
use chrono::Utc;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, peer_ip, resolve_client_ip};
use crate::cache::CounterStore;
use crate::config::Config;
use crate::error::AppError;
use crate::metrics;

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Which budget a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    Read,
    Write,
}

impl RateScope {
    pub fn for_method(method: &Method) -> Self {
        match *method {
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE => Self::Write,
            _ => Self::Read,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Window arithmetic for one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    index: u64,
    /// Unix seconds at which the next window starts.
    resets_at: u64,
    /// Seconds left in this window, at least 1.
    remaining_secs: u64,
}

impl Window {
    fn at(unix_seconds: u64, window_secs: u64) -> Self {
        let window_secs = window_secs.max(1);
        let index = unix_seconds / window_secs;
        let resets_at = (index + 1) * window_secs;
        Self {
            index,
            resets_at,
            remaining_secs: (resets_at - unix_seconds).max(1),
        }
    }
}

fn rate_limit_key(scope: RateScope, ip: &str, window_index: u64) -> String {
    format!("rate_limit:{}:{}:{}", scope.as_str(), ip, window_index)
}

#[derive(Debug)]
struct Limits {
    read: u32,
    write: u32,
    window_secs: u64,
    bypass_paths: Vec<String>,
}

impl Limits {
    fn for_scope(&self, scope: RateScope) -> u32 {
        match scope {
            RateScope::Read => self.read,
            RateScope::Write => self.write,
        }
    }

    fn bypasses(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }
}

/// Per-IP fixed-window rate limit layer.
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(&config, counters, trusted_proxies);
/// let app = Router::new().route("/api", get(handler)).layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    store: Arc<dyn CounterStore>,
    limits: Arc<Limits>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    clock: fn() -> u64,
}

impl RateLimitLayer {
    pub fn new(
        config: &Config,
        store: Arc<dyn CounterStore>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self::with_limits(
            store,
            trusted_proxies,
            config.rate_limit_max_requests,
            config.rate_limit_write_max_requests,
            config.rate_limit_window,
            config.rate_limit_bypass_paths.clone(),
        )
    }

    pub fn with_limits(
        store: Arc<dyn CounterStore>,
        trusted_proxies: Arc<TrustedProxyConfig>,
        read_limit: u32,
        write_limit: u32,
        window: Duration,
        bypass_paths: Vec<String>,
    ) -> Self {
        Self {
            store,
            limits: Arc::new(Limits {
                read: read_limit,
                write: write_limit,
                window_secs: window.as_secs().max(1),
                bypass_paths,
            }),
            trusted_proxies,
            clock: unix_now,
        }
    }

    /// Replace the source of unix seconds used to pick the window.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            store: self.store.clone(),
            limits: self.limits.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            clock: self.clock,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    store: Arc<dyn CounterStore>,
    limits: Arc<Limits>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    clock: fn() -> u64,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if self.limits.bypasses(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let store = self.store.clone();
        let limits = self.limits.clone();
        let now = (self.clock)();
        let scope = RateScope::for_method(req.method());
        let client_ip = resolve_client_ip(
            req.headers(),
            peer_ip(req.extensions()),
            &self.trusted_proxies,
        )
        .into_owned();

        Box::pin(async move {
            let limit = limits.for_scope(scope);
            let window = Window::at(now, limits.window_secs);
            let key = rate_limit_key(scope, &client_ip, window.index);

            let used = match store.get(&key).await {
                Ok(count) => count.unwrap_or(0),
                Err(e) => {
                    return Ok(fail_open(inner.call(req).await?, &e));
                }
            };

            if used >= u64::from(limit) {
                warn!(
                    client_ip = %client_ip,
                    scope = scope.as_str(),
                    path = %req.uri().path(),
                    retry_after_secs = window.remaining_secs,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limit_rejection(scope.as_str());

                let mut response = AppError::TooManyRequests {
                    retry_after: window.remaining_secs,
                }
                .into_response();
                set_limit_headers(response.headers_mut(), limit, 0);
                response
                    .headers_mut()
                    .insert(RESET_HEADER, HeaderValue::from(window.resets_at));
                return Ok(response);
            }

            let count = match store
                .increment(&key, Duration::from_secs(window.remaining_secs))
                .await
            {
                Ok(count) => count,
                Err(e) => return Ok(fail_open(inner.call(req).await?, &e)),
            };

            debug!(client_ip = %client_ip, scope = scope.as_str(), count, "Rate limit hit");

            let mut response = inner.call(req).await?;
            let remaining = u64::from(limit).saturating_sub(count);
            set_limit_headers(response.headers_mut(), limit, remaining);
            Ok(response)
        })
    }
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u64) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
}

fn fail_open(response: Response<Body>, error: &AppError) -> Response<Body> {
    warn!(error = %error, "Rate limit counter store failed, allowing request");
    metrics::record_store_failure("rate_limit");
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCounterStore;
    use crate::error::AppResult;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tower::ServiceExt;
    use tower::util::BoxCloneService;

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn get(&self, _key: &str) -> AppResult<Option<u64>> {
            Err(AppError::CounterStore("down".into()))
        }
        async fn increment(&self, _key: &str, _ttl: Duration) -> AppResult<u64> {
            Err(AppError::CounterStore("down".into()))
        }
        async fn ttl(&self, _key: &str) -> AppResult<Option<Duration>> {
            Err(AppError::CounterStore("down".into()))
        }
        async fn forget(&self, _key: &str) -> AppResult<()> {
            Err(AppError::CounterStore("down".into()))
        }
        async fn purge_expired(&self) -> AppResult<usize> {
            Err(AppError::CounterStore("down".into()))
        }
        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    type Inner = BoxCloneService<Request<Body>, Response<Body>, Infallible>;

    fn service(store: Arc<dyn CounterStore>, read: u32, write: u32) -> RateLimitService<Inner> {
        RateLimitLayer::with_limits(
            store,
            Arc::new(TrustedProxyConfig::default()),
            read,
            write,
            // One window spanning the whole test run
            Duration::from_secs(1_000_000_000),
            vec!["/health".to_string()],
        )
        .layer(BoxCloneService::new(tower::service_fn(
            |_req: Request<Body>| async { Ok::<_, Infallible>(Response::new(Body::empty())) },
        )))
    }

    static FAKE_NOW: AtomicU64 = AtomicU64::new(0);

    fn fake_now() -> u64 {
        FAKE_NOW.load(Ordering::SeqCst)
    }

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .header("x-forwarded-for", "198.51.100.7")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_scope_for_method() {
        assert_eq!(RateScope::for_method(&Method::GET), RateScope::Read);
        assert_eq!(RateScope::for_method(&Method::HEAD), RateScope::Read);
        assert_eq!(RateScope::for_method(&Method::POST), RateScope::Write);
        assert_eq!(RateScope::for_method(&Method::PATCH), RateScope::Write);
        assert_eq!(RateScope::for_method(&Method::DELETE), RateScope::Write);
    }

    #[test]
    fn test_window_arithmetic() {
        let window = Window::at(125, 60);
        assert_eq!(window.index, 2);
        assert_eq!(window.resets_at, 180);
        assert_eq!(window.remaining_secs, 55);

        let boundary = Window::at(180, 60);
        assert_eq!(boundary.index, 3);
        assert_eq!(boundary.remaining_secs, 60);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            rate_limit_key(RateScope::Write, "10.0.0.1", 42),
            "rate_limit:write:10.0.0.1:42"
        );
    }

    #[tokio::test]
    async fn test_limits_then_rejects() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let svc = service(store, 2, 1);

        let first = svc.clone().oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[LIMIT_HEADER], "2");
        assert_eq!(first.headers()[REMAINING_HEADER], "1");

        let second = svc.clone().oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
        assert_eq!(second.headers()[REMAINING_HEADER], "0");

        let third = svc.clone().oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(third.headers().contains_key("retry-after"));
        assert!(third.headers().contains_key(RESET_HEADER));
        assert_eq!(third.headers()[REMAINING_HEADER], "0");

        // Writes have their own budget
        let write = svc.clone().oneshot(request(Method::POST, "/api/tasks")).await.unwrap();
        assert_eq!(write.status(), StatusCode::OK);
        let write = svc.oneshot(request(Method::POST, "/api/tasks")).await.unwrap();
        assert_eq!(write.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_new_window_resets_budget() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let svc = RateLimitLayer::with_limits(
            store,
            Arc::new(TrustedProxyConfig::default()),
            2,
            2,
            Duration::from_secs(60),
            Vec::new(),
        )
        .with_clock(fake_now)
        .layer(BoxCloneService::new(tower::service_fn(
            |_req: Request<Body>| async { Ok::<_, Infallible>(Response::new(Body::empty())) },
        )));

        FAKE_NOW.store(119, Ordering::SeqCst);
        for _ in 0..2 {
            let response = svc.clone().oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let rejected = svc.clone().oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.headers()["retry-after"], "1");
        assert_eq!(rejected.headers()[RESET_HEADER], "120");

        FAKE_NOW.store(120, Ordering::SeqCst);
        let fresh = svc.oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
        assert_eq!(fresh.status(), StatusCode::OK);
        assert_eq!(fresh.headers()[REMAINING_HEADER], "1");
    }

    #[tokio::test]
    async fn test_bypass_paths_are_not_counted() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let svc = service(store, 1, 1);

        for _ in 0..3 {
            let response = svc.clone().oneshot(request(Method::GET, "/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key(LIMIT_HEADER));
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let svc = service(Arc::new(BrokenStore), 1, 1);

        for _ in 0..3 {
            let response = svc.clone().oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
