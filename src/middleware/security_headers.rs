//! Security response headers.
//!
//! Runs near the top of the stack so rejections from the rate limiter and
//! the threat guard carry the same headers as handler responses.

use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Request, Response};
use tower::{Layer, Service};

const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=()";
const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; frame-ancestors 'none'";

static X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

#[derive(Clone)]
pub struct SecurityHeadersLayer {
    /// Precomputed `Strict-Transport-Security` value.
    hsts: HeaderValue,
    hsts_always: bool,
}

impl SecurityHeadersLayer {
    /// `hsts_always` sends HSTS on every response; otherwise only on requests
    /// that reached the proxy over HTTPS.
    pub fn new(hsts_always: bool, hsts_max_age: Duration) -> Self {
        let hsts = HeaderValue::from_str(&format!(
            "max-age={}; includeSubDomains",
            hsts_max_age.as_secs()
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("max-age=31536000; includeSubDomains"));

        Self { hsts, hsts_always }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            hsts: self.hsts.clone(),
            hsts_always: self.hsts_always,
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    hsts: HeaderValue,
    hsts_always: bool,
}

impl<S> Service<Request<Body>> for SecurityHeadersService<S>
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
        let hsts = (self.hsts_always || is_https(req.headers())).then(|| self.hsts.clone());
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            apply_security_headers(response.headers_mut(), hsts);
            Ok(response)
        })
    }
}

fn is_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

fn apply_security_headers(headers: &mut HeaderMap, hsts: Option<HeaderValue>) {
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );

    if let Some(value) = hsts {
        headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
    }

    headers.remove(header::SERVER);
    headers.remove(&X_POWERED_BY);
}
