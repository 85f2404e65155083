//! HTTP middleware.
//!
//! - **Request ID**: propagate or generate `X-Request-Id`
//! - **Security headers**: hardening headers on every response
//! - **Metrics**: request duration histogram
//! - **Rate limiting**: fixed-window counters per client IP and scope
//! - **Threat guard**: SQL-injection scoring of query and body input
//! - **Client IP**: forwarded-header resolution with trusted proxy CIDRs
//!
//! # Order
//!
//! ```text
//! Request → Request ID → Security headers → Trace → Metrics → Rate limit
//!         → Threat guard → CORS → Body limit → Handler
//! ```
//!
//! Rejections from the rate limiter and the threat guard still pass back
//! through the outer layers, so they carry a request id, security headers
//! and a trace span.

pub mod ip;
pub mod metrics;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
pub mod threat;

pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, peer_ip, resolve_client_ip};
pub use metrics::track_metrics;
pub use rate_limit::{RateLimitLayer, RateScope};
pub use request_id::{REQUEST_ID_HEADER, RequestIdLayer, request_id_from_headers};
pub use security_headers::SecurityHeadersLayer;
pub use threat::{ThreatDetector, ThreatGuardLayer, ThreatScore};
