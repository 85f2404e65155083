//! SQL-injection screening.
//!
//! [`ThreatDetector`] scores a string against weighted patterns. The
//! [`ThreatGuardLayer`] applies it to every decoded query parameter and to
//! the string content of the request body:
//!
//! - JSON bodies: every string value, labelled with its path (`tags[0]`,
//!   `meta.note`)
//! - form bodies: each key/value pair
//! - anything else: the raw text
//!
//! The highest field score decides the outcome. At `THREAT_WARN_SCORE` the
//! request is logged and let through; at `THREAT_BLOCK_SCORE` it is answered
//! 400 and the client's offender counter (`threat:{ip}`) goes up. Clients at
//! or above `THREAT_OFFENDER_LIMIT` get 403 before anything is inspected.
//! Counter store errors are logged and ignored.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Query;
use axum::http::{HeaderMap, Request, Response, Uri, header};
use axum::response::IntoResponse;
use regex::Regex;
use serde_json::Value;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, peer_ip, resolve_client_ip};
use crate::cache::CounterStore;
use crate::config::Config;
use crate::error::AppError;
use crate::metrics;

// =============================================================================
// Detector
// =============================================================================

struct ThreatPattern {
    name: &'static str,
    regex: Regex,
    weight: u32,
}

/// Patterns and their weights. Each pattern counts once per input.
const PATTERNS: &[(&str, &str, u32)] = &[
    (
        "union_select",
        r"(?i)\bunion\b(?:\s|/\*.*?\*/)+(?:all\s+|distinct\s+)?select\b",
        5,
    ),
    (
        "quoted_tautology",
        r#"(?i)['"]\s*(?:or|and)\s+['"]?\w+['"]?\s*(?:=|<>|!=|like)\s*['"]?\w*"#,
        5,
    ),
    (
        "numeric_tautology",
        r"(?i)\b(?:or|and)\s+(\d+)\s*=\s*(\d+)\b",
        4,
    ),
    (
        "stacked_query",
        r"(?i);\s*(?:(?:drop|truncate|alter)\s+(?:table|database|schema|index|view)\b|exec(?:ute)?\s|insert\s+into\b|update\s+\w+\s+set\b|delete\s+from\b|shutdown\b)",
        5,
    ),
    (
        "ddl",
        r"(?i)\b(?:drop|truncate|alter)\s+(?:table|database|schema|index|view)\b",
        4,
    ),
    (
        "dml",
        r"(?i)\b(?:insert\s+into|delete\s+from|update\s+\w+\s+set)\b",
        3,
    ),
    (
        "select_from",
        r"(?i)\bselect\s+(?:\*|[\w.]+(?:\s*,\s*[\w.]+)*)\s+from\s+[\w.]+",
        2,
    ),
    ("comment", r"(?:--(?:\s|$)|/\*|\*/|#\s*$)", 2),
    ("quote_comment", r#"['"]\s*(?:--|#|/\*)"#, 3),
    (
        "time_based",
        r"(?i)\b(?:sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b",
        5,
    ),
    (
        "system_catalog",
        r"(?i)\b(?:information_schema|sqlite_master|sqlite_schema|pg_catalog|sysobjects|syscolumns|mysql\.user)\b",
        4,
    ),
    ("extended_procedure", r"(?i)\bxp_\w+", 5),
    ("hex_blob", r"(?i)\b0x[0-9a-f]{8,}\b", 2),
];

/// Result of scoring one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreatScore {
    pub score: u32,
    pub matched: Vec<&'static str>,
}

/// Weighted regex scorer for SQL-injection payloads.
pub struct ThreatDetector {
    patterns: Vec<ThreatPattern>,
}

impl ThreatDetector {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = PATTERNS
            .iter()
            .map(|&(name, pattern, weight)| {
                Ok(ThreatPattern {
                    name,
                    regex: Regex::new(pattern)?,
                    weight,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { patterns })
    }

    pub fn score(&self, input: &str) -> ThreatScore {
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(input))
            .fold(ThreatScore::default(), |mut acc, p| {
                acc.score += p.weight;
                acc.matched.push(p.name);
                acc
            })
    }
}

// =============================================================================
// Input extraction
// =============================================================================

/// A labelled string pulled out of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedField {
    pub name: String,
    pub value: String,
}

impl InspectedField {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Percent-decoded `key=value` pairs, or `None` if `raw` does not decode.
fn decode_pairs(raw: &str) -> Option<Vec<(String, String)>> {
    let uri: Uri = format!("/?{raw}").parse().ok()?;
    Query::<Vec<(String, String)>>::try_from_uri(&uri)
        .ok()
        .map(|Query(pairs)| pairs)
}

fn pairs_or_raw(raw: &str, fallback_name: &str, out: &mut Vec<InspectedField>) {
    match decode_pairs(raw) {
        Some(pairs) => out.extend(pairs.into_iter().map(|(k, v)| InspectedField::new(k, v))),
        None => out.push(InspectedField::new(fallback_name, raw)),
    }
}

pub fn query_fields(uri: &Uri) -> Vec<InspectedField> {
    let mut fields = Vec::new();
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        pairs_or_raw(query, "query", &mut fields);
    }
    fields
}

/// Collect every JSON string value with its path.
pub fn json_fields(value: &Value) -> Vec<InspectedField> {
    let mut fields = Vec::new();
    collect_json(value, String::new(), &mut fields);
    fields
}

fn collect_json(value: &Value, path: String, out: &mut Vec<InspectedField>) {
    match value {
        Value::String(s) => {
            let name = if path.is_empty() { "body".to_string() } else { path };
            out.push(InspectedField::new(name, s.as_str()));
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_json(item, format!("{path}[{i}]"), out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect_json(item, child, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

pub fn body_fields(headers: &HeaderMap, body: &[u8]) -> Vec<InspectedField> {
    if body.is_empty() {
        return Vec::new();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let text = String::from_utf8_lossy(body);

    if content_type.contains("json")
        && let Ok(value) = serde_json::from_slice::<Value>(body)
    {
        return json_fields(&value);
    }

    let mut fields = Vec::new();
    if content_type.starts_with("application/x-www-form-urlencoded") {
        pairs_or_raw(&text, "body", &mut fields);
    } else {
        fields.push(InspectedField::new("body", text));
    }
    fields
}

/// Top-level field a path belongs to (`tags[0].x` -> `tags`).
fn root_field(path: &str) -> &str {
    path.split(['.', '[']).next().unwrap_or(path)
}

// =============================================================================
// Guard middleware
// =============================================================================

#[derive(Debug, Clone)]
struct GuardSettings {
    block_score: u32,
    warn_score: u32,
    offender_limit: u32,
    offender_ttl: Duration,
    excluded_fields: Vec<String>,
    max_body_size: usize,
}

impl GuardSettings {
    fn is_excluded(&self, field: &str) -> bool {
        let root = root_field(field);
        self.excluded_fields
            .iter()
            .any(|excluded| excluded == field || excluded == root)
    }
}

fn offender_key(ip: &str) -> String {
    format!("threat:{ip}")
}

/// Middleware layer running the [`ThreatDetector`] over each request.
#[derive(Clone)]
pub struct ThreatGuardLayer {
    detector: Arc<ThreatDetector>,
    store: Arc<dyn CounterStore>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    settings: Arc<GuardSettings>,
}

impl ThreatGuardLayer {
    pub fn new(
        config: &Config,
        detector: Arc<ThreatDetector>,
        store: Arc<dyn CounterStore>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            detector,
            store,
            trusted_proxies,
            settings: Arc::new(GuardSettings {
                block_score: config.threat_block_score,
                warn_score: config.threat_warn_score,
                offender_limit: config.threat_offender_limit,
                offender_ttl: config.threat_offender_ttl,
                excluded_fields: config.threat_excluded_fields.clone(),
                max_body_size: config.max_request_body_size,
            }),
        }
    }
}

impl<S> Layer<S> for ThreatGuardLayer {
    type Service = ThreatGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThreatGuardService {
            inner,
            detector: self.detector.clone(),
            store: self.store.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ThreatGuardService<S> {
    inner: S,
    detector: Arc<ThreatDetector>,
    store: Arc<dyn CounterStore>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    settings: Arc<GuardSettings>,
}

impl<S> Service<Request<Body>> for ThreatGuardService<S>
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
        let detector = self.detector.clone();
        let store = self.store.clone();
        let settings = self.settings.clone();
        let client_ip = resolve_client_ip(
            req.headers(),
            peer_ip(req.extensions()),
            &self.trusted_proxies,
        )
        .into_owned();

        Box::pin(async move {
            let key = offender_key(&client_ip);

            match store.get(&key).await {
                Ok(Some(offences)) if offences >= u64::from(settings.offender_limit) => {
                    warn!(client_ip = %client_ip, offences, "Request from banned client rejected");
                    metrics::record_threat("banned");
                    return Ok(AppError::Forbidden(
                        "Access temporarily blocked due to repeated suspicious requests."
                            .to_string(),
                    )
                    .into_response());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Threat counter lookup failed, continuing");
                    metrics::record_store_failure("threat_guard");
                }
            }

            let (parts, body) = req.into_parts();
            let bytes: Bytes = match axum::body::to_bytes(body, settings.max_body_size).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "Failed to buffer request body");
                    return Ok(AppError::PayloadTooLarge(
                        "Request body exceeds the configured limit".to_string(),
                    )
                    .into_response());
                }
            };

            let mut fields = query_fields(&parts.uri);
            fields.extend(body_fields(&parts.headers, &bytes));

            let worst = fields
                .iter()
                .filter(|field| !settings.is_excluded(&field.name))
                .map(|field| (field, detector.score(&field.value)))
                .max_by_key(|(_, result)| result.score);

            if let Some((field, result)) = worst {
                if result.score >= settings.block_score {
                    warn!(
                        client_ip = %client_ip,
                        path = %parts.uri.path(),
                        field = %field.name,
                        score = result.score,
                        patterns = ?result.matched,
                        "Suspicious input blocked"
                    );
                    metrics::record_threat("blocked");

                    if let Err(e) = store.increment(&key, settings.offender_ttl).await {
                        warn!(error = %e, "Failed to record offender, continuing");
                        metrics::record_store_failure("threat_guard");
                    }

                    return Ok(AppError::SuspiciousInput {
                        score: result.score,
                    }
                    .into_response());
                }

                if result.score >= settings.warn_score {
                    warn!(
                        client_ip = %client_ip,
                        path = %parts.uri.path(),
                        field = %field.name,
                        score = result.score,
                        patterns = ?result.matched,
                        "Suspicious input flagged"
                    );
                    metrics::record_threat("flagged");
                }
            }

            inner.call(Request::from_parts(parts, Body::from(bytes))).await
        })
    }
}
