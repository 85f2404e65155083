//! Request extractors that reject with the JSON error envelope.

use std::convert::Infallible;

use axum::extract::{FromRequest, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::middleware::{UNKNOWN_IP, peer_ip, request_id_from_headers, resolve_client_ip};
use crate::models::AuditContext;
use crate::state::AppState;

/// `Json<T>` whose rejection is an [`AppError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `Path<T>`; malformed path parameters answer 404.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

/// `Query<T>`; malformed query strings answer 400.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Longest user agent kept in audit logs.
const MAX_USER_AGENT_LENGTH: usize = 512;

impl FromRequestParts<AppState> for AuditContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ip = resolve_client_ip(
            &parts.headers,
            peer_ip(&parts.extensions),
            &state.trusted_proxies,
        );

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LENGTH).collect());

        Ok(AuditContext {
            request_id: request_id_from_headers(&parts.headers),
            ip_address: (ip != UNKNOWN_IP).then(|| ip.into_owned()),
            user_agent,
        })
    }
}
