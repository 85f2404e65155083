use std::collections::BTreeMap;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Validation messages keyed by input field name.
///
/// A `BTreeMap` keeps the rendered `errors` object in a stable order.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Message returned with every 422 response.
pub const VALIDATION_MESSAGE: &str = "The given data was invalid.";

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Connection Errors
///
/// `ConnectionFailed` and `Disconnected` are kept apart from `AuditStore` so the
/// audit client can decide when a reconnect is worth attempting.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(FieldErrors),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Suspicious input detected (threat score {score})")]
    SuspiciousInput { score: u32 },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    TooManyRequests { retry_after: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit store error: {0}")]
    AuditStore(String),

    #[error("Failed to connect to Iggy server: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from Iggy server: {0}")]
    Disconnected(String),

    #[error("Counter store error: {0}")]
    CounterStore(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error envelope for API endpoints.
#[derive(Serialize)]
struct ErrorResponse<'a> {
    success: bool,
    message: &'a str,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a FieldErrors>,
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::SuspiciousInput { .. } => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::AuditStore(_) | AppError::ConnectionFailed(_) | AppError::Disconnected(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::OperationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Database(_)
            | AppError::CounterStore(_)
            | AppError::SerializationError(_)
            | AppError::ConfigError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Validation(_) => "validation_failed",
            AppError::Conflict(_) => "conflict",
            AppError::MethodNotAllowed => "method_not_allowed",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::UnsupportedMediaType(_) => "unsupported_media_type",
            AppError::SuspiciousInput { .. } => "suspicious_input",
            AppError::Forbidden(_) => "forbidden",
            AppError::TooManyRequests { .. } => "rate_limited",
            AppError::Database(_) => "database_error",
            AppError::AuditStore(_) => "audit_store_unavailable",
            AppError::ConnectionFailed(_) => "connection_failed",
            AppError::Disconnected(_) => "disconnected",
            AppError::CounterStore(_) => "counter_store_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::OperationTimeout(_) => "timeout",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Client-facing message. Internal failures never leak their details.
    fn public_message(&self) -> &str {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::UnsupportedMediaType(msg)
            | AppError::Forbidden(msg) => msg.as_str(),
            AppError::Validation(_) => VALIDATION_MESSAGE,
            AppError::MethodNotAllowed => "The requested method is not allowed for this resource.",
            AppError::SuspiciousInput { .. } => {
                "The request contains potentially malicious input and was rejected."
            }
            AppError::TooManyRequests { .. } => "Too many requests. Please retry later.",
            AppError::AuditStore(_) | AppError::ConnectionFailed(_) | AppError::Disconnected(_) => {
                "Audit log store is temporarily unavailable. Please try again later."
            }
            AppError::OperationTimeout(_) => "Operation timed out. Please try again.",
            AppError::Database(_) => {
                "A database error occurred. Please contact support if the issue persists."
            }
            AppError::CounterStore(_) | AppError::SerializationError(_) | AppError::Internal(_) => {
                "An internal error occurred. Please contact support if the issue persists."
            }
            AppError::ConfigError(_) => "Service configuration error. Please contact support.",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Full details stay in the logs; clients only see the public message.
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        let errors = match &self {
            AppError::Validation(errors) => Some(errors),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            message: self.public_message(),
            error: self.code(),
            errors,
        };

        let mut response = (status, axum::Json(body)).into_response();

        if let AppError::TooManyRequests { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }

        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => AppError::UnsupportedMediaType(
                "Expected request with `Content-Type: application/json`".to_string(),
            ),
            JsonRejection::JsonSyntaxError(_) => {
                AppError::BadRequest("Malformed JSON in request body".to_string())
            }
            JsonRejection::JsonDataError(e) => {
                AppError::BadRequest(sanitize_serde_error(&e.body_text()))
            }
            other if other.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::PayloadTooLarge("Request body exceeds the configured limit".to_string())
            }
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(rejection = %rejection.body_text(), "Path parameter rejected");
        AppError::NotFound("Resource not found.".to_string())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(sanitize_serde_error(&rejection.body_text()))
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
pub fn sanitize_serde_error(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_renders_field_errors() {
        let mut errors = FieldErrors::new();
        errors.insert(
            "title".to_string(),
            vec!["The title field is required.".to_string()],
        );

        let response = AppError::Validation(errors).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], VALIDATION_MESSAGE);
        assert_eq!(body["errors"]["title"][0], "The title field is required.");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = AppError::Internal("db password is hunter2".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "internal_error");
        assert!(!body["message"].as_str().unwrap().contains("hunter2"));
        assert!(body.get("errors").is_none());
    }

    #[tokio::test]
    async fn test_too_many_requests_sets_retry_after() {
        let response = AppError::TooManyRequests { retry_after: 17 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::SuspiciousInput { score: 9 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::AuditStore("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::OperationTimeout("slow".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_sanitize_serde_error() {
        assert_eq!(
            sanitize_serde_error("missing field `title` at line 1 column 2"),
            "Missing required field: title"
        );
        assert_eq!(
            sanitize_serde_error("title: invalid type: integer `5`, expected a string"),
            "Invalid data type in request body"
        );
        assert_eq!(
            sanitize_serde_error("EOF while parsing an object"),
            "Malformed JSON in request body"
        );
        assert_eq!(sanitize_serde_error("something odd"), "Invalid request format");
    }
}
