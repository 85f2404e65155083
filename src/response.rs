//! Success envelope shared by every API endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::models::Page;

/// `{"success": true, "message"?, "data", "meta"?}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PaginationMeta>,
}

/// Pagination block attached to list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationMeta {
    pub current_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u64,
    /// 1-based position of the first item on this page, `null` when empty
    pub from: Option<u64>,
    /// 1-based position of the last item on this page, `null` when empty
    pub to: Option<u64>,
}

impl PaginationMeta {
    pub fn new(current_page: u32, per_page: u32, total: u64, items_on_page: usize) -> Self {
        let per = u64::from(per_page.max(1));
        let last_page = total.div_ceil(per).max(1);

        let (from, to) = if items_on_page == 0 {
            (None, None)
        } else {
            let first = u64::from(current_page.saturating_sub(1)) * per + 1;
            (Some(first), Some(first + items_on_page as u64 - 1))
        };

        Self {
            current_page,
            per_page,
            total,
            last_page,
            from,
            to,
        }
    }
}

impl<T> Page<T> {
    pub fn meta(&self) -> PaginationMeta {
        PaginationMeta::new(self.page, self.per_page, self.total, self.items.len())
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
            meta: None,
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok(data)
        }
    }

    /// 201 response carrying a message.
    pub fn created(message: impl Into<String>, data: T) -> (StatusCode, Self) {
        (StatusCode::CREATED, Self::with_message(message, data))
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    pub fn paginated(page: Page<T>) -> Self {
        let meta = page.meta();
        Self {
            meta: Some(meta),
            ..Self::ok(page.items)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_for_middle_page() {
        let meta = PaginationMeta::new(2, 15, 40, 15);
        assert_eq!(meta.last_page, 3);
        assert_eq!(meta.from, Some(16));
        assert_eq!(meta.to, Some(30));
    }

    #[test]
    fn test_meta_for_partial_last_page() {
        let meta = PaginationMeta::new(3, 15, 40, 10);
        assert_eq!(meta.from, Some(31));
        assert_eq!(meta.to, Some(40));
    }

    #[test]
    fn test_meta_for_empty_result() {
        let meta = PaginationMeta::new(1, 15, 0, 0);
        assert_eq!(meta.last_page, 1);
        assert_eq!(meta.from, None);
        assert_eq!(meta.to, None);

        let json = serde_json::to_value(&meta).unwrap();
        assert!(json["from"].is_null());
    }

    #[test]
    fn test_envelope_skips_absent_fields() {
        let json = serde_json::to_value(ApiResponse::ok(5)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 5);
        assert!(json.get("message").is_none());
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn test_paginated_carries_meta() {
        let page = Page {
            items: vec!["a", "b"],
            total: 2,
            page: 1,
            per_page: 15,
        };
        let json = serde_json::to_value(ApiResponse::paginated(page)).unwrap();
        assert_eq!(json["meta"]["total"], 2);
        assert_eq!(json["meta"]["to"], 2);
        assert_eq!(json["data"][1], "b");
    }
}
