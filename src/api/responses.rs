//! Shared API response types
//!
//! Every successful response uses the same envelope:
//! `{"statusCode", "data", "message", "success": true}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::models::PagedResult;

/// Success envelope around a handler's payload
#[derive(Debug)]
pub struct ApiResponse<T> {
    pub status: StatusCode,
    pub data: T,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            data,
            message: message.into(),
        }
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CREATED,
            data,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a, T> {
    status_code: u16,
    data: &'a T,
    message: &'a str,
    success: bool,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            status_code: self.status.as_u16(),
            data: &self.data,
            message: &self.message,
            success: self.status.as_u16() < 400,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Paging block attached to listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: u32,
}

/// A page of items under a named key, e.g. `{"users": [...], "pagination": {...}}`
#[derive(Debug)]
pub struct Listing<T> {
    key: &'static str,
    items: Vec<T>,
    pagination: Pagination,
}

impl<T> Listing<T> {
    pub fn new(key: &'static str, page: PagedResult<T>) -> Self {
        let pagination = Pagination {
            page: page.page,
            limit: page.per_page,
            total: page.total,
            total_pages: page.total_pages(),
        };
        Self {
            key,
            items: page.items,
            pagination,
        }
    }
}

impl<T: Serialize> Serialize for Listing<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.key, &self.items)?;
        map.serialize_entry("pagination", &self.pagination)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListParams;
    use serde_json::json;

    #[test]
    fn test_listing_shape() {
        let page = PagedResult::new(vec!["a", "b"], 12, &ListParams::new(2, 5));
        let value = serde_json::to_value(Listing::new("codes", page)).unwrap();

        assert_eq!(
            value,
            json!({
                "codes": ["a", "b"],
                "pagination": {"page": 2, "limit": 5, "total": 12, "totalPages": 3}
            })
        );
    }

    #[tokio::test]
    async fn test_envelope() {
        let response = ApiResponse::created(json!({"id": 1}), "Created").into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["statusCode"], 201);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 1);
        assert_eq!(body["message"], "Created");
    }
}
