//! Common API utilities and shared types

use axum::extract::{FromRequest, FromRequestParts};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::api::middleware::ApiError;
use crate::models::ListParams;

/// JSON body extractor whose rejections use the API error envelope
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Json<T>(pub T);

/// Path extractor whose rejections use the API error envelope
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct Path<T>(pub T);

/// Query string extractor whose rejections use the API error envelope
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Query<T>(pub T);

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Pagination query parameters; each listing picks its own default limit
#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PaginationQuery {
    pub fn params(&self, default_limit: u32) -> ListParams {
        ListParams::new(
            self.page.unwrap_or_else(default_page),
            self.limit.unwrap_or(default_limit),
        )
    }
}

/// Parse a `"true"`/`"false"` query flag; anything else means "not set"
pub fn parse_flag(value: Option<&str>) -> Option<bool> {
    match value {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp or a plain `YYYY-MM-DD` date (start of day, UTC)
pub fn parse_date(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Some(dt.and_utc()))
        .ok_or_else(|| ApiError::validation_error(format!("Invalid {}: {}", field, raw)))
}

/// Treat empty query strings as absent
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let params = PaginationQuery::default().params(20);
        assert_eq!((params.page, params.per_page), (1, 20));

        let params = PaginationQuery { page: Some(0), limit: Some(500) }.params(10);
        assert_eq!((params.page, params.per_page), (1, 100));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(Some("true")), Some(true));
        assert_eq!(parse_flag(Some("false")), Some(false));
        assert_eq!(parse_flag(Some("yes")), None);
        assert_eq!(parse_flag(None), None);
    }

    #[test]
    fn test_parse_date() {
        let day = parse_date("startDate", Some("2024-03-01")).unwrap().unwrap();
        assert_eq!(day.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let ts = parse_date("endDate", Some("2024-03-01T10:30:00Z")).unwrap().unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:30:00+00:00");

        assert!(parse_date("startDate", Some("yesterday")).is_err());
        assert!(parse_date("startDate", Some(" ")).unwrap().is_none());
    }
}
