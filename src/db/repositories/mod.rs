//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the queries for one entity (or one family of
//! tightly coupled entities such as a search and its results).
//!
//! Optional filters are expressed in SQL as `(? IS NULL OR column = ?)`
//! with the value bound twice, which keeps every statement static.

pub mod analytics;
pub mod api_request;
pub mod audit_log;
pub mod dataset;
pub mod nco_code;
pub mod search;
pub mod system_config;
pub mod user;

pub use analytics::{AnalyticsRepository, FeedbackScope, SearchScope, SqlxAnalyticsRepository};
pub use api_request::{ApiRequestRepository, SqlxApiRequestRepository};
pub use audit_log::{AuditLogRepository, SqlxAuditLogRepository};
pub use dataset::{DatasetRepository, SqlxDatasetRepository};
pub use nco_code::{CodeReferences, NcoCodeRepository, SqlxNcoCodeRepository};
pub use search::{SearchRepository, SqlxSearchRepository};
pub use system_config::{SqlxSystemConfigRepository, SystemConfigRepository};
pub use user::{ActivityCounts, SqlxUserRepository, UserRepository};

/// Encode a string list for a JSON text column
pub(crate) fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON text column into a string list; malformed data reads as empty
pub(crate) fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Escape `%` and `_` so user input can be embedded in a LIKE pattern
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
