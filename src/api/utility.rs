//! Utility API endpoints
//!
//! Public helpers: health and status probes, public configuration, search
//! suggestions, NCO code validation and the occupation hierarchy.

use axum::{
    extract::State,
    routing::get,
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::process;
use std::str::FromStr;
use sysinfo::{Pid, System};

use crate::api::common::{Path, Query};
use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::ApiResponse;
use crate::db;
use crate::models::HierarchyLevel;
use crate::services::nco_code::{CodeValidation, Hierarchy, Suggestions};

/// App version reported by the health check
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/config/public", get(public_config))
        .route("/suggestions", get(suggestions))
        .route("/validate-nco/{code}", get(validate_nco))
        .route("/nco-hierarchy", get(nco_hierarchy))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub database: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub environment: String,
}

/// GET /api/v1/utility/health
async fn health(State(state): State<AppState>) -> Result<ApiResponse<HealthResponse>, ApiError> {
    if let Err(e) = db::ping(&state.pool).await {
        tracing::error!("Health check failed: {:#}", e);
        return Err(ApiError::service_unavailable("System health check failed"));
    }

    Ok(ApiResponse::ok(
        HealthResponse {
            database: "connected",
            timestamp: Utc::now(),
            version: APP_VERSION,
            environment: state.environment.to_string(),
        },
        "System is healthy",
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub users: UserCounts,
    pub nco_codes: Total,
    pub searches: SearchCounts,
    pub datasets: Total,
    /// Seconds since the server started
    pub uptime: u64,
    pub memory_usage: MemoryUsage,
    pub requests: RequestCounts,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UserCounts {
    pub total: i64,
    pub active: i64,
}

#[derive(Debug, Serialize)]
pub struct Total {
    pub total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCounts {
    pub total: i64,
    pub last24_hours: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Resident memory of this process in bytes
    pub process_bytes: u64,
    pub process_formatted: String,
    pub system_total: u64,
    pub system_used: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCounts {
    pub total: u64,
    pub avg_response_time_ms: f64,
}

/// GET /api/v1/utility/status
async fn status(State(state): State<AppState>) -> Result<ApiResponse<StatusResponse>, ApiError> {
    let now = Utc::now();

    let active_users = state.user_service.count_active().await?;
    let nco_codes = state.nco_service.count_active().await?;
    let (searches_total, _) = state
        .analytics_service
        .search_stats(DateTime::<Utc>::default())
        .await?;
    let (searches_last_day, _) = state
        .analytics_service
        .search_stats(now - Duration::hours(24))
        .await?;
    let datasets = state.dataset_service.count_all().await?;

    let status = StatusResponse {
        users: UserCounts {
            total: active_users,
            active: active_users,
        },
        nco_codes: Total { total: nco_codes },
        searches: SearchCounts {
            total: searches_total,
            last24_hours: searches_last_day,
        },
        datasets: Total { total: datasets },
        uptime: state.request_stats.uptime_seconds(),
        memory_usage: memory_usage(),
        requests: RequestCounts {
            total: state.request_stats.total_requests(),
            avg_response_time_ms: state.request_stats.avg_response_time_us() / 1000.0,
        },
        timestamp: now,
    };

    Ok(ApiResponse::ok(status, "System status retrieved successfully"))
}

fn memory_usage() -> MemoryUsage {
    let mut sys = System::new_all();
    sys.refresh_all();

    let process_bytes = sys
        .process(Pid::from_u32(process::id()))
        .map(|p| p.memory())
        .unwrap_or(0);

    MemoryUsage {
        process_bytes,
        process_formatted: format_bytes(process_bytes),
        system_total: sys.total_memory(),
        system_used: sys.used_memory(),
    }
}

/// Format bytes to human readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

async fn public_config(
    State(state): State<AppState>,
) -> Result<ApiResponse<serde_json::Map<String, serde_json::Value>>, ApiError> {
    let values = state.config_service.public_values().await?;
    Ok(ApiResponse::ok(values, "Public configuration retrieved successfully"))
}

#[derive(Debug, Deserialize)]
struct SuggestionsQuery {
    #[serde(default)]
    query: String,
    #[serde(default = "default_suggestion_limit")]
    limit: i64,
}

fn default_suggestion_limit() -> i64 {
    10
}

async fn suggestions(
    State(state): State<AppState>,
    Query(query): Query<SuggestionsQuery>,
) -> Result<ApiResponse<Suggestions>, ApiError> {
    let suggestions = state.nco_service.suggestions(&query.query, query.limit).await?;
    Ok(ApiResponse::ok(suggestions, "Search suggestions retrieved successfully"))
}

async fn validate_nco(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<ApiResponse<CodeValidation>, ApiError> {
    let validation = state.nco_service.validate_code(code.trim()).await?;
    Ok(ApiResponse::ok(validation, "NCO code validation completed"))
}

#[derive(Debug, Default, Deserialize)]
struct HierarchyQuery {
    level: Option<String>,
}

async fn nco_hierarchy(
    State(state): State<AppState>,
    Query(query): Query<HierarchyQuery>,
) -> Result<ApiResponse<Hierarchy>, ApiError> {
    let level = HierarchyLevel::from_str(query.level.as_deref().unwrap_or("major"))
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let hierarchy = state.nco_service.hierarchy(level).await?;
    Ok(ApiResponse::ok(hierarchy, "NCO hierarchy retrieved successfully"))
}
