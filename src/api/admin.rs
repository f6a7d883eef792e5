//! Admin API endpoints
//!
//! Handles HTTP requests for portal administration:
//! - Dashboard statistics and search analytics rollups
//! - NCO code management (CRUD and bulk import)
//! - System configuration
//! - Audit log and external API request listings
//!
//! Every route here sits behind `require_auth` and `require_admin`.

use axum::{
    extract::State,
    routing::{get, post, put},
    Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::api::common::{non_empty, parse_date, parse_flag, Json, PaginationQuery, Path, Query};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, Listing};
use crate::models::{
    ApiRequest, ApiRequestFilter, AuditLogFilter, AuditLogWithUser, CreateNcoCodeInput, NcoCode,
    RequestContext, SearchAnalytics, SearchAnalyticsFilter, SystemConfig, UpdateNcoCodeInput,
    UpsertConfigInput,
};
use crate::services::nco_code::{BulkImportReport, DeleteOutcome};
use crate::services::AuditAction;

/// Audit entries shown on the dashboard
const RECENT_ACTIVITY_LIMIT: i64 = 20;

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(get_dashboard))
        .route("/analytics", get(get_analytics))
        .route("/nco-codes", post(create_nco_code))
        .route("/nco-codes/bulk-import", post(bulk_import))
        .route("/nco-codes/{id}", put(update_nco_code).delete(delete_nco_code))
        .route("/system-config", get(list_system_config).put(update_system_config))
        .route("/audit-logs", get(list_audit_logs))
        .route("/api-requests", get(list_api_requests))
}

/// Response for dashboard stats
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub users: UserStats,
    pub searches: SearchStats,
    pub datasets: DatasetStats,
    pub nco_codes: NcoStats,
    pub recent_activity: Vec<AuditLogWithUser>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total: i64,
    pub by_role: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    /// Searches in the last 7 days
    pub total: i64,
    pub avg_processing_time: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStats {
    pub by_status: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct NcoStats {
    pub total: i64,
}

/// GET /api/v1/admin/dashboard
async fn get_dashboard(
    State(state): State<AppState>,
) -> Result<ApiResponse<DashboardResponse>, ApiError> {
    let now = Utc::now();

    let by_role: BTreeMap<String, i64> =
        state.user_service.count_by_role().await?.into_iter().collect();
    let (searches, avg_processing_time) = state
        .analytics_service
        .search_stats(now - Duration::days(7))
        .await?;
    let by_status: BTreeMap<String, i64> =
        state.dataset_service.count_by_status().await?.into_iter().collect();
    let nco_total = state.nco_service.count_active().await?;
    let recent_activity = state
        .audit_service
        .recent(now - Duration::hours(24), RECENT_ACTIVITY_LIMIT)
        .await?;

    let dashboard = DashboardResponse {
        users: UserStats {
            total: by_role.values().sum(),
            by_role,
        },
        searches: SearchStats {
            total: searches,
            avg_processing_time,
        },
        datasets: DatasetStats { by_status },
        nco_codes: NcoStats { total: nco_total },
        recent_activity,
    };

    Ok(ApiResponse::ok(dashboard, "Dashboard statistics retrieved successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    language: Option<String>,
    region: Option<String>,
}

/// GET /api/v1/admin/analytics - daily search rollups
async fn get_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<ApiResponse<Vec<SearchAnalytics>>, ApiError> {
    let day = |field: &str, raw: Option<String>| -> Result<Option<String>, ApiError> {
        Ok(parse_date(field, raw.as_deref())?.map(|d| d.format("%Y-%m-%d").to_string()))
    };
    let filter = SearchAnalyticsFilter {
        start_date: day("startDate", query.start_date)?,
        end_date: day("endDate", query.end_date)?,
        language: non_empty(query.language),
        region: non_empty(query.region),
    };

    let rows = state.analytics_service.list_rollups(&filter).await?;
    Ok(ApiResponse::ok(rows, "Analytics data retrieved successfully"))
}

async fn create_nco_code(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    ctx: RequestContext,
    Json(input): Json<CreateNcoCodeInput>,
) -> Result<ApiResponse<NcoCode>, ApiError> {
    let code = state.nco_service.create(input).await?;

    state
        .audit_service
        .log(
            AuditAction::CreateNco
                .entry()
                .user(Some(admin.id))
                .resource(code.id)
                .request(&ctx)
                .metadata(json!({ "ncoCode": code.nco_code, "title": code.title })),
        )
        .await;

    Ok(ApiResponse::created(code, "NCO code created successfully"))
}

async fn update_nco_code(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    ctx: RequestContext,
    Json(input): Json<UpdateNcoCodeInput>,
) -> Result<ApiResponse<NcoCode>, ApiError> {
    let code = state.nco_service.update(id, input).await?;

    state
        .audit_service
        .log(
            AuditAction::UpdateNco
                .entry()
                .user(Some(admin.id))
                .resource(id)
                .request(&ctx)
                .metadata(json!({ "ncoCode": code.nco_code })),
        )
        .await;

    Ok(ApiResponse::ok(code, "NCO code updated successfully"))
}

async fn delete_nco_code(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    ctx: RequestContext,
) -> Result<ApiResponse<Option<()>>, ApiError> {
    let outcome = state.nco_service.delete(id).await?;

    state
        .audit_service
        .log(
            AuditAction::DeleteNco
                .entry()
                .user(Some(admin.id))
                .resource(id)
                .request(&ctx)
                .metadata(json!({ "softDelete": outcome == DeleteOutcome::Deactivated })),
        )
        .await;

    Ok(ApiResponse::ok(None, outcome.message()))
}

#[derive(Debug, Default, Deserialize)]
struct BulkImportRequest {
    #[serde(default)]
    codes: Vec<CreateNcoCodeInput>,
}

async fn bulk_import(
    State(state): State<AppState>,
    Json(body): Json<BulkImportRequest>,
) -> Result<ApiResponse<BulkImportReport>, ApiError> {
    let report = state.nco_service.bulk_import(body.codes).await?;
    let message = format!(
        "Bulk import completed: {} successful, {} failed",
        report.success_count, report.error_count
    );
    Ok(ApiResponse::ok(report, message))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemConfigQuery {
    category: Option<String>,
    is_public: Option<String>,
}

async fn list_system_config(
    State(state): State<AppState>,
    Query(query): Query<SystemConfigQuery>,
) -> Result<ApiResponse<Vec<SystemConfig>>, ApiError> {
    let category = non_empty(query.category);
    let configs = state
        .config_service
        .list(category.as_deref(), parse_flag(query.is_public.as_deref()))
        .await?;
    Ok(ApiResponse::ok(configs, "System configurations retrieved successfully"))
}

async fn update_system_config(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    ctx: RequestContext,
    Json(input): Json<UpsertConfigInput>,
) -> Result<ApiResponse<SystemConfig>, ApiError> {
    let config = state.config_service.upsert(input).await?;

    state
        .audit_service
        .log(
            AuditAction::UpdateConfig
                .entry()
                .user(Some(admin.id))
                .resource(&config.key)
                .request(&ctx)
                .metadata(json!({ "key": config.key, "category": config.category })),
        )
        .await;

    Ok(ApiResponse::ok(config, "System configuration updated successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditLogQuery {
    page: Option<u32>,
    limit: Option<u32>,
    action: Option<String>,
    resource_type: Option<String>,
    user_id: Option<i64>,
    success: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<ApiResponse<Listing<AuditLogWithUser>>, ApiError> {
    let filter = AuditLogFilter {
        action: non_empty(query.action),
        resource_type: non_empty(query.resource_type),
        user_id: query.user_id,
        success: parse_flag(query.success.as_deref()),
        start_date: parse_date("startDate", query.start_date.as_deref())?,
        end_date: parse_date("endDate", query.end_date.as_deref())?,
    };
    let params = PaginationQuery { page: query.page, limit: query.limit }.params(50);

    let page = state.audit_service.list(&filter, &params).await?;
    Ok(ApiResponse::ok(Listing::new("logs", page), "Audit logs retrieved successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequestQuery {
    page: Option<u32>,
    limit: Option<u32>,
    service_name: Option<String>,
    status: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn list_api_requests(
    State(state): State<AppState>,
    Query(query): Query<ApiRequestQuery>,
) -> Result<ApiResponse<Listing<ApiRequest>>, ApiError> {
    let filter = ApiRequestFilter {
        service_name: non_empty(query.service_name),
        status: non_empty(query.status),
        start_date: parse_date("startDate", query.start_date.as_deref())?,
        end_date: parse_date("endDate", query.end_date.as_deref())?,
    };
    let params = PaginationQuery { page: query.page, limit: query.limit }.params(50);

    let page = state.analytics_service.api_requests(&filter, &params).await?;
    Ok(ApiResponse::ok(
        Listing::new("requests", page),
        "API requests retrieved successfully",
    ))
}
