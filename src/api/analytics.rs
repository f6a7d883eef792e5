//! Analytics API endpoints
//!
//! Search trends, popular codes and feedback are public. User engagement
//! needs a token; performance metrics are for admins only.

use axum::{
    extract::State,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::api::common::{non_empty, Query};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::ApiResponse;
use crate::models::{FeedbackAnalytics, PerformanceMetrics, Period, SearchTrends};
use crate::services::analytics::{EngagementReport, PopularCodes, DEFAULT_POPULAR_CODE_LIMIT};
use crate::services::EngagementViewer;

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/search-trends", get(search_trends))
        .route("/popular-nco-codes", get(popular_nco_codes))
        .route("/feedback", get(feedback))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/user-engagement", get(user_engagement))
}

pub fn admin_router() -> Router<AppState> {
    Router::new().route("/performance", get(performance))
}

#[derive(Debug, Default, Deserialize)]
struct TrendsQuery {
    period: Option<String>,
    language: Option<String>,
    region: Option<String>,
}

async fn search_trends(
    State(state): State<AppState>,
    Query(query): Query<TrendsQuery>,
) -> Result<ApiResponse<SearchTrends>, ApiError> {
    let period = Period::parse_or(query.period.as_deref(), Period::Week);
    let language = non_empty(query.language).or_else(|| Some("en".to_string()));

    let trends = state
        .analytics_service
        .search_trends(period, language, non_empty(query.region))
        .await?;
    Ok(ApiResponse::ok(trends, "Search trends retrieved successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopularCodesQuery {
    period: Option<String>,
    limit: Option<i64>,
    sector: Option<String>,
    skill_level: Option<String>,
}

async fn popular_nco_codes(
    State(state): State<AppState>,
    Query(query): Query<PopularCodesQuery>,
) -> Result<ApiResponse<PopularCodes>, ApiError> {
    let period = Period::parse_or(query.period.as_deref(), Period::Month);
    let sector = non_empty(query.sector);
    let skill_level = non_empty(query.skill_level);

    let popular = state
        .analytics_service
        .popular_codes(
            period,
            sector.as_deref(),
            skill_level.as_deref(),
            query.limit.unwrap_or(DEFAULT_POPULAR_CODE_LIMIT),
        )
        .await?;
    Ok(ApiResponse::ok(popular, "Popular NCO codes retrieved successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackQuery {
    period: Option<String>,
    min_rating: Option<i64>,
    max_rating: Option<i64>,
}

async fn feedback(
    State(state): State<AppState>,
    Query(query): Query<FeedbackQuery>,
) -> Result<ApiResponse<FeedbackAnalytics>, ApiError> {
    let period = Period::parse_or(query.period.as_deref(), Period::Month);
    let analytics = state
        .analytics_service
        .feedback(period, query.min_rating, query.max_rating)
        .await?;
    Ok(ApiResponse::ok(analytics, "Feedback analytics retrieved successfully"))
}

#[derive(Debug, Default, Deserialize)]
struct PeriodQuery {
    period: Option<String>,
}

async fn user_engagement(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<PeriodQuery>,
) -> Result<ApiResponse<EngagementReport>, ApiError> {
    let period = Period::parse_or(query.period.as_deref(), Period::Month);
    let viewer = if user.is_admin() {
        EngagementViewer::Admin
    } else {
        EngagementViewer::User(user.id)
    };

    let report = state.analytics_service.user_engagement(period, viewer).await?;
    Ok(ApiResponse::ok(report, "User engagement data retrieved successfully"))
}

async fn performance(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<ApiResponse<PerformanceMetrics>, ApiError> {
    let period = Period::parse_or(query.period.as_deref(), Period::Day);
    let metrics = state.analytics_service.performance(period).await?;
    Ok(ApiResponse::ok(metrics, "Performance metrics retrieved successfully"))
}
