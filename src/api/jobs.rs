//! Job search API endpoints
//!
//! Occupation search against the matcher, the public NCO code catalogue,
//! and feedback on results.

use axum::{
    extract::State,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::common::{non_empty, parse_flag, Json, PaginationQuery, Path, Query};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, Listing};
use crate::models::{
    FeedbackInput, NcoCode, NcoCodeFilter, NcoCodeWithCounts, RequestContext, SearchFeedback,
};
use crate::services::job_search::{PopularSearches, RecommendedCode, SearchOutcome};
use crate::services::{AuditAction, SearchInput};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/nco-codes", get(list_codes))
        .route("/nco-codes/{id}", get(get_code))
        .route("/popular-searches", get(popular_searches))
        .route("/recommendations", get(recommendations))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/search", post(search))
        .route("/feedback", post(submit_feedback))
        .route("/results/{resultId}/viewed", put(mark_viewed))
}

/// POST /api/v1/jobs/search
async fn search(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ctx: RequestContext,
    Json(input): Json<SearchInput>,
) -> Result<ApiResponse<SearchOutcome>, ApiError> {
    let language = input.language.clone().unwrap_or_else(|| "en".to_string());
    let outcome = state.job_service.search(user.id, input, &ctx).await?;

    state
        .audit_service
        .log(
            AuditAction::SearchNco
                .entry()
                .user(Some(user.id))
                .resource(outcome.search_id)
                .request(&ctx)
                .duration(outcome.processing_time)
                .metadata(json!({
                    "query": outcome.query,
                    "language": language,
                    "totalResults": outcome.total_results,
                    "source": outcome.source,
                })),
        )
        .await;

    Ok(ApiResponse::ok(outcome, "Search completed successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCodesQuery {
    page: Option<u32>,
    limit: Option<u32>,
    major_group: Option<String>,
    sector: Option<String>,
    skill_level: Option<String>,
    search: Option<String>,
    is_active: Option<String>,
}

/// GET /api/v1/jobs/nco-codes
async fn list_codes(
    State(state): State<AppState>,
    Query(query): Query<ListCodesQuery>,
) -> Result<ApiResponse<Listing<NcoCode>>, ApiError> {
    let filter = NcoCodeFilter {
        major_group: non_empty(query.major_group),
        sector: non_empty(query.sector),
        skill_level: non_empty(query.skill_level),
        search: non_empty(query.search),
        is_active: parse_flag(query.is_active.as_deref()).unwrap_or(true),
    };
    let params = PaginationQuery { page: query.page, limit: query.limit }.params(20);

    let page = state.job_service.list_codes(&filter, &params).await?;
    Ok(ApiResponse::ok(
        Listing::new("ncoCodes", page),
        "NCO codes retrieved successfully",
    ))
}

async fn get_code(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<NcoCodeWithCounts>, ApiError> {
    let code = state.job_service.get_code(id).await?;
    Ok(ApiResponse::ok(code, "NCO code retrieved successfully"))
}

async fn submit_feedback(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ctx: RequestContext,
    Json(input): Json<FeedbackInput>,
) -> Result<ApiResponse<SearchFeedback>, ApiError> {
    let feedback = state.job_service.submit_feedback(user.id, input).await?;

    state
        .audit_service
        .log(
            AuditAction::ProvideFeedback
                .entry()
                .user(Some(user.id))
                .resource(feedback.search_id)
                .request(&ctx)
                .metadata(json!({
                    "rating": feedback.rating,
                    "isCorrect": feedback.is_correct,
                    "selectedCodeId": feedback.selected_code_id,
                })),
        )
        .await;

    Ok(ApiResponse::created(feedback, "Feedback submitted successfully"))
}

async fn mark_viewed(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(result_id): Path<i64>,
) -> Result<ApiResponse<Option<()>>, ApiError> {
    state.job_service.mark_viewed(user.id, result_id).await?;
    Ok(ApiResponse::ok(None, "Result marked as viewed"))
}

#[derive(Debug, Deserialize)]
struct PopularSearchesQuery {
    #[serde(default = "default_days")]
    days: i64,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_days() -> i64 {
    7
}

fn default_language() -> String {
    "en".to_string()
}

fn default_limit() -> i64 {
    10
}

async fn popular_searches(
    State(state): State<AppState>,
    Query(query): Query<PopularSearchesQuery>,
) -> Result<ApiResponse<PopularSearches>, ApiError> {
    let popular = state
        .job_service
        .popular_searches(query.days, &query.language, query.limit)
        .await?;
    Ok(ApiResponse::ok(popular, "Popular searches retrieved successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationsQuery {
    sector: Option<String>,
    skill_level: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recommendations {
    recommendations: Vec<RecommendedCode>,
    criteria: RecommendationCriteria,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationCriteria {
    sector: Option<String>,
    skill_level: Option<String>,
}

async fn recommendations(
    State(state): State<AppState>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<ApiResponse<Recommendations>, ApiError> {
    let sector = non_empty(query.sector);
    let skill_level = non_empty(query.skill_level);

    let recommendations = state
        .job_service
        .recommendations(sector.as_deref(), skill_level.as_deref(), query.limit)
        .await?;

    Ok(ApiResponse::ok(
        Recommendations {
            recommendations,
            criteria: RecommendationCriteria { sector, skill_level },
        },
        "Job recommendations retrieved successfully",
    ))
}
