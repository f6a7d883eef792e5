//! API middleware
//!
//! Contains middleware for:
//! - Authentication (bearer token validation)
//! - Authorization (admin checks)
//! - Request statistics
//! - Request auditing
//!
//! Also home to the shared [`AppState`] and the [`ApiError`] type every
//! handler returns.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequestParts, Request, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::db::repositories::{
    SqlxAnalyticsRepository, SqlxApiRequestRepository, SqlxAuditLogRepository,
    SqlxDatasetRepository, SqlxNcoCodeRepository, SqlxSearchRepository,
    SqlxSystemConfigRepository, SqlxUserRepository,
};
use crate::db::DbPool;
use crate::models::{AuditMark, NewAuditLog, RequestContext, User};
use crate::services::audit::{classify_request, is_ignored_path, should_log_endpoint};
use crate::services::{
    AnalyticsService, AnalyticsServiceError, AuditService, DatasetService, DatasetServiceError,
    JobSearchService, JobServiceError, MatcherClient, NcoCodeService, NcoCodeServiceError,
    SystemConfigService, SystemConfigServiceError, TokenService, UserService, UserServiceError,
};

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Total response time in microseconds (for calculating average)
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a request with its response time
    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Average response time in microseconds
    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub user_service: Arc<UserService>,
    pub job_service: Arc<JobSearchService>,
    pub nco_service: Arc<NcoCodeService>,
    pub dataset_service: Arc<DatasetService>,
    pub config_service: Arc<SystemConfigService>,
    pub analytics_service: Arc<AnalyticsService>,
    pub audit_service: Arc<AuditService>,
    pub request_stats: Arc<RequestStats>,
    /// Deployment environment reported by the health check
    pub environment: Arc<str>,
}

impl AppState {
    /// Wire every repository and service onto one pool
    pub fn new(
        pool: DbPool,
        tokens: TokenService,
        matcher: Option<Arc<dyn MatcherClient>>,
        environment: &str,
    ) -> Self {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let nco_repo = SqlxNcoCodeRepository::boxed(pool.clone());
        let search_repo = SqlxSearchRepository::boxed(pool.clone());
        let api_request_repo = SqlxApiRequestRepository::boxed(pool.clone());

        let mut job_service =
            JobSearchService::new(search_repo.clone(), nco_repo.clone(), api_request_repo.clone());
        if let Some(matcher) = matcher {
            job_service = job_service.with_matcher(matcher);
        }

        Self {
            user_service: Arc::new(UserService::new(user_repo, tokens)),
            job_service: Arc::new(job_service),
            nco_service: Arc::new(NcoCodeService::new(nco_repo, search_repo)),
            dataset_service: Arc::new(DatasetService::new(SqlxDatasetRepository::boxed(
                pool.clone(),
            ))),
            config_service: Arc::new(SystemConfigService::new(
                SqlxSystemConfigRepository::boxed(pool.clone()),
            )),
            analytics_service: Arc::new(AnalyticsService::new(
                SqlxAnalyticsRepository::boxed(pool.clone()),
                api_request_repo,
            )),
            audit_service: Arc::new(AuditService::new(SqlxAuditLogRepository::boxed(
                pool.clone(),
            ))),
            request_stats: Arc::new(RequestStats::new()),
            environment: Arc::from(environment),
            pool,
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("User not authenticated."))
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let mut ctx = request_context(&parts.method, &parts.uri, &parts.headers);
        if let Some(mark) = parts.extensions.get::<AuditMark>() {
            ctx.audited = mark.clone();
        }
        Ok(ctx)
    }
}

fn request_context(method: &axum::http::Method, uri: &axum::http::Uri, headers: &HeaderMap) -> RequestContext {
    RequestContext {
        method: method.to_string(),
        endpoint: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(String::from),
        ip_address: extract_ip_address(headers),
        audited: AuditMark::default(),
    }
}

/// Client IP from proxy headers
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(ip) = forwarded.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()) {
            return Some(ip.to_string());
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

// ============================================================================
// Errors
// ============================================================================

/// Error returned by every handler.
///
/// Serialized as `{"success": false, "message", "errors"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub errors: Vec<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// Log the cause and hide it from the client
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {:#}", cause);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "message": self.message,
            "errors": self.errors,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists => ApiError::validation_error(e.to_string()),
            UserServiceError::LoginFailed { .. } => ApiError::unauthorized(e.to_string()),
            UserServiceError::Unauthorized(msg) => ApiError::unauthorized(msg),
            UserServiceError::NotFound => ApiError::not_found(e.to_string()),
            UserServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<JobServiceError> for ApiError {
    fn from(e: JobServiceError) -> Self {
        match e {
            JobServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            JobServiceError::NotFound(msg) => ApiError::not_found(msg),
            JobServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<NcoCodeServiceError> for ApiError {
    fn from(e: NcoCodeServiceError) -> Self {
        match e {
            NcoCodeServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            NcoCodeServiceError::DuplicateCode => ApiError::validation_error(e.to_string()),
            NcoCodeServiceError::NotFound => ApiError::not_found(e.to_string()),
            NcoCodeServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<DatasetServiceError> for ApiError {
    fn from(e: DatasetServiceError) -> Self {
        match e {
            DatasetServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            DatasetServiceError::NotFound(msg) => ApiError::not_found(msg),
            DatasetServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            DatasetServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<SystemConfigServiceError> for ApiError {
    fn from(e: SystemConfigServiceError) -> Self {
        match e {
            SystemConfigServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            SystemConfigServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<AnalyticsServiceError> for ApiError {
    fn from(e: AnalyticsServiceError) -> Self {
        match e {
            AnalyticsServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<crate::services::audit::AuditServiceError> for ApiError {
    fn from(e: crate::services::audit::AuditServiceError) -> Self {
        ApiError::internal_error(e)
    }
}

// ============================================================================
// Middleware
// ============================================================================

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
///
/// The user is also attached to the response so outer layers (auditing)
/// know who made the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Access token is required."))?
        .to_string();

    let user = state.user_service.authenticate(&token).await?;

    request.extensions_mut().insert(AuthenticatedUser(user.clone()));
    let mut response = next.run(request).await;
    response.extensions_mut().insert(AuthenticatedUser(user));
    Ok(response)
}

/// Admin authorization middleware; must run inside [`require_auth`]
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("User not authenticated."))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin access required."));
    }

    Ok(next.run(request).await)
}

/// Request statistics middleware
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state.request_stats.record(start.elapsed().as_micros() as u64);
    response
}

/// Request audit middleware
///
/// Records significant requests after the response is produced, unless
/// the handler already wrote its own entry. Writing the entry never
/// affects the response.
pub async fn audit_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = request_context(request.method(), request.uri(), request.headers());
    if is_ignored_path(request.uri().path()) || !should_log_endpoint(&ctx.method, &ctx.endpoint) {
        return next.run(request).await;
    }

    request.extensions_mut().insert(ctx.audited.clone());

    let start = Instant::now();
    let response = next.run(request).await;
    if ctx.audited.is_set() {
        return response;
    }

    let status = response.status();
    let success = status.is_success() || status.is_redirection();

    let (action, resource_type) = classify_request(&ctx.method, &ctx.endpoint, success);
    let user_id = response
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.id);

    let mut entry = NewAuditLog::new(action, resource_type)
        .user(user_id)
        .request(&ctx)
        .duration(start.elapsed().as_millis() as i64)
        .metadata(json!({ "statusCode": status.as_u16() }));
    if !success {
        entry = entry.failed(format!("HTTP {}", status.as_u16()));
    }
    state.audit_service.log(entry).await;

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Method, Uri};

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(extract_bearer_token(&headers).is_none());
    }

    #[test]
    fn test_extract_ip_address() {
        let mut headers = HeaderMap::new();
        assert!(extract_ip_address(&headers).is_none());

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(extract_ip_address(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(extract_ip_address(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_request_context_keeps_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        let uri: Uri = "/api/v1/jobs/nco-codes?page=2".parse().unwrap();

        let ctx = request_context(&Method::GET, &uri, &headers);
        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.endpoint, "/api/v1/jobs/nco-codes?page=2");
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8"));
        assert!(ctx.ip_address.is_none());
    }

    #[test]
    fn test_request_stats_average() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_us(), 0.0);
        stats.record(100);
        stats.record(300);
        assert_eq!(stats.total_requests(), 2);
        assert!((stats.avg_response_time_us() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_service_errors_map_to_status() {
        let e: ApiError = UserServiceError::UserExists.into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e: ApiError = UserServiceError::LoginFailed { user_id: None, reason: "User not found" }.into();
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        assert_eq!(e.message, "Invalid email or password.");

        let e: ApiError = DatasetServiceError::Forbidden("Access denied to this dataset.").into();
        assert_eq!(e.status, StatusCode::FORBIDDEN);

        let e: ApiError = NcoCodeServiceError::InternalError(anyhow::anyhow!("db down")).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, "Internal server error");
    }
}
