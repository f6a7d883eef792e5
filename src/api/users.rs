//! User API endpoints
//!
//! - POST /api/v1/users/register
//! - POST /api/v1/users/login
//! - GET/PUT /api/v1/users/profile
//! - GET /api/v1/users/search-history
//! - PUT /api/v1/users/change-password
//! - GET /api/v1/users/get-allUsers (admin)
//! - PUT /api/v1/users/{userId}/role (admin)
//! - DELETE /api/v1/users/{userId} (admin)

use axum::{
    extract::State,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use crate::api::common::{non_empty, parse_flag, Json, PaginationQuery, Path, Query};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, Listing};
use crate::models::{
    RequestContext, SearchHistoryEntry, UpdateProfileInput, User, UserFilter, UserRole,
    UserWithCounts,
};
use crate::services::user::AuthResponse;
use crate::services::{AuditAction, LoginInput, RegisterInput, UserServiceError};

/// Routes reachable without a token
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Routes for any authenticated user
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .route("/search-history", get(search_history))
        .route("/change-password", put(change_password))
}

/// User administration
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/get-allUsers", get(list_users))
        .route("/{userId}/role", put(update_role))
        .route("/{userId}", delete(delete_user))
}

async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(input): Json<RegisterInput>,
) -> Result<ApiResponse<AuthResponse>, ApiError> {
    let auth = state.user_service.register(input).await?;

    state
        .audit_service
        .log(
            AuditAction::Register
                .entry()
                .user(Some(auth.user.id))
                .resource(auth.user.id)
                .request(&ctx)
                .metadata(json!({ "email": auth.user.email, "role": auth.user.role })),
        )
        .await;

    Ok(ApiResponse::created(auth, "User registered successfully"))
}

async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(input): Json<LoginInput>,
) -> Result<ApiResponse<AuthResponse>, ApiError> {
    let email = input.email.trim().to_lowercase();

    match state.user_service.login(input).await {
        Ok(auth) => {
            state
                .audit_service
                .log(
                    AuditAction::Login
                        .entry()
                        .user(Some(auth.user.id))
                        .resource(auth.user.id)
                        .request(&ctx),
                )
                .await;
            Ok(ApiResponse::ok(auth, "Login successful"))
        }
        Err(UserServiceError::LoginFailed { user_id, reason }) => {
            state
                .audit_service
                .log(
                    AuditAction::FailedLogin
                        .entry()
                        .user(user_id)
                        .request(&ctx)
                        .failed(reason)
                        .metadata(json!({ "email": email })),
                )
                .await;
            Err(UserServiceError::LoginFailed { user_id, reason }.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn get_profile(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<ApiResponse<UserWithCounts>, ApiError> {
    let profile = state.user_service.profile(user.id).await?;
    Ok(ApiResponse::ok(profile, "User profile retrieved successfully"))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ctx: RequestContext,
    Json(input): Json<UpdateProfileInput>,
) -> Result<ApiResponse<User>, ApiError> {
    let changed: Vec<&str> = [
        ("name", input.name.is_some()),
        ("phone", input.phone.is_some()),
        ("region", input.region.is_some()),
        ("language", input.language.is_some()),
    ]
    .into_iter()
    .filter_map(|(field, set)| set.then_some(field))
    .collect();

    let updated = state.user_service.update_profile(user.id, input).await?;

    state
        .audit_service
        .log(
            AuditAction::ProfileUpdate
                .entry()
                .user(Some(user.id))
                .resource(user.id)
                .request(&ctx)
                .metadata(json!({ "updatedFields": changed })),
        )
        .await;

    Ok(ApiResponse::ok(updated, "Profile updated successfully"))
}

async fn search_history(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<PaginationQuery>,
) -> Result<ApiResponse<Listing<SearchHistoryEntry>>, ApiError> {
    let params = query.params(10);
    let page = state.job_service.history(user.id, &params).await?;
    Ok(ApiResponse::ok(
        Listing::new("searches", page),
        "Search history retrieved successfully",
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ctx: RequestContext,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<ApiResponse<Option<()>>, ApiError> {
    state
        .user_service
        .change_password(user.id, &body.current_password, &body.new_password)
        .await?;

    state
        .audit_service
        .log(
            AuditAction::PasswordChange
                .entry()
                .user(Some(user.id))
                .resource(user.id)
                .request(&ctx),
        )
        .await;

    Ok(ApiResponse::ok(None, "Password changed successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListUsersQuery {
    page: Option<u32>,
    limit: Option<u32>,
    role: Option<String>,
    region: Option<String>,
    is_active: Option<String>,
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<ApiResponse<Listing<UserWithCounts>>, ApiError> {
    let role = match non_empty(query.role) {
        Some(raw) => Some(
            UserRole::from_str(&raw).map_err(|_| ApiError::validation_error("Invalid role."))?,
        ),
        None => None,
    };
    let filter = UserFilter {
        role,
        region: non_empty(query.region),
        is_active: parse_flag(query.is_active.as_deref()),
    };
    let params = PaginationQuery { page: query.page, limit: query.limit }.params(10);

    let page = state.user_service.list_users(&filter, &params).await?;
    Ok(ApiResponse::ok(Listing::new("users", page), "Users retrieved successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRoleRequest {
    role: Option<String>,
    is_active: Option<bool>,
}

async fn update_role(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(user_id): Path<i64>,
    ctx: RequestContext,
    Json(body): Json<UpdateRoleRequest>,
) -> Result<ApiResponse<User>, ApiError> {
    let role = match body.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => Some(
            UserRole::from_str(raw).map_err(|_| ApiError::validation_error("Invalid role."))?,
        ),
        None => None,
    };

    let updated = state.user_service.update_role(user_id, role, body.is_active).await?;

    state
        .audit_service
        .log(
            AuditAction::ChangeRole
                .entry()
                .user(Some(admin.id))
                .resource(user_id)
                .request(&ctx)
                .metadata(json!({ "role": updated.role, "isActive": updated.is_active })),
        )
        .await;

    Ok(ApiResponse::ok(updated, "User role updated successfully"))
}

async fn delete_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(user_id): Path<i64>,
    ctx: RequestContext,
) -> Result<ApiResponse<Option<()>>, ApiError> {
    let user = state.user_service.deactivate(admin.id, user_id).await?;

    state
        .audit_service
        .log(
            AuditAction::DeleteUser
                .entry()
                .user(Some(admin.id))
                .resource(user_id)
                .request(&ctx)
                .metadata(json!({ "email": user.email })),
        )
        .await;

    Ok(ApiResponse::ok(None, "User deleted successfully"))
}
