//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP API endpoints of the NCO portal, mounted
//! under `/api/v1`:
//! - User accounts and authentication (`/users`)
//! - Occupation search and the NCO catalogue (`/jobs`)
//! - Datasets and their records (`/datasets`)
//! - Administration (`/admin`)
//! - Analytics (`/analytics`)
//! - Public utilities (`/utility`)

pub mod admin;
pub mod analytics;
pub mod common;
pub mod datasets;
pub mod jobs;
pub mod middleware;
pub mod responses;
pub mod users;
pub mod utility;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthenticatedUser, RequestStats};
pub use responses::{ApiResponse, Listing, Pagination};

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .nest("/users", users::admin_router())
        .nest("/analytics", analytics::admin_router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need auth but not admin)
    let protected_routes = Router::new()
        .nest("/users", users::protected_router())
        .nest("/jobs", jobs::protected_router())
        .nest("/datasets", datasets::router())
        .nest("/analytics", analytics::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .nest("/users", users::public_router())
        .nest("/jobs", jobs::public_router())
        .nest("/analytics", analytics::public_router())
        .nest("/utility", utility::router())
        .merge(admin_routes)
        .merge(protected_routes)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(AllowOrigin::any());
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::audit_middleware,
        ))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::models::UserRole;
    use crate::services::TokenService;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};

    async fn setup() -> (TestServer, AppState) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();

        let tokens = TokenService::new("test-secret", chrono::Duration::hours(1)).unwrap();
        let state = AppState::new(pool, tokens, None, "test");
        let app = build_router(state.clone(), &["http://localhost:3000".to_string()]);
        (TestServer::new(app).unwrap(), state)
    }

    async fn register(server: &TestServer, email: &str) -> (i64, String) {
        let response = server
            .post("/api/v1/users/register")
            .json(&json!({ "name": "Asha", "email": email, "password": "secret123" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        let id = body["data"]["user"]["id"].as_i64().unwrap();
        let token = body["data"]["token"].as_str().unwrap().to_string();
        (id, token)
    }

    async fn register_admin(server: &TestServer, state: &AppState) -> String {
        let (id, token) = register(server, "admin@example.com").await;
        state
            .user_service
            .update_role(id, Some(UserRole::Admin), None)
            .await
            .unwrap();
        token
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _) = setup().await;

        let response = server.get("/api/v1/utility/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["statusCode"], 200);
        assert_eq!(body["data"]["database"], "connected");
        assert_eq!(body["data"]["environment"], "test");
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let (server, _) = setup().await;

        let response = server.get("/api/v1/users/profile").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Access token is required.");

        let response = server
            .get("/api/v1/users/profile")
            .authorization_bearer("not-a-token")
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_login_and_profile() {
        let (server, _) = setup().await;
        let (id, token) = register(&server, "Asha@Example.com").await;

        let response = server
            .post("/api/v1/users/register")
            .json(&json!({ "name": "Other", "email": "asha@example.com", "password": "secret123" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server
            .post("/api/v1/users/login")
            .json(&json!({ "email": "asha@example.com", "password": "wrong-password" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server
            .post("/api/v1/users/login")
            .json(&json!({ "email": "asha@example.com", "password": "secret123" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let response = server
            .get("/api/v1/users/profile")
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["data"]["id"], id);
        assert_eq!(body["data"]["email"], "asha@example.com");
        assert_eq!(body["data"]["searchCount"], 0);
        assert!(body["data"].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_admin_routes_reject_regular_users() {
        let (server, _) = setup().await;
        let (_, token) = register(&server, "user@example.com").await;

        let response = server
            .get("/api/v1/admin/dashboard")
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["message"], "Admin access required.");

        let response = server
            .get("/api/v1/users/get-allUsers")
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_create_code_then_search_with_keyword_fallback() {
        let (server, state) = setup().await;
        let admin_token = register_admin(&server, &state).await;

        let response = server
            .post("/api/v1/admin/nco-codes")
            .authorization_bearer(&admin_token)
            .json(&json!({
                "ncoCode": "75310100",
                "title": "Tailor, General",
                "description": "Makes and alters garments to measure",
                "majorGroup": "7",
                "subMajorGroup": "75",
                "minorGroup": "753",
                "unitGroup": "7531",
                "keywords": ["tailor", "garment"]
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["data"]["isVerified"], true);

        let (_, user_token) = register(&server, "worker@example.com").await;
        let response = server
            .post("/api/v1/jobs/search")
            .authorization_bearer(&user_token)
            .json(&json!({ "query": "tailor" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = response.json();
        assert_eq!(body["data"]["totalResults"], 1);
        assert_eq!(body["data"]["source"], "fallback");
        assert_eq!(body["data"]["results"][0]["rank"], 1);
        assert_eq!(body["data"]["results"][0]["ncoCode"]["ncoCode"], "75310100");

        let response = server.get("/api/v1/utility/validate-nco/75310100").await;
        let body: Value = response.json();
        assert_eq!(body["data"]["exists"], true);

        let response = server.get("/api/v1/utility/validate-nco/7531").await;
        let body: Value = response.json();
        assert_eq!(body["data"]["isValid"], false);
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let (server, _) = setup().await;
        let (_, token) = register(&server, "blank@example.com").await;

        let response = server
            .post("/api/v1/jobs/search")
            .authorization_bearer(&token)
            .json(&json!({ "query": "   " }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_events_are_audited() {
        let (server, state) = setup().await;
        let admin_token = register_admin(&server, &state).await;

        server
            .post("/api/v1/users/login")
            .json(&json!({ "email": "nobody@example.com", "password": "secret123" }))
            .await;

        let response = server
            .get("/api/v1/admin/audit-logs")
            .add_query_param("action", "FAILED_LOGIN")
            .authorization_bearer(&admin_token)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = response.json();
        assert_eq!(body["data"]["pagination"]["total"], 1);
        assert_eq!(body["data"]["logs"][0]["success"], false);
        assert_eq!(body["data"]["logs"][0]["errorMessage"], "User not found");
    }

    #[tokio::test]
    async fn test_each_login_attempt_is_audited_once() {
        let (server, state) = setup().await;
        register(&server, "once@example.com").await;

        server
            .post("/api/v1/users/login")
            .json(&json!({ "email": "once@example.com", "password": "wrong-password" }))
            .await;
        server
            .post("/api/v1/users/login")
            .json(&json!({ "email": "once@example.com", "password": "secret123" }))
            .await;
        server
            .post("/api/v1/users/register")
            .content_type("application/json")
            .bytes(axum::body::Bytes::from_static(b"{not json"))
            .await;

        let actions: Vec<String> = sqlx::query_scalar("SELECT action FROM audit_logs ORDER BY id")
            .fetch_all(&state.pool)
            .await
            .unwrap();
        assert_eq!(actions, vec!["REGISTER", "FAILED_LOGIN", "LOGIN", "REGISTRATION_FAILED"]);
    }

    #[tokio::test]
    async fn test_malformed_requests_use_error_envelope() {
        let (server, _) = setup().await;

        let response = server
            .post("/api/v1/users/register")
            .content_type("application/json")
            .bytes(axum::body::Bytes::from_static(b"{not json"))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("JSON"));

        let response = server.get("/api/v1/jobs/nco-codes/abc").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(body["errors"].is_array());

        let response = server
            .get("/api/v1/jobs/nco-codes")
            .add_query_param("page", "-1")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("query string"));
    }

    #[tokio::test]
    async fn test_hierarchy_rejects_unknown_level() {
        let (server, _) = setup().await;

        let response = server
            .get("/api/v1/utility/nco-hierarchy")
            .add_query_param("level", "galaxy")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server.get("/api/v1/utility/nco-hierarchy").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["data"]["level"], "major");
        assert_eq!(body["data"]["totalGroups"], 0);
    }
}
