//! NCO portal - job description classification backend

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nco_portal::{
    api::{self, AppState},
    config::Config,
    db,
    services::{AnalyticsService, HttpMatcherClient, MatcherClient, TokenService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nco_portal=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting NCO portal...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!(environment = %config.app.environment, "Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {}", config.database.url);

    // Run migrations
    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!(applied, "Database migrations completed");

    let tokens = TokenService::from_config(&config.auth)?;

    let matcher: Option<Arc<dyn MatcherClient>> = match HttpMatcherClient::from_config(&config.matcher)? {
        Some(client) => {
            tracing::info!("Semantic matcher enabled");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("No matcher configured, searches use keyword matching");
            None
        }
    };

    // Build application state
    let state = AppState::new(pool, tokens, matcher, &config.app.environment);

    spawn_analytics_rollup(
        state.analytics_service.clone(),
        Duration::from_secs(config.app.analytics_rollup_interval_secs.max(60)),
    );

    let app = api::build_router(state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically roll search history up into daily analytics rows
fn spawn_analytics_rollup(analytics: Arc<AnalyticsService>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match analytics.rollup_recent(Utc::now()).await {
                Ok(rows) => tracing::debug!(rows, "Search analytics rollup finished"),
                Err(e) => tracing::warn!("Search analytics rollup failed: {}", e),
            }
        }
    });
}
