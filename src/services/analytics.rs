//! Analytics service
//!
//! Aggregates over search history, results, feedback and outbound API
//! requests, plus the daily `search_analytics` rollup.

use crate::db::repositories::{AnalyticsRepository, ApiRequestRepository, FeedbackScope, SearchScope};
use crate::models::{
    ApiRequest, ApiRequestFilter, FeedbackAnalytics, ListParams, PagedResult, Period,
    PerformanceMetrics, PopularCode, SearchAnalytics, SearchAnalyticsFilter, SearchTrends,
    StatusCount, UserEngagement,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

const TOP_QUERY_LIMIT: i64 = 10;
const RECENT_COMMENT_LIMIT: i64 = 10;
const ROLLUP_LIST_LIMIT: i64 = 30;
const ENGAGEMENT_ADMIN_LIMIT: i64 = 50;
pub const DEFAULT_POPULAR_CODE_LIMIT: i64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsServiceError {
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularCodes {
    pub period: Period,
    pub popular_codes: Vec<PopularCode>,
    pub total_codes: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementReport {
    pub period: Period,
    pub user_engagement: Vec<UserEngagement>,
    pub total_active_users: usize,
}

/// Who is asking for engagement numbers
#[derive(Debug, Clone, Copy)]
pub enum EngagementViewer {
    Admin,
    User(i64),
}

pub struct AnalyticsService {
    repo: Arc<dyn AnalyticsRepository>,
    api_requests: Arc<dyn ApiRequestRepository>,
}

impl AnalyticsService {
    pub fn new(repo: Arc<dyn AnalyticsRepository>, api_requests: Arc<dyn ApiRequestRepository>) -> Self {
        Self { repo, api_requests }
    }

    pub async fn search_trends(
        &self,
        period: Period,
        language: Option<String>,
        region: Option<String>,
    ) -> Result<SearchTrends, AnalyticsServiceError> {
        let scope = SearchScope {
            since: period.since(Utc::now()),
            language,
            region,
        };

        let daily_stats = self
            .repo
            .daily_stats(&scope)
            .await
            .context("Failed to load daily search stats")?;
        let top_queries = self
            .repo
            .top_queries(&scope, TOP_QUERY_LIMIT)
            .await
            .context("Failed to load top queries")?;
        let success_stats = self
            .repo
            .status_breakdown(&scope)
            .await
            .context("Failed to load search status breakdown")?;

        Ok(SearchTrends {
            period,
            total_searches: success_stats.iter().map(|s| s.count).sum(),
            daily_stats,
            top_queries,
            success_stats,
        })
    }

    pub async fn popular_codes(
        &self,
        period: Period,
        sector: Option<&str>,
        skill_level: Option<&str>,
        limit: i64,
    ) -> Result<PopularCodes, AnalyticsServiceError> {
        let popular_codes = self
            .repo
            .popular_codes(period.since(Utc::now()), sector, skill_level, limit.clamp(1, 100))
            .await
            .context("Failed to load popular NCO codes")?;

        Ok(PopularCodes {
            period,
            total_codes: popular_codes.len(),
            popular_codes,
        })
    }

    pub async fn feedback(
        &self,
        period: Period,
        min_rating: Option<i64>,
        max_rating: Option<i64>,
    ) -> Result<FeedbackAnalytics, AnalyticsServiceError> {
        let scope = FeedbackScope {
            since: period.since(Utc::now()),
            min_rating,
            max_rating,
        };

        let rating_distribution = self
            .repo
            .rating_distribution(&scope)
            .await
            .context("Failed to load rating distribution")?;
        let correctness_stats = self
            .repo
            .correctness_stats(&scope)
            .await
            .context("Failed to load correctness stats")?;
        let helpfulness_stats = self
            .repo
            .helpfulness_stats(&scope)
            .await
            .context("Failed to load helpfulness stats")?;
        let recent_comments = self
            .repo
            .recent_comments(&scope, RECENT_COMMENT_LIMIT)
            .await
            .context("Failed to load recent comments")?;

        Ok(FeedbackAnalytics {
            period,
            total_feedbacks: rating_distribution.iter().map(|r| r.count).sum(),
            rating_distribution,
            correctness_stats,
            helpfulness_stats,
            recent_comments,
        })
    }

    /// Admins get the most active users; everyone else only their own row
    pub async fn user_engagement(
        &self,
        period: Period,
        viewer: EngagementViewer,
    ) -> Result<EngagementReport, AnalyticsServiceError> {
        let (user_id, limit) = match viewer {
            EngagementViewer::Admin => (None, ENGAGEMENT_ADMIN_LIMIT),
            EngagementViewer::User(id) => (Some(id), 1),
        };

        let user_engagement = self
            .repo
            .user_engagement(period.since(Utc::now()), user_id, limit)
            .await
            .context("Failed to load user engagement")?;

        Ok(EngagementReport {
            period,
            total_active_users: user_engagement.len(),
            user_engagement,
        })
    }

    pub async fn performance(&self, period: Period) -> Result<PerformanceMetrics, AnalyticsServiceError> {
        let since = period.since(Utc::now());

        let (api_requests_total, api_avg_duration) = self
            .api_requests
            .stats_since(since)
            .await
            .context("Failed to load API request stats")?;
        let (searches_total, searches_avg_processing_time) = self
            .repo
            .search_stats(since)
            .await
            .context("Failed to load search stats")?;
        let status_breakdown = self
            .repo
            .status_breakdown(&SearchScope::since(since))
            .await
            .context("Failed to load search status breakdown")?;

        Ok(PerformanceMetrics {
            period,
            api_requests_total,
            api_avg_duration: api_avg_duration.unwrap_or(0.0),
            searches_total,
            searches_avg_processing_time: searches_avg_processing_time.unwrap_or(0.0),
            total_errors: count_errors(&status_breakdown),
            total_requests: status_breakdown.iter().map(|s| s.count).sum(),
            status_breakdown,
        })
    }

    /// Search count and mean processing time since `since`
    pub async fn search_stats(&self, since: DateTime<Utc>) -> Result<(i64, Option<f64>), AnalyticsServiceError> {
        Ok(self
            .repo
            .search_stats(since)
            .await
            .context("Failed to load search stats")?)
    }

    /// Recompute the rollup for one `YYYY-MM-DD` day
    pub async fn rollup_day(&self, date: &str) -> Result<u64, AnalyticsServiceError> {
        let rows = self
            .repo
            .rollup_day(date)
            .await
            .with_context(|| format!("Failed to roll up search analytics for {}", date))?;
        tracing::debug!(date, rows, "Search analytics rolled up");
        Ok(rows)
    }

    /// Roll up today and yesterday; late searches land in the right day
    pub async fn rollup_recent(&self, now: DateTime<Utc>) -> Result<u64, AnalyticsServiceError> {
        let mut rows = 0;
        for day in [now - Duration::days(1), now] {
            rows += self.rollup_day(&day.format("%Y-%m-%d").to_string()).await?;
        }
        Ok(rows)
    }

    pub async fn list_rollups(
        &self,
        filter: &SearchAnalyticsFilter,
    ) -> Result<Vec<SearchAnalytics>, AnalyticsServiceError> {
        Ok(self
            .repo
            .list_rollups(filter, ROLLUP_LIST_LIMIT)
            .await
            .context("Failed to list search analytics")?)
    }

    /// Outbound matcher calls, newest first
    pub async fn api_requests(
        &self,
        filter: &ApiRequestFilter,
        params: &ListParams,
    ) -> Result<PagedResult<ApiRequest>, AnalyticsServiceError> {
        let (items, total) = self
            .api_requests
            .list(filter, params)
            .await
            .context("Failed to list API requests")?;
        Ok(PagedResult::new(items, total, params))
    }
}

/// Searches whose matcher outcome was anything but `success`
fn count_errors(breakdown: &[StatusCount]) -> i64 {
    breakdown
        .iter()
        .filter(|s| s.ai_service_status.as_deref() != Some("success"))
        .map(|s| s.count)
        .sum()
}
