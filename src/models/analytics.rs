//! Analytics models
//!
//! Aggregates computed over search history, results and feedback, plus the
//! persisted daily rollup rows in `search_analytics`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reporting window accepted by the analytics endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
}

impl Period {
    pub fn duration(&self) -> Duration {
        match self {
            Period::Day => Duration::hours(24),
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
            Period::Quarter => Duration::days(90),
        }
    }

    /// Start of the window ending at `now`
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "24h",
            Period::Week => "7d",
            Period::Month => "30d",
            Period::Quarter => "90d",
        }
    }

    /// Parse a period, falling back to `default` for unknown values
    pub fn parse_or(value: Option<&str>, default: Period) -> Period {
        value.and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(Period::Day),
            "7d" => Ok(Period::Week),
            "30d" => Ok(Period::Month),
            "90d" => Ok(Period::Quarter),
            _ => Err(anyhow::anyhow!("Invalid period: {}", s)),
        }
    }
}

/// Persisted daily rollup row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnalytics {
    pub id: i64,
    /// `YYYY-MM-DD`
    pub date: String,
    pub language: String,
    pub region: Option<String>,
    pub total_searches: i64,
    pub unique_users: i64,
    pub avg_processing_time: Option<f64>,
    pub avg_results: Option<f64>,
    pub successful_searches: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchAnalyticsFilter {
    /// Inclusive `YYYY-MM-DD` bounds
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub language: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySearchStat {
    pub date: String,
    pub total_searches: i64,
    pub unique_users: i64,
    pub avg_processing_time: Option<f64>,
    pub avg_results: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCount {
    pub query: String,
    pub count: i64,
}

/// Count of searches per AI service outcome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub ai_service_status: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTrends {
    pub period: Period,
    pub daily_stats: Vec<DailySearchStat>,
    pub top_queries: Vec<QueryCount>,
    pub success_stats: Vec<StatusCount>,
    pub total_searches: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularCode {
    pub id: i64,
    pub nco_code: String,
    pub title: String,
    pub sector: Option<String>,
    pub skill_level: Option<String>,
    pub major_group: String,
    pub search_count: i64,
    pub avg_relevance_score: Option<f64>,
    pub avg_confidence_score: Option<f64>,
}

/// Count of feedback rows sharing one value of a field
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueCount<T> {
    pub value: Option<T>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentComment {
    pub comments: String,
    pub rating: Option<i64>,
    pub is_correct: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub user_name: String,
    pub user_region: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAnalytics {
    pub period: Period,
    pub rating_distribution: Vec<ValueCount<i64>>,
    pub correctness_stats: Vec<ValueCount<bool>>,
    pub helpfulness_stats: Vec<ValueCount<bool>>,
    pub recent_comments: Vec<RecentComment>,
    pub total_feedbacks: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub region: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEngagement {
    pub user: EngagementUser,
    pub search_count: i64,
    pub avg_processing_time: Option<f64>,
    pub feedback_count: i64,
    pub avg_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub period: Period,
    pub api_requests_total: i64,
    pub api_avg_duration: f64,
    pub searches_total: i64,
    pub searches_avg_processing_time: f64,
    pub status_breakdown: Vec<StatusCount>,
    /// Searches whose AI status was anything but `success`
    pub total_errors: i64,
    pub total_requests: i64,
}
