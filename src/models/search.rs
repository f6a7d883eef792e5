//! Search models
//!
//! A search is one free-text query. It owns its ranked results and at most
//! one piece of feedback from the user who ran it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the query was entered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputMethod {
    #[default]
    Text,
    Voice,
    Api,
}

impl fmt::Display for InputMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMethod::Text => write!(f, "TEXT"),
            InputMethod::Voice => write!(f, "VOICE"),
            InputMethod::Api => write!(f, "API"),
        }
    }
}

impl FromStr for InputMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TEXT" => Ok(InputMethod::Text),
            "VOICE" => Ok(InputMethod::Voice),
            "API" => Ok(InputMethod::Api),
            _ => Err(anyhow::anyhow!("Invalid input method: {}", s)),
        }
    }
}

/// How a result was matched to the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    /// Query is the code itself
    Exact,
    /// Local keyword fallback
    Keyword,
    /// Ranked by the external matcher
    Semantic,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => write!(f, "EXACT"),
            MatchType::Keyword => write!(f, "KEYWORD"),
            MatchType::Semantic => write!(f, "SEMANTIC"),
        }
    }
}

impl FromStr for MatchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EXACT" => Ok(MatchType::Exact),
            "KEYWORD" => Ok(MatchType::Keyword),
            "SEMANTIC" => Ok(MatchType::Semantic),
            _ => Err(anyhow::anyhow!("Invalid match type: {}", s)),
        }
    }
}

/// Outcome of consulting the external matcher for one search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiServiceStatus {
    /// Matcher answered
    Success,
    /// No matcher configured, keyword fallback used
    Fallback,
    /// Matcher failed, keyword fallback used
    Error,
}

impl fmt::Display for AiServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiServiceStatus::Success => write!(f, "success"),
            AiServiceStatus::Fallback => write!(f, "fallback"),
            AiServiceStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistory {
    pub id: i64,
    pub user_id: i64,
    pub query: String,
    pub language: String,
    pub input_method: InputMethod,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub total_results: i64,
    /// Milliseconds
    pub processing_time: Option<i64>,
    pub ai_service_status: Option<String>,
    pub searched_at: DateTime<Utc>,
}

/// Input for recording a new search
#[derive(Debug, Clone)]
pub struct NewSearch {
    pub user_id: i64,
    pub query: String,
    pub language: String,
    pub input_method: InputMethod,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: i64,
    pub search_id: i64,
    pub nco_code_id: i64,
    pub relevance_score: f64,
    pub confidence_score: f64,
    pub rank: i64,
    pub match_type: MatchType,
    pub matched_keywords: Vec<String>,
    pub explanation: Option<String>,
    pub was_viewed: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub was_selected: bool,
    pub selected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A ranked match ready to be stored against a search
#[derive(Debug, Clone, PartialEq)]
pub struct NewSearchResult {
    pub nco_code_id: i64,
    pub relevance_score: f64,
    pub confidence_score: f64,
    pub rank: i64,
    pub match_type: MatchType,
    pub matched_keywords: Vec<String>,
    pub explanation: Option<String>,
}

/// Short code reference embedded in listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSummary {
    pub id: i64,
    pub nco_code: String,
    pub title: String,
}

/// Search history entry with its top results and feedback
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistoryEntry {
    #[serde(flatten)]
    pub search: SearchHistory,
    pub top_results: Vec<TopResult>,
    pub feedback: Option<FeedbackSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopResult {
    pub rank: i64,
    pub relevance_score: f64,
    pub code: CodeSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSummary {
    pub rating: Option<i64>,
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFeedback {
    pub id: i64,
    pub user_id: i64,
    pub search_id: i64,
    pub selected_code_id: Option<i64>,
    pub rating: Option<i64>,
    pub is_correct: Option<bool>,
    pub was_helpful: Option<bool>,
    pub comments: Option<String>,
    pub correction_reason: Option<String>,
    pub suggested_keywords: Vec<String>,
    pub reported_issue: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Feedback as submitted by a user
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackInput {
    pub search_id: Option<i64>,
    pub selected_code_id: Option<i64>,
    pub rating: Option<i64>,
    pub is_correct: Option<bool>,
    pub was_helpful: Option<bool>,
    pub comments: Option<String>,
    pub correction_reason: Option<String>,
    #[serde(default)]
    pub suggested_keywords: Vec<String>,
    pub reported_issue: Option<String>,
}

/// Clamp a user rating into 1..=5
pub fn clamp_rating(rating: i64) -> i64 {
    rating.clamp(1, 5)
}
