//! Job search service
//!
//! The search-and-feedback flow: a free-text query is recorded, ranked
//! against the NCO taxonomy and answered with scored code matches. Users
//! then mark results as viewed and leave one piece of feedback per search.
//!
//! Ranking is delegated to the external matcher when one is configured.
//! Without it, or when it fails, a local keyword match over titles,
//! descriptions, keywords and synonyms is used instead.

use crate::db::repositories::{ApiRequestRepository, NcoCodeRepository, SearchRepository};
use crate::models::{
    clamp_rating, AiServiceStatus, ApiRequestStatus, FeedbackInput, InputMethod, ListParams,
    MatchType, NcoCode, NcoCodeFilter, NcoCodeWithCounts, NewApiRequest, NewSearch,
    NewSearchResult, PagedResult, QueryCount, RequestContext, SearchFeedback, SearchHistoryEntry,
    SearchResult,
};
use crate::services::matcher::{MatcherClient, MatcherError, MatcherHit};
use anyhow::Context;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Default number of matches returned per search
pub const DEFAULT_SEARCH_LIMIT: i64 = 10;

/// Upper bound on matches returned per search
pub const MAX_SEARCH_LIMIT: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum JobServiceError {
    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Search request body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInput {
    #[serde(default)]
    pub query: String,
    pub language: Option<String>,
    pub input_method: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<i64>,
}

impl SearchInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// A stored result together with the matched code
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub nco_code: NcoCode,
}

/// Answer to a search request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub search_id: i64,
    pub query: String,
    pub total_results: i64,
    pub results: Vec<RankedResult>,
    /// Milliseconds
    pub processing_time: i64,
    /// Whether the matcher answered or the keyword fallback was used
    pub source: AiServiceStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularSearch {
    pub query: String,
    pub search_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularSearches {
    pub popular_queries: Vec<PopularSearch>,
    pub period: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedCode {
    #[serde(flatten)]
    pub code: NcoCode,
    pub search_result_count: i64,
}

pub struct JobSearchService {
    search_repo: Arc<dyn SearchRepository>,
    nco_repo: Arc<dyn NcoCodeRepository>,
    api_request_repo: Arc<dyn ApiRequestRepository>,
    matcher: Option<Arc<dyn MatcherClient>>,
}

impl JobSearchService {
    pub fn new(
        search_repo: Arc<dyn SearchRepository>,
        nco_repo: Arc<dyn NcoCodeRepository>,
        api_request_repo: Arc<dyn ApiRequestRepository>,
    ) -> Self {
        Self {
            search_repo,
            nco_repo,
            api_request_repo,
            matcher: None,
        }
    }

    /// Use an external matcher for ranking
    pub fn with_matcher(mut self, matcher: Arc<dyn MatcherClient>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn has_matcher(&self) -> bool {
        self.matcher.is_some()
    }

    /// Run a search for a user and persist its ranked results
    pub async fn search(
        &self,
        user_id: i64,
        input: SearchInput,
        ctx: &RequestContext,
    ) -> Result<SearchOutcome, JobServiceError> {
        let started = Instant::now();

        let query = input.query.trim().to_string();
        if query.is_empty() {
            return Err(JobServiceError::ValidationError(
                "Search query is required.".to_string(),
            ));
        }

        let input_method = match input.input_method.as_deref() {
            Some(raw) => InputMethod::from_str(raw)
                .map_err(|e| JobServiceError::ValidationError(e.to_string()))?,
            None => InputMethod::Text,
        };
        let limit = input
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);

        let search = self
            .search_repo
            .create_search(&NewSearch {
                user_id,
                query: query.clone(),
                language: input
                    .language
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| "en".to_string()),
                input_method,
                session_id: input.session_id,
                user_agent: ctx.user_agent.clone(),
                ip_address: ctx.ip_address.clone(),
            })
            .await
            .context("Failed to record search")?;

        let (ranked, source) = match &self.matcher {
            Some(matcher) => match self.semantic_matches(matcher.as_ref(), search.id, &query, limit).await? {
                Some(ranked) => (ranked, AiServiceStatus::Success),
                None => (self.keyword_matches(&query, limit).await?, AiServiceStatus::Error),
            },
            None => (self.keyword_matches(&query, limit).await?, AiServiceStatus::Fallback),
        };

        let new_results: Vec<NewSearchResult> = ranked.iter().map(|(r, _)| r.clone()).collect();
        let stored = self
            .search_repo
            .insert_results(search.id, &new_results)
            .await
            .context("Failed to store search results")?;

        let results: Vec<RankedResult> = stored
            .into_iter()
            .zip(ranked.into_iter().map(|(_, code)| code))
            .map(|(result, nco_code)| RankedResult { result, nco_code })
            .collect();

        let total_results = results.len() as i64;
        let processing_time = started.elapsed().as_millis() as i64;
        self.search_repo
            .update_outcome(search.id, total_results, processing_time, source)
            .await
            .context("Failed to update search outcome")?;

        tracing::info!(
            search_id = search.id,
            total_results,
            processing_time,
            source = %source,
            "Job search completed"
        );

        Ok(SearchOutcome {
            search_id: search.id,
            query,
            total_results,
            results,
            processing_time,
            source,
        })
    }

    /// Ask the matcher and resolve its hits to local codes.
    ///
    /// Returns `None` when the call failed; the outbound request is recorded
    /// either way.
    async fn semantic_matches(
        &self,
        matcher: &dyn MatcherClient,
        search_id: i64,
        query: &str,
        limit: i64,
    ) -> Result<Option<Vec<(NewSearchResult, NcoCode)>>, JobServiceError> {
        let started = Instant::now();
        let outcome = matcher.search(query).await;
        let response_time = started.elapsed().as_millis() as i64;

        let (status, status_code, error_message) = match &outcome {
            Ok(_) => (ApiRequestStatus::Success, Some(200), None),
            Err(e) => (
                match e {
                    MatcherError::Timeout => ApiRequestStatus::Timeout,
                    _ => ApiRequestStatus::Error,
                },
                e.status_code().map(i64::from),
                Some(e.to_string()),
            ),
        };

        let record = NewApiRequest {
            service_name: matcher.service_name().to_string(),
            endpoint: matcher.endpoint(),
            method: "GET".to_string(),
            status,
            status_code,
            response_time,
            error_message,
            search_id: Some(search_id),
        };
        if let Err(e) = self.api_request_repo.create(&record).await {
            tracing::warn!(search_id, "Failed to record matcher request: {:#}", e);
        }

        let hits = match outcome {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(search_id, "Matcher unavailable, using keyword fallback: {}", e);
                return Ok(None);
            }
        };

        Ok(Some(self.resolve_hits(query, hits, limit).await?))
    }

    async fn resolve_hits(
        &self,
        query: &str,
        hits: Vec<MatcherHit>,
        limit: i64,
    ) -> Result<Vec<(NewSearchResult, NcoCode)>, JobServiceError> {
        let query_code: String = query.chars().filter(|c| !c.is_whitespace()).collect();
        let mut seen = HashSet::new();
        let mut ranked = Vec::new();

        for hit in hits {
            if ranked.len() as i64 >= limit {
                break;
            }

            let code = hit.normalized_code();
            if !seen.insert(code.clone()) {
                continue;
            }

            let nco_code = match self
                .nco_repo
                .get_by_code(&code)
                .await
                .context("Failed to resolve matcher hit")?
            {
                Some(c) if c.is_active => c,
                _ => {
                    tracing::debug!(code = %hit.title_code, "Skipping unknown matcher code");
                    continue;
                }
            };

            let score = hit.score_fraction();
            let exact = query_code == hit.title_code || query_code == nco_code.nco_code;
            ranked.push((
                NewSearchResult {
                    nco_code_id: nco_code.id,
                    relevance_score: score,
                    confidence_score: score,
                    rank: ranked.len() as i64 + 1,
                    match_type: if exact { MatchType::Exact } else { MatchType::Semantic },
                    matched_keywords: Vec::new(),
                    explanation: Some(format!("Semantic match {} with {}", hit.score.trim(), nco_code.title)),
                },
                nco_code,
            ));
        }

        Ok(ranked)
    }

    async fn keyword_matches(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(NewSearchResult, NcoCode)>, JobServiceError> {
        let words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let codes = self
            .nco_repo
            .keyword_search(query, &words, limit)
            .await
            .context("Failed to run keyword search")?;

        Ok(codes
            .into_iter()
            .enumerate()
            .map(|(i, code)| {
                let (relevance, confidence) = keyword_scores(i);
                (
                    NewSearchResult {
                        nco_code_id: code.id,
                        relevance_score: relevance,
                        confidence_score: confidence,
                        rank: i as i64 + 1,
                        match_type: MatchType::Keyword,
                        matched_keywords: words.clone(),
                        explanation: Some(format!("Matched keywords in {}", code.title)),
                    },
                    code,
                )
            })
            .collect())
    }

    /// Record the caller's feedback on one of their searches
    pub async fn submit_feedback(
        &self,
        user_id: i64,
        mut input: FeedbackInput,
    ) -> Result<SearchFeedback, JobServiceError> {
        let search_id = input
            .search_id
            .ok_or_else(|| JobServiceError::ValidationError("Search ID is required.".to_string()))?;

        let search = self
            .search_repo
            .get_search(search_id)
            .await
            .context("Failed to load search")?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| JobServiceError::NotFound("Search not found or not authorized.".to_string()))?;

        if self
            .search_repo
            .feedback_exists(search.id)
            .await
            .context("Failed to check feedback")?
        {
            return Err(JobServiceError::ValidationError(
                "Feedback already submitted for this search.".to_string(),
            ));
        }

        input.rating = input.rating.map(clamp_rating);

        let feedback = self
            .search_repo
            .create_feedback(user_id, search.id, &input)
            .await
            .context("Failed to store feedback")?;

        if let Some(code_id) = feedback.selected_code_id {
            self.search_repo
                .mark_selected(search.id, code_id)
                .await
                .context("Failed to mark selected result")?;
        }

        Ok(feedback)
    }

    /// Mark one of the caller's results as viewed
    pub async fn mark_viewed(&self, user_id: i64, result_id: i64) -> Result<SearchResult, JobServiceError> {
        self.search_repo
            .get_result_for_user(result_id, user_id)
            .await
            .context("Failed to load search result")?
            .ok_or_else(|| {
                JobServiceError::NotFound("Search result not found or not authorized.".to_string())
            })?;

        Ok(self
            .search_repo
            .mark_viewed(result_id)
            .await
            .context("Failed to mark result viewed")?)
    }

    /// The caller's searches, newest first
    pub async fn history(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<SearchHistoryEntry>, JobServiceError> {
        let (entries, total) = self
            .search_repo
            .history(user_id, params)
            .await
            .context("Failed to load search history")?;
        Ok(PagedResult::new(entries, total, params))
    }

    /// Most frequent successful queries of the last `days` days
    pub async fn popular_searches(
        &self,
        days: i64,
        language: &str,
        limit: i64,
    ) -> Result<PopularSearches, JobServiceError> {
        let days = days.max(1);
        let since = Utc::now() - Duration::days(days);
        let queries: Vec<QueryCount> = self
            .search_repo
            .popular_queries(since, language, limit.clamp(1, 100))
            .await
            .context("Failed to load popular searches")?;

        Ok(PopularSearches {
            popular_queries: queries
                .into_iter()
                .map(|q| PopularSearch {
                    query: q.query,
                    search_count: q.count,
                })
                .collect(),
            period: format!("Last {} days", days),
            language: language.to_string(),
        })
    }

    pub async fn recommendations(
        &self,
        sector: Option<&str>,
        skill_level: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecommendedCode>, JobServiceError> {
        let codes = self
            .nco_repo
            .recommendations(sector, skill_level, limit.clamp(1, 100))
            .await
            .context("Failed to load recommendations")?;

        Ok(codes
            .into_iter()
            .map(|(code, search_result_count)| RecommendedCode {
                code,
                search_result_count,
            })
            .collect())
    }

    pub async fn list_codes(
        &self,
        filter: &NcoCodeFilter,
        params: &ListParams,
    ) -> Result<PagedResult<NcoCode>, JobServiceError> {
        let (codes, total) = self
            .nco_repo
            .list(filter, params)
            .await
            .context("Failed to list NCO codes")?;
        Ok(PagedResult::new(codes, total, params))
    }

    pub async fn get_code(&self, id: i64) -> Result<NcoCodeWithCounts, JobServiceError> {
        let code = self
            .nco_repo
            .get_by_id(id)
            .await
            .context("Failed to get NCO code")?
            .ok_or_else(|| JobServiceError::NotFound("NCO Code not found.".to_string()))?;

        let refs = self
            .nco_repo
            .references(id)
            .await
            .context("Failed to count NCO code references")?;

        Ok(NcoCodeWithCounts {
            code,
            search_result_count: refs.search_results,
            feedback_count: refs.feedbacks,
        })
    }
}

/// Fallback scores for the `rank`-th (zero based) keyword match
pub fn keyword_scores(rank: usize) -> (f64, f64) {
    let i = rank as f64;
    ((0.8 - 0.1 * i).max(0.0), (0.7 - 0.05 * i).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::nco_code::sample_code;
    use crate::db::repositories::{
        SqlxApiRequestRepository, SqlxNcoCodeRepository, SqlxSearchRepository, SqlxUserRepository,
        UserRepository,
    };
    use crate::db::{create_test_pool, migrations, DbPool};
    use crate::models::{ApiRequestFilter, User, UserRole};
    use async_trait::async_trait;
    use proptest::prelude::*;

    /// Matcher double answering from a fixed script
    struct ScriptedMatcher {
        answer: Result<Vec<MatcherHit>, u16>,
    }

    #[async_trait]
    impl MatcherClient for ScriptedMatcher {
        fn service_name(&self) -> &str {
            "nco-matcher"
        }

        fn endpoint(&self) -> String {
            "http://matcher.test/search".to_string()
        }

        async fn search(&self, _query: &str) -> Result<Vec<MatcherHit>, MatcherError> {
            match &self.answer {
                Ok(hits) => Ok(hits.clone()),
                Err(0) => Err(MatcherError::Timeout),
                Err(code) => Err(MatcherError::Status(*code)),
            }
        }
    }

    fn hit(code: &str, score: &str) -> MatcherHit {
        MatcherHit {
            title_code: code.to_string(),
            title: String::new(),
            score: score.to_string(),
            description: String::new(),
        }
    }

    struct Fixture {
        pool: DbPool,
        user_id: i64,
        other_user_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let user = users
            .create(&User::new("A".into(), "a@example.com".into(), "h".into(), UserRole::User))
            .await
            .unwrap();
        let other = users
            .create(&User::new("B".into(), "b@example.com".into(), "h".into(), UserRole::User))
            .await
            .unwrap();

        let codes = SqlxNcoCodeRepository::new(pool.clone());
        codes.create(&sample_code("75310100", "Tailor", &["stitching", "garments"])).await.unwrap();
        codes.create(&sample_code("83220100", "Car Driver", &["driving"])).await.unwrap();
        let mut unverified = sample_code("83220200", "Taxi Driver", &["cab"]);
        unverified.is_verified = false;
        codes.create(&unverified).await.unwrap();

        Fixture {
            pool,
            user_id: user.id,
            other_user_id: other.id,
        }
    }

    fn service(pool: &DbPool) -> JobSearchService {
        JobSearchService::new(
            SqlxSearchRepository::boxed(pool.clone()),
            SqlxNcoCodeRepository::boxed(pool.clone()),
            SqlxApiRequestRepository::boxed(pool.clone()),
        )
    }

    #[tokio::test]
    async fn test_keyword_fallback_without_matcher() {
        let f = setup().await;
        let service = service(&f.pool);

        let outcome = service
            .search(f.user_id, SearchInput::new("  driver "), &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(outcome.query, "driver");
        assert_eq!(outcome.source, AiServiceStatus::Fallback);
        assert_eq!(outcome.total_results, 2);
        // verified codes first, then by title
        assert_eq!(outcome.results[0].nco_code.title, "Car Driver");
        assert_eq!(outcome.results[1].nco_code.title, "Taxi Driver");
        assert_eq!(outcome.results[0].result.rank, 1);
        assert_eq!(outcome.results[0].result.match_type, MatchType::Keyword);
        assert_eq!(
            outcome.results[0].result.explanation.as_deref(),
            Some("Matched keywords in Car Driver")
        );
        assert!((outcome.results[1].result.relevance_score - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_keyword_matches_synonym_words() {
        let f = setup().await;
        let service = service(&f.pool);

        let outcome = service
            .search(f.user_id, SearchInput::new("garments repair"), &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(outcome.total_results, 1);
        assert_eq!(outcome.results[0].nco_code.nco_code, "75310100");
        assert_eq!(outcome.results[0].result.matched_keywords, vec!["garments", "repair"]);
    }

    #[tokio::test]
    async fn test_blank_query_and_bad_input_method_rejected() {
        let f = setup().await;
        let service = service(&f.pool);

        let blank = service
            .search(f.user_id, SearchInput::new("   "), &RequestContext::default())
            .await;
        assert!(matches!(blank, Err(JobServiceError::ValidationError(_))));

        let input = SearchInput {
            input_method: Some("SMOKE_SIGNAL".into()),
            ..SearchInput::new("tailor")
        };
        let bad = service.search(f.user_id, input, &RequestContext::default()).await;
        assert!(matches!(bad, Err(JobServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_matcher_hits_resolved_and_recorded() {
        let f = setup().await;
        let matcher = ScriptedMatcher {
            answer: Ok(vec![
                hit("8322.0200", "92%"),
                hit("9999.9999", "90%"),
                hit("8322.0200", "85%"),
                hit("7531.0100", "40%"),
            ]),
        };
        let service = service(&f.pool).with_matcher(Arc::new(matcher));

        let outcome = service
            .search(f.user_id, SearchInput::new("cab driver"), &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(outcome.source, AiServiceStatus::Success);
        let codes: Vec<_> = outcome.results.iter().map(|r| r.nco_code.nco_code.as_str()).collect();
        assert_eq!(codes, vec!["83220200", "75310100"]);
        assert_eq!(outcome.results[0].result.match_type, MatchType::Semantic);
        assert!((outcome.results[0].result.relevance_score - 0.92).abs() < 1e-9);
        assert_eq!(outcome.results[1].result.rank, 2);

        let requests = SqlxApiRequestRepository::new(f.pool.clone());
        let (rows, total) = requests
            .list(&ApiRequestFilter::default(), &ListParams::new(1, 10))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].status, "success");
        assert_eq!(rows[0].search_id, Some(outcome.search_id));
    }

    #[tokio::test]
    async fn test_exact_code_query() {
        let f = setup().await;
        let matcher = ScriptedMatcher {
            answer: Ok(vec![hit("75310100", "100%")]),
        };
        let service = service(&f.pool).with_matcher(Arc::new(matcher));

        let outcome = service
            .search(f.user_id, SearchInput::new("75310100"), &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(outcome.results[0].result.match_type, MatchType::Exact);
    }

    #[tokio::test]
    async fn test_matcher_failure_falls_back() {
        let f = setup().await;
        for (code, expected_status) in [(503u16, "error"), (0u16, "timeout")] {
            let matcher = ScriptedMatcher { answer: Err(code) };
            let service = service(&f.pool).with_matcher(Arc::new(matcher));

            let outcome = service
                .search(f.user_id, SearchInput::new("tailor"), &RequestContext::default())
                .await
                .unwrap();
            assert_eq!(outcome.source, AiServiceStatus::Error);
            assert_eq!(outcome.total_results, 1);

            let requests = SqlxApiRequestRepository::new(f.pool.clone());
            let (rows, _) = requests
                .list(
                    &ApiRequestFilter {
                        status: Some(expected_status.to_string()),
                        ..Default::default()
                    },
                    &ListParams::new(1, 10),
                )
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_limit_is_capped() {
        let f = setup().await;
        let service = service(&f.pool);
        let input = SearchInput {
            limit: Some(1),
            ..SearchInput::new("driver")
        };
        let outcome = service.search(f.user_id, input, &RequestContext::default()).await.unwrap();
        assert_eq!(outcome.total_results, 1);
    }

    #[tokio::test]
    async fn test_feedback_rules() {
        let f = setup().await;
        let service = service(&f.pool);
        let outcome = service
            .search(f.user_id, SearchInput::new("driver"), &RequestContext::default())
            .await
            .unwrap();
        let selected = outcome.results[1].nco_code.id;

        let missing_id = service.submit_feedback(f.user_id, FeedbackInput::default()).await;
        assert!(matches!(missing_id, Err(JobServiceError::ValidationError(_))));

        let foreign = service
            .submit_feedback(
                f.other_user_id,
                FeedbackInput {
                    search_id: Some(outcome.search_id),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(foreign, Err(JobServiceError::NotFound(_))));

        let feedback = service
            .submit_feedback(
                f.user_id,
                FeedbackInput {
                    search_id: Some(outcome.search_id),
                    selected_code_id: Some(selected),
                    rating: Some(11),
                    is_correct: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(feedback.rating, Some(5));

        let again = service
            .submit_feedback(
                f.user_id,
                FeedbackInput {
                    search_id: Some(outcome.search_id),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(again, Err(JobServiceError::ValidationError(_))));

        let history = service.history(f.user_id, &ListParams::new(1, 10)).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].feedback.as_ref().and_then(|fb| fb.rating), Some(5));
    }

    #[tokio::test]
    async fn test_mark_viewed_requires_ownership() {
        let f = setup().await;
        let service = service(&f.pool);
        let outcome = service
            .search(f.user_id, SearchInput::new("tailor"), &RequestContext::default())
            .await
            .unwrap();
        let result_id = outcome.results[0].result.id;

        let foreign = service.mark_viewed(f.other_user_id, result_id).await;
        assert!(matches!(foreign, Err(JobServiceError::NotFound(_))));

        let viewed = service.mark_viewed(f.user_id, result_id).await.unwrap();
        assert!(viewed.was_viewed);
        assert!(viewed.viewed_at.is_some());
    }

    #[tokio::test]
    async fn test_popular_searches_and_code_counts() {
        let f = setup().await;
        let service = service(&f.pool);
        for q in ["tailor", "tailor", "driver", "astronaut"] {
            service
                .search(f.user_id, SearchInput::new(q), &RequestContext::default())
                .await
                .unwrap();
        }

        let popular = service.popular_searches(7, "en", 10).await.unwrap();
        assert_eq!(popular.period, "Last 7 days");
        assert_eq!(popular.popular_queries[0].query, "tailor");
        assert_eq!(popular.popular_queries[0].search_count, 2);
        // zero-result searches are not popular
        assert!(popular.popular_queries.iter().all(|q| q.query != "astronaut"));

        let tailor = service
            .list_codes(
                &NcoCodeFilter {
                    search: Some("tailor".into()),
                    ..Default::default()
                },
                &ListParams::new(1, 20),
            )
            .await
            .unwrap();
        let with_counts = service.get_code(tailor.items[0].id).await.unwrap();
        assert_eq!(with_counts.search_result_count, 2);

        let recommended = service.recommendations(None, None, 10).await.unwrap();
        assert_eq!(recommended[0].code.title, "Tailor");
        assert!(recommended.iter().all(|r| r.code.is_verified));

        assert!(matches!(
            service.get_code(9999).await,
            Err(JobServiceError::NotFound(_))
        ));
    }

    proptest! {
        #[test]
        fn keyword_scores_never_increase(rank in 0usize..60) {
            let (r1, c1) = keyword_scores(rank);
            let (r2, c2) = keyword_scores(rank + 1);
            prop_assert!(r2 <= r1 && c2 <= c1);
            prop_assert!(r2 >= 0.0 && c2 >= 0.0);
        }
    }
}
