//! Search repository
//!
//! Search history rows together with their ranked results and feedback.

use crate::db::repositories::{decode_list, encode_list, like_pattern};
use crate::db::DbPool;
use crate::models::{
    AiServiceStatus, CodeSummary, FeedbackInput, FeedbackSummary, InputMethod, ListParams,
    MatchType, NewSearch, NewSearchResult, QueryCount, SearchFeedback, SearchHistory,
    SearchHistoryEntry, SearchResult, TopResult,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait SearchRepository: Send + Sync {
    async fn create_search(&self, search: &NewSearch) -> Result<SearchHistory>;

    /// Store ranked results for a search
    async fn insert_results(&self, search_id: i64, results: &[NewSearchResult]) -> Result<Vec<SearchResult>>;

    /// Record how the search went once matching is over
    async fn update_outcome(
        &self,
        search_id: i64,
        total_results: i64,
        processing_time: i64,
        status: AiServiceStatus,
    ) -> Result<()>;

    async fn get_search(&self, id: i64) -> Result<Option<SearchHistory>>;

    async fn feedback_exists(&self, search_id: i64) -> Result<bool>;

    /// Insert feedback; the rating must already be clamped
    async fn create_feedback(&self, user_id: i64, search_id: i64, input: &FeedbackInput) -> Result<SearchFeedback>;

    /// Flag the result for `nco_code_id` in a search as selected
    async fn mark_selected(&self, search_id: i64, nco_code_id: i64) -> Result<()>;

    /// Get a result only if its search belongs to `user_id`
    async fn get_result_for_user(&self, result_id: i64, user_id: i64) -> Result<Option<SearchResult>>;

    async fn mark_viewed(&self, result_id: i64) -> Result<SearchResult>;

    /// A user's searches, newest first, with top three results and feedback
    async fn history(&self, user_id: i64, params: &ListParams) -> Result<(Vec<SearchHistoryEntry>, i64)>;

    /// Most frequent queries since `since` that returned results
    async fn popular_queries(&self, since: DateTime<Utc>, language: &str, limit: i64) -> Result<Vec<QueryCount>>;

    /// Distinct recent queries containing `term`
    async fn recent_matching_queries(&self, term: &str, limit: i64) -> Result<Vec<String>>;

    async fn count_all(&self) -> Result<i64>;

    async fn count_since(&self, since: DateTime<Utc>) -> Result<i64>;
}

pub struct SqlxSearchRepository {
    pool: DbPool,
}

impl SqlxSearchRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DbPool) -> Arc<dyn SearchRepository> {
        Arc::new(Self::new(pool))
    }

    async fn get_result(&self, id: i64) -> Result<Option<SearchResult>> {
        let row = sqlx::query(&format!("SELECT {} FROM search_results WHERE id = ?", RESULT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get search result")?;

        row.as_ref().map(row_to_result).transpose()
    }
}

const SEARCH_COLUMNS: &str = "id, user_id, query, language, input_method, session_id, user_agent, ip_address, \
     total_results, processing_time, ai_service_status, searched_at";

const RESULT_COLUMNS: &str = "id, search_id, nco_code_id, relevance_score, confidence_score, rank, match_type, \
     matched_keywords, explanation, was_viewed, viewed_at, was_selected, selected_at, created_at";

#[async_trait]
impl SearchRepository for SqlxSearchRepository {
    async fn create_search(&self, search: &NewSearch) -> Result<SearchHistory> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO search_history (user_id, query, language, input_method, session_id, user_agent,
                ip_address, total_results, searched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(search.user_id)
        .bind(&search.query)
        .bind(&search.language)
        .bind(search.input_method.to_string())
        .bind(&search.session_id)
        .bind(&search.user_agent)
        .bind(&search.ip_address)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create search")?;

        Ok(SearchHistory {
            id: result.last_insert_rowid(),
            user_id: search.user_id,
            query: search.query.clone(),
            language: search.language.clone(),
            input_method: search.input_method,
            session_id: search.session_id.clone(),
            user_agent: search.user_agent.clone(),
            ip_address: search.ip_address.clone(),
            total_results: 0,
            processing_time: None,
            ai_service_status: None,
            searched_at: now,
        })
    }

    async fn insert_results(&self, search_id: i64, results: &[NewSearchResult]) -> Result<Vec<SearchResult>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let mut stored = Vec::with_capacity(results.len());

        for result in results {
            let inserted = sqlx::query(
                r#"
                INSERT INTO search_results (search_id, nco_code_id, relevance_score, confidence_score, rank,
                    match_type, matched_keywords, explanation, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(search_id)
            .bind(result.nco_code_id)
            .bind(result.relevance_score)
            .bind(result.confidence_score)
            .bind(result.rank)
            .bind(result.match_type.to_string())
            .bind(encode_list(&result.matched_keywords))
            .bind(&result.explanation)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to store search result")?;

            stored.push(SearchResult {
                id: inserted.last_insert_rowid(),
                search_id,
                nco_code_id: result.nco_code_id,
                relevance_score: result.relevance_score,
                confidence_score: result.confidence_score,
                rank: result.rank,
                match_type: result.match_type,
                matched_keywords: result.matched_keywords.clone(),
                explanation: result.explanation.clone(),
                was_viewed: false,
                viewed_at: None,
                was_selected: false,
                selected_at: None,
                created_at: now,
            });
        }

        tx.commit().await.context("Failed to commit search results")?;
        Ok(stored)
    }

    async fn update_outcome(
        &self,
        search_id: i64,
        total_results: i64,
        processing_time: i64,
        status: AiServiceStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE search_history SET total_results = ?, processing_time = ?, ai_service_status = ? WHERE id = ?",
        )
        .bind(total_results)
        .bind(processing_time)
        .bind(status.to_string())
        .bind(search_id)
        .execute(&self.pool)
        .await
        .context("Failed to update search outcome")?;
        Ok(())
    }

    async fn get_search(&self, id: i64) -> Result<Option<SearchHistory>> {
        let row = sqlx::query(&format!("SELECT {} FROM search_history WHERE id = ?", SEARCH_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get search")?;

        row.as_ref().map(row_to_search).transpose()
    }

    async fn feedback_exists(&self, search_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_feedback WHERE search_id = ?")
            .bind(search_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check feedback")?;
        Ok(count > 0)
    }

    async fn create_feedback(&self, user_id: i64, search_id: i64, input: &FeedbackInput) -> Result<SearchFeedback> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO search_feedback (user_id, search_id, selected_code_id, rating, is_correct, was_helpful,
                comments, correction_reason, suggested_keywords, reported_issue, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(search_id)
        .bind(input.selected_code_id)
        .bind(input.rating)
        .bind(input.is_correct)
        .bind(input.was_helpful)
        .bind(&input.comments)
        .bind(&input.correction_reason)
        .bind(encode_list(&input.suggested_keywords))
        .bind(&input.reported_issue)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create feedback")?;

        Ok(SearchFeedback {
            id: result.last_insert_rowid(),
            user_id,
            search_id,
            selected_code_id: input.selected_code_id,
            rating: input.rating,
            is_correct: input.is_correct,
            was_helpful: input.was_helpful,
            comments: input.comments.clone(),
            correction_reason: input.correction_reason.clone(),
            suggested_keywords: input.suggested_keywords.clone(),
            reported_issue: input.reported_issue.clone(),
            created_at: now,
        })
    }

    async fn mark_selected(&self, search_id: i64, nco_code_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE search_results SET was_selected = 1, selected_at = ? WHERE search_id = ? AND nco_code_id = ?",
        )
        .bind(Utc::now())
        .bind(search_id)
        .bind(nco_code_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark result selected")?;
        Ok(())
    }

    async fn get_result_for_user(&self, result_id: i64, user_id: i64) -> Result<Option<SearchResult>> {
        let row = sqlx::query(
            r#"
            SELECT r.id, r.search_id, r.nco_code_id, r.relevance_score, r.confidence_score, r.rank,
                   r.match_type, r.matched_keywords, r.explanation, r.was_viewed, r.viewed_at,
                   r.was_selected, r.selected_at, r.created_at
            FROM search_results r
            JOIN search_history s ON s.id = r.search_id
            WHERE r.id = ? AND s.user_id = ?
            "#,
        )
        .bind(result_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get search result")?;

        row.as_ref().map(row_to_result).transpose()
    }

    async fn mark_viewed(&self, result_id: i64) -> Result<SearchResult> {
        sqlx::query("UPDATE search_results SET was_viewed = 1, viewed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(result_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark result viewed")?;

        self.get_result(result_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Search result not found after update"))
    }

    async fn history(&self, user_id: i64, params: &ListParams) -> Result<(Vec<SearchHistoryEntry>, i64)> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM search_history WHERE user_id = ? ORDER BY searched_at DESC, id DESC LIMIT ? OFFSET ?",
            SEARCH_COLUMNS
        ))
        .bind(user_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list search history")?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_history WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count search history")?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let search = row_to_search(row)?;

            let top_rows = sqlx::query(
                r#"
                SELECT r.rank, r.relevance_score, c.id AS code_id, c.nco_code, c.title
                FROM search_results r
                JOIN nco_codes c ON c.id = r.nco_code_id
                WHERE r.search_id = ?
                ORDER BY r.rank ASC
                LIMIT 3
                "#,
            )
            .bind(search.id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load top results")?;

            let top_results = top_rows
                .iter()
                .map(|r| TopResult {
                    rank: r.get("rank"),
                    relevance_score: r.get("relevance_score"),
                    code: CodeSummary {
                        id: r.get("code_id"),
                        nco_code: r.get("nco_code"),
                        title: r.get("title"),
                    },
                })
                .collect();

            let feedback = sqlx::query("SELECT rating, is_correct FROM search_feedback WHERE search_id = ?")
                .bind(search.id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load feedback")?
                .map(|r| FeedbackSummary {
                    rating: r.get("rating"),
                    is_correct: r.get("is_correct"),
                });

            entries.push(SearchHistoryEntry {
                search,
                top_results,
                feedback,
            });
        }

        Ok((entries, total))
    }

    async fn popular_queries(&self, since: DateTime<Utc>, language: &str, limit: i64) -> Result<Vec<QueryCount>> {
        let rows = sqlx::query(
            r#"
            SELECT query, COUNT(*) AS count
            FROM search_history
            WHERE searched_at >= ? AND language = ? AND total_results > 0
            GROUP BY query
            ORDER BY count DESC, query ASC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(language)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load popular queries")?;

        Ok(rows
            .iter()
            .map(|row| QueryCount {
                query: row.get("query"),
                count: row.get("count"),
            })
            .collect())
    }

    async fn recent_matching_queries(&self, term: &str, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT query, MAX(searched_at) AS last_searched
            FROM search_history
            WHERE query LIKE ? ESCAPE '\' AND total_results > 0
            GROUP BY query
            ORDER BY last_searched DESC
            LIMIT ?
            "#,
        )
        .bind(like_pattern(term))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load matching queries")?;

        Ok(rows.iter().map(|row| row.get("query")).collect())
    }

    async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_history")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count searches")?;
        Ok(count)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_history WHERE searched_at >= ?")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count searches")?;
        Ok(count)
    }
}

fn row_to_search(row: &sqlx::sqlite::SqliteRow) -> Result<SearchHistory> {
    let input_method: String = row.get("input_method");

    Ok(SearchHistory {
        id: row.get("id"),
        user_id: row.get("user_id"),
        query: row.get("query"),
        language: row.get("language"),
        input_method: InputMethod::from_str(&input_method)?,
        session_id: row.get("session_id"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
        total_results: row.get("total_results"),
        processing_time: row.get("processing_time"),
        ai_service_status: row.get("ai_service_status"),
        searched_at: row.get("searched_at"),
    })
}

fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> Result<SearchResult> {
    let match_type: String = row.get("match_type");

    Ok(SearchResult {
        id: row.get("id"),
        search_id: row.get("search_id"),
        nco_code_id: row.get("nco_code_id"),
        relevance_score: row.get("relevance_score"),
        confidence_score: row.get("confidence_score"),
        rank: row.get("rank"),
        match_type: MatchType::from_str(&match_type)?,
        matched_keywords: decode_list(row.get("matched_keywords")),
        explanation: row.get("explanation"),
        was_viewed: row.get("was_viewed"),
        viewed_at: row.get("viewed_at"),
        was_selected: row.get("was_selected"),
        selected_at: row.get("selected_at"),
        created_at: row.get("created_at"),
    })
}
