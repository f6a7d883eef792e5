//! Analytics repository
//!
//! Read-only aggregation queries over searches, results and feedback, plus
//! the daily rollup into `search_analytics`.

use crate::db::DbPool;
use crate::models::{
    DailySearchStat, EngagementUser, PopularCode, QueryCount, RecentComment, SearchAnalytics,
    SearchAnalyticsFilter, StatusCount, UserEngagement, ValueCount,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// Which searches an aggregate covers
#[derive(Debug, Clone)]
pub struct SearchScope {
    pub since: DateTime<Utc>,
    pub language: Option<String>,
    /// Region of the searching user
    pub region: Option<String>,
}

impl SearchScope {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since,
            language: None,
            region: None,
        }
    }
}

/// Which feedback an aggregate covers
#[derive(Debug, Clone)]
pub struct FeedbackScope {
    pub since: DateTime<Utc>,
    pub min_rating: Option<i64>,
    pub max_rating: Option<i64>,
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    /// Per-day search statistics, newest day first
    async fn daily_stats(&self, scope: &SearchScope) -> Result<Vec<DailySearchStat>>;

    async fn top_queries(&self, scope: &SearchScope, limit: i64) -> Result<Vec<QueryCount>>;

    /// Search counts grouped by AI service outcome
    async fn status_breakdown(&self, scope: &SearchScope) -> Result<Vec<StatusCount>>;

    /// Search count and mean processing time
    async fn search_stats(&self, since: DateTime<Utc>) -> Result<(i64, Option<f64>)>;

    /// Codes ranked by how often they appeared in results
    async fn popular_codes(
        &self,
        since: DateTime<Utc>,
        sector: Option<&str>,
        skill_level: Option<&str>,
        limit: i64,
    ) -> Result<Vec<PopularCode>>;

    async fn rating_distribution(&self, scope: &FeedbackScope) -> Result<Vec<ValueCount<i64>>>;

    async fn correctness_stats(&self, scope: &FeedbackScope) -> Result<Vec<ValueCount<bool>>>;

    async fn helpfulness_stats(&self, scope: &FeedbackScope) -> Result<Vec<ValueCount<bool>>>;

    async fn recent_comments(&self, scope: &FeedbackScope, limit: i64) -> Result<Vec<RecentComment>>;

    /// Users ranked by search count; `user_id` narrows to one user
    async fn user_engagement(
        &self,
        since: DateTime<Utc>,
        user_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<UserEngagement>>;

    /// Recompute the rollup rows for one `YYYY-MM-DD` day. Returns the
    /// number of (language, region) rows written.
    async fn rollup_day(&self, date: &str) -> Result<u64>;

    async fn list_rollups(&self, filter: &SearchAnalyticsFilter, limit: i64) -> Result<Vec<SearchAnalytics>>;
}

pub struct SqlxAnalyticsRepository {
    pool: DbPool,
}

impl SqlxAnalyticsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DbPool) -> Arc<dyn AnalyticsRepository> {
        Arc::new(Self::new(pool))
    }

    async fn feedback_counts<T>(&self, column: &str, scope: &FeedbackScope) -> Result<Vec<ValueCount<T>>>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + Unpin,
    {
        let rows = sqlx::query(&format!(
            "SELECT {col} AS value, COUNT(*) AS count FROM search_feedback {} GROUP BY {col} ORDER BY {col} ASC",
            FEEDBACK_WHERE,
            col = column
        ))
        .bind(scope.since)
        .bind(scope.min_rating)
        .bind(scope.min_rating)
        .bind(scope.max_rating)
        .bind(scope.max_rating)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to group feedback by {}", column))?;

        Ok(rows
            .iter()
            .map(|row| ValueCount {
                value: row.get::<Option<T>, _>("value"),
                count: row.get("count"),
            })
            .collect())
    }
}

const SEARCH_WHERE: &str = r#"
    WHERE s.searched_at >= ?
      AND (? IS NULL OR s.language = ?)
      AND (? IS NULL OR u.region = ?)
"#;

const FEEDBACK_WHERE: &str = r#"
    WHERE created_at >= ?
      AND (? IS NULL OR rating >= ?)
      AND (? IS NULL OR rating <= ?)
"#;

#[async_trait]
impl AnalyticsRepository for SqlxAnalyticsRepository {
    async fn daily_stats(&self, scope: &SearchScope) -> Result<Vec<DailySearchStat>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT substr(s.searched_at, 1, 10) AS date,
                   COUNT(*) AS total_searches,
                   COUNT(DISTINCT s.user_id) AS unique_users,
                   AVG(s.processing_time) AS avg_processing_time,
                   AVG(s.total_results) AS avg_results
            FROM search_history s
            LEFT JOIN users u ON u.id = s.user_id
            {}
            GROUP BY date
            ORDER BY date DESC
            "#,
            SEARCH_WHERE
        ))
        .bind(scope.since)
        .bind(&scope.language)
        .bind(&scope.language)
        .bind(&scope.region)
        .bind(&scope.region)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load daily search stats")?;

        Ok(rows
            .iter()
            .map(|row| DailySearchStat {
                date: row.get("date"),
                total_searches: row.get("total_searches"),
                unique_users: row.get("unique_users"),
                avg_processing_time: row.get("avg_processing_time"),
                avg_results: row.get("avg_results"),
            })
            .collect())
    }

    async fn top_queries(&self, scope: &SearchScope, limit: i64) -> Result<Vec<QueryCount>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT s.query, COUNT(*) AS count
            FROM search_history s
            LEFT JOIN users u ON u.id = s.user_id
            {}
            GROUP BY s.query
            ORDER BY count DESC, s.query ASC
            LIMIT ?
            "#,
            SEARCH_WHERE
        ))
        .bind(scope.since)
        .bind(&scope.language)
        .bind(&scope.language)
        .bind(&scope.region)
        .bind(&scope.region)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load top queries")?;

        Ok(rows
            .iter()
            .map(|row| QueryCount {
                query: row.get("query"),
                count: row.get("count"),
            })
            .collect())
    }

    async fn status_breakdown(&self, scope: &SearchScope) -> Result<Vec<StatusCount>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT s.ai_service_status, COUNT(*) AS count
            FROM search_history s
            LEFT JOIN users u ON u.id = s.user_id
            {}
            GROUP BY s.ai_service_status
            ORDER BY s.ai_service_status ASC
            "#,
            SEARCH_WHERE
        ))
        .bind(scope.since)
        .bind(&scope.language)
        .bind(&scope.language)
        .bind(&scope.region)
        .bind(&scope.region)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load AI status breakdown")?;

        Ok(rows
            .iter()
            .map(|row| StatusCount {
                ai_service_status: row.get("ai_service_status"),
                count: row.get("count"),
            })
            .collect())
    }

    async fn search_stats(&self, since: DateTime<Utc>) -> Result<(i64, Option<f64>)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, AVG(processing_time) AS avg_time FROM search_history WHERE searched_at >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate searches")?;

        Ok((row.get("total"), row.get("avg_time")))
    }

    async fn popular_codes(
        &self,
        since: DateTime<Utc>,
        sector: Option<&str>,
        skill_level: Option<&str>,
        limit: i64,
    ) -> Result<Vec<PopularCode>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.nco_code, c.title, c.sector, c.skill_level, c.major_group,
                   COUNT(r.id) AS search_count,
                   AVG(r.relevance_score) AS avg_relevance_score,
                   AVG(r.confidence_score) AS avg_confidence_score
            FROM search_results r
            JOIN nco_codes c ON c.id = r.nco_code_id
            WHERE r.created_at >= ?
              AND (? IS NULL OR c.sector = ?)
              AND (? IS NULL OR c.skill_level = ?)
            GROUP BY c.id
            ORDER BY search_count DESC, c.nco_code ASC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(sector)
        .bind(sector)
        .bind(skill_level)
        .bind(skill_level)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load popular codes")?;

        Ok(rows
            .iter()
            .map(|row| PopularCode {
                id: row.get("id"),
                nco_code: row.get("nco_code"),
                title: row.get("title"),
                sector: row.get("sector"),
                skill_level: row.get("skill_level"),
                major_group: row.get("major_group"),
                search_count: row.get("search_count"),
                avg_relevance_score: row.get("avg_relevance_score"),
                avg_confidence_score: row.get("avg_confidence_score"),
            })
            .collect())
    }

    async fn rating_distribution(&self, scope: &FeedbackScope) -> Result<Vec<ValueCount<i64>>> {
        self.feedback_counts("rating", scope).await
    }

    async fn correctness_stats(&self, scope: &FeedbackScope) -> Result<Vec<ValueCount<bool>>> {
        self.feedback_counts("is_correct", scope).await
    }

    async fn helpfulness_stats(&self, scope: &FeedbackScope) -> Result<Vec<ValueCount<bool>>> {
        self.feedback_counts("was_helpful", scope).await
    }

    async fn recent_comments(&self, scope: &FeedbackScope, limit: i64) -> Result<Vec<RecentComment>> {
        let rows = sqlx::query(
            r#"
            SELECT f.comments, f.rating, f.is_correct, f.created_at, u.name AS user_name, u.region AS user_region
            FROM search_feedback f
            JOIN users u ON u.id = f.user_id
            WHERE f.created_at >= ?
              AND (? IS NULL OR f.rating >= ?)
              AND (? IS NULL OR f.rating <= ?)
              AND f.comments IS NOT NULL
            ORDER BY f.created_at DESC, f.id DESC
            LIMIT ?
            "#,
        )
        .bind(scope.since)
        .bind(scope.min_rating)
        .bind(scope.min_rating)
        .bind(scope.max_rating)
        .bind(scope.max_rating)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent comments")?;

        Ok(rows
            .iter()
            .map(|row| RecentComment {
                comments: row.get("comments"),
                rating: row.get("rating"),
                is_correct: row.get("is_correct"),
                created_at: row.get("created_at"),
                user_name: row.get("user_name"),
                user_region: row.get("user_region"),
            })
            .collect())
    }

    async fn user_engagement(
        &self,
        since: DateTime<Utc>,
        user_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<UserEngagement>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.name, u.email, u.region, u.role, u.created_at,
                   COUNT(s.id) AS search_count,
                   AVG(s.processing_time) AS avg_processing_time,
                   (SELECT COUNT(*) FROM search_feedback f
                    WHERE f.user_id = u.id AND f.created_at >= ?) AS feedback_count,
                   (SELECT AVG(f.rating) FROM search_feedback f
                    WHERE f.user_id = u.id AND f.created_at >= ?) AS avg_rating
            FROM search_history s
            JOIN users u ON u.id = s.user_id
            WHERE s.searched_at >= ? AND (? IS NULL OR s.user_id = ?)
            GROUP BY u.id
            ORDER BY search_count DESC, u.id ASC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(since)
        .bind(since)
        .bind(user_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load user engagement")?;

        Ok(rows
            .iter()
            .map(|row| UserEngagement {
                user: EngagementUser {
                    id: row.get("id"),
                    name: row.get("name"),
                    email: row.get("email"),
                    region: row.get("region"),
                    role: row.get("role"),
                    created_at: row.get("created_at"),
                },
                search_count: row.get("search_count"),
                avg_processing_time: row.get("avg_processing_time"),
                feedback_count: row.get("feedback_count"),
                avg_rating: row.get("avg_rating"),
            })
            .collect())
    }

    async fn rollup_day(&self, date: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO search_analytics (date, language, region, total_searches, unique_users,
                avg_processing_time, avg_results, successful_searches, created_at)
            SELECT ?, s.language, COALESCE(u.region, ''),
                   COUNT(*),
                   COUNT(DISTINCT s.user_id),
                   AVG(s.processing_time),
                   AVG(s.total_results),
                   SUM(CASE WHEN s.total_results > 0 THEN 1 ELSE 0 END),
                   ?
            FROM search_history s
            LEFT JOIN users u ON u.id = s.user_id
            WHERE substr(s.searched_at, 1, 10) = ?
            GROUP BY s.language, COALESCE(u.region, '')
            ON CONFLICT(date, language, region) DO UPDATE SET
                total_searches = excluded.total_searches,
                unique_users = excluded.unique_users,
                avg_processing_time = excluded.avg_processing_time,
                avg_results = excluded.avg_results,
                successful_searches = excluded.successful_searches
            "#,
        )
        .bind(date)
        .bind(Utc::now())
        .bind(date)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to roll up searches for {}", date))?;

        Ok(result.rows_affected())
    }

    async fn list_rollups(&self, filter: &SearchAnalyticsFilter, limit: i64) -> Result<Vec<SearchAnalytics>> {
        let region = filter.region.clone();
        let rows = sqlx::query(
            r#"
            SELECT id, date, language, region, total_searches, unique_users, avg_processing_time,
                   avg_results, successful_searches, created_at
            FROM search_analytics
            WHERE (? IS NULL OR date >= ?)
              AND (? IS NULL OR date <= ?)
              AND (? IS NULL OR language = ?)
              AND (? IS NULL OR region = ?)
            ORDER BY date DESC, language ASC, region ASC
            LIMIT ?
            "#,
        )
        .bind(&filter.start_date)
        .bind(&filter.start_date)
        .bind(&filter.end_date)
        .bind(&filter.end_date)
        .bind(&filter.language)
        .bind(&filter.language)
        .bind(&region)
        .bind(&region)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list search analytics")?;

        Ok(rows
            .iter()
            .map(|row| {
                let region: String = row.get("region");
                SearchAnalytics {
                    id: row.get("id"),
                    date: row.get("date"),
                    language: row.get("language"),
                    region: if region.is_empty() { None } else { Some(region) },
                    total_searches: row.get("total_searches"),
                    unique_users: row.get("unique_users"),
                    avg_processing_time: row.get("avg_processing_time"),
                    avg_results: row.get("avg_results"),
                    successful_searches: row.get("successful_searches"),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::nco_code::sample_code;
    use crate::db::repositories::{
        NcoCodeRepository, SearchRepository, SqlxNcoCodeRepository, SqlxSearchRepository,
        SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{
        AiServiceStatus, FeedbackInput, InputMethod, MatchType, NewSearch, NewSearchResult, User,
        UserRole,
    };
    use chrono::Duration;

    struct Fixture {
        repo: SqlxAnalyticsRepository,
        searches: SqlxSearchRepository,
        alice: i64,
        bob: i64,
        code_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let mut alice = User::new("Alice".into(), "alice@example.com".into(), "h".into(), UserRole::User);
        alice.region = Some("Kerala".into());
        let alice = users.create(&alice).await.unwrap();
        let bob = users
            .create(&User::new("Bob".into(), "bob@example.com".into(), "h".into(), UserRole::User))
            .await
            .unwrap();

        let code = SqlxNcoCodeRepository::new(pool.clone())
            .create(&sample_code("75310100", "Tailor", &[]))
            .await
            .unwrap();

        Fixture {
            repo: SqlxAnalyticsRepository::new(pool.clone()),
            searches: SqlxSearchRepository::new(pool),
            alice: alice.id,
            bob: bob.id,
            code_id: code.id,
        }
    }

    async fn search(f: &Fixture, user_id: i64, query: &str, results: i64, status: AiServiceStatus) -> i64 {
        let search = f
            .searches
            .create_search(&NewSearch {
                user_id,
                query: query.to_string(),
                language: "en".to_string(),
                input_method: InputMethod::Text,
                session_id: None,
                user_agent: None,
                ip_address: None,
            })
            .await
            .unwrap();
        if results > 0 {
            f.searches
                .insert_results(
                    search.id,
                    &[NewSearchResult {
                        nco_code_id: f.code_id,
                        relevance_score: 0.8,
                        confidence_score: 0.6,
                        rank: 1,
                        match_type: MatchType::Keyword,
                        matched_keywords: vec![],
                        explanation: None,
                    }],
                )
                .await
                .unwrap();
        }
        f.searches
            .update_outcome(search.id, results, 20, status)
            .await
            .unwrap();
        search.id
    }

    fn week() -> DateTime<Utc> {
        Utc::now() - Duration::days(7)
    }

    #[tokio::test]
    async fn test_trend_aggregates() {
        let f = setup().await;
        search(&f, f.alice, "tailor", 1, AiServiceStatus::Success).await;
        search(&f, f.alice, "tailor", 1, AiServiceStatus::Fallback).await;
        search(&f, f.bob, "pilot", 0, AiServiceStatus::Error).await;

        let scope = SearchScope::since(week());
        let daily = f.repo.daily_stats(&scope).await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].total_searches, 3);
        assert_eq!(daily[0].unique_users, 2);
        assert_eq!(daily[0].date, Utc::now().format("%Y-%m-%d").to_string());

        let top = f.repo.top_queries(&scope, 10).await.unwrap();
        assert_eq!(top[0].query, "tailor");
        assert_eq!(top[0].count, 2);

        let statuses = f.repo.status_breakdown(&scope).await.unwrap();
        assert_eq!(statuses.len(), 3);

        let kerala = SearchScope {
            region: Some("Kerala".to_string()),
            ..SearchScope::since(week())
        };
        let top = f.repo.top_queries(&kerala, 10).await.unwrap();
        assert_eq!(top.len(), 1);

        let (total, avg) = f.repo.search_stats(week()).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(avg, Some(20.0));
    }

    #[tokio::test]
    async fn test_popular_codes_and_engagement() {
        let f = setup().await;
        let first = search(&f, f.alice, "tailor", 1, AiServiceStatus::Success).await;
        search(&f, f.alice, "stitching", 1, AiServiceStatus::Success).await;
        search(&f, f.bob, "sewing", 1, AiServiceStatus::Success).await;
        f.searches
            .create_feedback(f.alice, first, &FeedbackInput { rating: Some(4), ..Default::default() })
            .await
            .unwrap();

        let popular = f.repo.popular_codes(week(), None, None, 20).await.unwrap();
        assert_eq!(popular.len(), 1);
        assert_eq!(popular[0].search_count, 3);
        let avg = popular[0].avg_relevance_score.unwrap();
        assert!((avg - 0.8).abs() < 1e-9);
        let none = f.repo.popular_codes(week(), Some("Mining"), None, 20).await.unwrap();
        assert!(none.is_empty());

        let engagement = f.repo.user_engagement(week(), None, 50).await.unwrap();
        assert_eq!(engagement.len(), 2);
        assert_eq!(engagement[0].user.name, "Alice");
        assert_eq!(engagement[0].search_count, 2);
        assert_eq!(engagement[0].feedback_count, 1);
        assert_eq!(engagement[0].avg_rating, Some(4.0));

        let own = f.repo.user_engagement(week(), Some(f.bob), 1).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].user.id, f.bob);
        assert_eq!(own[0].feedback_count, 0);
    }

    #[tokio::test]
    async fn test_feedback_breakdowns() {
        let f = setup().await;
        for (rating, correct, comment) in [(5, true, Some("Spot on")), (2, false, None), (4, true, Some("Close"))] {
            let id = search(&f, f.alice, "tailor", 1, AiServiceStatus::Success).await;
            let input = FeedbackInput {
                rating: Some(rating),
                is_correct: Some(correct),
                comments: comment.map(String::from),
                ..Default::default()
            };
            f.searches.create_feedback(f.alice, id, &input).await.unwrap();
        }

        let scope = FeedbackScope {
            since: week(),
            min_rating: None,
            max_rating: None,
        };
        let ratings = f.repo.rating_distribution(&scope).await.unwrap();
        assert_eq!(ratings.iter().map(|r| r.value).collect::<Vec<_>>(), vec![Some(2), Some(4), Some(5)]);

        let correctness = f.repo.correctness_stats(&scope).await.unwrap();
        assert_eq!(correctness.len(), 2);
        assert_eq!(correctness[1].value, Some(true));
        assert_eq!(correctness[1].count, 2);

        let helpful = f.repo.helpfulness_stats(&scope).await.unwrap();
        assert_eq!(helpful.len(), 1);
        assert!(helpful[0].value.is_none());

        let comments = f.repo.recent_comments(&scope, 10).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].user_region.as_deref(), Some("Kerala"));

        let high = FeedbackScope {
            min_rating: Some(4),
            ..scope
        };
        assert_eq!(f.repo.rating_distribution(&high).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rollup_is_idempotent() {
        let f = setup().await;
        search(&f, f.alice, "tailor", 1, AiServiceStatus::Success).await;
        search(&f, f.bob, "pilot", 0, AiServiceStatus::Error).await;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(f.repo.rollup_day(&today).await.unwrap(), 2);
        search(&f, f.bob, "driver", 1, AiServiceStatus::Success).await;
        f.repo.rollup_day(&today).await.unwrap();

        let rows = f
            .repo
            .list_rollups(&SearchAnalyticsFilter::default(), 30)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let unregioned = rows.iter().find(|r| r.region.is_none()).unwrap();
        assert_eq!(unregioned.total_searches, 2);
        assert_eq!(unregioned.successful_searches, 1);

        let filter = SearchAnalyticsFilter {
            region: Some("Kerala".to_string()),
            ..Default::default()
        };
        let kerala = f.repo.list_rollups(&filter, 30).await.unwrap();
        assert_eq!(kerala.len(), 1);
        assert_eq!(kerala[0].unique_users, 1);
    }
}
