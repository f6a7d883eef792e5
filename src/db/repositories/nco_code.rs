//! NCO code repository
//!
//! Storage and lookup for the occupation taxonomy, including the local
//! keyword search used when the external matcher is unavailable.

use crate::db::repositories::{decode_list, encode_list, like_pattern};
use crate::db::DbPool;
use crate::models::{HierarchyGroup, HierarchyLevel, ListParams, NcoCode, NcoCodeFilter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

/// How often a code has been referenced by searches and feedback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeReferences {
    pub search_results: i64,
    pub feedbacks: i64,
}

impl CodeReferences {
    pub fn is_referenced(&self) -> bool {
        self.search_results > 0 || self.feedbacks > 0
    }
}

#[async_trait]
pub trait NcoCodeRepository: Send + Sync {
    async fn create(&self, code: &NcoCode) -> Result<NcoCode>;

    async fn get_by_id(&self, id: i64) -> Result<Option<NcoCode>>;

    async fn get_by_code(&self, nco_code: &str) -> Result<Option<NcoCode>>;

    async fn update(&self, code: &NcoCode) -> Result<NcoCode>;

    /// Remove a code permanently
    async fn delete(&self, id: i64) -> Result<()>;

    async fn references(&self, id: i64) -> Result<CodeReferences>;

    /// List codes matching the filter, ordered by code
    async fn list(&self, filter: &NcoCodeFilter, params: &ListParams) -> Result<(Vec<NcoCode>, i64)>;

    /// Active codes whose title or description contains `phrase`, or whose
    /// keywords or synonyms contain any of `words`. Verified codes first.
    async fn keyword_search(&self, phrase: &str, words: &[String], limit: i64) -> Result<Vec<NcoCode>>;

    /// Verified active codes ordered by how often they appear in results
    async fn recommendations(
        &self,
        sector: Option<&str>,
        skill_level: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(NcoCode, i64)>>;

    /// Active codes whose title contains `term` or whose keywords or
    /// synonyms equal it
    async fn suggestions(&self, term: &str, limit: i64) -> Result<Vec<NcoCode>>;

    async fn hierarchy(&self, level: HierarchyLevel) -> Result<Vec<HierarchyGroup>>;

    async fn count_active(&self) -> Result<i64>;
}

pub struct SqlxNcoCodeRepository {
    pool: DbPool,
}

impl SqlxNcoCodeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DbPool) -> Arc<dyn NcoCodeRepository> {
        Arc::new(Self::new(pool))
    }
}

const NCO_COLUMNS: &str = "id, nco_code, title, description, major_group, sub_major_group, minor_group, unit_group, \
     sector, skill_level, education_level, keywords, synonyms, version, is_active, is_verified, created_at, updated_at";

const LIST_WHERE: &str = r#"
    WHERE is_active = ?
      AND (? IS NULL OR major_group = ?)
      AND (? IS NULL OR sector = ?)
      AND (? IS NULL OR skill_level = ?)
      AND (? IS NULL OR title LIKE ? ESCAPE '\' OR nco_code LIKE ? ESCAPE '\' OR description LIKE ? ESCAPE '\')
"#;

#[async_trait]
impl NcoCodeRepository for SqlxNcoCodeRepository {
    async fn create(&self, code: &NcoCode) -> Result<NcoCode> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO nco_codes (nco_code, title, description, major_group, sub_major_group, minor_group,
                unit_group, sector, skill_level, education_level, keywords, synonyms, version,
                is_active, is_verified, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&code.nco_code)
        .bind(&code.title)
        .bind(&code.description)
        .bind(&code.major_group)
        .bind(&code.sub_major_group)
        .bind(&code.minor_group)
        .bind(&code.unit_group)
        .bind(&code.sector)
        .bind(&code.skill_level)
        .bind(&code.education_level)
        .bind(encode_list(&code.keywords))
        .bind(encode_list(&code.synonyms))
        .bind(&code.version)
        .bind(code.is_active)
        .bind(code.is_verified)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create NCO code")?;

        Ok(NcoCode {
            id: result.last_insert_rowid(),
            created_at: now,
            updated_at: now,
            ..code.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<NcoCode>> {
        let row = sqlx::query(&format!("SELECT {} FROM nco_codes WHERE id = ?", NCO_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get NCO code by ID")?;

        Ok(row.as_ref().map(row_to_nco_code))
    }

    async fn get_by_code(&self, nco_code: &str) -> Result<Option<NcoCode>> {
        let row = sqlx::query(&format!("SELECT {} FROM nco_codes WHERE nco_code = ?", NCO_COLUMNS))
            .bind(nco_code)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get NCO code")?;

        Ok(row.as_ref().map(row_to_nco_code))
    }

    async fn update(&self, code: &NcoCode) -> Result<NcoCode> {
        sqlx::query(
            r#"
            UPDATE nco_codes
            SET nco_code = ?, title = ?, description = ?, major_group = ?, sub_major_group = ?,
                minor_group = ?, unit_group = ?, sector = ?, skill_level = ?, education_level = ?,
                keywords = ?, synonyms = ?, version = ?, is_active = ?, is_verified = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&code.nco_code)
        .bind(&code.title)
        .bind(&code.description)
        .bind(&code.major_group)
        .bind(&code.sub_major_group)
        .bind(&code.minor_group)
        .bind(&code.unit_group)
        .bind(&code.sector)
        .bind(&code.skill_level)
        .bind(&code.education_level)
        .bind(encode_list(&code.keywords))
        .bind(encode_list(&code.synonyms))
        .bind(&code.version)
        .bind(code.is_active)
        .bind(code.is_verified)
        .bind(Utc::now())
        .bind(code.id)
        .execute(&self.pool)
        .await
        .context("Failed to update NCO code")?;

        self.get_by_id(code.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("NCO code not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM nco_codes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete NCO code")?;
        Ok(())
    }

    async fn references(&self, id: i64) -> Result<CodeReferences> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM search_results WHERE nco_code_id = ?) AS search_results,
                (SELECT COUNT(*) FROM search_feedback WHERE selected_code_id = ?) AS feedbacks
            "#,
        )
        .bind(id)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count NCO code references")?;

        Ok(CodeReferences {
            search_results: row.get("search_results"),
            feedbacks: row.get("feedbacks"),
        })
    }

    async fn list(&self, filter: &NcoCodeFilter, params: &ListParams) -> Result<(Vec<NcoCode>, i64)> {
        let search = filter.search.as_deref().map(like_pattern);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM nco_codes {} ORDER BY nco_code ASC LIMIT ? OFFSET ?",
            NCO_COLUMNS, LIST_WHERE
        ))
        .bind(filter.is_active)
        .bind(&filter.major_group)
        .bind(&filter.major_group)
        .bind(&filter.sector)
        .bind(&filter.sector)
        .bind(&filter.skill_level)
        .bind(&filter.skill_level)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list NCO codes")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM nco_codes {}", LIST_WHERE))
            .bind(filter.is_active)
            .bind(&filter.major_group)
            .bind(&filter.major_group)
            .bind(&filter.sector)
            .bind(&filter.sector)
            .bind(&filter.skill_level)
            .bind(&filter.skill_level)
            .bind(&search)
            .bind(&search)
            .bind(&search)
            .bind(&search)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count NCO codes")?;

        Ok((rows.iter().map(row_to_nco_code).collect(), total))
    }

    async fn keyword_search(&self, phrase: &str, words: &[String], limit: i64) -> Result<Vec<NcoCode>> {
        let pattern = like_pattern(phrase);
        let words_json = encode_list(words);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM nco_codes
            WHERE is_active = 1 AND (
                title LIKE ? ESCAPE '\'
                OR description LIKE ? ESCAPE '\'
                OR EXISTS (SELECT 1 FROM json_each(nco_codes.keywords) k
                           WHERE lower(k.value) IN (SELECT value FROM json_each(?)))
                OR EXISTS (SELECT 1 FROM json_each(nco_codes.synonyms) s
                           WHERE lower(s.value) IN (SELECT value FROM json_each(?)))
            )
            ORDER BY is_verified DESC, title ASC
            LIMIT ?
            "#,
            NCO_COLUMNS
        ))
        .bind(&pattern)
        .bind(&pattern)
        .bind(&words_json)
        .bind(&words_json)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to run keyword search")?;

        Ok(rows.iter().map(row_to_nco_code).collect())
    }

    async fn recommendations(
        &self,
        sector: Option<&str>,
        skill_level: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(NcoCode, i64)>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {},
                (SELECT COUNT(*) FROM search_results r WHERE r.nco_code_id = nco_codes.id) AS result_count
            FROM nco_codes
            WHERE is_active = 1 AND is_verified = 1
              AND (? IS NULL OR sector = ?)
              AND (? IS NULL OR skill_level = ?)
            ORDER BY result_count DESC, title ASC
            LIMIT ?
            "#,
            NCO_COLUMNS
        ))
        .bind(sector)
        .bind(sector)
        .bind(skill_level)
        .bind(skill_level)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recommendations")?;

        Ok(rows
            .iter()
            .map(|row| (row_to_nco_code(row), row.get("result_count")))
            .collect())
    }

    async fn suggestions(&self, term: &str, limit: i64) -> Result<Vec<NcoCode>> {
        let pattern = like_pattern(term);
        let term = term.to_lowercase();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM nco_codes
            WHERE is_active = 1 AND (
                title LIKE ? ESCAPE '\'
                OR EXISTS (SELECT 1 FROM json_each(nco_codes.keywords) k WHERE lower(k.value) = ?)
                OR EXISTS (SELECT 1 FROM json_each(nco_codes.synonyms) s WHERE lower(s.value) = ?)
            )
            ORDER BY title ASC
            LIMIT ?
            "#,
            NCO_COLUMNS
        ))
        .bind(&pattern)
        .bind(&term)
        .bind(&term)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load suggestions")?;

        Ok(rows.iter().map(row_to_nco_code).collect())
    }

    async fn hierarchy(&self, level: HierarchyLevel) -> Result<Vec<HierarchyGroup>> {
        let columns = level.columns().join(", ");

        // With a single MIN() aggregate SQLite takes bare columns (title)
        // from the row holding the minimum.
        let rows = sqlx::query(&format!(
            r#"
            SELECT {cols}, COUNT(*) AS code_count, MIN(nco_code) AS sample_code, title AS sample_title
            FROM nco_codes
            WHERE is_active = 1
            GROUP BY {cols}
            ORDER BY {cols}
            "#,
            cols = columns
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load NCO hierarchy")?;

        let column = |row: &sqlx::sqlite::SqliteRow, name: &str| -> Option<String> {
            if level.columns().contains(&name) {
                row.try_get(name).ok()
            } else {
                None
            }
        };

        Ok(rows
            .iter()
            .map(|row| HierarchyGroup {
                major_group: row.get("major_group"),
                sub_major_group: column(row, "sub_major_group"),
                minor_group: column(row, "minor_group"),
                unit_group: column(row, "unit_group"),
                code_count: row.get("code_count"),
                sample_title: row.get("sample_title"),
                sample_code: row.get("sample_code"),
            })
            .collect())
    }

    async fn count_active(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nco_codes WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count NCO codes")?;
        Ok(count)
    }
}

fn row_to_nco_code(row: &sqlx::sqlite::SqliteRow) -> NcoCode {
    NcoCode {
        id: row.get("id"),
        nco_code: row.get("nco_code"),
        title: row.get("title"),
        description: row.get("description"),
        major_group: row.get("major_group"),
        sub_major_group: row.get("sub_major_group"),
        minor_group: row.get("minor_group"),
        unit_group: row.get("unit_group"),
        sector: row.get("sector"),
        skill_level: row.get("skill_level"),
        education_level: row.get("education_level"),
        keywords: decode_list(row.get("keywords")),
        synonyms: decode_list(row.get("synonyms")),
        version: row.get("version"),
        is_active: row.get("is_active"),
        is_verified: row.get("is_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Build an unsaved code for tests across the crate
#[cfg(test)]
pub(crate) fn sample_code(nco_code: &str, title: &str, keywords: &[&str]) -> NcoCode {
    let now = Utc::now();
    NcoCode {
        id: 0,
        nco_code: nco_code.to_string(),
        title: title.to_string(),
        description: format!("{} duties", title),
        major_group: nco_code[..1].to_string(),
        sub_major_group: nco_code[..2].to_string(),
        minor_group: nco_code[..3].to_string(),
        unit_group: nco_code[..4].to_string(),
        sector: Some("Services".to_string()),
        skill_level: Some("Level 2".to_string()),
        education_level: None,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        synonyms: Vec::new(),
        version: crate::models::DEFAULT_NCO_VERSION.to_string(),
        is_active: true,
        is_verified: true,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxNcoCodeRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxNcoCodeRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let repo = setup_test_repo().await;
        let created = repo
            .create(&sample_code("75310100", "Tailor", &["sewing", "stitching"]))
            .await
            .expect("Failed to create");

        let found = repo.get_by_code("75310100").await.unwrap().expect("missing");
        assert_eq!(found.id, created.id);
        assert_eq!(found.keywords, vec!["sewing", "stitching"]);

        let mut changed = found.clone();
        changed.title = "Tailor, Dressmaker".to_string();
        let updated = repo.update(&changed).await.unwrap();
        assert_eq!(updated.title, "Tailor, Dressmaker");

        repo.delete(created.id).await.unwrap();
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_with_search_and_inactive() {
        let repo = setup_test_repo().await;
        repo.create(&sample_code("75310100", "Tailor", &[])).await.unwrap();
        repo.create(&sample_code("83220100", "Car Driver", &[])).await.unwrap();
        let mut inactive = sample_code("83220200", "Taxi Driver", &[]);
        inactive.is_active = false;
        repo.create(&inactive).await.unwrap();

        let params = ListParams::new(1, 20);
        let (codes, total) = repo.list(&NcoCodeFilter::default(), &params).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(codes[0].nco_code, "75310100");

        let filter = NcoCodeFilter {
            search: Some("driver".to_string()),
            ..Default::default()
        };
        let (codes, total) = repo.list(&filter, &params).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(codes[0].title, "Car Driver");

        let filter = NcoCodeFilter {
            is_active: false,
            ..Default::default()
        };
        let (codes, _) = repo.list(&filter, &params).await.unwrap();
        assert_eq!(codes[0].title, "Taxi Driver");
    }

    #[tokio::test]
    async fn test_keyword_search_matches_keywords_and_title() {
        let repo = setup_test_repo().await;
        repo.create(&sample_code("75310100", "Tailor", &["Sewing"])).await.unwrap();
        let mut unverified = sample_code("83220100", "Car Driver", &["chauffeur"]);
        unverified.is_verified = false;
        repo.create(&unverified).await.unwrap();
        repo.create(&sample_code("83220200", "Taxi Driver", &[])).await.unwrap();

        let words = vec!["sewing".to_string()];
        let results = repo.keyword_search("sewing", &words, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Tailor");

        let words = vec!["driver".to_string()];
        let results = repo.keyword_search("driver", &words, 10).await.unwrap();
        // verified first
        assert_eq!(results[0].title, "Taxi Driver");
        assert_eq!(results[1].title, "Car Driver");
    }

    #[tokio::test]
    async fn test_hierarchy_groups() {
        let repo = setup_test_repo().await;
        repo.create(&sample_code("83220100", "Car Driver", &[])).await.unwrap();
        repo.create(&sample_code("83220200", "Taxi Driver", &[])).await.unwrap();
        repo.create(&sample_code("75310100", "Tailor", &[])).await.unwrap();

        let groups = repo.hierarchy(HierarchyLevel::Major).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].major_group, "7");
        assert_eq!(groups[1].code_count, 2);
        assert_eq!(groups[1].sample_code.as_deref(), Some("83220100"));
        assert_eq!(groups[1].sample_title.as_deref(), Some("Car Driver"));
        assert!(groups[1].sub_major_group.is_none());

        let groups = repo.hierarchy(HierarchyLevel::Minor).await.unwrap();
        assert_eq!(groups[1].minor_group.as_deref(), Some("832"));
    }

    #[tokio::test]
    async fn test_suggestions_and_recommendations() {
        let repo = setup_test_repo().await;
        repo.create(&sample_code("75310100", "Tailor", &["sewing"])).await.unwrap();
        let mut unverified = sample_code("83220100", "Car Driver", &[]);
        unverified.is_verified = false;
        repo.create(&unverified).await.unwrap();

        let suggestions = repo.suggestions("sewing", 10).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        let suggestions = repo.suggestions("tai", 10).await.unwrap();
        assert_eq!(suggestions[0].nco_code, "75310100");

        let recommended = repo.recommendations(None, None, 10).await.unwrap();
        assert_eq!(recommended.len(), 1);
        assert_eq!(recommended[0].1, 0);

        assert_eq!(repo.count_active().await.unwrap(), 2);
    }
}
