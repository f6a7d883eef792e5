//! System configuration repository

use crate::db::DbPool;
use crate::models::{ConfigDataType, SystemConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait SystemConfigRepository: Send + Sync {
    /// Entries filtered by category and visibility, ordered by category then key
    async fn list(&self, category: Option<&str>, is_public: Option<bool>) -> Result<Vec<SystemConfig>>;

    async fn get_by_key(&self, key: &str) -> Result<Option<SystemConfig>>;

    /// Insert or replace the entry identified by `config.key`
    async fn upsert(&self, config: &SystemConfig) -> Result<SystemConfig>;
}

pub struct SqlxSystemConfigRepository {
    pool: DbPool,
}

impl SqlxSystemConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DbPool) -> Arc<dyn SystemConfigRepository> {
        Arc::new(Self::new(pool))
    }
}

const CONFIG_COLUMNS: &str = "id, key, value, description, category, data_type, is_public, updated_at";

#[async_trait]
impl SystemConfigRepository for SqlxSystemConfigRepository {
    async fn list(&self, category: Option<&str>, is_public: Option<bool>) -> Result<Vec<SystemConfig>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM system_configs
            WHERE (? IS NULL OR category = ?) AND (? IS NULL OR is_public = ?)
            ORDER BY category ASC, key ASC
            "#,
            CONFIG_COLUMNS
        ))
        .bind(category)
        .bind(category)
        .bind(is_public)
        .bind(is_public)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list system configs")?;

        rows.iter().map(row_to_config).collect()
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<SystemConfig>> {
        let row = sqlx::query(&format!("SELECT {} FROM system_configs WHERE key = ?", CONFIG_COLUMNS))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get system config")?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn upsert(&self, config: &SystemConfig) -> Result<SystemConfig> {
        sqlx::query(
            r#"
            INSERT INTO system_configs (key, value, description, category, data_type, is_public, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                description = excluded.description,
                category = excluded.category,
                data_type = excluded.data_type,
                is_public = excluded.is_public,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.key)
        .bind(&config.value)
        .bind(&config.description)
        .bind(&config.category)
        .bind(config.data_type.to_string())
        .bind(config.is_public)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to upsert system config")?;

        self.get_by_key(&config.key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("System config not found after upsert"))
    }
}

fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<SystemConfig> {
    let data_type: String = row.get("data_type");

    Ok(SystemConfig {
        id: row.get("id"),
        key: row.get("key"),
        value: row.get("value"),
        description: row.get("description"),
        category: row.get("category"),
        data_type: ConfigDataType::from_str(&data_type)?,
        is_public: row.get("is_public"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> SqlxSystemConfigRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxSystemConfigRepository::new(pool)
    }

    fn entry(key: &str, value: &str, category: &str, is_public: bool) -> SystemConfig {
        SystemConfig {
            id: 0,
            key: key.to_string(),
            value: value.to_string(),
            description: None,
            category: category.to_string(),
            data_type: ConfigDataType::String,
            is_public,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_value() {
        let repo = setup().await;
        let first = repo.upsert(&entry("site_name", "NCO", "general", true)).await.unwrap();
        let second = repo.upsert(&entry("site_name", "NCO Portal", "general", true)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.value, "NCO Portal");
    }

    #[tokio::test]
    async fn test_list_ordering_and_filters() {
        let repo = setup().await;
        repo.upsert(&entry("max_results", "10", "search", false)).await.unwrap();
        repo.upsert(&entry("site_name", "NCO", "general", true)).await.unwrap();
        repo.upsert(&entry("contact", "x@example.com", "general", true)).await.unwrap();

        let all = repo.list(None, None).await.unwrap();
        let keys: Vec<_> = all.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["contact", "site_name", "max_results"]);

        let public = repo.list(None, Some(true)).await.unwrap();
        assert_eq!(public.len(), 2);
        let search = repo.list(Some("search"), None).await.unwrap();
        assert_eq!(search[0].key, "max_results");
    }
}
