//! System configuration service

use crate::db::repositories::SystemConfigRepository;
use crate::models::{ConfigDataType, SystemConfig, UpsertConfigInput};
use anyhow::Context;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;

const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, thiserror::Error)]
pub enum SystemConfigServiceError {
    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct SystemConfigService {
    repo: Arc<dyn SystemConfigRepository>,
}

impl SystemConfigService {
    pub fn new(repo: Arc<dyn SystemConfigRepository>) -> Self {
        Self { repo }
    }

    pub async fn list(
        &self,
        category: Option<&str>,
        is_public: Option<bool>,
    ) -> Result<Vec<SystemConfig>, SystemConfigServiceError> {
        Ok(self
            .repo
            .list(category, is_public)
            .await
            .context("Failed to list system configs")?)
    }

    /// Create or replace an entry by key. The value must fit its data type.
    pub async fn upsert(&self, input: UpsertConfigInput) -> Result<SystemConfig, SystemConfigServiceError> {
        let key = input.key.as_deref().map(str::trim).unwrap_or_default();
        let value = match input.value {
            Some(value) if !key.is_empty() => value,
            _ => {
                return Err(SystemConfigServiceError::ValidationError(
                    "Configuration key and value are required.".to_string(),
                ))
            }
        };

        let data_type = match input.data_type.as_deref() {
            Some(raw) => ConfigDataType::from_str(raw)
                .map_err(|e| SystemConfigServiceError::ValidationError(e.to_string()))?,
            None => ConfigDataType::default(),
        };
        data_type
            .validate(&value)
            .map_err(SystemConfigServiceError::ValidationError)?;

        let config = SystemConfig {
            id: 0,
            key: key.to_string(),
            value,
            description: input.description,
            category: input
                .category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            data_type,
            is_public: input.is_public.unwrap_or(false),
            updated_at: Utc::now(),
        };

        let saved = self
            .repo
            .upsert(&config)
            .await
            .context("Failed to save system config")?;
        tracing::info!(key = %saved.key, "System config updated");
        Ok(saved)
    }

    /// Public entries as a `key -> parsed value` object
    pub async fn public_values(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, SystemConfigServiceError> {
        let configs = self
            .repo
            .list(None, Some(true))
            .await
            .context("Failed to load public configs")?;

        Ok(configs
            .into_iter()
            .map(|c| {
                let value = c.data_type.parse_value(&c.value);
                (c.key, value)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxSystemConfigRepository;
    use crate::db::{create_test_pool, migrations};
    use serde_json::json;

    async fn setup_test_service() -> SystemConfigService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SystemConfigService::new(SqlxSystemConfigRepository::boxed(pool))
    }

    fn input(key: &str, value: &str, data_type: Option<&str>, is_public: bool) -> UpsertConfigInput {
        UpsertConfigInput {
            key: Some(key.to_string()),
            value: Some(value.to_string()),
            data_type: data_type.map(String::from),
            is_public: Some(is_public),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_defaults() {
        let service = setup_test_service().await;
        let saved = service
            .upsert(UpsertConfigInput {
                key: Some("site_name".into()),
                value: Some("NCO Portal".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(saved.category, "general");
        assert_eq!(saved.data_type, ConfigDataType::String);
        assert!(!saved.is_public);
    }

    #[tokio::test]
    async fn test_upsert_validation() {
        let service = setup_test_service().await;

        let missing = service
            .upsert(UpsertConfigInput {
                key: Some("max_results".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(
            missing,
            Err(SystemConfigServiceError::ValidationError(m)) if m == "Configuration key and value are required."
        ));

        assert!(service
            .upsert(input("max_results", "many", Some("number"), true))
            .await
            .is_err());
        assert!(service
            .upsert(input("max_results", "50", Some("integer"), true))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_public_values_are_parsed() {
        let service = setup_test_service().await;
        service.upsert(input("max_results", "50", Some("number"), true)).await.unwrap();
        service.upsert(input("voice_enabled", "true", Some("boolean"), true)).await.unwrap();
        service
            .upsert(input("languages", r#"["en","hi"]"#, Some("json"), true))
            .await
            .unwrap();
        service.upsert(input("secret_flag", "x", None, false)).await.unwrap();

        let values = service.public_values().await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values["max_results"], json!(50.0));
        assert_eq!(values["voice_enabled"], json!(true));
        assert_eq!(values["languages"], json!(["en", "hi"]));
        assert!(!values.contains_key("secret_flag"));
    }
}
