//! Dataset service
//!
//! Datasets belong to the user who created them. Admins can see and change
//! every dataset; everyone else is limited to their own.

use crate::db::repositories::DatasetRepository;
use crate::models::{
    CreateDatasetInput, DataRecord, DataRecordFilter, Dataset, DatasetFilter, DatasetStatus,
    DatasetType, DatasetWithMeta, ListParams, NewDataRecord, PagedResult, UpdateDatasetInput, User,
};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

/// Records embedded in a dataset detail response
const SAMPLE_RECORDS: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum DatasetServiceError {
    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Dataset with a sample of its newest records
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDetail {
    #[serde(flatten)]
    pub dataset: DatasetWithMeta,
    pub records: Vec<DataRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsAdded {
    pub created_count: i64,
    pub dataset_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingQueued {
    pub dataset_id: i64,
    pub status: DatasetStatus,
    pub total_records: i64,
}

pub struct DatasetService {
    repo: Arc<dyn DatasetRepository>,
}

impl DatasetService {
    pub fn new(repo: Arc<dyn DatasetRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(
        &self,
        actor: &User,
        input: CreateDatasetInput,
    ) -> Result<DatasetWithMeta, DatasetServiceError> {
        let name = input.name.trim();
        let raw_type = input.dataset_type.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || raw_type.is_empty() {
            return Err(DatasetServiceError::ValidationError(
                "Dataset name and type are required.".to_string(),
            ));
        }
        let dataset_type = DatasetType::from_str(raw_type)
            .map_err(|_| DatasetServiceError::ValidationError("Invalid dataset type.".to_string()))?;

        let now = Utc::now();
        let dataset = Dataset {
            id: 0,
            name: name.to_string(),
            description: input.description,
            dataset_type,
            status: DatasetStatus::Uploaded,
            original_file_name: input.original_file_name,
            file_size: input.file_size,
            file_url: input.file_url,
            mime_type: input.mime_type,
            total_records: 0,
            processed_records: 0,
            ai_processing_started: None,
            created_by: actor.id,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .repo
            .create(&dataset)
            .await
            .context("Failed to create dataset")?;
        tracing::info!(dataset_id = created.id, user_id = actor.id, "Dataset created");

        self.repo
            .get_with_meta(created.id)
            .await
            .context("Failed to load dataset")?
            .ok_or(DatasetServiceError::NotFound("Dataset not found."))
    }

    /// List datasets. Non-admins, and admins passing `own`, only see their own.
    pub async fn list(
        &self,
        actor: &User,
        mut filter: DatasetFilter,
        own: bool,
        params: &ListParams,
    ) -> Result<PagedResult<DatasetWithMeta>, DatasetServiceError> {
        if own || !actor.is_admin() {
            filter.created_by = Some(actor.id);
        }

        let (items, total) = self
            .repo
            .list(&filter, params)
            .await
            .context("Failed to list datasets")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn get(&self, actor: &User, id: i64) -> Result<DatasetDetail, DatasetServiceError> {
        let dataset = self
            .repo
            .get_with_meta(id)
            .await
            .context("Failed to get dataset")?
            .ok_or(DatasetServiceError::NotFound("Dataset not found."))?;
        ensure_access(actor, &dataset.dataset)?;

        let records = self
            .repo
            .recent_records(id, SAMPLE_RECORDS)
            .await
            .context("Failed to load dataset records")?;

        Ok(DatasetDetail { dataset, records })
    }

    pub async fn update(
        &self,
        actor: &User,
        id: i64,
        input: UpdateDatasetInput,
    ) -> Result<Dataset, DatasetServiceError> {
        let mut dataset = self.load_accessible(actor, id).await?;

        if let Some(status) = input.status.as_deref() {
            dataset.status = DatasetStatus::from_str(status).map_err(|_| {
                DatasetServiceError::ValidationError("Invalid dataset status.".to_string())
            })?;
        }
        if let Some(name) = input.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DatasetServiceError::ValidationError(
                    "Dataset name cannot be empty.".to_string(),
                ));
            }
            dataset.name = name;
        }
        if input.description.is_some() {
            dataset.description = input.description;
        }

        let updated = self
            .repo
            .update(&dataset)
            .await
            .context("Failed to update dataset")?;
        Ok(updated)
    }

    /// Delete a dataset with its records. Busy datasets are refused.
    pub async fn delete(&self, actor: &User, id: i64) -> Result<Dataset, DatasetServiceError> {
        let dataset = self.load_accessible(actor, id).await?;

        if dataset.status.is_busy() {
            return Err(DatasetServiceError::ValidationError(
                "Cannot delete dataset while it's being processed.".to_string(),
            ));
        }

        self.repo
            .delete(id)
            .await
            .context("Failed to delete dataset")?;
        tracing::info!(dataset_id = id, user_id = actor.id, "Dataset deleted");
        Ok(dataset)
    }

    pub async fn add_records(
        &self,
        actor: &User,
        id: i64,
        records: Vec<NewDataRecord>,
    ) -> Result<RecordsAdded, DatasetServiceError> {
        if records.is_empty() {
            return Err(DatasetServiceError::ValidationError(
                "Records array is required and cannot be empty.".to_string(),
            ));
        }
        self.load_accessible(actor, id).await?;

        let created_count = self
            .repo
            .insert_records(id, &records)
            .await
            .context("Failed to add data records")?;

        Ok(RecordsAdded {
            created_count,
            dataset_id: id,
        })
    }

    pub async fn list_records(
        &self,
        actor: &User,
        id: i64,
        filter: &DataRecordFilter,
        params: &ListParams,
    ) -> Result<PagedResult<DataRecord>, DatasetServiceError> {
        self.load_accessible(actor, id).await?;

        let (items, total) = self
            .repo
            .list_records(id, filter, params)
            .await
            .context("Failed to list data records")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Verify a record, optionally overriding its code by hand
    pub async fn verify_record(
        &self,
        actor: &User,
        dataset_id: i64,
        record_id: i64,
        manual_code_id: Option<i64>,
        is_verified: Option<bool>,
    ) -> Result<DataRecord, DatasetServiceError> {
        let dataset = self
            .repo
            .get_by_id(dataset_id)
            .await
            .context("Failed to get dataset")?
            .ok_or(DatasetServiceError::NotFound("Data record not found."))?;
        if !actor.is_admin() && dataset.created_by != actor.id {
            return Err(DatasetServiceError::Forbidden("Access denied to this record."));
        }

        self.repo
            .get_record(dataset_id, record_id)
            .await
            .context("Failed to get data record")?
            .ok_or(DatasetServiceError::NotFound("Data record not found."))?;

        let record = self
            .repo
            .verify_record(record_id, manual_code_id, is_verified.unwrap_or(true), actor.id)
            .await
            .context("Failed to verify data record")?;
        Ok(record)
    }

    /// Queue a dataset for AI classification
    pub async fn process(&self, actor: &User, id: i64) -> Result<ProcessingQueued, DatasetServiceError> {
        let mut dataset = self.load_accessible(actor, id).await?;

        if dataset.status.is_busy() {
            return Err(DatasetServiceError::ValidationError(
                "Dataset is already being processed.".to_string(),
            ));
        }

        let total_records = self
            .repo
            .count_records(id)
            .await
            .context("Failed to count data records")?;
        if total_records == 0 {
            return Err(DatasetServiceError::ValidationError(
                "Cannot process empty dataset.".to_string(),
            ));
        }

        dataset.status = DatasetStatus::ReadyForAi;
        dataset.ai_processing_started = Some(Utc::now());
        self.repo
            .update(&dataset)
            .await
            .context("Failed to queue dataset")?;

        tracing::info!(dataset_id = id, total_records, "Dataset queued for AI processing");
        Ok(ProcessingQueued {
            dataset_id: id,
            status: DatasetStatus::ReadyForAi,
            total_records,
        })
    }

    pub async fn count_all(&self) -> Result<i64, DatasetServiceError> {
        Ok(self.repo.count_all().await.context("Failed to count datasets")?)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, DatasetServiceError> {
        Ok(self
            .repo
            .count_by_status()
            .await
            .context("Failed to count datasets by status")?)
    }

    async fn load_accessible(&self, actor: &User, id: i64) -> Result<Dataset, DatasetServiceError> {
        let dataset = self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get dataset")?
            .ok_or(DatasetServiceError::NotFound("Dataset not found."))?;
        ensure_access(actor, &dataset)?;
        Ok(dataset)
    }
}

fn ensure_access(actor: &User, dataset: &Dataset) -> Result<(), DatasetServiceError> {
    if actor.is_admin() || dataset.created_by == actor.id {
        Ok(())
    } else {
        Err(DatasetServiceError::Forbidden("Access denied to this dataset."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxDatasetRepository, SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::UserRole;
    use serde_json::json;

    struct Fixture {
        service: DatasetService,
        owner: User,
        other: User,
        admin: User,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let mut created = Vec::new();
        for (email, role) in [
            ("owner@example.com", UserRole::User),
            ("other@example.com", UserRole::User),
            ("admin@example.com", UserRole::Admin),
        ] {
            created.push(
                users
                    .create(&User::new("U".into(), email.into(), "h".into(), role))
                    .await
                    .unwrap(),
            );
        }
        let admin = created.pop().unwrap();
        let other = created.pop().unwrap();
        let owner = created.pop().unwrap();

        Fixture {
            service: DatasetService::new(SqlxDatasetRepository::boxed(pool)),
            owner,
            other,
            admin,
        }
    }

    fn input(name: &str, kind: &str) -> CreateDatasetInput {
        CreateDatasetInput {
            name: name.to_string(),
            dataset_type: Some(kind.to_string()),
            ..Default::default()
        }
    }

    fn record(suggested: Option<i64>) -> NewDataRecord {
        NewDataRecord {
            original_data: json!({"occupation": "tailor"}),
            suggested_code_id: suggested,
            confidence_score: None,
            has_errors: false,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_create_validates_type() {
        let f = setup().await;

        let created = f.service.create(&f.owner, input("Survey", "survey_data")).await.unwrap();
        assert_eq!(created.dataset.dataset_type, DatasetType::SurveyData);
        assert_eq!(created.creator.as_ref().unwrap().id, f.owner.id);

        let bad = f.service.create(&f.owner, input("Survey", "SPREADSHEET")).await;
        assert!(matches!(bad, Err(DatasetServiceError::ValidationError(m)) if m == "Invalid dataset type."));

        let missing = f.service.create(&f.owner, input(" ", "SURVEY_DATA")).await;
        assert!(matches!(missing, Err(DatasetServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_access_rules() {
        let f = setup().await;
        let ds = f.service.create(&f.owner, input("Survey", "SURVEY_DATA")).await.unwrap();
        let id = ds.dataset.id;

        assert!(matches!(
            f.service.get(&f.other, id).await,
            Err(DatasetServiceError::Forbidden(_))
        ));
        assert!(f.service.get(&f.admin, id).await.is_ok());

        f.service.create(&f.other, input("Mine", "USER_UPLOAD")).await.unwrap();

        let params = ListParams::new(1, 10);
        let own = f.service.list(&f.other, DatasetFilter::default(), false, &params).await.unwrap();
        assert_eq!(own.total, 1);

        let all = f.service.list(&f.admin, DatasetFilter::default(), false, &params).await.unwrap();
        assert_eq!(all.total, 2);

        let admin_own = f.service.list(&f.admin, DatasetFilter::default(), true, &params).await.unwrap();
        assert_eq!(admin_own.total, 0);
    }

    #[tokio::test]
    async fn test_records_and_processing() {
        let f = setup().await;
        let id = f
            .service
            .create(&f.owner, input("Survey", "SURVEY_DATA"))
            .await
            .unwrap()
            .dataset
            .id;

        let empty = f.service.process(&f.owner, id).await;
        assert!(matches!(empty, Err(DatasetServiceError::ValidationError(m)) if m == "Cannot process empty dataset."));

        assert!(matches!(
            f.service.add_records(&f.owner, id, vec![]).await,
            Err(DatasetServiceError::ValidationError(_))
        ));
        let added = f
            .service
            .add_records(&f.owner, id, vec![record(None), record(None)])
            .await
            .unwrap();
        assert_eq!(added.created_count, 2);

        let detail = f.service.get(&f.owner, id).await.unwrap();
        assert_eq!(detail.records.len(), 2);
        assert_eq!(detail.dataset.dataset.total_records, 2);

        let queued = f.service.process(&f.owner, id).await.unwrap();
        assert_eq!(queued.status, DatasetStatus::ReadyForAi);
        assert_eq!(queued.total_records, 2);

        let record_id = detail.records[0].id;
        let verified = f
            .service
            .verify_record(&f.owner, id, record_id, None, None)
            .await
            .unwrap();
        assert!(verified.is_verified);
        assert_eq!(verified.verified_by, Some(f.owner.id));

        assert!(matches!(
            f.service.verify_record(&f.other, id, record_id, None, None).await,
            Err(DatasetServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.verify_record(&f.owner, id, record_id + 100, None, None).await,
            Err(DatasetServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_busy_dataset_cannot_be_deleted() {
        let f = setup().await;
        let id = f
            .service
            .create(&f.owner, input("Survey", "SURVEY_DATA"))
            .await
            .unwrap()
            .dataset
            .id;

        f.service
            .update(
                &f.owner,
                id,
                UpdateDatasetInput {
                    status: Some("AI_PROCESSING".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            f.service.delete(&f.owner, id).await,
            Err(DatasetServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.process(&f.owner, id).await,
            Err(DatasetServiceError::ValidationError(m)) if m == "Dataset is already being processed."
        ));

        f.service
            .update(
                &f.admin,
                id,
                UpdateDatasetInput {
                    status: Some("FAILED".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        f.service.delete(&f.owner, id).await.unwrap();
        assert_eq!(f.service.count_all().await.unwrap(), 0);
    }
}
