//! Dataset repository
//!
//! Uploaded datasets and their data records.

use crate::db::DbPool;
use crate::models::{
    CreatorSummary, DataRecord, DataRecordFilter, Dataset, DatasetFilter, DatasetStatus,
    DatasetType, DatasetWithMeta, ListParams, NewDataRecord,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait DatasetRepository: Send + Sync {
    async fn create(&self, dataset: &Dataset) -> Result<Dataset>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Dataset>>;

    /// Dataset with its creator and record count
    async fn get_with_meta(&self, id: i64) -> Result<Option<DatasetWithMeta>>;

    /// Update name, description, status and the processing timestamp
    async fn update(&self, dataset: &Dataset) -> Result<Dataset>;

    /// Delete a dataset; its records go with it
    async fn delete(&self, id: i64) -> Result<()>;

    async fn list(&self, filter: &DatasetFilter, params: &ListParams) -> Result<(Vec<DatasetWithMeta>, i64)>;

    /// Insert records in one transaction and bump the dataset counters.
    /// Returns the number of records stored.
    async fn insert_records(&self, dataset_id: i64, records: &[NewDataRecord]) -> Result<i64>;

    async fn list_records(
        &self,
        dataset_id: i64,
        filter: &DataRecordFilter,
        params: &ListParams,
    ) -> Result<(Vec<DataRecord>, i64)>;

    /// Newest records of a dataset
    async fn recent_records(&self, dataset_id: i64, limit: i64) -> Result<Vec<DataRecord>>;

    /// Get a record only if it belongs to `dataset_id`
    async fn get_record(&self, dataset_id: i64, record_id: i64) -> Result<Option<DataRecord>>;

    async fn verify_record(
        &self,
        record_id: i64,
        manual_code_id: Option<i64>,
        is_verified: bool,
        verified_by: i64,
    ) -> Result<DataRecord>;

    async fn count_records(&self, dataset_id: i64) -> Result<i64>;

    async fn count_all(&self) -> Result<i64>;

    async fn count_by_status(&self) -> Result<Vec<(String, i64)>>;
}

pub struct SqlxDatasetRepository {
    pool: DbPool,
}

impl SqlxDatasetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DbPool) -> Arc<dyn DatasetRepository> {
        Arc::new(Self::new(pool))
    }
}

const DATASET_COLUMNS: &str = "d.id, d.name, d.description, d.type, d.status, d.original_file_name, d.file_size, \
     d.file_url, d.mime_type, d.total_records, d.processed_records, d.ai_processing_started, d.created_by, \
     d.created_at, d.updated_at";

const META_COLUMNS: &str = "u.name AS creator_name, u.email AS creator_email, \
     (SELECT COUNT(*) FROM data_records r WHERE r.dataset_id = d.id) AS record_count";

const RECORD_COLUMNS: &str = "id, dataset_id, original_data, suggested_code_id, manual_code_id, confidence_score, \
     is_processed, has_errors, error_message, is_verified, verified_by, verified_at, created_at";

const RECORD_WHERE: &str = r#"
    WHERE dataset_id = ?
      AND (? IS NULL OR is_processed = ?)
      AND (? IS NULL OR has_errors = ?)
      AND (? IS NULL OR is_verified = ?)
"#;

#[async_trait]
impl DatasetRepository for SqlxDatasetRepository {
    async fn create(&self, dataset: &Dataset) -> Result<Dataset> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO datasets (name, description, type, status, original_file_name, file_size, file_url,
                mime_type, total_records, processed_records, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?)
            "#,
        )
        .bind(&dataset.name)
        .bind(&dataset.description)
        .bind(dataset.dataset_type.to_string())
        .bind(dataset.status.to_string())
        .bind(&dataset.original_file_name)
        .bind(dataset.file_size)
        .bind(&dataset.file_url)
        .bind(&dataset.mime_type)
        .bind(dataset.created_by)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create dataset")?;

        Ok(Dataset {
            id: result.last_insert_rowid(),
            total_records: 0,
            processed_records: 0,
            created_at: now,
            updated_at: now,
            ..dataset.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!("SELECT {} FROM datasets d WHERE d.id = ?", DATASET_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get dataset")?;

        row.as_ref().map(row_to_dataset).transpose()
    }

    async fn get_with_meta(&self, id: i64) -> Result<Option<DatasetWithMeta>> {
        let row = sqlx::query(&format!(
            "SELECT {}, {} FROM datasets d LEFT JOIN users u ON u.id = d.created_by WHERE d.id = ?",
            DATASET_COLUMNS, META_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get dataset")?;

        row.as_ref().map(row_to_dataset_with_meta).transpose()
    }

    async fn update(&self, dataset: &Dataset) -> Result<Dataset> {
        sqlx::query(
            r#"
            UPDATE datasets
            SET name = ?, description = ?, status = ?, ai_processing_started = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&dataset.name)
        .bind(&dataset.description)
        .bind(dataset.status.to_string())
        .bind(dataset.ai_processing_started)
        .bind(Utc::now())
        .bind(dataset.id)
        .execute(&self.pool)
        .await
        .context("Failed to update dataset")?;

        self.get_by_id(dataset.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Dataset not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete dataset")?;
        Ok(())
    }

    async fn list(&self, filter: &DatasetFilter, params: &ListParams) -> Result<(Vec<DatasetWithMeta>, i64)> {
        let dataset_type = filter.dataset_type.map(|t| t.to_string());
        let status = filter.status.map(|s| s.to_string());
        let where_clause = r#"
            WHERE (? IS NULL OR d.type = ?)
              AND (? IS NULL OR d.status = ?)
              AND (? IS NULL OR d.created_by = ?)
        "#;

        let rows = sqlx::query(&format!(
            "SELECT {}, {} FROM datasets d LEFT JOIN users u ON u.id = d.created_by {} \
             ORDER BY d.created_at DESC, d.id DESC LIMIT ? OFFSET ?",
            DATASET_COLUMNS, META_COLUMNS, where_clause
        ))
        .bind(&dataset_type)
        .bind(&dataset_type)
        .bind(&status)
        .bind(&status)
        .bind(filter.created_by)
        .bind(filter.created_by)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list datasets")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM datasets d {}", where_clause))
            .bind(&dataset_type)
            .bind(&dataset_type)
            .bind(&status)
            .bind(&status)
            .bind(filter.created_by)
            .bind(filter.created_by)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count datasets")?;

        let datasets = rows
            .iter()
            .map(row_to_dataset_with_meta)
            .collect::<Result<Vec<_>>>()?;
        Ok((datasets, total))
    }

    async fn insert_records(&self, dataset_id: i64, records: &[NewDataRecord]) -> Result<i64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let mut processed = 0i64;

        for record in records {
            if record.is_processed() {
                processed += 1;
            }

            sqlx::query(
                r#"
                INSERT INTO data_records (dataset_id, original_data, suggested_code_id, confidence_score,
                    is_processed, has_errors, error_message, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(dataset_id)
            .bind(record.original_data.to_string())
            .bind(record.suggested_code_id)
            .bind(record.confidence_score)
            .bind(record.is_processed())
            .bind(record.has_errors)
            .bind(&record.error_message)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert data record")?;
        }

        let inserted = records.len() as i64;
        sqlx::query(
            r#"
            UPDATE datasets
            SET total_records = total_records + ?, processed_records = processed_records + ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(inserted)
        .bind(processed)
        .bind(now)
        .bind(dataset_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update dataset counters")?;

        tx.commit().await.context("Failed to commit data records")?;
        Ok(inserted)
    }

    async fn list_records(
        &self,
        dataset_id: i64,
        filter: &DataRecordFilter,
        params: &ListParams,
    ) -> Result<(Vec<DataRecord>, i64)> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM data_records {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            RECORD_COLUMNS, RECORD_WHERE
        ))
        .bind(dataset_id)
        .bind(filter.is_processed)
        .bind(filter.is_processed)
        .bind(filter.has_errors)
        .bind(filter.has_errors)
        .bind(filter.is_verified)
        .bind(filter.is_verified)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list data records")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM data_records {}", RECORD_WHERE))
            .bind(dataset_id)
            .bind(filter.is_processed)
            .bind(filter.is_processed)
            .bind(filter.has_errors)
            .bind(filter.has_errors)
            .bind(filter.is_verified)
            .bind(filter.is_verified)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count data records")?;

        Ok((rows.iter().map(row_to_record).collect(), total))
    }

    async fn recent_records(&self, dataset_id: i64, limit: i64) -> Result<Vec<DataRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM data_records WHERE dataset_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(dataset_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load sample records")?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn get_record(&self, dataset_id: i64, record_id: i64) -> Result<Option<DataRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM data_records WHERE id = ? AND dataset_id = ?",
            RECORD_COLUMNS
        ))
        .bind(record_id)
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get data record")?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn verify_record(
        &self,
        record_id: i64,
        manual_code_id: Option<i64>,
        is_verified: bool,
        verified_by: i64,
    ) -> Result<DataRecord> {
        sqlx::query(
            "UPDATE data_records SET manual_code_id = ?, is_verified = ?, verified_by = ?, verified_at = ? WHERE id = ?",
        )
        .bind(manual_code_id)
        .bind(is_verified)
        .bind(verified_by)
        .bind(Utc::now())
        .bind(record_id)
        .execute(&self.pool)
        .await
        .context("Failed to verify data record")?;

        let row = sqlx::query(&format!("SELECT {} FROM data_records WHERE id = ?", RECORD_COLUMNS))
            .bind(record_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to reload data record")?;

        Ok(row_to_record(&row))
    }

    async fn count_records(&self, dataset_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_records WHERE dataset_id = ?")
            .bind(dataset_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count data records")?;
        Ok(count)
    }

    async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM datasets")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count datasets")?;
        Ok(count)
    }

    async fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM datasets GROUP BY status ORDER BY status")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count datasets by status")?;

        Ok(rows
            .iter()
            .map(|row| (row.get("status"), row.get("count")))
            .collect())
    }
}

fn row_to_dataset(row: &sqlx::sqlite::SqliteRow) -> Result<Dataset> {
    let dataset_type: String = row.get("type");
    let status: String = row.get("status");

    Ok(Dataset {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        dataset_type: DatasetType::from_str(&dataset_type)?,
        status: DatasetStatus::from_str(&status)?,
        original_file_name: row.get("original_file_name"),
        file_size: row.get("file_size"),
        file_url: row.get("file_url"),
        mime_type: row.get("mime_type"),
        total_records: row.get("total_records"),
        processed_records: row.get("processed_records"),
        ai_processing_started: row.get("ai_processing_started"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_dataset_with_meta(row: &sqlx::sqlite::SqliteRow) -> Result<DatasetWithMeta> {
    let dataset = row_to_dataset(row)?;
    let creator_name: Option<String> = row.get("creator_name");
    let creator = creator_name.map(|name| CreatorSummary {
        id: dataset.created_by,
        name,
        email: row.get::<Option<String>, _>("creator_email").unwrap_or_default(),
    });

    Ok(DatasetWithMeta {
        dataset,
        creator,
        record_count: row.get("record_count"),
    })
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DataRecord {
    let raw: String = row.get("original_data");

    DataRecord {
        id: row.get("id"),
        dataset_id: row.get("dataset_id"),
        original_data: serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
        suggested_code_id: row.get("suggested_code_id"),
        manual_code_id: row.get("manual_code_id"),
        confidence_score: row.get("confidence_score"),
        is_processed: row.get("is_processed"),
        has_errors: row.get("has_errors"),
        error_message: row.get("error_message"),
        is_verified: row.get("is_verified"),
        verified_by: row.get("verified_by"),
        verified_at: row.get("verified_at"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::nco_code::sample_code;
    use crate::db::repositories::{NcoCodeRepository, SqlxNcoCodeRepository, SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{User, UserRole};
    use serde_json::json;

    async fn setup() -> (SqlxDatasetRepository, i64, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let user = SqlxUserRepository::new(pool.clone())
            .create(&User::new("Owner".into(), "owner@example.com".into(), "h".into(), UserRole::User))
            .await
            .unwrap();
        let code = SqlxNcoCodeRepository::new(pool.clone())
            .create(&sample_code("75310100", "Tailor", &[]))
            .await
            .unwrap();

        (SqlxDatasetRepository::new(pool), user.id, code.id)
    }

    fn new_dataset(name: &str, created_by: i64) -> Dataset {
        let now = Utc::now();
        Dataset {
            id: 0,
            name: name.to_string(),
            description: None,
            dataset_type: DatasetType::SurveyData,
            status: DatasetStatus::Uploaded,
            original_file_name: Some("survey.csv".to_string()),
            file_size: Some(1024),
            file_url: None,
            mime_type: Some("text/csv".to_string()),
            total_records: 0,
            processed_records: 0,
            ai_processing_started: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    fn record(suggested: Option<i64>) -> NewDataRecord {
        NewDataRecord {
            original_data: json!({"jobTitle": "tailor"}),
            suggested_code_id: suggested,
            confidence_score: suggested.map(|_| 0.9),
            has_errors: false,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_meta() {
        let (repo, user_id, _) = setup().await;
        let created = repo.create(&new_dataset("Survey", user_id)).await.unwrap();

        let meta = repo.get_with_meta(created.id).await.unwrap().unwrap();
        assert_eq!(meta.dataset.name, "Survey");
        assert_eq!(meta.creator.as_ref().map(|c| c.email.as_str()), Some("owner@example.com"));
        assert_eq!(meta.record_count, 0);
    }

    #[tokio::test]
    async fn test_insert_records_updates_counters() {
        let (repo, user_id, code_id) = setup().await;
        let dataset = repo.create(&new_dataset("Survey", user_id)).await.unwrap();

        let inserted = repo
            .insert_records(dataset.id, &[record(Some(code_id)), record(None), record(None)])
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let reloaded = repo.get_by_id(dataset.id).await.unwrap().unwrap();
        assert_eq!(reloaded.total_records, 3);
        assert_eq!(reloaded.processed_records, 1);

        let filter = DataRecordFilter {
            is_processed: Some(false),
            ..Default::default()
        };
        let (records, total) = repo
            .list_records(dataset.id, &filter, &ListParams::new(1, 20))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(records[0].original_data["jobTitle"], "tailor");
    }

    #[tokio::test]
    async fn test_verify_record_scoped_to_dataset() {
        let (repo, user_id, code_id) = setup().await;
        let first = repo.create(&new_dataset("First", user_id)).await.unwrap();
        let second = repo.create(&new_dataset("Second", user_id)).await.unwrap();
        repo.insert_records(first.id, &[record(None)]).await.unwrap();

        let sample = repo.recent_records(first.id, 10).await.unwrap();
        let record_id = sample[0].id;
        assert!(repo.get_record(second.id, record_id).await.unwrap().is_none());

        let verified = repo
            .verify_record(record_id, Some(code_id), true, user_id)
            .await
            .unwrap();
        assert!(verified.is_verified);
        assert_eq!(verified.manual_code_id, Some(code_id));
        assert_eq!(verified.verified_by, Some(user_id));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_counts() {
        let (repo, user_id, _) = setup().await;
        let dataset = repo.create(&new_dataset("Survey", user_id)).await.unwrap();
        repo.insert_records(dataset.id, &[record(None), record(None)]).await.unwrap();

        let mut processing = dataset.clone();
        processing.status = DatasetStatus::ReadyForAi;
        repo.update(&processing).await.unwrap();
        assert_eq!(
            repo.count_by_status().await.unwrap(),
            vec![("READY_FOR_AI".to_string(), 1)]
        );

        repo.delete(dataset.id).await.unwrap();
        assert_eq!(repo.count_records(dataset.id).await.unwrap(), 0);
        assert_eq!(repo.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_owner() {
        let (repo, user_id, _) = setup().await;
        repo.create(&new_dataset("Mine", user_id)).await.unwrap();

        let filter = DatasetFilter {
            created_by: Some(user_id + 100),
            ..Default::default()
        };
        let (datasets, total) = repo.list(&filter, &ListParams::new(1, 10)).await.unwrap();
        assert_eq!(total, 0);
        assert!(datasets.is_empty());

        let (datasets, total) = repo
            .list(&DatasetFilter::default(), &ListParams::new(1, 10))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(datasets[0].record_count, 0);
    }
}
