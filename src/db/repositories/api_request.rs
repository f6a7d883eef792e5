//! Outbound API request repository
//!
//! One row per call made to an external service such as the matcher.

use crate::db::DbPool;
use crate::models::{ApiRequest, ApiRequestFilter, ListParams, NewApiRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait ApiRequestRepository: Send + Sync {
    async fn create(&self, request: &NewApiRequest) -> Result<ApiRequest>;

    async fn list(&self, filter: &ApiRequestFilter, params: &ListParams) -> Result<(Vec<ApiRequest>, i64)>;

    /// Request count and mean response time since `since`
    async fn stats_since(&self, since: DateTime<Utc>) -> Result<(i64, Option<f64>)>;
}

pub struct SqlxApiRequestRepository {
    pool: DbPool,
}

impl SqlxApiRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DbPool) -> Arc<dyn ApiRequestRepository> {
        Arc::new(Self::new(pool))
    }
}

const REQUEST_COLUMNS: &str = "id, service_name, endpoint, method, status, status_code, response_time, \
     error_message, search_id, created_at";

const REQUEST_WHERE: &str = r#"
    WHERE (? IS NULL OR service_name = ?)
      AND (? IS NULL OR status = ?)
      AND (? IS NULL OR created_at >= ?)
      AND (? IS NULL OR created_at <= ?)
"#;

#[async_trait]
impl ApiRequestRepository for SqlxApiRequestRepository {
    async fn create(&self, request: &NewApiRequest) -> Result<ApiRequest> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO api_requests (service_name, endpoint, method, status, status_code, response_time,
                error_message, search_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.service_name)
        .bind(&request.endpoint)
        .bind(&request.method)
        .bind(request.status.to_string())
        .bind(request.status_code)
        .bind(request.response_time)
        .bind(&request.error_message)
        .bind(request.search_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to record API request")?;

        Ok(ApiRequest {
            id: result.last_insert_rowid(),
            service_name: request.service_name.clone(),
            endpoint: request.endpoint.clone(),
            method: request.method.clone(),
            status: request.status.to_string(),
            status_code: request.status_code,
            response_time: request.response_time,
            error_message: request.error_message.clone(),
            search_id: request.search_id,
            created_at: now,
        })
    }

    async fn list(&self, filter: &ApiRequestFilter, params: &ListParams) -> Result<(Vec<ApiRequest>, i64)> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM api_requests {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            REQUEST_COLUMNS, REQUEST_WHERE
        ))
        .bind(&filter.service_name)
        .bind(&filter.service_name)
        .bind(&filter.status)
        .bind(&filter.status)
        .bind(filter.start_date)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.end_date)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list API requests")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM api_requests {}", REQUEST_WHERE))
            .bind(&filter.service_name)
            .bind(&filter.service_name)
            .bind(&filter.status)
            .bind(&filter.status)
            .bind(filter.start_date)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(filter.end_date)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count API requests")?;

        let requests = rows
            .iter()
            .map(|row| ApiRequest {
                id: row.get("id"),
                service_name: row.get("service_name"),
                endpoint: row.get("endpoint"),
                method: row.get("method"),
                status: row.get("status"),
                status_code: row.get("status_code"),
                response_time: row.get("response_time"),
                error_message: row.get("error_message"),
                search_id: row.get("search_id"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok((requests, total))
    }

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<(i64, Option<f64>)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, AVG(response_time) AS avg_time FROM api_requests WHERE created_at >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate API requests")?;

        Ok((row.get("total"), row.get("avg_time")))
    }
}
