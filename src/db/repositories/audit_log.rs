//! Audit log repository

use crate::db::DbPool;
use crate::models::{AuditLog, AuditLogFilter, AuditLogWithUser, ListParams, NewAuditLog};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn create(&self, entry: &NewAuditLog) -> Result<AuditLog>;

    /// Entries matching the filter with the acting user, newest first
    async fn list(&self, filter: &AuditLogFilter, params: &ListParams) -> Result<(Vec<AuditLogWithUser>, i64)>;

    /// Newest entries created at or after `since`
    async fn recent(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<AuditLogWithUser>>;
}

pub struct SqlxAuditLogRepository {
    pool: DbPool,
}

impl SqlxAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DbPool) -> Arc<dyn AuditLogRepository> {
        Arc::new(Self::new(pool))
    }
}

const LOG_COLUMNS: &str = "l.id, l.user_id, l.action, l.resource_type, l.resource_id, l.method, l.endpoint, \
     l.user_agent, l.ip_address, l.metadata, l.success, l.error_message, l.duration, l.created_at, \
     u.name AS user_name, u.email AS user_email";

const LOG_WHERE: &str = r#"
    WHERE (? IS NULL OR l.action = ?)
      AND (? IS NULL OR l.resource_type = ?)
      AND (? IS NULL OR l.user_id = ?)
      AND (? IS NULL OR l.success = ?)
      AND (? IS NULL OR l.created_at >= ?)
      AND (? IS NULL OR l.created_at <= ?)
"#;

#[async_trait]
impl AuditLogRepository for SqlxAuditLogRepository {
    async fn create(&self, entry: &NewAuditLog) -> Result<AuditLog> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, action, resource_type, resource_id, method, endpoint, user_agent,
                ip_address, metadata, success, error_message, duration, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.method)
        .bind(&entry.endpoint)
        .bind(&entry.user_agent)
        .bind(&entry.ip_address)
        .bind(entry.metadata.as_ref().map(|m| m.to_string()))
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.duration)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create audit log")?;

        Ok(AuditLog {
            id: result.last_insert_rowid(),
            user_id: entry.user_id,
            action: entry.action.clone(),
            resource_type: entry.resource_type.clone(),
            resource_id: entry.resource_id.clone(),
            method: entry.method.clone(),
            endpoint: entry.endpoint.clone(),
            user_agent: entry.user_agent.clone(),
            ip_address: entry.ip_address.clone(),
            metadata: entry.metadata.clone(),
            success: entry.success,
            error_message: entry.error_message.clone(),
            duration: entry.duration,
            created_at: now,
        })
    }

    async fn list(&self, filter: &AuditLogFilter, params: &ListParams) -> Result<(Vec<AuditLogWithUser>, i64)> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_logs l LEFT JOIN users u ON u.id = l.user_id {} \
             ORDER BY l.created_at DESC, l.id DESC LIMIT ? OFFSET ?",
            LOG_COLUMNS, LOG_WHERE
        ))
        .bind(&filter.action)
        .bind(&filter.action)
        .bind(&filter.resource_type)
        .bind(&filter.resource_type)
        .bind(filter.user_id)
        .bind(filter.user_id)
        .bind(filter.success)
        .bind(filter.success)
        .bind(filter.start_date)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.end_date)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list audit logs")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM audit_logs l {}", LOG_WHERE))
            .bind(&filter.action)
            .bind(&filter.action)
            .bind(&filter.resource_type)
            .bind(&filter.resource_type)
            .bind(filter.user_id)
            .bind(filter.user_id)
            .bind(filter.success)
            .bind(filter.success)
            .bind(filter.start_date)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(filter.end_date)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count audit logs")?;

        Ok((rows.iter().map(row_to_log).collect(), total))
    }

    async fn recent(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<AuditLogWithUser>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_logs l LEFT JOIN users u ON u.id = l.user_id \
             WHERE l.created_at >= ? ORDER BY l.created_at DESC, l.id DESC LIMIT ?",
            LOG_COLUMNS
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent audit logs")?;

        Ok(rows.iter().map(row_to_log).collect())
    }
}

fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> AuditLogWithUser {
    let metadata: Option<String> = row.get("metadata");

    AuditLogWithUser {
        log: AuditLog {
            id: row.get("id"),
            user_id: row.get("user_id"),
            action: row.get("action"),
            resource_type: row.get("resource_type"),
            resource_id: row.get("resource_id"),
            method: row.get("method"),
            endpoint: row.get("endpoint"),
            user_agent: row.get("user_agent"),
            ip_address: row.get("ip_address"),
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            success: row.get("success"),
            error_message: row.get("error_message"),
            duration: row.get("duration"),
            created_at: row.get("created_at"),
        },
        user_name: row.get("user_name"),
        user_email: row.get("user_email"),
    }
}
