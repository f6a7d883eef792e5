//! Audit log and outbound API request models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub method: Option<String>,
    pub endpoint: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    /// Milliseconds
    pub duration: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Audit entry to be written
#[derive(Debug, Clone, Default)]
pub struct NewAuditLog {
    pub user_id: Option<i64>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub method: Option<String>,
    pub endpoint: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration: Option<i64>,
}

impl NewAuditLog {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            success: true,
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn resource(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    /// Copy details of the originating request and mark it as audited
    pub fn request(mut self, ctx: &RequestContext) -> Self {
        ctx.audited.set();
        self.method = Some(ctx.method.clone());
        self.endpoint = Some(ctx.endpoint.clone());
        self.user_agent = ctx.user_agent.clone();
        self.ip_address = ctx.ip_address.clone();
        self
    }

    pub fn duration(mut self, millis: i64) -> Self {
        self.duration = Some(millis);
        self
    }
}

/// Request details recorded with audit entries and searches
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    /// Path and query as received
    pub endpoint: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub audited: AuditMark,
}

/// Shared flag raised once a handler writes its own entry for a request
#[derive(Debug, Clone, Default)]
pub struct AuditMark(Arc<AtomicBool>);

impl AuditMark {
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Audit log listing filters
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub user_id: Option<i64>,
    pub success: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Audit entry with the acting user's name and email
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogWithUser {
    #[serde(flatten)]
    pub log: AuditLog,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

/// Result of one outbound call to an external service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiRequestStatus {
    Success,
    Error,
    Timeout,
}

impl fmt::Display for ApiRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiRequestStatus::Success => write!(f, "success"),
            ApiRequestStatus::Error => write!(f, "error"),
            ApiRequestStatus::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub id: i64,
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub status: String,
    pub status_code: Option<i64>,
    /// Milliseconds
    pub response_time: i64,
    pub error_message: Option<String>,
    pub search_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewApiRequest {
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub status: ApiRequestStatus,
    pub status_code: Option<i64>,
    pub response_time: i64,
    pub error_message: Option<String>,
    pub search_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ApiRequestFilter {
    pub service_name: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}
