//! Audit logging service
//!
//! Records security and business events. Writing an audit entry never fails
//! the operation being audited: storage errors are logged and dropped.
//!
//! Besides the explicit events written by handlers, the request audit
//! middleware records "significant" requests as decided by
//! [`should_log_endpoint`].

use crate::db::repositories::AuditLogRepository;
use crate::models::{AuditLogFilter, AuditLogWithUser, ListParams, NewAuditLog, PagedResult};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Explicit audit events raised by handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Login,
    PasswordChange,
    ProfileUpdate,
    ChangeRole,
    DeleteUser,
    CreateNco,
    UpdateNco,
    DeleteNco,
    UpdateConfig,
    CreateDataset,
    UpdateDataset,
    DeleteDataset,
    ProcessDataset,
    SearchNco,
    ProvideFeedback,
    FailedLogin,
    UnauthorizedAccess,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Register => "REGISTER",
            AuditAction::Login => "LOGIN",
            AuditAction::PasswordChange => "PASSWORD_CHANGE",
            AuditAction::ProfileUpdate => "PROFILE_UPDATE",
            AuditAction::ChangeRole => "CHANGE_ROLE",
            AuditAction::DeleteUser => "DELETE_USER",
            AuditAction::CreateNco => "CREATE_NCO",
            AuditAction::UpdateNco => "UPDATE_NCO",
            AuditAction::DeleteNco => "DELETE_NCO",
            AuditAction::UpdateConfig => "UPDATE_CONFIG",
            AuditAction::CreateDataset => "CREATE_DATASET",
            AuditAction::UpdateDataset => "UPDATE_DATASET",
            AuditAction::DeleteDataset => "DELETE_DATASET",
            AuditAction::ProcessDataset => "PROCESS_DATASET",
            AuditAction::SearchNco => "SEARCH_NCO",
            AuditAction::ProvideFeedback => "PROVIDE_FEEDBACK",
            AuditAction::FailedLogin => "FAILED_LOGIN",
            AuditAction::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
        }
    }

    pub fn resource_type(&self) -> &'static str {
        match self {
            AuditAction::Register
            | AuditAction::Login
            | AuditAction::PasswordChange
            | AuditAction::ProfileUpdate => "Authentication",
            AuditAction::ChangeRole | AuditAction::DeleteUser => "User",
            AuditAction::CreateNco | AuditAction::UpdateNco | AuditAction::DeleteNco => "NCO Code",
            AuditAction::UpdateConfig => "System Configuration",
            AuditAction::CreateDataset
            | AuditAction::UpdateDataset
            | AuditAction::DeleteDataset
            | AuditAction::ProcessDataset => "Dataset",
            AuditAction::SearchNco | AuditAction::ProvideFeedback => "Search",
            AuditAction::FailedLogin | AuditAction::UnauthorizedAccess => "Security",
        }
    }

    /// Start an entry for this action. Security events are always failures.
    pub fn entry(&self) -> NewAuditLog {
        let entry = NewAuditLog::new(self.as_str(), self.resource_type());
        if self.resource_type() == "Security" {
            NewAuditLog {
                success: false,
                ..entry
            }
        } else {
            entry
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditServiceError {
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct AuditService {
    repo: Arc<dyn AuditLogRepository>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        Self { repo }
    }

    /// Persist an entry; failures are logged and swallowed
    pub async fn log(&self, entry: NewAuditLog) {
        if let Err(e) = self.repo.create(&entry).await {
            tracing::warn!(action = %entry.action, "Failed to write audit log: {:#}", e);
        }
    }

    pub async fn list(
        &self,
        filter: &AuditLogFilter,
        params: &ListParams,
    ) -> Result<PagedResult<AuditLogWithUser>, AuditServiceError> {
        let (logs, total) = self
            .repo
            .list(filter, params)
            .await
            .context("Failed to list audit logs")?;
        Ok(PagedResult::new(logs, total, params))
    }

    pub async fn recent(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AuditLogWithUser>, AuditServiceError> {
        let logs = self
            .repo
            .recent(since, limit)
            .await
            .context("Failed to load recent audit logs")?;
        Ok(logs)
    }
}

/// GET endpoints polled often enough that logging them is noise
const ROUTINE_GET_ENDPOINTS: &[&str] = &[
    "/users/get-allUsers",
    "/admin/dashboard",
    "/admin/audit-logs",
    "/jobs/nco-codes",
    "/datasets",
    "/search-history",
    "/analytics",
    "/utility/health",
    "/utility/status",
];

const AUTH_ENDPOINTS: &[&str] = &["/login", "/register", "/logout", "/change-password"];

const MUTATING_METHODS: &[&str] = &["POST", "PUT", "DELETE", "PATCH"];

/// Paths the request audit middleware ignores entirely
pub fn is_ignored_path(path: &str) -> bool {
    path.contains("/health") || path.contains("/static") || path.contains("/favicon")
}

/// Decide whether a request is significant enough to audit
pub fn should_log_endpoint(method: &str, endpoint: &str) -> bool {
    if AUTH_ENDPOINTS.iter().any(|p| endpoint.contains(p)) {
        return true;
    }

    if MUTATING_METHODS.contains(&method) {
        return true;
    }

    if ROUTINE_GET_ENDPOINTS.iter().any(|p| endpoint.contains(p)) {
        return false;
    }

    method == "GET"
        && (endpoint.contains("/admin/")
            || endpoint.contains("/system-config")
            || endpoint.contains("/api-requests"))
}

/// Action name and resource type for an audited request
pub fn classify_request(method: &str, endpoint: &str, success: bool) -> (String, &'static str) {
    let pick = |ok: &str, failed: &str| if success { ok.to_string() } else { failed.to_string() };

    if endpoint.contains("/login") {
        return (pick("LOGIN_SUCCESS", "LOGIN_FAILED"), "Authentication");
    }
    if endpoint.contains("/register") {
        return (pick("USER_REGISTERED", "REGISTRATION_FAILED"), "Authentication");
    }
    if endpoint.contains("/logout") {
        return ("LOGOUT".to_string(), "Authentication");
    }
    if endpoint.contains("/change-password") {
        return (pick("PASSWORD_CHANGED", "PASSWORD_CHANGE_FAILED"), "Security");
    }

    let generic = format!("{}_REQUEST", method);

    if endpoint.contains("/users/") && method != "GET" {
        let action = match method {
            "POST" => "USER_CREATED".to_string(),
            "PUT" => "USER_UPDATED".to_string(),
            "DELETE" => "USER_DELETED".to_string(),
            _ => generic,
        };
        return (action, "User Management");
    }
    if endpoint.contains("/admin/nco-codes") {
        let action = match method {
            "POST" => "NCO_CODE_CREATED".to_string(),
            "PUT" => "NCO_CODE_UPDATED".to_string(),
            "DELETE" => "NCO_CODE_DELETED".to_string(),
            _ => generic,
        };
        return (action, "NCO Management");
    }
    if endpoint.contains("/admin/system-config") {
        let action = if method == "PUT" {
            "SYSTEM_CONFIG_UPDATED".to_string()
        } else {
            generic
        };
        return (action, "System Configuration");
    }

    (generic, "API")
}
