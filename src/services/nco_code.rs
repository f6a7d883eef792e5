//! NCO code service
//!
//! Administration of the occupation taxonomy (create, update, delete, bulk
//! import) and the public lookups built on it: code validation, the group
//! hierarchy and search suggestions.

use crate::db::repositories::{NcoCodeRepository, SearchRepository};
use crate::models::{
    is_valid_nco_code, CreateNcoCodeInput, HierarchyGroup, HierarchyLevel, NcoCode,
    UpdateNcoCodeInput, DEFAULT_NCO_VERSION,
};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Errors reported back from a bulk import
const MAX_REPORTED_IMPORT_ERRORS: usize = 10;

/// Recent queries appended to suggestions
const MAX_QUERY_SUGGESTIONS: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum NcoCodeServiceError {
    #[error("{0}")]
    ValidationError(String),

    #[error("NCO code already exists.")]
    DuplicateCode,

    #[error("NCO code not found.")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What a delete request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The code is referenced by results or feedback and was deactivated
    Deactivated,
    /// The row was removed
    Deleted,
}

impl DeleteOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            DeleteOutcome::Deactivated => {
                "NCO code deactivated successfully (soft delete due to existing references)"
            }
            DeleteOutcome::Deleted => "NCO code deleted successfully",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    pub code: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkImportReport {
    pub success_count: usize,
    pub error_count: usize,
    /// The first few failures only
    pub errors: Vec<ImportError>,
}

/// Result of checking a code string
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum CodeValidation {
    #[serde(rename_all = "camelCase")]
    InvalidFormat {
        is_valid: bool,
        reason: &'static str,
        format: &'static str,
    },
    #[serde(rename_all = "camelCase")]
    Found {
        is_valid: bool,
        exists: bool,
        code: CodeStatus,
        is_active: bool,
        is_verified: bool,
    },
    #[serde(rename_all = "camelCase")]
    Unknown {
        is_valid: bool,
        exists: bool,
        suggestion: &'static str,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStatus {
    pub id: i64,
    pub nco_code: String,
    pub title: String,
    pub is_active: bool,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    pub level: HierarchyLevel,
    pub hierarchy: Vec<HierarchyGroup>,
    pub total_groups: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Suggestion {
    #[serde(rename_all = "camelCase")]
    NcoTitle {
        text: String,
        nco_code: String,
        relevant_keywords: Vec<String>,
    },
    PopularQuery { text: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestions {
    pub suggestions: Vec<Suggestion>,
    pub query: String,
    pub total_suggestions: usize,
}

pub struct NcoCodeService {
    nco_repo: Arc<dyn NcoCodeRepository>,
    search_repo: Arc<dyn SearchRepository>,
}

impl NcoCodeService {
    pub fn new(nco_repo: Arc<dyn NcoCodeRepository>, search_repo: Arc<dyn SearchRepository>) -> Self {
        Self { nco_repo, search_repo }
    }

    /// Create a code. Codes created by admins are verified immediately.
    pub async fn create(&self, input: CreateNcoCodeInput) -> Result<NcoCode, NcoCodeServiceError> {
        let code = new_code(input)?;

        if self
            .nco_repo
            .get_by_code(&code.nco_code)
            .await
            .context("Failed to check NCO code")?
            .is_some()
        {
            return Err(NcoCodeServiceError::DuplicateCode);
        }

        let created = self
            .nco_repo
            .create(&code)
            .await
            .context("Failed to create NCO code")?;

        tracing::info!(nco_code = %created.nco_code, "NCO code created");
        Ok(created)
    }

    pub async fn update(&self, id: i64, input: UpdateNcoCodeInput) -> Result<NcoCode, NcoCodeServiceError> {
        let mut code = self
            .nco_repo
            .get_by_id(id)
            .await
            .context("Failed to get NCO code")?
            .ok_or(NcoCodeServiceError::NotFound)?;

        if let Some(new_code) = input.nco_code.as_deref() {
            if !is_valid_nco_code(new_code) {
                return Err(NcoCodeServiceError::ValidationError(
                    "NCO code must be exactly 8 digits.".to_string(),
                ));
            }
            if new_code != code.nco_code {
                let taken = self
                    .nco_repo
                    .get_by_code(new_code)
                    .await
                    .context("Failed to check NCO code")?
                    .is_some();
                if taken {
                    return Err(NcoCodeServiceError::DuplicateCode);
                }
            }
        }

        input.apply_to(&mut code);
        code.updated_at = Utc::now();

        let updated = self
            .nco_repo
            .update(&code)
            .await
            .context("Failed to update NCO code")?;
        Ok(updated)
    }

    /// Delete a code, or deactivate it when searches or feedback refer to it
    pub async fn delete(&self, id: i64) -> Result<DeleteOutcome, NcoCodeServiceError> {
        let mut code = self
            .nco_repo
            .get_by_id(id)
            .await
            .context("Failed to get NCO code")?
            .ok_or(NcoCodeServiceError::NotFound)?;

        let refs = self
            .nco_repo
            .references(id)
            .await
            .context("Failed to count NCO code references")?;

        if refs.is_referenced() {
            code.is_active = false;
            code.updated_at = Utc::now();
            self.nco_repo
                .update(&code)
                .await
                .context("Failed to deactivate NCO code")?;
            tracing::info!(nco_code = %code.nco_code, "NCO code deactivated");
            Ok(DeleteOutcome::Deactivated)
        } else {
            self.nco_repo
                .delete(id)
                .await
                .context("Failed to delete NCO code")?;
            tracing::info!(nco_code = %code.nco_code, "NCO code deleted");
            Ok(DeleteOutcome::Deleted)
        }
    }

    /// Create every code in turn; failures are counted, not fatal
    pub async fn bulk_import(
        &self,
        codes: Vec<CreateNcoCodeInput>,
    ) -> Result<BulkImportReport, NcoCodeServiceError> {
        if codes.is_empty() {
            return Err(NcoCodeServiceError::ValidationError(
                "NCO codes array is required and cannot be empty.".to_string(),
            ));
        }

        let mut report = BulkImportReport::default();
        for input in codes {
            let label = input.nco_code.clone();
            match self.create(input).await {
                Ok(_) => report.success_count += 1,
                Err(e) => {
                    if let NcoCodeServiceError::InternalError(cause) = &e {
                        tracing::warn!(nco_code = %label, "Bulk import row failed: {:#}", cause);
                    }
                    report.error_count += 1;
                    if report.errors.len() < MAX_REPORTED_IMPORT_ERRORS {
                        report.errors.push(ImportError {
                            code: label,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            success = report.success_count,
            failed = report.error_count,
            "NCO bulk import finished"
        );
        Ok(report)
    }

    /// Check the format of a code and whether it exists
    pub async fn validate_code(&self, raw: &str) -> Result<CodeValidation, NcoCodeServiceError> {
        if !is_valid_nco_code(raw) {
            return Ok(CodeValidation::InvalidFormat {
                is_valid: false,
                reason: "NCO code must be exactly 8 digits",
                format: "12345678",
            });
        }

        let existing = self
            .nco_repo
            .get_by_code(raw)
            .await
            .context("Failed to look up NCO code")?;

        Ok(match existing {
            Some(code) => CodeValidation::Found {
                is_valid: true,
                exists: true,
                is_active: code.is_active,
                is_verified: code.is_verified,
                code: CodeStatus {
                    id: code.id,
                    nco_code: code.nco_code,
                    title: code.title,
                    is_active: code.is_active,
                    is_verified: code.is_verified,
                },
            },
            None => CodeValidation::Unknown {
                is_valid: true,
                exists: false,
                suggestion: "Valid format but code not found in database",
            },
        })
    }

    pub async fn hierarchy(&self, level: HierarchyLevel) -> Result<Hierarchy, NcoCodeServiceError> {
        let groups = self
            .nco_repo
            .hierarchy(level)
            .await
            .context("Failed to load NCO hierarchy")?;

        Ok(Hierarchy {
            level,
            total_groups: groups.len(),
            hierarchy: groups,
        })
    }

    /// Autocomplete suggestions from code titles, keywords and recent queries
    pub async fn suggestions(&self, query: &str, limit: i64) -> Result<Suggestions, NcoCodeServiceError> {
        let term = query.trim().to_lowercase();
        if term.chars().count() < 2 {
            return Err(NcoCodeServiceError::ValidationError(
                "Query must be at least 2 characters long.".to_string(),
            ));
        }

        let codes = self
            .nco_repo
            .suggestions(&term, limit.clamp(1, 50))
            .await
            .context("Failed to load code suggestions")?;
        let queries = self
            .search_repo
            .recent_matching_queries(&term, MAX_QUERY_SUGGESTIONS)
            .await
            .context("Failed to load query suggestions")?;

        let mut suggestions: Vec<Suggestion> = codes
            .into_iter()
            .map(|code| Suggestion::NcoTitle {
                relevant_keywords: code
                    .keywords
                    .iter()
                    .filter(|k| k.to_lowercase().contains(&term))
                    .cloned()
                    .collect(),
                text: code.title,
                nco_code: code.nco_code,
            })
            .collect();
        suggestions.extend(queries.into_iter().map(|text| Suggestion::PopularQuery { text }));

        Ok(Suggestions {
            total_suggestions: suggestions.len(),
            suggestions,
            query: term,
        })
    }

    pub async fn count_active(&self) -> Result<i64, NcoCodeServiceError> {
        Ok(self
            .nco_repo
            .count_active()
            .await
            .context("Failed to count NCO codes")?)
    }
}

/// Validate creation input and build the unsaved code
fn new_code(input: CreateNcoCodeInput) -> Result<NcoCode, NcoCodeServiceError> {
    let required = [
        &input.nco_code,
        &input.title,
        &input.description,
        &input.major_group,
        &input.sub_major_group,
        &input.minor_group,
        &input.unit_group,
    ];
    if required.iter().any(|v| v.trim().is_empty()) {
        return Err(NcoCodeServiceError::ValidationError(
            "All required NCO code fields must be provided.".to_string(),
        ));
    }

    let nco_code = input.nco_code.trim().to_string();
    if !is_valid_nco_code(&nco_code) {
        return Err(NcoCodeServiceError::ValidationError(
            "NCO code must be exactly 8 digits.".to_string(),
        ));
    }

    let now = Utc::now();
    Ok(NcoCode {
        id: 0,
        nco_code,
        title: input.title.trim().to_string(),
        description: input.description.trim().to_string(),
        major_group: input.major_group.trim().to_string(),
        sub_major_group: input.sub_major_group.trim().to_string(),
        minor_group: input.minor_group.trim().to_string(),
        unit_group: input.unit_group.trim().to_string(),
        sector: non_empty(input.sector),
        skill_level: non_empty(input.skill_level),
        education_level: non_empty(input.education_level),
        keywords: clean_terms(input.keywords),
        synonyms: clean_terms(input.synonyms),
        version: non_empty(input.version).unwrap_or_else(|| DEFAULT_NCO_VERSION.to_string()),
        is_active: true,
        is_verified: true,
        created_at: now,
        updated_at: now,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_terms(terms: Vec<String>) -> Vec<String> {
    terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
