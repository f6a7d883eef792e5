//! Dataset models
//!
//! Datasets are uploaded batches of records (survey rows, bulk
//! classification jobs) that get queued for AI classification and then
//! verified record by record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetType {
    NcoMasterData,
    SurveyData,
    BulkClassification,
    UserUpload,
    TrainingData,
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatasetType::NcoMasterData => "NCO_MASTER_DATA",
            DatasetType::SurveyData => "SURVEY_DATA",
            DatasetType::BulkClassification => "BULK_CLASSIFICATION",
            DatasetType::UserUpload => "USER_UPLOAD",
            DatasetType::TrainingData => "TRAINING_DATA",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DatasetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NCO_MASTER_DATA" => Ok(DatasetType::NcoMasterData),
            "SURVEY_DATA" => Ok(DatasetType::SurveyData),
            "BULK_CLASSIFICATION" => Ok(DatasetType::BulkClassification),
            "USER_UPLOAD" => Ok(DatasetType::UserUpload),
            "TRAINING_DATA" => Ok(DatasetType::TrainingData),
            _ => Err(anyhow::anyhow!("Invalid dataset type: {}", s)),
        }
    }
}

/// Dataset lifecycle.
///
/// `VALIDATING` and `AI_PROCESSING` are the busy states: a dataset in
/// either cannot be deleted or re-queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetStatus {
    #[default]
    Uploaded,
    Validating,
    ReadyForAi,
    AiProcessing,
    Completed,
    Failed,
    Archived,
}

impl DatasetStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, DatasetStatus::Validating | DatasetStatus::AiProcessing)
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatasetStatus::Uploaded => "UPLOADED",
            DatasetStatus::Validating => "VALIDATING",
            DatasetStatus::ReadyForAi => "READY_FOR_AI",
            DatasetStatus::AiProcessing => "AI_PROCESSING",
            DatasetStatus::Completed => "COMPLETED",
            DatasetStatus::Failed => "FAILED",
            DatasetStatus::Archived => "ARCHIVED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DatasetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UPLOADED" => Ok(DatasetStatus::Uploaded),
            "VALIDATING" => Ok(DatasetStatus::Validating),
            "READY_FOR_AI" => Ok(DatasetStatus::ReadyForAi),
            "AI_PROCESSING" => Ok(DatasetStatus::AiProcessing),
            "COMPLETED" => Ok(DatasetStatus::Completed),
            "FAILED" => Ok(DatasetStatus::Failed),
            "ARCHIVED" => Ok(DatasetStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid dataset status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub dataset_type: DatasetType,
    pub status: DatasetStatus,
    pub original_file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_url: Option<String>,
    pub mime_type: Option<String>,
    pub total_records: i64,
    pub processed_records: i64,
    pub ai_processing_started: Option<DateTime<Utc>>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creator summary embedded in dataset responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// Dataset with its creator and record count
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetWithMeta {
    #[serde(flatten)]
    pub dataset: Dataset,
    pub creator: Option<CreatorSummary>,
    pub record_count: i64,
}

/// Input for creating a dataset (file metadata only; the upload itself is
/// stored elsewhere and referenced by `file_url`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatasetInput {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub dataset_type: Option<String>,
    pub original_file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_url: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDatasetInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetFilter {
    pub dataset_type: Option<DatasetType>,
    pub status: Option<DatasetStatus>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRecord {
    pub id: i64,
    pub dataset_id: i64,
    pub original_data: serde_json::Value,
    pub suggested_code_id: Option<i64>,
    pub manual_code_id: Option<i64>,
    pub confidence_score: Option<f64>,
    pub is_processed: bool,
    pub has_errors: bool,
    pub error_message: Option<String>,
    pub is_verified: bool,
    pub verified_by: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One record in a batch upload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataRecord {
    pub original_data: serde_json::Value,
    pub suggested_code_id: Option<i64>,
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub has_errors: bool,
    pub error_message: Option<String>,
}

impl NewDataRecord {
    /// A record arrives processed when it already carries a suggestion
    pub fn is_processed(&self) -> bool {
        self.suggested_code_id.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataRecordFilter {
    pub is_processed: Option<bool>,
    pub has_errors: Option<bool>,
    pub is_verified: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_type_roundtrip() {
        for t in [
            DatasetType::NcoMasterData,
            DatasetType::SurveyData,
            DatasetType::BulkClassification,
            DatasetType::UserUpload,
            DatasetType::TrainingData,
        ] {
            assert_eq!(DatasetType::from_str(&t.to_string()).unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.to_string());
        }
        assert!(DatasetType::from_str("SPREADSHEET").is_err());
    }

    #[test]
    fn test_busy_statuses() {
        assert!(DatasetStatus::AiProcessing.is_busy());
        assert!(DatasetStatus::Validating.is_busy());
        assert!(!DatasetStatus::ReadyForAi.is_busy());
        assert_eq!(DatasetStatus::ReadyForAi.to_string(), "READY_FOR_AI");
        assert_eq!(serde_json::to_value(DatasetStatus::ReadyForAi).unwrap(), "READY_FOR_AI");
    }

    #[test]
    fn test_new_record_processed_flag() {
        let record: NewDataRecord = serde_json::from_value(serde_json::json!({
            "originalData": {"jobTitle": "Tailor"},
            "suggestedCodeId": 3
        }))
        .unwrap();
        assert!(record.is_processed());
        assert!(!record.has_errors);
    }
}
