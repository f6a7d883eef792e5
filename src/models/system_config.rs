//! System configuration entries
//!
//! Runtime settings editable by admins. Values are stored as text and
//! interpreted according to `data_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigDataType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
}

impl ConfigDataType {
    /// Interpret a stored value. Malformed numbers become null, malformed
    /// JSON falls back to the raw string.
    pub fn parse_value(&self, raw: &str) -> serde_json::Value {
        match self {
            ConfigDataType::String => serde_json::Value::String(raw.to_string()),
            ConfigDataType::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ConfigDataType::Boolean => serde_json::Value::Bool(raw == "true"),
            ConfigDataType::Json => serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        }
    }

    /// Check that a value is acceptable for this type before storing it
    pub fn validate(&self, raw: &str) -> Result<(), String> {
        match self {
            ConfigDataType::String => Ok(()),
            ConfigDataType::Number => raw
                .trim()
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("Value '{}' is not a number", raw)),
            ConfigDataType::Boolean => match raw {
                "true" | "false" => Ok(()),
                _ => Err(format!("Value '{}' must be 'true' or 'false'", raw)),
            },
            ConfigDataType::Json => serde_json::from_str::<serde_json::Value>(raw)
                .map(|_| ())
                .map_err(|e| format!("Value is not valid JSON: {}", e)),
        }
    }
}

impl fmt::Display for ConfigDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigDataType::String => write!(f, "string"),
            ConfigDataType::Number => write!(f, "number"),
            ConfigDataType::Boolean => write!(f, "boolean"),
            ConfigDataType::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ConfigDataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(ConfigDataType::String),
            "number" => Ok(ConfigDataType::Number),
            "boolean" => Ok(ConfigDataType::Boolean),
            "json" => Ok(ConfigDataType::Json),
            _ => Err(anyhow::anyhow!("Invalid config data type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub category: String,
    pub data_type: ConfigDataType,
    pub is_public: bool,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload for a configuration entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertConfigInput {
    pub key: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub data_type: Option<String>,
    pub is_public: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_values_by_type() {
        assert_eq!(ConfigDataType::Number.parse_value("42"), json!(42.0));
        assert_eq!(ConfigDataType::Boolean.parse_value("true"), json!(true));
        assert_eq!(ConfigDataType::Boolean.parse_value("yes"), json!(false));
        assert_eq!(ConfigDataType::Json.parse_value(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(ConfigDataType::Json.parse_value("{broken"), json!("{broken"));
        assert_eq!(ConfigDataType::String.parse_value("hi"), json!("hi"));
    }

    #[test]
    fn test_validate_values_by_type() {
        assert!(ConfigDataType::Number.validate("3.5").is_ok());
        assert!(ConfigDataType::Number.validate("three").is_err());
        assert!(ConfigDataType::Boolean.validate("false").is_ok());
        assert!(ConfigDataType::Boolean.validate("1").is_err());
        assert!(ConfigDataType::Json.validate("[1,2]").is_ok());
        assert!(ConfigDataType::Json.validate("[1,").is_err());
    }
}
