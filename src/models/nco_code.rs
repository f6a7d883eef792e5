//! NCO code model
//!
//! One occupation in the National Classification of Occupations. Codes are
//! eight digits; the group columns place the occupation in the
//! major / sub-major / minor / unit hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_NCO_VERSION: &str = "NCO-2015";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NcoCode {
    pub id: i64,
    pub nco_code: String,
    pub title: String,
    pub description: String,
    pub major_group: String,
    pub sub_major_group: String,
    pub minor_group: String,
    pub unit_group: String,
    pub sector: Option<String>,
    pub skill_level: Option<String>,
    pub education_level: Option<String>,
    pub keywords: Vec<String>,
    pub synonyms: Vec<String>,
    pub version: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Check the eight-digit code format
pub fn is_valid_nco_code(code: &str) -> bool {
    code.len() == 8 && code.bytes().all(|b| b.is_ascii_digit())
}

/// Input for creating an NCO code
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNcoCodeInput {
    #[serde(default)]
    pub nco_code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub major_group: String,
    #[serde(default)]
    pub sub_major_group: String,
    #[serde(default)]
    pub minor_group: String,
    #[serde(default)]
    pub unit_group: String,
    pub sector: Option<String>,
    pub skill_level: Option<String>,
    pub education_level: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    pub version: Option<String>,
}

/// Partial update of an NCO code; `None` keeps the stored value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNcoCodeInput {
    pub nco_code: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub major_group: Option<String>,
    pub sub_major_group: Option<String>,
    pub minor_group: Option<String>,
    pub unit_group: Option<String>,
    pub sector: Option<String>,
    pub skill_level: Option<String>,
    pub education_level: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub synonyms: Option<Vec<String>>,
    pub version: Option<String>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
}

impl UpdateNcoCodeInput {
    /// Apply the update onto an existing code
    pub fn apply_to(self, code: &mut NcoCode) {
        if let Some(v) = self.nco_code {
            code.nco_code = v;
        }
        if let Some(v) = self.title {
            code.title = v;
        }
        if let Some(v) = self.description {
            code.description = v;
        }
        if let Some(v) = self.major_group {
            code.major_group = v;
        }
        if let Some(v) = self.sub_major_group {
            code.sub_major_group = v;
        }
        if let Some(v) = self.minor_group {
            code.minor_group = v;
        }
        if let Some(v) = self.unit_group {
            code.unit_group = v;
        }
        if self.sector.is_some() {
            code.sector = self.sector;
        }
        if self.skill_level.is_some() {
            code.skill_level = self.skill_level;
        }
        if self.education_level.is_some() {
            code.education_level = self.education_level;
        }
        if let Some(v) = self.keywords {
            code.keywords = v;
        }
        if let Some(v) = self.synonyms {
            code.synonyms = v;
        }
        if let Some(v) = self.version {
            code.version = v;
        }
        if let Some(v) = self.is_active {
            code.is_active = v;
        }
        if let Some(v) = self.is_verified {
            code.is_verified = v;
        }
    }
}

/// Listing filters for NCO codes
#[derive(Debug, Clone)]
pub struct NcoCodeFilter {
    pub major_group: Option<String>,
    pub sector: Option<String>,
    pub skill_level: Option<String>,
    /// Matches title, code or description
    pub search: Option<String>,
    pub is_active: bool,
}

impl Default for NcoCodeFilter {
    fn default() -> Self {
        Self {
            major_group: None,
            sector: None,
            skill_level: None,
            search: None,
            is_active: true,
        }
    }
}

/// NCO code with usage counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NcoCodeWithCounts {
    #[serde(flatten)]
    pub code: NcoCode,
    pub search_result_count: i64,
    pub feedback_count: i64,
}

/// Depth of the occupation hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HierarchyLevel {
    Major,
    SubMajor,
    Minor,
    Unit,
}

impl HierarchyLevel {
    /// Group columns that identify a node at this level, outermost first
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            HierarchyLevel::Major => &["major_group"],
            HierarchyLevel::SubMajor => &["major_group", "sub_major_group"],
            HierarchyLevel::Minor => &["major_group", "sub_major_group", "minor_group"],
            HierarchyLevel::Unit => &["major_group", "sub_major_group", "minor_group", "unit_group"],
        }
    }
}

impl FromStr for HierarchyLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "major" => Ok(HierarchyLevel::Major),
            "subMajor" => Ok(HierarchyLevel::SubMajor),
            "minor" => Ok(HierarchyLevel::Minor),
            "unit" => Ok(HierarchyLevel::Unit),
            _ => Err(anyhow::anyhow!(
                "Invalid hierarchy level. Use: major, subMajor, minor, unit"
            )),
        }
    }
}

/// One node of the occupation hierarchy
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyGroup {
    pub major_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_major_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_group: Option<String>,
    pub code_count: i64,
    pub sample_title: Option<String>,
    pub sample_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_nco_code_format() {
        assert!(is_valid_nco_code("25121000"));
        assert!(!is_valid_nco_code("2512100"));
        assert!(!is_valid_nco_code("251210000"));
        assert!(!is_valid_nco_code("2512100a"));
        assert!(!is_valid_nco_code(""));
    }

    #[test]
    fn test_hierarchy_level_parse() {
        assert_eq!(HierarchyLevel::from_str("subMajor").unwrap(), HierarchyLevel::SubMajor);
        assert_eq!(HierarchyLevel::Unit.columns().len(), 4);
        assert!(HierarchyLevel::from_str("sector").is_err());
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let now = Utc::now();
        let mut code = NcoCode {
            id: 1,
            nco_code: "25121000".into(),
            title: "Software Developer".into(),
            description: "Writes software".into(),
            major_group: "2".into(),
            sub_major_group: "25".into(),
            minor_group: "251".into(),
            unit_group: "2512".into(),
            sector: Some("IT".into()),
            skill_level: None,
            education_level: None,
            keywords: vec!["software".into()],
            synonyms: vec![],
            version: DEFAULT_NCO_VERSION.into(),
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
        };

        UpdateNcoCodeInput {
            title: Some("Software Engineer".into()),
            is_verified: Some(true),
            ..Default::default()
        }
        .apply_to(&mut code);

        assert_eq!(code.title, "Software Engineer");
        assert!(code.is_verified);
        assert_eq!(code.sector.as_deref(), Some("IT"));
        assert_eq!(code.keywords, vec!["software".to_string()]);
    }

    proptest! {
        #[test]
        fn eight_digit_strings_are_valid(code in "[0-9]{8}") {
            prop_assert!(is_valid_nco_code(&code));
        }

        #[test]
        fn other_lengths_are_invalid(code in "[0-9]{0,7}|[0-9]{9,12}") {
            prop_assert!(!is_valid_nco_code(&code));
        }
    }
}
