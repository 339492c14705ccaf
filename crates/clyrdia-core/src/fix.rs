//! Fix requests, results, and model-side fix validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue ids shorter than this are rejected before any lookup.
pub const MIN_ISSUE_ID_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub fix_description: String,
    #[serde(default)]
    pub fix_code: Option<String>,
    #[serde(default)]
    pub auto_apply: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    Pending,
    Applied,
    Rejected,
    Reviewed,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Reviewed => "reviewed",
        }
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fix as stored by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFix {
    pub fix_id: String,
    pub issue_id: String,
    pub request: FixRequest,
    pub status: FixStatus,
    pub applied_by: Option<String>,
    /// Extra fields attached by status updates (e.g. `updated_document`).
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub fix_id: String,
    pub issue_id: String,
    pub status: FixStatus,
    pub applied_fix: String,
    pub updated_document: Option<String>,
    pub diff_summary: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub applied_by: Option<String>,
}

/// Model verdict on a proposed fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixValidation {
    pub is_valid: bool,
    /// 0-100.
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    pub recommendation: String,
}

impl FixValidation {
    /// Verdict used when the model cannot be asked or its answer cannot be read.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            confidence: 0.0,
            issues: vec![reason.into()],
            improvements: vec![],
            recommendation: "reject".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSuggestion {
    pub issue_id: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixValidationRequest {
    pub original_text: String,
    pub proposed_fix: String,
    pub issue_description: String,
}
