//! Contract analysis types shared by the pipeline, the stores, and the API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Analysis types requested when the caller does not name any.
pub const DEFAULT_ANALYSIS_TYPES: &[&str] = &["legal", "financial", "compliance"];

/// Overall or per-issue risk, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Lenient parse used on model output: anything unrecognised is `Medium`.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(Self::Medium)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl FromStr for RiskLevel {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParseLabelError {
                kind: "risk level",
                value: s.to_string(),
            }),
        }
    }
}

/// Closed set of issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Legal,
    Financial,
    Compliance,
    Operational,
    Security,
    Other,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legal => "legal",
            Self::Financial => "financial",
            Self::Compliance => "compliance",
            Self::Operational => "operational",
            Self::Security => "security",
            Self::Other => "other",
        }
    }

    /// Lenient parse used on model output: anything unrecognised is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "legal" => Self::Legal,
            "financial" => Self::Financial,
            "compliance" => Self::Compliance,
            "operational" => Self::Operational,
            "security" => Self::Security,
            _ => Self::Other,
        }
    }
}

/// Industries a contract can be analysed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Industry {
    Technology,
    Healthcare,
    Finance,
    RealEstate,
    Manufacturing,
    Retail,
    Education,
    Government,
    Other,
}

impl Industry {
    pub const ALL: [Industry; 9] = [
        Self::Technology,
        Self::Healthcare,
        Self::Finance,
        Self::RealEstate,
        Self::Manufacturing,
        Self::Retail,
        Self::Education,
        Self::Government,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technology => "technology",
            Self::Healthcare => "healthcare",
            Self::Finance => "finance",
            Self::RealEstate => "real_estate",
            Self::Manufacturing => "manufacturing",
            Self::Retail => "retail",
            Self::Education => "education",
            Self::Government => "government",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Industry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Industry {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == wanted)
            .ok_or_else(|| ParseLabelError {
                kind: "industry",
                value: s.to_string(),
            })
    }
}

/// A single finding, always owned by exactly one [`AnalysisRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub issue_type: IssueType,
    pub severity: RiskLevel,
    pub title: String,
    pub description: String,
    pub line_number: Option<u32>,
    pub clause_reference: Option<String>,
    pub suggested_fix: String,
    /// 0-100.
    pub risk_score: f64,
    /// 0-100.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Context recorded alongside every analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub industry: Option<Industry>,
    pub analysis_types: Vec<String>,
    pub text_length: usize,
    pub model_used: String,
    /// Set when the model output could not be parsed and a degraded result was produced.
    #[serde(default)]
    pub degraded: bool,
    /// Original analysis id when this record came from a reanalysis job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reanalysis_of: Option<String>,
}

/// Result of one contract analysis.
///
/// Immutable once shaped by the pipeline; the wire names follow the public
/// API (`analysis_id`, `contract_hash`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(rename = "analysis_id")]
    pub id: String,
    #[serde(rename = "contract_hash")]
    pub fingerprint: String,
    pub total_issues: usize,
    /// 0-100.
    pub overall_risk_score: f64,
    pub risk_level: RiskLevel,
    pub issues: Vec<Issue>,
    pub summary: String,
    pub recommendations: Vec<String>,
    #[serde(rename = "analysis_metadata")]
    pub metadata: AnalysisMetadata,
    pub created_at: DateTime<Utc>,
    /// Wall-clock seconds from input validation to shaping.
    pub processing_time: f64,
}

impl AnalysisRecord {
    /// Highest issue severity, or `None` when no issues were found.
    pub fn worst_severity(&self) -> Option<RiskLevel> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

/// Normalise caller-supplied analysis types: trimmed, lowercased, deduplicated,
/// sorted. Falls back to [`DEFAULT_ANALYSIS_TYPES`] when nothing usable remains.
pub fn normalize_analysis_types<S: AsRef<str>>(types: &[S]) -> Vec<String> {
    let mut out: Vec<String> = types
        .iter()
        .map(|t| t.as_ref().trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if out.is_empty() {
        out = DEFAULT_ANALYSIS_TYPES.iter().map(|s| s.to_string()).collect();
    }
    out.sort();
    out.dedup();
    out
}

/// Clamp a score into `[0, 100]`, mapping NaN to `fallback`.
pub fn clamp_score(score: f64, fallback: f64) -> f64 {
    if score.is_nan() {
        fallback
    } else {
        score.clamp(0.0, 100.0)
    }
}
