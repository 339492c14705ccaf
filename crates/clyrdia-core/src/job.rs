//! Background job model.
//!
//! A job moves `queued -> running -> succeeded | failed`. Terminal jobs are
//! never mutated again; retrying is a new submission.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{AnalysisRecord, Industry};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Single,
    Batch,
    Reanalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Contract text submitted for deferred analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSubmission {
    pub text: String,
    #[serde(default)]
    pub industry: Option<Industry>,
    #[serde(default)]
    pub analysis_types: Vec<String>,
}

/// One entry of a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Caller's own identifier, echoed back in the report.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub contract: ContractSubmission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub contract_id: Option<String>,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<AnalysisRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a batch job. Per-item failures are recorded, never fatal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, contract_id: Option<String>, record: AnalysisRecord) {
        self.completed += 1;
        self.results.push(BatchItemResult {
            contract_id,
            status: BatchItemStatus::Completed,
            analysis_id: Some(record.id.clone()),
            result: Some(Box::new(record)),
            error: None,
        });
    }

    pub fn record_failure(&mut self, contract_id: Option<String>, error: impl Into<String>) {
        self.failed += 1;
        self.results.push(BatchItemResult {
            contract_id,
            status: BatchItemStatus::Failed,
            analysis_id: None,
            result: None,
            error: Some(error.into()),
        });
    }
}

/// Result payload of a succeeded job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobOutcome {
    Single {
        analysis_id: String,
        result: Box<AnalysisRecord>,
    },
    Batch(BatchReport),
    Reanalysis {
        original_analysis_id: String,
        new_analysis_id: String,
        result: Box<AnalysisRecord>,
    },
}

/// Observable state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    /// 0-100.
    pub progress: u8,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn queued(id: JobId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            state: JobState::Queued,
            progress: 0,
            status: "Queued".to_string(),
            outcome: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// `queued -> running`. Returns false if the job was not queued.
    pub fn start(&mut self, status: impl Into<String>) -> bool {
        if self.state != JobState::Queued {
            return false;
        }
        self.state = JobState::Running;
        self.status = status.into();
        self.started_at = Some(Utc::now());
        true
    }

    /// Update progress while running. Ignored in any other state.
    pub fn report(&mut self, progress: u8, status: impl Into<String>) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.progress = progress.min(100);
        self.status = status.into();
        true
    }

    pub fn succeed(&mut self, outcome: JobOutcome, status: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = JobState::Succeeded;
        self.progress = 100;
        self.status = status.into();
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = JobState::Failed;
        self.status = "Failed".to_string();
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut job = Job::queued(JobId::generate(), JobKind::Single);
        assert!(!job.report(10, "too early"));
        assert!(job.start("Starting analysis"));
        assert!(!job.start("again"));
        assert!(job.report(40, "Analyzing contract"));
        assert_eq!(job.progress, 40);
        assert!(job.fail("model unavailable"));
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn terminal_jobs_are_frozen() {
        let mut job = Job::queued(JobId::generate(), JobKind::Batch);
        job.start("Starting batch analysis");
        assert!(job.succeed(JobOutcome::Batch(BatchReport::new(0)), "done"));
        assert!(!job.fail("late failure"));
        assert!(!job.report(50, "late progress"));
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
    }

    #[test]
    fn queued_job_can_fail_directly() {
        let mut job = Job::queued(JobId::generate(), JobKind::Reanalysis);
        assert!(job.fail("Original analysis not found"));
        assert!(job.state.is_terminal());
    }

    #[test]
    fn batch_report_counts() {
        let mut report = BatchReport::new(2);
        report.record_failure(Some("c2".into()), "boom");
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 0);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["results"][0]["status"], "failed");
        assert_eq!(value["results"][0]["contract_id"], "c2");
        assert!(value["results"][0].get("analysis_id").is_none());
    }

    #[test]
    fn batch_item_flattens_contract() {
        let item: BatchItem = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "text": "agreement",
            "industry": "retail"
        }))
        .unwrap();
        assert_eq!(item.id.as_deref(), Some("c1"));
        assert_eq!(item.contract.industry, Some(Industry::Retail));
        assert!(item.contract.analysis_types.is_empty());
    }
}
