//! Durable record store contract and its in-memory implementation.
//!
//! Callers treat every method as fallible and best-effort: the analysis
//! pipeline keeps going when persistence fails.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clyrdia_core::fix::{FixRequest, FixStatus, StoredFix};
use clyrdia_core::{AnalysisRecord, ContractTemplate, Industry, Issue};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::StoreError;

/// Where an analysis came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    /// Sanitised contract text, kept so the analysis can be rerun.
    pub source_text: Option<String>,
    /// Client identity that requested the analysis.
    pub owner: Option<String>,
}

/// Aggregate counts over a trailing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_analyses: usize,
    pub total_issues: usize,
    pub risk_distribution: BTreeMap<String, usize>,
    pub period_days: u32,
}

impl AnalyticsSummary {
    fn from_records<'a>(records: impl Iterator<Item = &'a AnalysisRecord>, period_days: u32) -> Self {
        let mut summary = Self {
            total_analyses: 0,
            total_issues: 0,
            risk_distribution: BTreeMap::new(),
            period_days,
        };
        for record in records {
            summary.total_analyses += 1;
            summary.total_issues += record.total_issues;
            *summary
                .risk_distribution
                .entry(record.risk_level.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store an analysis. Returns its id.
    async fn insert_analysis(
        &self,
        record: &AnalysisRecord,
        provenance: &Provenance,
    ) -> Result<String, StoreError>;

    /// Store issues belonging to an analysis. Returns their ids.
    async fn insert_issues(
        &self,
        analysis_id: &str,
        issues: &[Issue],
    ) -> Result<Vec<String>, StoreError>;

    /// Fetch a live (not soft-deleted) analysis.
    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>, StoreError>;

    /// Most recent live analysis with this fingerprint.
    async fn get_analysis_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError>;

    /// Stored contract text of an analysis, if it was kept.
    async fn get_source_text(&self, analysis_id: &str) -> Result<Option<String>, StoreError>;

    async fn get_issue(&self, issue_id: &str) -> Result<Option<Issue>, StoreError>;

    /// Store a pending fix for an issue. Returns the fix id.
    async fn insert_fix(
        &self,
        issue_id: &str,
        request: &FixRequest,
        applied_by: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Move a fix to `status`, merging `extra` into its stored fields.
    /// Returns false when the fix does not exist.
    async fn update_fix_status(
        &self,
        fix_id: &str,
        status: FixStatus,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool, StoreError>;

    async fn get_fix(&self, fix_id: &str) -> Result<Option<StoredFix>, StoreError>;

    async fn insert_template(&self, template: &ContractTemplate) -> Result<(), StoreError>;

    async fn get_templates(&self, industry: Industry) -> Result<Vec<ContractTemplate>, StoreError>;

    /// Most recent live analyses requested by `owner`, newest first.
    async fn get_user_analyses(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError>;

    /// Hide an analysis from reads. Returns false when it was absent or already deleted.
    async fn soft_delete_analysis(&self, id: &str) -> Result<bool, StoreError>;

    /// Counts over live analyses created in the last `days` days.
    async fn analytics(&self, days: u32) -> Result<AnalyticsSummary, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

// ── In-memory implementation ──

struct StoredAnalysis {
    record: AnalysisRecord,
    provenance: Provenance,
    deleted: bool,
    inserted_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    analyses: HashMap<String, StoredAnalysis>,
    issues: HashMap<String, (String, Issue)>,
    fixes: HashMap<String, StoredFix>,
    templates: HashMap<String, ContractTemplate>,
}

/// Process-local record store. Default when no database is configured.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_analysis(
        &self,
        record: &AnalysisRecord,
        provenance: &Provenance,
    ) -> Result<String, StoreError> {
        let mut tables = self.tables.write().await;
        tables.analyses.insert(
            record.id.clone(),
            StoredAnalysis {
                record: record.clone(),
                provenance: provenance.clone(),
                deleted: false,
                inserted_at: Utc::now(),
            },
        );
        Ok(record.id.clone())
    }

    async fn insert_issues(
        &self,
        analysis_id: &str,
        issues: &[Issue],
    ) -> Result<Vec<String>, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.analyses.contains_key(analysis_id) {
            return Err(StoreError::NotFound {
                entity: "analysis",
                id: analysis_id.to_string(),
            });
        }
        let ids = issues
            .iter()
            .map(|issue| {
                tables
                    .issues
                    .insert(issue.id.clone(), (analysis_id.to_string(), issue.clone()));
                issue.id.clone()
            })
            .collect();
        Ok(ids)
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .get(id)
            .filter(|a| !a.deleted)
            .map(|a| a.record.clone()))
    }

    async fn get_analysis_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .values()
            .filter(|a| !a.deleted && a.record.fingerprint == fingerprint)
            .max_by_key(|a| (a.record.created_at, a.inserted_at))
            .map(|a| a.record.clone()))
    }

    async fn get_source_text(&self, analysis_id: &str) -> Result<Option<String>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .get(analysis_id)
            .filter(|a| !a.deleted)
            .and_then(|a| a.provenance.source_text.clone()))
    }

    async fn get_issue(&self, issue_id: &str) -> Result<Option<Issue>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.issues.get(issue_id).map(|(_, issue)| issue.clone()))
    }

    async fn insert_fix(
        &self,
        issue_id: &str,
        request: &FixRequest,
        applied_by: Option<&str>,
    ) -> Result<String, StoreError> {
        let now = Utc::now();
        let fix = StoredFix {
            fix_id: Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            request: request.clone(),
            status: FixStatus::Pending,
            applied_by: applied_by.map(str::to_string),
            extra: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        };
        let id = fix.fix_id.clone();
        self.tables.write().await.fixes.insert(id.clone(), fix);
        Ok(id)
    }

    async fn update_fix_status(
        &self,
        fix_id: &str,
        status: FixStatus,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(fix) = tables.fixes.get_mut(fix_id) else {
            return Ok(false);
        };
        fix.status = status;
        fix.extra.extend(extra);
        fix.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_fix(&self, fix_id: &str) -> Result<Option<StoredFix>, StoreError> {
        Ok(self.tables.read().await.fixes.get(fix_id).cloned())
    }

    async fn insert_template(&self, template: &ContractTemplate) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .templates
            .insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn get_templates(&self, industry: Industry) -> Result<Vec<ContractTemplate>, StoreError> {
        let tables = self.tables.read().await;
        let mut templates: Vec<ContractTemplate> = tables
            .templates
            .values()
            .filter(|t| t.industry == industry)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(templates)
    }

    async fn get_user_analyses(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut owned: Vec<&StoredAnalysis> = tables
            .analyses
            .values()
            .filter(|a| !a.deleted && a.provenance.owner.as_deref() == Some(owner))
            .collect();
        owned.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
        Ok(owned
            .into_iter()
            .take(limit)
            .map(|a| a.record.clone())
            .collect())
    }

    async fn soft_delete_analysis(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.analyses.get_mut(id) {
            Some(a) if !a.deleted => {
                a.deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn analytics(&self, days: u32) -> Result<AnalyticsSummary, StoreError> {
        let since = Utc::now() - ChronoDuration::days(i64::from(days));
        let tables = self.tables.read().await;
        Ok(AnalyticsSummary::from_records(
            tables
                .analyses
                .values()
                .filter(|a| !a.deleted && a.record.created_at >= since)
                .map(|a| &a.record),
            days,
        ))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use clyrdia_core::{AnalysisMetadata, AnalysisRecord, Issue, IssueType, RiskLevel};

    pub fn issue(id: &str, severity: RiskLevel) -> Issue {
        Issue {
            id: id.to_string(),
            issue_type: IssueType::Legal,
            severity,
            title: "Uncapped liability".into(),
            description: "Liability is not limited.".into(),
            line_number: None,
            clause_reference: Some("7.2".into()),
            suggested_fix: "Cap liability at fees paid.".into(),
            risk_score: 70.0,
            confidence: 80.0,
            created_at: Utc::now(),
        }
    }

    pub fn record(id: &str, fingerprint: &str, risk: RiskLevel, issues: Vec<Issue>) -> AnalysisRecord {
        AnalysisRecord {
            id: id.to_string(),
            fingerprint: fingerprint.to_string(),
            total_issues: issues.len(),
            overall_risk_score: 40.0,
            risk_level: risk,
            issues,
            summary: "ok".into(),
            recommendations: vec!["Review clause 7".into()],
            metadata: AnalysisMetadata {
                industry: None,
                analysis_types: vec!["legal".into()],
                text_length: 120,
                model_used: "scripted".into(),
                degraded: false,
                reanalysis_of: None,
            },
            created_at: Utc::now(),
            processing_time: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use clyrdia_core::RiskLevel;

    use super::fixtures::{issue, record};
    use super::*;

    fn provenance(owner: &str) -> Provenance {
        Provenance {
            source_text: Some("This Agreement ...".into()),
            owner: Some(owner.into()),
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryRecordStore::new();
        let rec = record("a1", "fp1", RiskLevel::Low, vec![]);
        let id = store.insert_analysis(&rec, &provenance("c1")).await.unwrap();
        assert_eq!(id, "a1");
        assert_eq!(store.get_analysis("a1").await.unwrap(), Some(rec));
        assert_eq!(
            store.get_source_text("a1").await.unwrap().as_deref(),
            Some("This Agreement ...")
        );
    }

    #[tokio::test]
    async fn issues_require_parent() {
        let store = MemoryRecordStore::new();
        let result = store
            .insert_issues("missing", &[issue("issue-000001", RiskLevel::High)])
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn issues_are_retrievable() {
        let store = MemoryRecordStore::new();
        let i = issue("issue-000001", RiskLevel::High);
        let rec = record("a1", "fp1", RiskLevel::High, vec![i.clone()]);
        store.insert_analysis(&rec, &Provenance::default()).await.unwrap();
        let ids = store.insert_issues("a1", &rec.issues).await.unwrap();
        assert_eq!(ids, vec!["issue-000001"]);
        assert_eq!(store.get_issue("issue-000001").await.unwrap(), Some(i));
    }

    #[tokio::test]
    async fn soft_delete_hides_record() {
        let store = MemoryRecordStore::new();
        let rec = record("a1", "fp1", RiskLevel::Low, vec![]);
        store.insert_analysis(&rec, &Provenance::default()).await.unwrap();
        assert!(store.soft_delete_analysis("a1").await.unwrap());
        assert!(!store.soft_delete_analysis("a1").await.unwrap());
        assert!(store.get_analysis("a1").await.unwrap().is_none());
        assert!(store.get_analysis_by_fingerprint("fp1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fix_status_update_merges_extra() {
        let store = MemoryRecordStore::new();
        let req = FixRequest {
            fix_description: "Cap liability".into(),
            fix_code: None,
            auto_apply: true,
        };
        let fix_id = store.insert_fix("issue-000001", &req, Some("10.0.0.1")).await.unwrap();
        let mut extra = serde_json::Map::new();
        extra.insert("updated_document".into(), "Auto-applied fix".into());
        assert!(store.update_fix_status(&fix_id, FixStatus::Applied, extra).await.unwrap());
        let fix = store.get_fix(&fix_id).await.unwrap().unwrap();
        assert_eq!(fix.status, FixStatus::Applied);
        assert_eq!(fix.extra["updated_document"], "Auto-applied fix");
        assert!(
            !store
                .update_fix_status("nope", FixStatus::Rejected, serde_json::Map::new())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn user_analyses_newest_first() {
        let store = MemoryRecordStore::new();
        let mut older = record("a1", "fp1", RiskLevel::Low, vec![]);
        older.created_at = Utc::now() - ChronoDuration::hours(1);
        let newer = record("a2", "fp2", RiskLevel::High, vec![]);
        store.insert_analysis(&older, &provenance("c1")).await.unwrap();
        store.insert_analysis(&newer, &provenance("c1")).await.unwrap();
        store
            .insert_analysis(&record("a3", "fp3", RiskLevel::Low, vec![]), &provenance("c2"))
            .await
            .unwrap();

        let mine = store.get_user_analyses("c1", 10).await.unwrap();
        let ids: Vec<_> = mine.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);
        assert_eq!(store.get_user_analyses("c1", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn analytics_counts_live_records_in_period() {
        let store = MemoryRecordStore::new();
        let issues = vec![issue("issue-000001", RiskLevel::High), issue("issue-000002", RiskLevel::Low)];
        store
            .insert_analysis(&record("a1", "fp1", RiskLevel::High, issues), &Provenance::default())
            .await
            .unwrap();
        store
            .insert_analysis(&record("a2", "fp2", RiskLevel::Low, vec![]), &Provenance::default())
            .await
            .unwrap();
        let mut old = record("a3", "fp3", RiskLevel::Low, vec![]);
        old.created_at = Utc::now() - ChronoDuration::days(60);
        store.insert_analysis(&old, &Provenance::default()).await.unwrap();

        let summary = store.analytics(30).await.unwrap();
        assert_eq!(summary.total_analyses, 2);
        assert_eq!(summary.total_issues, 2);
        assert_eq!(summary.risk_distribution["high"], 1);
        assert_eq!(summary.risk_distribution["low"], 1);
        assert_eq!(summary.period_days, 30);
    }
}
