//! Fix application, model fix advice, and the template library.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clyrdia_ai::{ModelClient, parse_fix_validation, prompt};
use clyrdia_core::fix::{FixSuggestion, MIN_ISSUE_ID_LEN};
use clyrdia_core::{FixRequest, FixResult, FixStatus, FixValidation, Industry, TemplateLibrary};
use clyrdia_store::{CacheStore, RecordStore, StoreError};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
pub const SUGGESTION_FALLBACK: &str = "Unable to generate fix suggestion at this time.";
const AUTO_APPLIED_DOCUMENT: &str = "Auto-applied fix";

#[derive(Debug, Error)]
pub enum FixError {
    #[error("Invalid issue ID")]
    InvalidIssueId,
    #[error("Issue not found")]
    IssueNotFound,
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}

pub struct FixAdvisor {
    model: Arc<dyn ModelClient>,
    store: Arc<dyn RecordStore>,
    cache: CacheStore,
}

impl FixAdvisor {
    pub fn new(model: Arc<dyn ModelClient>, store: Arc<dyn RecordStore>, cache: CacheStore) -> Self {
        Self {
            model,
            store,
            cache,
        }
    }

    fn check_issue_id(issue_id: &str) -> Result<(), FixError> {
        if issue_id.chars().count() < MIN_ISSUE_ID_LEN {
            return Err(FixError::InvalidIssueId);
        }
        Ok(())
    }

    /// Record a fix for an issue, applying it at once when `auto_apply` is set.
    /// Storing the fix is best-effort.
    pub async fn apply_fix(
        &self,
        issue_id: &str,
        request: FixRequest,
        applied_by: Option<&str>,
    ) -> Result<FixResult, FixError> {
        Self::check_issue_id(issue_id)?;
        if self.store.get_issue(issue_id).await?.is_none() {
            return Err(FixError::IssueNotFound);
        }

        let fix_id = match self.store.insert_fix(issue_id, &request, applied_by).await {
            Ok(fix_id) => {
                if request.auto_apply {
                    let mut extra = serde_json::Map::new();
                    extra.insert("updated_document".into(), json!(AUTO_APPLIED_DOCUMENT));
                    match self.store.update_fix_status(&fix_id, FixStatus::Applied, extra).await {
                        Ok(true) => {}
                        Ok(false) => warn!(fix_id, "stored fix vanished before it could be applied"),
                        Err(e) => warn!(fix_id, error = %e, "failed to mark fix applied"),
                    }
                }
                fix_id
            }
            Err(e) => {
                warn!(issue_id, error = %e, "failed to store fix");
                Uuid::new_v4().to_string()
            }
        };

        let status = if request.auto_apply {
            FixStatus::Applied
        } else {
            FixStatus::Pending
        };
        info!(fix_id, issue_id, auto_apply = request.auto_apply, "fix recorded");
        Ok(FixResult {
            fix_id,
            issue_id: issue_id.to_string(),
            status,
            applied_fix: request.fix_description,
            updated_document: None,
            diff_summary: None,
            applied_at: Utc::now(),
            applied_by: applied_by.map(str::to_string),
        })
    }

    /// Ask the model how to fix an issue. `context` is the surrounding
    /// contract text; without it the issue's clause reference is used.
    pub async fn suggest(&self, issue_id: &str, context: Option<&str>) -> Result<FixSuggestion, FixError> {
        Self::check_issue_id(issue_id)?;
        let issue = self
            .store
            .get_issue(issue_id)
            .await?
            .ok_or(FixError::IssueNotFound)?;

        let context = context
            .or(issue.clause_reference.as_deref())
            .unwrap_or_default();
        let description = format!("{}: {}", issue.title, issue.description);

        let suggestion = match self
            .model
            .complete(prompt::fix_suggestion_request(&description, context))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => SUGGESTION_FALLBACK.to_string(),
            Err(e) => {
                warn!(issue_id, error = %e, "fix suggestion failed");
                SUGGESTION_FALLBACK.to_string()
            }
        };
        Ok(FixSuggestion {
            issue_id: issue_id.to_string(),
            suggestion,
        })
    }

    /// Ask the model to judge a proposed fix. Never fails: an unreachable
    /// model or unreadable verdict yields a rejection.
    pub async fn validate(
        &self,
        original_text: &str,
        proposed_fix: &str,
        issue_description: &str,
    ) -> FixValidation {
        let request = prompt::fix_validation_request(original_text, proposed_fix, issue_description);
        match self.model.complete(request).await {
            Ok(response) => parse_fix_validation(&response),
            Err(e) => {
                warn!(error = %e, "fix validation failed");
                FixValidation::rejected(format!("Validation failed: {e}"))
            }
        }
    }

    /// Templates for an industry, cached for thirty minutes per query.
    pub async fn templates(
        &self,
        industry: Industry,
        contract_type: Option<&str>,
        include_variables: bool,
    ) -> Result<TemplateLibrary, FixError> {
        let key = format!(
            "templates:{industry}:{}:{include_variables}",
            contract_type.unwrap_or("none")
        );
        let library = self
            .cache
            .get_or_fetch(&key, Some(TEMPLATE_CACHE_TTL), || async {
                let templates = self.store.get_templates(industry).await?;
                Ok::<_, FixError>(TemplateLibrary::assemble(
                    industry,
                    templates,
                    contract_type,
                    include_variables,
                ))
            })
            .await?;
        info!(industry = %industry, count = library.total_count, "templates retrieved");
        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use clyrdia_ai::{Script, ScriptedModel};
    use clyrdia_core::{ContractTemplate, ManualClock};
    use clyrdia_store::MemoryRecordStore;

    use super::*;
    use crate::pipeline::fixtures::{ONE_ISSUE, SAMPLE, replying};
    use crate::pipeline::AnalysisRequest;

    fn advisor(model: ScriptedModel, store: Arc<MemoryRecordStore>) -> (Arc<ScriptedModel>, FixAdvisor) {
        let model = Arc::new(model);
        let cache = CacheStore::in_memory(Arc::new(ManualClock::new()), Duration::from_secs(60), 100);
        (model.clone(), FixAdvisor::new(model, store, cache))
    }

    async fn stored_issue_id() -> (Arc<MemoryRecordStore>, String) {
        let h = replying(ONE_ISSUE);
        let record = h.pipeline.run(AnalysisRequest::text(SAMPLE)).await.unwrap();
        (h.store.clone(), record.issues[0].id.clone())
    }

    fn request(auto_apply: bool) -> FixRequest {
        FixRequest {
            fix_description: "Cap liability at twelve months of fees".into(),
            fix_code: None,
            auto_apply,
        }
    }

    #[tokio::test]
    async fn short_issue_id_is_invalid() {
        let (_, advisor) = advisor(ScriptedModel::replying("x"), Arc::new(MemoryRecordStore::new()));
        let err = advisor.apply_fix("abc", request(false), None).await.unwrap_err();
        assert!(matches!(err, FixError::InvalidIssueId));
    }

    #[tokio::test]
    async fn unknown_issue_is_not_found() {
        let (_, advisor) = advisor(ScriptedModel::replying("x"), Arc::new(MemoryRecordStore::new()));
        let err = advisor
            .apply_fix("0123456789-unknown", request(false), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::IssueNotFound));
    }

    #[tokio::test]
    async fn pending_fix_is_stored() {
        let (store, issue_id) = stored_issue_id().await;
        let (_, advisor) = advisor(ScriptedModel::replying("x"), store.clone());
        let result = advisor
            .apply_fix(&issue_id, request(false), Some("10.0.0.7"))
            .await
            .unwrap();
        assert_eq!(result.status, FixStatus::Pending);
        assert_eq!(result.applied_by.as_deref(), Some("10.0.0.7"));

        let stored = store.get_fix(&result.fix_id).await.unwrap().unwrap();
        assert_eq!(stored.status, FixStatus::Pending);
        assert_eq!(stored.issue_id, issue_id);
    }

    #[tokio::test]
    async fn auto_apply_marks_stored_fix_applied() {
        let (store, issue_id) = stored_issue_id().await;
        let (_, advisor) = advisor(ScriptedModel::replying("x"), store.clone());
        let result = advisor.apply_fix(&issue_id, request(true), None).await.unwrap();
        assert_eq!(result.status, FixStatus::Applied);

        let stored = store.get_fix(&result.fix_id).await.unwrap().unwrap();
        assert_eq!(stored.status, FixStatus::Applied);
        assert_eq!(stored.extra["updated_document"], AUTO_APPLIED_DOCUMENT);
    }

    #[tokio::test]
    async fn suggestion_uses_model_or_falls_back() {
        let (store, issue_id) = stored_issue_id().await;
        let (model, advisor) = advisor(
            ScriptedModel::with_scripts(
                vec![Script::Reply(vec!["Limit liability ".into(), "to fees paid.".into()])],
                Script::Fail("provider down".into()),
            ),
            store,
        );
        let first = advisor.suggest(&issue_id, Some(SAMPLE)).await.unwrap();
        assert_eq!(first.suggestion, "Limit liability to fees paid.");
        let second = advisor.suggest(&issue_id, Some(SAMPLE)).await.unwrap();
        assert_eq!(second.suggestion, SUGGESTION_FALLBACK);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn validation_parses_or_rejects() {
        let (_, advisor) = advisor(
            ScriptedModel::with_scripts(
                vec![
                    Script::Reply(vec![
                        r#"{"is_valid":true,"confidence":90,"issues":[],"improvements":["cap"],"recommendation":"accept"}"#.into(),
                    ]),
                    Script::Reply(vec!["no idea".into()]),
                ],
                Script::Fail("timeout".into()),
            ),
            Arc::new(MemoryRecordStore::new()),
        );
        let ok = advisor.validate("liability unlimited", "cap at fees", "uncapped").await;
        assert!(ok.is_valid);
        assert_eq!(ok.recommendation, "accept");

        let unreadable = advisor.validate("a", "b", "c").await;
        assert_eq!(unreadable.issues, vec!["Failed to parse validation response"]);

        let failed = advisor.validate("a", "b", "c").await;
        assert!(!failed.is_valid);
        assert!(failed.issues[0].starts_with("Validation failed:"));
    }

    fn template(id: &str, contract_type: &str) -> ContractTemplate {
        ContractTemplate {
            id: id.into(),
            name: format!("{contract_type} {id}"),
            industry: Industry::Technology,
            contract_type: contract_type.into(),
            description: String::new(),
            content: "This Agreement ...".into(),
            variables: vec!["party_a".into()],
            tags: vec![],
            version: "1.0".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn templates_are_cached_per_query() {
        let store = Arc::new(MemoryRecordStore::new());
        store.insert_template(&template("t1", "saas")).await.unwrap();
        store.insert_template(&template("t2", "nda")).await.unwrap();
        let (_, advisor) = advisor(ScriptedModel::replying("x"), store.clone());

        let first = advisor.templates(Industry::Technology, None, false).await.unwrap();
        assert_eq!(first.total_count, 2);
        assert_eq!(first.categories, vec!["nda", "saas"]);
        assert!(first.templates.iter().all(|t| t.variables.is_empty()));

        // A template added after the first read is hidden by the cache.
        store.insert_template(&template("t3", "msa")).await.unwrap();
        let cached = advisor.templates(Industry::Technology, None, false).await.unwrap();
        assert_eq!(cached, first);

        let filtered = advisor
            .templates(Industry::Technology, Some("msa"), true)
            .await
            .unwrap();
        assert_eq!(filtered.total_count, 1);
        assert_eq!(filtered.templates[0].variables, vec!["party_a"]);
    }
}
