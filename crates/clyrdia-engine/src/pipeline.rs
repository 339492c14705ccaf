//! Contract analysis pipeline.
//!
//! Stages run in order: input validation, extraction, content validation,
//! sanitisation, fingerprinting, cache probe, model invocation, response
//! parsing, shaping, persistence, cache write. Only the non-streaming
//! [`AnalysisPipeline::run`] touches the cache; streamed runs always call
//! the model so they can emit progress.
//!
//! Persistence and cache failures are logged and dropped here. Everything
//! else surfaces as a [`PipelineError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use clyrdia_ai::{ModelClient, parse_analysis, prompt};
use clyrdia_core::config::ModelSettings;
use clyrdia_core::text::{sanitize_input, sanitize_text, validate_contract};
use clyrdia_core::{
    AnalysisMetadata, AnalysisRecord, ContractSubmission, Fingerprint, Industry, PipelineEvent,
    normalize_analysis_types,
};
use clyrdia_store::{CacheStore, Provenance, RecordStore};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::PipelineError;
use crate::extract::{DocumentExtractor, TextExtractor};

/// Bump whenever the cached [`AnalysisRecord`] wire shape changes.
pub const CACHE_SCHEMA_VERSION: &str = "v1";

/// Default lifetime of a cached analysis.
pub const ANALYSIS_CACHE_TTL: Duration = Duration::from_secs(3600);

// ── Requests ──

/// An uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub filename: Option<String>,
}

/// One analysis submission. Exactly one of `text` and `document` must be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisRequest {
    pub text: Option<String>,
    pub document: Option<Document>,
    pub industry: Option<Industry>,
    pub analysis_types: Vec<String>,
    /// Client identity recorded with the stored analysis.
    pub owner: Option<String>,
    /// Set when rerunning a stored analysis.
    pub reanalysis_of: Option<String>,
}

impl AnalysisRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn document(document: Document) -> Self {
        Self {
            document: Some(document),
            ..Default::default()
        }
    }

    pub fn with_industry(mut self, industry: Option<Industry>) -> Self {
        self.industry = industry;
        self
    }

    pub fn with_analysis_types(mut self, types: Vec<String>) -> Self {
        self.analysis_types = types;
        self
    }

    pub fn owned_by(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }
}

impl From<ContractSubmission> for AnalysisRequest {
    fn from(s: ContractSubmission) -> Self {
        Self::text(s.text)
            .with_industry(s.industry)
            .with_analysis_types(s.analysis_types)
    }
}

/// Validated, sanitised input ready for the model.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub text: String,
    pub fingerprint: Fingerprint,
    pub industry: Option<Industry>,
    pub analysis_types: Vec<String>,
    pub owner: Option<String>,
    pub reanalysis_of: Option<String>,
    started: Instant,
}

impl Prepared {
    /// `analysis:v1:{fingerprint}:{industry}:{sorted types}`.
    pub fn cache_key(&self) -> String {
        format!(
            "analysis:{CACHE_SCHEMA_VERSION}:{}:{}:{}",
            self.fingerprint,
            self.industry.map(|i| i.as_str()).unwrap_or("none"),
            self.analysis_types.join(",")
        )
    }
}

// ── Pipeline ──

pub struct AnalysisPipeline {
    extractor: Arc<dyn TextExtractor>,
    model: Arc<dyn ModelClient>,
    store: Arc<dyn RecordStore>,
    cache: CacheStore,
    max_tokens: u32,
    temperature: f32,
    cache_ttl: Duration,
}

impl AnalysisPipeline {
    pub fn new(
        model: Arc<dyn ModelClient>,
        store: Arc<dyn RecordStore>,
        cache: CacheStore,
        settings: &ModelSettings,
    ) -> Self {
        Self {
            extractor: Arc::new(DocumentExtractor),
            model,
            store,
            cache,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            cache_ttl: ANALYSIS_CACHE_TTL,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Input validation through fingerprinting.
    pub async fn prepare(&self, request: AnalysisRequest) -> Result<Prepared, PipelineError> {
        let started = Instant::now();
        let AnalysisRequest {
            text,
            document,
            industry,
            analysis_types,
            owner,
            reanalysis_of,
        } = request;

        let text = text.filter(|t| !t.trim().is_empty());
        let document = document.filter(|d| !d.bytes.is_empty());

        let (raw, document_fingerprint) = match (text, document) {
            (Some(text), None) => (sanitize_input(&text), None),
            (None, Some(document)) => {
                let extractor = self.extractor.clone();
                let extracted = tokio::task::spawn_blocking(move || {
                    extractor.extract(&document.bytes, &document.media_type)
                })
                .await
                .map_err(|e| PipelineError::ExtractionFailed(format!("extractor panicked: {e}")))??;
                (extracted.text, Some(extracted.fingerprint))
            }
            (Some(_), Some(_)) => {
                return Err(PipelineError::InvalidInput(
                    "provide either contract text or a document, not both".into(),
                ));
            }
            (None, None) => {
                return Err(PipelineError::InvalidInput(
                    "either contract text or a document must be provided".into(),
                ));
            }
        };

        validate_contract(&raw)?;
        let text = sanitize_text(&raw);
        let fingerprint = document_fingerprint.unwrap_or_else(|| Fingerprint::of_text(&text));

        Ok(Prepared {
            text,
            fingerprint,
            industry,
            analysis_types: normalize_analysis_types(&analysis_types),
            owner,
            reanalysis_of,
            started,
        })
    }

    /// Call the model and accumulate its response. When `events` is given,
    /// every fragment is forwarded as [`PipelineEvent::Progress`]; a closed
    /// receiver stops consumption at the next fragment.
    pub async fn generate(
        &self,
        prepared: &Prepared,
        events: Option<&mpsc::Sender<PipelineEvent>>,
    ) -> Result<String, PipelineError> {
        let request = prompt::analysis_request(
            &prepared.text,
            prepared.industry,
            &prepared.analysis_types,
            self.max_tokens,
            self.temperature,
        );
        let mut fragments = self.model.stream(request).await?;
        let mut accumulated = String::new();

        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            accumulated.push_str(&fragment);
            if let Some(tx) = events {
                let event = PipelineEvent::Progress {
                    fragment,
                    accumulated: accumulated.clone(),
                };
                if tx.send(event).await.is_err() {
                    debug!(fingerprint = %prepared.fingerprint, "event receiver closed, abandoning model stream");
                    return Err(PipelineError::PipelineIncomplete(
                        "event receiver closed".into(),
                    ));
                }
            }
        }

        if accumulated.trim().is_empty() {
            return Err(PipelineError::PipelineIncomplete(
                "model returned no content".into(),
            ));
        }
        Ok(accumulated)
    }

    /// Parse the model response and assemble the record.
    pub fn shape(&self, prepared: &Prepared, response: &str) -> AnalysisRecord {
        let payload = parse_analysis(response);
        AnalysisRecord {
            id: Uuid::new_v4().to_string(),
            fingerprint: prepared.fingerprint.to_string(),
            total_issues: payload.issues.len(),
            overall_risk_score: payload.overall_risk_score,
            risk_level: payload.overall_risk,
            issues: payload.issues,
            summary: payload.summary,
            recommendations: payload.recommendations,
            metadata: AnalysisMetadata {
                industry: prepared.industry,
                analysis_types: prepared.analysis_types.clone(),
                text_length: prepared.text.chars().count(),
                model_used: self.model.model_name().to_string(),
                degraded: payload.degraded,
                reanalysis_of: prepared.reanalysis_of.clone(),
            },
            created_at: Utc::now(),
            processing_time: prepared.started.elapsed().as_secs_f64(),
        }
    }

    /// Store the record and its issues. Failures are logged, never returned.
    pub async fn persist(&self, prepared: &Prepared, record: &AnalysisRecord) {
        let provenance = Provenance {
            source_text: Some(prepared.text.clone()),
            owner: prepared.owner.clone(),
        };
        let analysis_id = match self.store.insert_analysis(record, &provenance).await {
            Ok(id) => id,
            Err(e) => {
                warn!(analysis_id = %record.id, error = %e, "failed to persist analysis");
                return;
            }
        };
        if record.issues.is_empty() {
            return;
        }
        if let Err(e) = self.store.insert_issues(&analysis_id, &record.issues).await {
            warn!(analysis_id = %analysis_id, error = %e, "failed to persist issues");
        }
    }

    /// Non-streaming analysis, served from the cache when possible.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisRecord, PipelineError> {
        let prepared = self.prepare(request).await?;
        let key = prepared.cache_key();

        if let Some(hit) = self.cache.get::<AnalysisRecord>(&key).await {
            debug!(fingerprint = %prepared.fingerprint, analysis_id = %hit.id, "analysis cache hit");
            return Ok(hit);
        }
        debug!(fingerprint = %prepared.fingerprint, "analysis cache miss");

        let response = self.generate(&prepared, None).await?;
        let record = self.shape(&prepared, &response);
        self.persist(&prepared, &record).await;
        if !self.cache.set(&key, &record, Some(self.cache_ttl)).await {
            debug!(analysis_id = %record.id, "analysis not cached");
        }

        info!(
            analysis_id = %record.id,
            fingerprint = %record.fingerprint,
            risk = %record.risk_level,
            issues = record.total_issues,
            elapsed_ms = (record.processing_time * 1000.0) as u64,
            "analysis completed"
        );
        Ok(record)
    }

    /// Streamed analysis. Sends progress events followed by exactly one
    /// final event, unless the receiver goes away first.
    pub async fn stream(&self, request: AnalysisRequest, events: mpsc::Sender<PipelineEvent>) {
        let outcome = async {
            let prepared = self.prepare(request).await?;
            let response = self.generate(&prepared, Some(&events)).await?;
            let record = self.shape(&prepared, &response);
            self.persist(&prepared, &record).await;
            Ok::<_, PipelineError>(record)
        }
        .await;

        let last = match outcome {
            Ok(record) => {
                info!(analysis_id = %record.id, issues = record.total_issues, "streamed analysis completed");
                PipelineEvent::Complete {
                    record: Box::new(record),
                }
            }
            Err(e) => {
                error!(error = %e, "streamed analysis failed");
                PipelineEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        if events.send(last).await.is_err() {
            debug!("event receiver closed before the final event");
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;
    use std::time::Duration;

    use clyrdia_ai::{Script, ScriptedModel};
    use clyrdia_core::ManualClock;
    use clyrdia_core::config::ModelSettings;
    use clyrdia_store::{CacheStore, MemoryRecordStore};

    use super::AnalysisPipeline;

    pub const SAMPLE: &str = "This Agreement sets forth termination and liability terms between the parties effective January 1.";
    pub const LOW_RISK: &str = r#"{"overall_risk":"low","overall_risk_score":10,"issues":[],"recommendations":[],"summary":"ok"}"#;
    pub const ONE_ISSUE: &str = r#"{"overall_risk":"high","overall_risk_score":72,"issues":[{"type":"legal","severity":"high","title":"Uncapped liability","description":"No cap","suggested_fix":"Cap at fees paid","risk_score":80,"confidence":90}],"recommendations":["Negotiate a cap"],"summary":"risky"}"#;

    pub struct Harness {
        pub model: Arc<ScriptedModel>,
        pub store: Arc<MemoryRecordStore>,
        pub pipeline: Arc<AnalysisPipeline>,
    }

    pub fn harness(model: ScriptedModel) -> Harness {
        let model = Arc::new(model);
        let store = Arc::new(MemoryRecordStore::new());
        let cache = CacheStore::in_memory(
            Arc::new(ManualClock::new()),
            Duration::from_secs(3600),
            100,
        );
        let pipeline = Arc::new(AnalysisPipeline::new(
            model.clone(),
            store.clone(),
            cache,
            &ModelSettings::default(),
        ));
        Harness {
            model,
            store,
            pipeline,
        }
    }

    pub fn replying(text: &str) -> Harness {
        harness(ScriptedModel::replying(text))
    }

    pub fn scripted(scripts: Vec<Script>) -> Harness {
        harness(ScriptedModel::with_scripts(
            scripts,
            Script::chunked(LOW_RISK, 16),
        ))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use clyrdia_ai::{Script, ScriptedModel};
    use clyrdia_core::fix::{FixRequest, FixStatus, StoredFix};
    use clyrdia_core::{ContractTemplate, Issue, ManualClock, RiskLevel};
    use clyrdia_store::{AnalyticsSummary, StoreError};

    use super::fixtures::*;
    use super::*;
    use crate::extract::MEDIA_TEXT;

    #[tokio::test]
    async fn sample_contract_yields_low_risk_record() {
        let h = replying(LOW_RISK);
        let request = AnalysisRequest::text(SAMPLE).with_industry(Some(Industry::Technology));
        let record = h.pipeline.run(request).await.unwrap();

        assert_eq!(record.risk_level, RiskLevel::Low);
        assert_eq!(record.overall_risk_score, 10.0);
        assert_eq!(record.total_issues, 0);
        assert_eq!(record.fingerprint, Fingerprint::of_text(SAMPLE).to_string());
        assert_eq!(record.metadata.industry, Some(Industry::Technology));
        assert_eq!(record.metadata.model_used, "scripted");
        assert!(!record.metadata.degraded);

        let stored = h.store.get_analysis(&record.id).await.unwrap();
        assert_eq!(stored.as_ref(), Some(&record));
    }

    #[tokio::test]
    async fn second_identical_run_is_served_from_cache() {
        let h = replying(ONE_ISSUE);
        let request = AnalysisRequest::text(SAMPLE).with_analysis_types(vec!["legal".into()]);

        let first = h.pipeline.run(request.clone()).await.unwrap();
        let second = h.pipeline.run(request).await.unwrap();

        assert_eq!(h.model.calls(), 1);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn different_parameters_miss_the_cache() {
        let h = replying(LOW_RISK);
        h.pipeline
            .run(AnalysisRequest::text(SAMPLE).with_analysis_types(vec!["legal".into()]))
            .await
            .unwrap();
        h.pipeline
            .run(AnalysisRequest::text(SAMPLE).with_analysis_types(vec!["financial".into()]))
            .await
            .unwrap();
        assert_eq!(h.model.calls(), 2);
    }

    #[tokio::test]
    async fn analysis_type_order_does_not_matter() {
        let h = replying(LOW_RISK);
        let a = h
            .pipeline
            .prepare(AnalysisRequest::text(SAMPLE).with_analysis_types(vec!["legal".into(), "financial".into()]))
            .await
            .unwrap();
        let b = h
            .pipeline
            .prepare(AnalysisRequest::text(SAMPLE).with_analysis_types(vec!["Financial".into(), "legal".into()]))
            .await
            .unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with("analysis:v1:"));
        assert!(a.cache_key().ends_with(":none:financial,legal"));
    }

    #[tokio::test]
    async fn issues_are_stored_with_the_record() {
        let h = replying(ONE_ISSUE);
        let record = h.pipeline.run(AnalysisRequest::text(SAMPLE)).await.unwrap();
        assert_eq!(record.total_issues, 1);
        let issue = h.store.get_issue(&record.issues[0].id).await.unwrap();
        assert_eq!(issue.map(|i| i.title), Some("Uncapped liability".to_string()));
        assert_eq!(
            h.store.get_source_text(&record.id).await.unwrap().as_deref(),
            Some(SAMPLE)
        );
    }

    #[tokio::test]
    async fn missing_or_double_input_is_invalid() {
        let h = replying(LOW_RISK);
        let neither = h.pipeline.run(AnalysisRequest::default()).await;
        assert!(matches!(neither, Err(PipelineError::InvalidInput(_))));

        let blank = h.pipeline.run(AnalysisRequest::text("   ")).await;
        assert!(matches!(blank, Err(PipelineError::InvalidInput(_))));

        let mut both = AnalysisRequest::text(SAMPLE);
        both.document = Some(Document {
            bytes: SAMPLE.as_bytes().to_vec(),
            media_type: MEDIA_TEXT.into(),
            filename: None,
        });
        assert!(matches!(
            h.pipeline.run(both).await,
            Err(PipelineError::InvalidInput(_))
        ));
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn non_contract_text_is_rejected_before_the_model() {
        let h = replying(LOW_RISK);
        let result = h
            .pipeline
            .run(AnalysisRequest::text("A short shopping list: eggs, milk, bread and some cheese."))
            .await;
        assert!(matches!(result, Err(PipelineError::NotAContract(_))));
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn documents_are_fingerprinted_over_raw_bytes() {
        let h = replying(LOW_RISK);
        let bytes = format!("  {SAMPLE}\n\n\n\n").into_bytes();
        let record = h
            .pipeline
            .run(AnalysisRequest::document(Document {
                bytes: bytes.clone(),
                media_type: MEDIA_TEXT.into(),
                filename: Some("contract.txt".into()),
            }))
            .await
            .unwrap();
        assert_eq!(record.fingerprint, Fingerprint::of_bytes(&bytes).to_string());
    }

    #[tokio::test]
    async fn unsupported_document_type() {
        let h = replying(LOW_RISK);
        let result = h
            .pipeline
            .run(AnalysisRequest::document(Document {
                bytes: vec![0x89, b'P', b'N', b'G'],
                media_type: "image/png".into(),
                filename: None,
            }))
            .await;
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn unparsable_model_output_degrades() {
        let h = replying("I am unable to produce JSON today.");
        let record = h.pipeline.run(AnalysisRequest::text(SAMPLE)).await.unwrap();
        assert!(record.metadata.degraded);
        assert_eq!(record.risk_level, RiskLevel::Medium);
        assert_eq!(record.overall_risk_score, 50.0);
        assert_eq!(record.total_issues, 0);
    }

    #[tokio::test]
    async fn model_failure_is_reported() {
        let h = scripted(vec![Script::Fail("quota exceeded".into())]);
        let result = h.pipeline.run(AnalysisRequest::text(SAMPLE)).await;
        assert!(matches!(result, Err(PipelineError::ModelInvocationFailed(_))));
    }

    #[tokio::test]
    async fn empty_model_output_is_incomplete() {
        let h = scripted(vec![Script::Reply(vec![])]);
        let result = h.pipeline.run(AnalysisRequest::text(SAMPLE)).await;
        assert!(matches!(result, Err(PipelineError::PipelineIncomplete(_))));
    }

    #[tokio::test]
    async fn streamed_run_emits_progress_then_one_final_event() {
        let h = replying(LOW_RISK);
        let (tx, mut rx) = mpsc::channel(4);
        let pipeline = h.pipeline.clone();
        let task = tokio::spawn(async move {
            pipeline
                .stream(AnalysisRequest::text(SAMPLE), tx)
                .await
        });

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        task.await.unwrap();

        let (last, progress) = events.split_last().unwrap();
        assert!(!progress.is_empty());
        assert!(progress.iter().all(|e| !e.is_final()));
        let PipelineEvent::Progress { accumulated, .. } = progress.last().unwrap() else {
            panic!("expected progress");
        };
        assert_eq!(accumulated, LOW_RISK);
        let PipelineEvent::Complete { record } = last else {
            panic!("expected completion, got {last:?}");
        };
        assert_eq!(record.risk_level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn streamed_failure_ends_with_error_event() {
        let h = replying(LOW_RISK);
        let (tx, mut rx) = mpsc::channel(4);
        h.pipeline.stream(AnalysisRequest::text("too short"), tx).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PipelineEvent::Error { .. }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_stops_the_model_stream() {
        let h = replying(ONE_ISSUE);
        let prepared = h.pipeline.prepare(AnalysisRequest::text(SAMPLE)).await.unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = h.pipeline.generate(&prepared, Some(&tx)).await;
        assert!(matches!(result, Err(PipelineError::PipelineIncomplete(_))));
    }

    #[tokio::test]
    async fn streamed_runs_bypass_the_cache() {
        let h = replying(LOW_RISK);
        h.pipeline.run(AnalysisRequest::text(SAMPLE)).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        h.pipeline.stream(AnalysisRequest::text(SAMPLE), tx).await;
        while rx.recv().await.is_some() {}
        assert_eq!(h.model.calls(), 2);
    }

    // ── Persistence failures ──

    struct BrokenStore;

    fn broken() -> StoreError {
        StoreError::Other("database is down".into())
    }

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn insert_analysis(&self, _: &AnalysisRecord, _: &Provenance) -> Result<String, StoreError> {
            Err(broken())
        }
        async fn insert_issues(&self, _: &str, _: &[Issue]) -> Result<Vec<String>, StoreError> {
            Err(broken())
        }
        async fn get_analysis(&self, _: &str) -> Result<Option<AnalysisRecord>, StoreError> {
            Err(broken())
        }
        async fn get_analysis_by_fingerprint(&self, _: &str) -> Result<Option<AnalysisRecord>, StoreError> {
            Err(broken())
        }
        async fn get_source_text(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(broken())
        }
        async fn get_issue(&self, _: &str) -> Result<Option<Issue>, StoreError> {
            Err(broken())
        }
        async fn insert_fix(&self, _: &str, _: &FixRequest, _: Option<&str>) -> Result<String, StoreError> {
            Err(broken())
        }
        async fn update_fix_status(
            &self,
            _: &str,
            _: FixStatus,
            _: serde_json::Map<String, serde_json::Value>,
        ) -> Result<bool, StoreError> {
            Err(broken())
        }
        async fn get_fix(&self, _: &str) -> Result<Option<StoredFix>, StoreError> {
            Err(broken())
        }
        async fn insert_template(&self, _: &ContractTemplate) -> Result<(), StoreError> {
            Err(broken())
        }
        async fn get_templates(&self, _: Industry) -> Result<Vec<ContractTemplate>, StoreError> {
            Err(broken())
        }
        async fn get_user_analyses(&self, _: &str, _: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
            Err(broken())
        }
        async fn soft_delete_analysis(&self, _: &str) -> Result<bool, StoreError> {
            Err(broken())
        }
        async fn analytics(&self, _: u32) -> Result<AnalyticsSummary, StoreError> {
            Err(broken())
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(broken())
        }
    }

    #[tokio::test]
    async fn persistence_failure_still_returns_the_record() {
        let model = Arc::new(ScriptedModel::replying(ONE_ISSUE));
        let cache = CacheStore::in_memory(Arc::new(ManualClock::new()), Duration::from_secs(60), 10);
        let pipeline = AnalysisPipeline::new(
            model.clone(),
            Arc::new(BrokenStore),
            cache,
            &ModelSettings::default(),
        );
        let record = pipeline.run(AnalysisRequest::text(SAMPLE)).await.unwrap();
        assert_eq!(record.total_issues, 1);
        assert_eq!(model.calls(), 1);
    }
}
