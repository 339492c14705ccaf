//! Request admission.
//!
//! Every operation is rate-limited per client before any work is done, then
//! dispatched to the pipeline, the job coordinator, or the fix advisor.
//! Outcomes are mapped to an [`AdmissionError`] whose message is safe to
//! show callers; internal failures are logged here and reported without
//! detail.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use clyrdia_ai::ModelClient;
use clyrdia_core::config::UploadSettings;
use clyrdia_core::fix::FixSuggestion;
use clyrdia_core::{
    AnalysisRecord, BatchItem, Clock, FixRequest, FixResult, FixValidation, HealthReport,
    Industry, Job, JobId, ServiceStatus, Settings, StreamFrame, TemplateLibrary,
};
use clyrdia_store::{AnalyticsSummary, CacheStore, RecordStore};
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::PipelineError;
use crate::extract::DocumentKind;
use crate::fixes::{FixAdvisor, FixError};
use crate::jobs::{JobCoordinator, SubmitError};
use crate::pipeline::{AnalysisPipeline, AnalysisRequest, Document};
use crate::ratelimit::RateLimiter;
use crate::relay::relay;

pub const RATE_LIMITED: &str = "Rate limit exceeded. Please try again later.";
pub const MISSING_INPUT: &str = "Either contract_text or file_upload must be provided";
pub const CONFLICTING_INPUT: &str = "Provide either contract_text or file_upload, not both";
const NOT_A_CONTRACT: &str = "Invalid document content. Please ensure this is a valid contract.";

/// Frames buffered between a streamed run and its consumer.
const STREAM_BUFFER: usize = 32;
const USER_ANALYSES_LIMIT: usize = 50;

// ── Errors ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    BadRequest,
    PayloadTooLarge,
    NotFound,
    Unauthorized,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::BadRequest => "BAD_REQUEST",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Unavailable => "SERVICE_UNAVAILABLE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A refused or failed operation, with a message fit for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AdmissionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AdmissionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimited, RATE_LIMITED)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Map a pipeline failure: caller mistakes keep their message, everything
/// else becomes `internal` with the operation's generic message.
fn pipeline_failure(e: PipelineError, internal: &str) -> AdmissionError {
    match e {
        PipelineError::NotAContract(rejection) => {
            warn!(reason = %rejection, "submission rejected");
            AdmissionError::bad_request(NOT_A_CONTRACT)
        }
        PipelineError::InvalidInput(message) => AdmissionError::bad_request(message),
        PipelineError::UnsupportedFormat(media_type) => {
            AdmissionError::bad_request(format!("Unsupported file type: {media_type}"))
        }
        other => {
            error!(error = %other, "analysis failed");
            AdmissionError::internal(internal)
        }
    }
}

fn submit_failure(e: SubmitError) -> AdmissionError {
    match e {
        SubmitError::QueueFull => AdmissionError::new(
            ErrorKind::Unavailable,
            "Job queue is full. Please try again later.",
        ),
        SubmitError::ShutDown => {
            error!("job coordinator is not running");
            AdmissionError::internal("Internal server error while submitting job")
        }
    }
}

// ── Uploads ──

/// A file as received from a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl Upload {
    /// Size and type checks. The document kind comes from the declared
    /// content type, falling back to the filename extension.
    pub fn into_document(self, settings: &UploadSettings) -> Result<Document, AdmissionError> {
        if self.bytes.len() > settings.max_file_size {
            return Err(AdmissionError::new(
                ErrorKind::PayloadTooLarge,
                format!(
                    "File size {} bytes exceeds maximum allowed size {} bytes",
                    self.bytes.len(),
                    settings.max_file_size
                ),
            ));
        }

        let kind = self
            .content_type
            .as_deref()
            .and_then(DocumentKind::from_media_type)
            .or_else(|| {
                self.filename
                    .as_deref()
                    .and_then(|name| name.rsplit_once('.'))
                    .and_then(|(_, ext)| DocumentKind::from_extension(ext))
            })
            .filter(|kind| settings.allows(kind.extension()));

        let Some(kind) = kind else {
            let declared = self
                .content_type
                .or(self.filename)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(AdmissionError::bad_request(format!(
                "Unsupported file type: {declared}. Supported types: {}",
                settings.allowed_types.join(", ")
            )));
        };

        Ok(Document {
            bytes: self.bytes,
            media_type: kind.media_type().to_string(),
            filename: self.filename,
        })
    }
}

/// One analysis submission as received from a client.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: Option<String>,
    pub upload: Option<Upload>,
    pub industry: Option<Industry>,
    pub analysis_types: Vec<String>,
}

// ── Facade ──

pub struct AdmissionFacade {
    limiter: RateLimiter,
    pipeline: Arc<AnalysisPipeline>,
    jobs: JobCoordinator,
    advisor: FixAdvisor,
    upload: UploadSettings,
    version: String,
    environment: String,
    started: Instant,
}

impl AdmissionFacade {
    /// Wire every component from settings and collaborators. Starts the job
    /// worker pool, so it must run inside a Tokio runtime.
    pub fn assemble(
        settings: &Settings,
        model: Arc<dyn ModelClient>,
        store: Arc<dyn RecordStore>,
        cache: CacheStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pipeline = Arc::new(
            AnalysisPipeline::new(model.clone(), store.clone(), cache.clone(), &settings.model)
                .with_cache_ttl(settings.cache.ttl()),
        );
        let jobs = JobCoordinator::start(pipeline.clone(), settings.jobs.clone(), clock.clone());
        Self {
            limiter: RateLimiter::new(&settings.rate_limit, clock),
            advisor: FixAdvisor::new(model, store, cache),
            pipeline,
            jobs,
            upload: settings.upload.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: settings.server.environment.clone(),
            started: Instant::now(),
        }
    }

    pub fn pipeline(&self) -> &Arc<AnalysisPipeline> {
        &self.pipeline
    }

    pub fn jobs(&self) -> &JobCoordinator {
        &self.jobs
    }

    fn admit(&self, client: &str) -> Result<(), AdmissionError> {
        if self.limiter.admit(client) {
            Ok(())
        } else {
            warn!(client, "rate limit exceeded");
            Err(AdmissionError::rate_limited())
        }
    }

    fn request(&self, client: &str, submission: Submission) -> Result<AnalysisRequest, AdmissionError> {
        let text = submission.text.filter(|t| !t.trim().is_empty());
        let request = match (text, submission.upload) {
            (Some(_), Some(_)) => return Err(AdmissionError::bad_request(CONFLICTING_INPUT)),
            (Some(text), None) => AnalysisRequest::text(text),
            (None, Some(upload)) => AnalysisRequest::document(upload.into_document(&self.upload)?),
            (None, None) => return Err(AdmissionError::bad_request(MISSING_INPUT)),
        };
        Ok(request
            .with_industry(submission.industry)
            .with_analysis_types(submission.analysis_types)
            .owned_by(Some(client.to_string())))
    }

    // ── Analysis ──

    pub async fn analyze(
        &self,
        client: &str,
        submission: Submission,
    ) -> Result<AnalysisRecord, AdmissionError> {
        self.admit(client)?;
        let request = self.request(client, submission)?;
        let record = self
            .pipeline
            .run(request)
            .await
            .map_err(|e| pipeline_failure(e, "Internal server error during contract analysis"))?;
        info!(client, analysis_id = %record.id, "analysis served");
        Ok(record)
    }

    /// Start a streamed analysis. Admission and input checks happen before
    /// the first frame; later failures arrive as a final error frame.
    pub fn analyze_stream(
        &self,
        client: &str,
        submission: Submission,
    ) -> Result<impl Stream<Item = StreamFrame> + Send + use<>, AdmissionError> {
        self.admit(client)?;
        let request = self.request(client, submission)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move { pipeline.stream(request, tx).await });
        info!(client, "streamed analysis started");
        Ok(relay(rx))
    }

    // ── Fixes and templates ──

    pub async fn apply_fix(
        &self,
        client: &str,
        issue_id: &str,
        request: FixRequest,
    ) -> Result<FixResult, AdmissionError> {
        self.admit(client)?;
        self.advisor
            .apply_fix(issue_id, request, Some(client))
            .await
            .map_err(|e| fix_failure(e, "Internal server error during fix application"))
    }

    pub async fn suggest_fix(
        &self,
        client: &str,
        issue_id: &str,
        context: Option<&str>,
    ) -> Result<FixSuggestion, AdmissionError> {
        self.admit(client)?;
        self.advisor
            .suggest(issue_id, context)
            .await
            .map_err(|e| fix_failure(e, "Internal server error while generating fix suggestion"))
    }

    pub async fn validate_fix(
        &self,
        client: &str,
        original_text: &str,
        proposed_fix: &str,
        issue_description: &str,
    ) -> Result<FixValidation, AdmissionError> {
        self.admit(client)?;
        Ok(self
            .advisor
            .validate(original_text, proposed_fix, issue_description)
            .await)
    }

    /// `industry` is the raw path segment; unknown industries are rejected.
    pub async fn templates(
        &self,
        client: &str,
        industry: &str,
        contract_type: Option<&str>,
        include_variables: bool,
    ) -> Result<TemplateLibrary, AdmissionError> {
        self.admit(client)?;
        let industry: Industry = industry
            .parse()
            .map_err(|_| AdmissionError::bad_request("Invalid industry specified"))?;
        self.advisor
            .templates(industry, contract_type, include_variables)
            .await
            .map_err(|e| fix_failure(e, "Internal server error while retrieving templates"))
    }

    // ── Jobs ──

    pub fn submit_job(&self, client: &str, submission: Submission) -> Result<Job, AdmissionError> {
        self.admit(client)?;
        let request = self.request(client, submission)?;
        self.jobs.submit_analysis(request).map_err(submit_failure)
    }

    pub fn submit_batch(&self, client: &str, items: Vec<BatchItem>) -> Result<Job, AdmissionError> {
        self.admit(client)?;
        if items.is_empty() {
            return Err(AdmissionError::bad_request("Batch must contain at least one contract"));
        }
        self.jobs
            .submit_batch(items, Some(client.to_string()))
            .map_err(submit_failure)
    }

    /// Queue a rerun of a stored analysis. Unknown analyses are rejected
    /// up front rather than failing inside the job. `analysis_types`
    /// replaces the stored types when given and non-empty.
    pub async fn submit_reanalysis(
        &self,
        client: &str,
        analysis_id: &str,
        analysis_types: Option<Vec<String>>,
    ) -> Result<Job, AdmissionError> {
        self.admit(client)?;
        match self.pipeline.store().get_analysis(analysis_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(AdmissionError::not_found("Original analysis not found")),
            Err(e) => {
                error!(analysis_id, error = %e, "analysis lookup failed");
                return Err(AdmissionError::internal("Internal server error while submitting job"));
            }
        }
        self.jobs
            .submit_reanalysis(analysis_id, analysis_types, Some(client.to_string()))
            .map_err(submit_failure)
    }

    pub fn job(&self, client: &str, job_id: &str) -> Result<Job, AdmissionError> {
        self.admit(client)?;
        self.jobs
            .get(&JobId::from(job_id))
            .ok_or_else(|| AdmissionError::not_found("Job not found"))
    }

    // ── Stored analyses ──

    pub async fn analysis(&self, client: &str, id: &str) -> Result<AnalysisRecord, AdmissionError> {
        self.admit(client)?;
        self.pipeline
            .store()
            .get_analysis(id)
            .await
            .map_err(|e| store_failure(e, "Internal server error while retrieving analysis"))?
            .ok_or_else(|| AdmissionError::not_found("Analysis not found"))
    }

    pub async fn analysis_by_fingerprint(
        &self,
        client: &str,
        fingerprint: &str,
    ) -> Result<AnalysisRecord, AdmissionError> {
        self.admit(client)?;
        self.pipeline
            .store()
            .get_analysis_by_fingerprint(fingerprint)
            .await
            .map_err(|e| store_failure(e, "Internal server error while retrieving analysis"))?
            .ok_or_else(|| AdmissionError::not_found("Analysis not found"))
    }

    /// The client's own recent analyses, newest first.
    pub async fn client_analyses(&self, client: &str) -> Result<Vec<AnalysisRecord>, AdmissionError> {
        self.admit(client)?;
        self.pipeline
            .store()
            .get_user_analyses(client, USER_ANALYSES_LIMIT)
            .await
            .map_err(|e| store_failure(e, "Internal server error while retrieving analyses"))
    }

    pub async fn delete_analysis(&self, client: &str, id: &str) -> Result<(), AdmissionError> {
        self.admit(client)?;
        let deleted = self
            .pipeline
            .store()
            .soft_delete_analysis(id)
            .await
            .map_err(|e| store_failure(e, "Internal server error while deleting analysis"))?;
        if !deleted {
            return Err(AdmissionError::not_found("Analysis not found"));
        }
        info!(client, analysis_id = id, "analysis deleted");
        Ok(())
    }

    pub async fn analytics(&self, client: &str, days: u32) -> Result<AnalyticsSummary, AdmissionError> {
        self.admit(client)?;
        if days == 0 || days > 365 {
            return Err(AdmissionError::bad_request("days must be between 1 and 365"));
        }
        self.pipeline
            .store()
            .analytics(days)
            .await
            .map_err(|e| store_failure(e, "Internal server error while retrieving analytics"))
    }

    // ── Health and maintenance ──

    /// Probe every dependency. Not rate-limited.
    pub async fn health(&self) -> HealthReport {
        let status = |ok: bool| {
            if ok {
                ServiceStatus::Healthy
            } else {
                ServiceStatus::Unhealthy
            }
        };

        let (cache, store, model) = tokio::join!(
            self.pipeline.cache().ping(),
            self.pipeline.store().ping(),
            self.pipeline.model().ping(),
        );
        if let Err(e) = &store {
            warn!(error = %e, "record store health check failed");
        }
        if let Err(e) = &model {
            warn!(error = %e, "model health check failed");
        }

        let mut services = BTreeMap::new();
        services.insert("cache".to_string(), status(cache));
        services.insert("store".to_string(), status(store.is_ok()));
        services.insert("model".to_string(), status(model.is_ok()));

        HealthReport::new(
            &self.version,
            &self.environment,
            services,
            self.started.elapsed().as_secs_f64(),
        )
    }

    /// Periodic housekeeping. Returns the number of job results discarded.
    pub fn sweep(&self) -> usize {
        self.jobs.purge_expired()
    }
}

fn fix_failure(e: FixError, internal: &str) -> AdmissionError {
    match e {
        FixError::InvalidIssueId => AdmissionError::bad_request(e.to_string()),
        FixError::IssueNotFound => AdmissionError::not_found(e.to_string()),
        FixError::Store(e) => store_failure(e, internal),
    }
}

fn store_failure(e: clyrdia_store::StoreError, internal: &str) -> AdmissionError {
    error!(error = %e, "record store failure");
    AdmissionError::internal(internal)
}
