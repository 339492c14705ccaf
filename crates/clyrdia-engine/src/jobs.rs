//! Background analysis jobs.
//!
//! Submissions go into a bounded queue drained by a fixed pool of workers.
//! Each worker runs one job at a time and is replaced after
//! `max_jobs_per_worker` jobs. A job past its soft time limit is logged; a
//! job past its hard limit is dropped mid-flight and failed with a timeout.
//! Terminal jobs stay queryable until the result-expiry horizon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use clyrdia_core::config::JobSettings;
use clyrdia_core::{
    AnalysisRecord, BatchItem, BatchReport, Clock, Job, JobId, JobKind, JobOutcome, PipelineEvent,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::PipelineError;
use crate::pipeline::{AnalysisPipeline, AnalysisRequest};

/// Progress ceiling while the model is streaming.
const GENERATION_CEILING: u8 = 90;
const PROGRESS_PER_FRAGMENT: u8 = 10;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("job queue is full")]
    QueueFull,
    #[error("job coordinator has shut down")]
    ShutDown,
}

/// Why a job failed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Original analysis not found")]
    OriginalNotFound,
    #[error("Contract text not available for reanalysis")]
    SourceTextMissing,
    #[error("record store error: {0}")]
    Store(#[from] clyrdia_store::StoreError),
}

enum Work {
    Analyze(AnalysisRequest),
    Batch {
        items: Vec<BatchItem>,
        owner: Option<String>,
    },
    Reanalyze {
        analysis_id: String,
        analysis_types: Option<Vec<String>>,
        owner: Option<String>,
    },
}

impl Work {
    fn kind(&self) -> JobKind {
        match self {
            Self::Analyze(_) => JobKind::Single,
            Self::Batch { .. } => JobKind::Batch,
            Self::Reanalyze { .. } => JobKind::Reanalysis,
        }
    }
}

struct Queued {
    id: JobId,
    work: Work,
}

struct Entry {
    job: Job,
    finished_at: Option<Instant>,
}

enum WorkerExit {
    Recycled,
    QueueClosed,
}

// ── Coordinator handle ──

/// Cloneable handle. Workers stop once every handle is dropped and the
/// queue drains.
#[derive(Clone)]
pub struct JobCoordinator {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Queued>,
}

impl JobCoordinator {
    /// Spawn the worker pool. Must be called inside a Tokio runtime.
    pub fn start(
        pipeline: Arc<AnalysisPipeline>,
        settings: JobSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (queue, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            pipeline,
            settings,
            clock,
            jobs: Mutex::new(HashMap::new()),
            workers_spawned: AtomicUsize::new(0),
        });
        tokio::spawn(supervise(shared.clone(), Arc::new(tokio::sync::Mutex::new(rx))));
        Self { shared, queue }
    }

    pub fn submit_analysis(&self, request: AnalysisRequest) -> Result<Job, SubmitError> {
        self.enqueue(Work::Analyze(request))
    }

    pub fn submit_batch(
        &self,
        items: Vec<BatchItem>,
        owner: Option<String>,
    ) -> Result<Job, SubmitError> {
        self.enqueue(Work::Batch { items, owner })
    }

    /// Rerun a stored analysis on its source text. Without an override
    /// the stored analysis types are reused.
    pub fn submit_reanalysis(
        &self,
        analysis_id: impl Into<String>,
        analysis_types: Option<Vec<String>>,
        owner: Option<String>,
    ) -> Result<Job, SubmitError> {
        self.enqueue(Work::Reanalyze {
            analysis_id: analysis_id.into(),
            analysis_types,
            owner,
        })
    }

    fn enqueue(&self, work: Work) -> Result<Job, SubmitError> {
        let id = JobId::generate();
        let job = Job::queued(id.clone(), work.kind());
        self.shared.lock().insert(
            id.clone(),
            Entry {
                job: job.clone(),
                finished_at: None,
            },
        );

        match self.queue.try_send(Queued {
            id: id.clone(),
            work,
        }) {
            Ok(()) => {
                info!(job_id = %id, kind = ?job.kind, "job queued");
                Ok(job)
            }
            Err(e) => {
                self.shared.lock().remove(&id);
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(job_id = %id, "job queue full");
                        Err(SubmitError::QueueFull)
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(SubmitError::ShutDown),
                }
            }
        }
    }

    /// Current state of a job, unless unknown or expired.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        let now = self.shared.clock.now();
        let expiry = self.shared.settings.result_expiry();
        self.shared
            .lock()
            .get(id)
            .filter(|e| e.finished_at.is_none_or(|t| now.duration_since(t) < expiry))
            .map(|e| e.job.clone())
    }

    /// Drop terminal jobs past the result-expiry horizon. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = self.shared.clock.now();
        let expiry = self.shared.settings.result_expiry();
        let mut jobs = self.shared.lock();
        let before = jobs.len();
        jobs.retain(|_, e| e.finished_at.is_none_or(|t| now.duration_since(t) < expiry));
        let purged = before - jobs.len();
        if purged > 0 {
            info!(purged, "purged expired job results");
        }
        purged
    }

    /// Jobs currently held, terminal or not.
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers started since launch, including replacements.
    pub fn workers_spawned(&self) -> usize {
        self.shared.workers_spawned.load(Ordering::Relaxed)
    }
}

// ── Worker pool ──

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Queued>>>;

async fn supervise(shared: Arc<Shared>, rx: SharedReceiver) {
    let mut workers = JoinSet::new();
    for _ in 0..shared.settings.workers.max(1) {
        workers.spawn(work_loop(shared.clone(), rx.clone()));
    }

    while let Some(exit) = workers.join_next().await {
        match exit {
            Ok(WorkerExit::QueueClosed) => {}
            Ok(WorkerExit::Recycled) => {
                debug!("recycling job worker");
                workers.spawn(work_loop(shared.clone(), rx.clone()));
            }
            Err(e) => {
                error!(error = %e, "job worker crashed, replacing it");
                workers.spawn(work_loop(shared.clone(), rx.clone()));
            }
        }
    }
    debug!("job workers stopped");
}

async fn work_loop(shared: Arc<Shared>, rx: SharedReceiver) -> WorkerExit {
    let worker = shared.workers_spawned.fetch_add(1, Ordering::Relaxed);
    debug!(worker, "job worker started");
    for _ in 0..shared.settings.max_jobs_per_worker.max(1) {
        let next = rx.lock().await.recv().await;
        let Some(queued) = next else {
            return WorkerExit::QueueClosed;
        };
        shared.execute(queued).await;
    }
    WorkerExit::Recycled
}

// ── Execution ──

struct Shared {
    pipeline: Arc<AnalysisPipeline>,
    settings: JobSettings,
    clock: Arc<dyn Clock>,
    jobs: Mutex<HashMap<JobId, Entry>>,
    workers_spawned: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, id: &JobId, f: impl FnOnce(&mut Job) -> bool) -> bool {
        self.lock().get_mut(id).is_some_and(|e| f(&mut e.job))
    }

    fn report(&self, id: &JobId, progress: u8, status: impl Into<String>) {
        self.update(id, |job| job.report(progress, status));
    }

    fn finish(&self, id: &JobId, result: Result<JobOutcome, String>) {
        let now = self.clock.now();
        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(id) else {
            return;
        };
        let changed = match result {
            Ok(outcome) => {
                let status = match outcome {
                    JobOutcome::Batch(_) => "Batch analysis completed",
                    _ => "Analysis completed",
                };
                entry.job.succeed(outcome, status)
            }
            Err(message) => entry.job.fail(message),
        };
        if changed {
            entry.finished_at = Some(now);
        }
    }

    async fn execute(&self, Queued { id, work }: Queued) {
        let status = match work {
            Work::Analyze(_) => "Starting analysis",
            Work::Batch { .. } => "Starting batch analysis",
            Work::Reanalyze { .. } => "Starting reanalysis",
        };
        if !self.update(&id, |job| job.start(status)) {
            debug!(job_id = %id, "job vanished before it started");
            return;
        }
        info!(job_id = %id, kind = ?work.kind(), "job started");

        let started = Instant::now();
        let hard_limit = self.settings.hard_time_limit();
        let run = self.perform(&id, work);
        let soft = tokio::time::sleep(self.settings.soft_time_limit());
        let hard = tokio::time::sleep(hard_limit);
        tokio::pin!(run, soft, hard);

        let mut soft_exceeded = false;
        let result = loop {
            tokio::select! {
                result = &mut run => break result.map_err(|e| e.to_string()),
                _ = &mut soft, if !soft_exceeded => {
                    soft_exceeded = true;
                    warn!(job_id = %id, "job exceeded its soft time limit");
                }
                _ = &mut hard => {
                    break Err(PipelineError::Timeout(hard_limit.as_secs()).to_string());
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(job_id = %id, elapsed_ms, "job succeeded"),
            Err(e) => error!(job_id = %id, elapsed_ms, error = %e, "job failed"),
        }
        self.finish(&id, result);
    }

    async fn perform(&self, id: &JobId, work: Work) -> Result<JobOutcome, JobError> {
        match work {
            Work::Analyze(request) => {
                let record = self.analyze(Some(id), request).await?;
                Ok(JobOutcome::Single {
                    analysis_id: record.id.clone(),
                    result: Box::new(record),
                })
            }
            Work::Batch { items, owner } => Ok(JobOutcome::Batch(
                self.batch(id, items, owner).await,
            )),
            Work::Reanalyze {
                analysis_id,
                analysis_types,
                owner,
            } => {
                let store = self.pipeline.store();
                let original = store
                    .get_analysis(&analysis_id)
                    .await?
                    .ok_or(JobError::OriginalNotFound)?;
                let text = store
                    .get_source_text(&analysis_id)
                    .await?
                    .ok_or(JobError::SourceTextMissing)?;

                let analysis_types = analysis_types
                    .filter(|types| types.iter().any(|t| !t.trim().is_empty()))
                    .unwrap_or(original.metadata.analysis_types);
                let mut request = AnalysisRequest::text(text)
                    .with_industry(original.metadata.industry)
                    .with_analysis_types(analysis_types)
                    .owned_by(owner);
                request.reanalysis_of = Some(analysis_id.clone());

                let record = self.analyze(Some(id), request).await?;
                Ok(JobOutcome::Reanalysis {
                    original_analysis_id: analysis_id,
                    new_analysis_id: record.id.clone(),
                    result: Box::new(record),
                })
            }
        }
    }

    /// Run one analysis, mapping model fragments onto job progress when
    /// `progress_of` is given.
    async fn analyze(
        &self,
        progress_of: Option<&JobId>,
        request: AnalysisRequest,
    ) -> Result<AnalysisRecord, PipelineError> {
        let pipeline = &self.pipeline;
        let prepared = pipeline.prepare(request).await?;

        let response = match progress_of {
            None => pipeline.generate(&prepared, None).await?,
            Some(id) => {
                self.report(id, 0, "Analyzing contract");
                let (tx, mut rx) = mpsc::channel(16);
                let generate = async {
                    let tx = tx;
                    pipeline.generate(&prepared, Some(&tx)).await
                };
                let track = async {
                    let mut progress = 0u8;
                    while let Some(event) = rx.recv().await {
                        match event {
                            PipelineEvent::Progress { .. } => {
                                progress = (progress + PROGRESS_PER_FRAGMENT).min(GENERATION_CEILING);
                                self.report(id, progress, "Analyzing contract");
                            }
                            PipelineEvent::Complete { .. } | PipelineEvent::Error { .. } => {}
                        }
                    }
                };
                let (response, ()) = tokio::join!(generate, track);
                self.report(id, GENERATION_CEILING, "Processing results");
                response?
            }
        };

        let record = pipeline.shape(&prepared, &response);
        if let Some(id) = progress_of {
            self.report(id, 95, "Saving results");
        }
        pipeline.persist(&prepared, &record).await;
        Ok(record)
    }

    /// Analyse items in order. A failed item is recorded and the batch goes on.
    async fn batch(&self, id: &JobId, items: Vec<BatchItem>, owner: Option<String>) -> BatchReport {
        let total = items.len();
        let mut report = BatchReport::new(total);
        for (index, item) in items.into_iter().enumerate() {
            let progress = (index * 100 / total) as u8;
            self.report(
                id,
                progress,
                format!("Processing contract {}/{}", index + 1, total),
            );

            let request = AnalysisRequest::from(item.contract).owned_by(owner.clone());
            match self.analyze(None, request).await {
                Ok(record) => report.record_success(item.id, record),
                Err(e) => {
                    warn!(job_id = %id, contract_id = ?item.id, error = %e, "batch item failed");
                    report.record_failure(item.id, e.to_string());
                }
            }
        }
        info!(job_id = %id, total, completed = report.completed, failed = report.failed, "batch finished");
        report
    }
}
