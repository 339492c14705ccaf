pub mod analysis;
pub mod clock;
pub mod config;
pub mod event;
pub mod fingerprint;
pub mod fix;
pub mod health;
pub mod job;
pub mod template;
pub mod text;

pub use analysis::{
    AnalysisMetadata, AnalysisRecord, Industry, Issue, IssueType, RiskLevel,
    normalize_analysis_types,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use event::{FrameKind, PipelineEvent, StreamFrame};
pub use fingerprint::Fingerprint;
pub use fix::{FixRequest, FixResult, FixStatus, FixValidation};
pub use health::{HealthReport, ServiceStatus};
pub use job::{BatchItem, BatchReport, ContractSubmission, Job, JobId, JobKind, JobOutcome, JobState};
pub use template::{ContractTemplate, TemplateLibrary};
