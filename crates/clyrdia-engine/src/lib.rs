//! Clyrdia engine: everything between an admitted request and the model,
//! cache, and record store.

pub mod error;
pub use error::PipelineError;

pub mod extract;
pub use extract::{DocumentExtractor, DocumentKind, ExtractError, Extracted, TextExtractor};

pub mod ratelimit;
pub use ratelimit::RateLimiter;

pub mod pipeline;
pub use pipeline::{AnalysisPipeline, AnalysisRequest, Document, Prepared};

pub mod relay;
pub use relay::relay;

pub mod jobs;
pub use jobs::{JobCoordinator, JobError, SubmitError};

pub mod fixes;
pub use fixes::{FixAdvisor, FixError};

pub mod facade;
pub use facade::{AdmissionError, AdmissionFacade, ErrorKind, Submission, Upload};
