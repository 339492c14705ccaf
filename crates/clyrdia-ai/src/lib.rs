//! Model layer: the streaming model-client contract, analysis prompts, and
//! lenient parsing of model output.

pub mod model;
pub use model::{FragmentStream, ModelClient, ModelError, ModelRequest, Script, ScriptedModel};

pub mod prompt;

pub mod response;
pub use response::{AnalysisPayload, parse_analysis, parse_fix_validation};

#[cfg(feature = "openai")]
mod openai;
#[cfg(feature = "openai")]
pub use openai::OpenAiClient;
