//! Pipeline events and the frames a live client sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analysis::AnalysisRecord;

/// One step of a streamed analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A model fragment plus everything accumulated so far.
    Progress { fragment: String, accumulated: String },
    /// The shaped record. Final.
    Complete { record: Box<AnalysisRecord> },
    /// A pipeline failure. Final.
    Error { message: String },
}

impl PipelineEvent {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Frame type tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "analysis_complete")]
    AnalysisComplete,
    #[serde(rename = "error")]
    Error,
}

/// Externally framed event: `{type, data, timestamp, is_final}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub is_final: bool,
}

impl StreamFrame {
    /// Frame a pipeline event, stamped with the current time.
    pub fn from_event(event: &PipelineEvent) -> Self {
        match event {
            PipelineEvent::Progress {
                fragment,
                accumulated,
            } => Self {
                kind: FrameKind::Progress,
                data: json!({ "content": fragment, "full_response": accumulated }),
                timestamp: Utc::now(),
                is_final: false,
            },
            PipelineEvent::Complete { record } => Self {
                kind: FrameKind::AnalysisComplete,
                data: serde_json::to_value(record.as_ref())
                    .unwrap_or_else(|e| json!({ "message": format!("unserialisable record: {e}") })),
                timestamp: Utc::now(),
                is_final: true,
            },
            PipelineEvent::Error { message } => Self::error(message),
        }
    }

    /// A terminal error frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Error,
            data: json!({ "message": message.into() }),
            timestamp: Utc::now(),
            is_final: true,
        }
    }
}
