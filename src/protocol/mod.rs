//! Research stream protocol
//!
//! The research service reports progress as a sequence of frames:
//!
//! ```text
//! data: {"event": "agent_start", "data": {"task_id": 1, "agent": "ResearcherAgent", "prompt": "..."}}
//!
//! data: {"event": "complete", "data": {"report": "...", "image_urls": []}}
//!
//! ```
//!
//! Every frame is decoded into the closed [`Event`] union at the boundary
//! ([`codec::EventCodec`]); nothing past the codec looks at raw JSON.

pub mod codec;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::EventCodec;

/// Message surfaced when an `error` event carries no detail.
pub const UNKNOWN_SERVER_ERROR: &str = "An unknown server error occurred.";

/// A single frame that could not be turned into an [`Event`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid payload for '{event}': {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Agent that owns a step.
///
/// The set reported by the orchestrator may grow, so unknown names are kept
/// verbatim in [`AgentKind::Other`] instead of being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentKind {
    Orchestrator,
    ResearcherAgent,
    CodeExecutor,
    LeadSynthesizer,
    UserClarificationAgent,
    Other(String),
}

impl AgentKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Orchestrator => "Orchestrator",
            Self::ResearcherAgent => "ResearcherAgent",
            Self::CodeExecutor => "CodeExecutor",
            Self::LeadSynthesizer => "LeadSynthesizer",
            Self::UserClarificationAgent => "UserClarificationAgent",
            Self::Other(name) => name,
        }
    }

    /// Short progress line shown while a step of this kind is running
    pub fn activity_label(&self) -> &'static str {
        match self {
            Self::ResearcherAgent => "Gathering intelligence...",
            Self::CodeExecutor => "Running calculations...",
            Self::LeadSynthesizer => "Synthesizing final report...",
            _ => "Processing...",
        }
    }
}

impl From<String> for AgentKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Orchestrator" => Self::Orchestrator,
            "ResearcherAgent" => Self::ResearcherAgent,
            "CodeExecutor" => Self::CodeExecutor,
            "LeadSynthesizer" => Self::LeadSynthesizer,
            "UserClarificationAgent" => Self::UserClarificationAgent,
            _ => Self::Other(name),
        }
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        match kind {
            AgentKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `agent_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStart {
    pub task_id: i64,
    pub agent: AgentKind,
    pub prompt: String,
}

/// One summarized source, payload of `summary_complete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub relevance_score: f64,
}

/// Payload of `complete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub report: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AgentStart(AgentStart),
    QueriesGenerated { queries: Vec<String> },
    UrlsFound { urls: Vec<String> },
    SummaryComplete(Summary),
    CodeExecuting { code: String },
    /// Orchestrator chatter; never affects the timeline
    Log { message: String },
    Complete(FinalReport),
    Error { detail: String },
    /// Well-formed frame with an event name this client does not know
    Unrecognized { name: String },
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Self::AgentStart(_) => "agent_start",
            Self::QueriesGenerated { .. } => "queries_generated",
            Self::UrlsFound { .. } => "urls_found",
            Self::SummaryComplete(_) => "summary_complete",
            Self::CodeExecuting { .. } => "code_executing",
            Self::Log { .. } => "log",
            Self::Complete(_) => "complete",
            Self::Error { .. } => "error",
            Self::Unrecognized { name } => name,
        }
    }

    /// `complete` and `error` close the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error { .. })
    }

    /// Decode the JSON document carried by one frame.
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        let frame: WireFrame = serde_json::from_str(json)?;
        frame.into_event()
    }

    /// Encode as the JSON document of one frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let data = match self {
            Self::AgentStart(start) => serde_json::to_value(start)?,
            Self::QueriesGenerated { queries } => serde_json::json!({ "queries": queries }),
            Self::UrlsFound { urls } => serde_json::json!({ "urls": urls }),
            Self::SummaryComplete(summary) => serde_json::to_value(summary)?,
            Self::CodeExecuting { code } => serde_json::json!({ "code": code }),
            Self::Log { message } => serde_json::json!({ "message": message }),
            Self::Complete(report) => serde_json::to_value(report)?,
            Self::Error { detail } => serde_json::json!({ "detail": detail }),
            Self::Unrecognized { .. } => serde_json::Value::Null,
        };
        serde_json::to_string(&WireFrame {
            event: self.name().to_string(),
            data,
        })
    }
}

/// `{ "event": <name>, "data": <payload> }` as it travels on the wire
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct QueriesPayload {
    queries: Vec<String>,
}

#[derive(Deserialize)]
struct UrlsPayload {
    urls: Vec<String>,
}

#[derive(Deserialize)]
struct CodePayload {
    code: String,
}

#[derive(Deserialize)]
struct LogPayload {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    detail: Option<String>,
}

impl WireFrame {
    fn into_event(self) -> Result<Event, DecodeError> {
        let WireFrame { event, data } = self;
        let payload = |source| DecodeError::Payload {
            event: event.clone(),
            source,
        };

        let decoded = match event.as_str() {
            "agent_start" => Event::AgentStart(serde_json::from_value(data).map_err(payload)?),
            "queries_generated" => {
                let p: QueriesPayload = serde_json::from_value(data).map_err(payload)?;
                Event::QueriesGenerated { queries: p.queries }
            }
            "urls_found" => {
                let p: UrlsPayload = serde_json::from_value(data).map_err(payload)?;
                Event::UrlsFound { urls: p.urls }
            }
            "summary_complete" => {
                Event::SummaryComplete(serde_json::from_value(data).map_err(payload)?)
            }
            "code_executing" => {
                let p: CodePayload = serde_json::from_value(data).map_err(payload)?;
                Event::CodeExecuting { code: p.code }
            }
            "log" => {
                let p: LogPayload = serde_json::from_value(data).map_err(payload)?;
                Event::Log { message: p.message }
            }
            "complete" => Event::Complete(serde_json::from_value(data).map_err(payload)?),
            "error" => {
                let p: ErrorPayload =
                    serde_json::from_value(data).unwrap_or(ErrorPayload { detail: None });
                let detail = p
                    .detail
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_SERVER_ERROR.to_string());
                Event::Error { detail }
            }
            _ => Event::Unrecognized {
                name: event.clone(),
            },
        };

        Ok(decoded)
    }
}
