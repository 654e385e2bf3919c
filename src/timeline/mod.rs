//! Timeline reconstruction
//!
//! Folds the ordered event stream of one run into a list of completed
//! [`Step`]s plus at most one [`InFlightStep`]. The fold is synchronous and
//! deterministic: the same event sequence always produces the same state,
//! including step identifiers.
//!
//! Terminal events (`complete`, `error`) close the run, not a step, so they
//! are left to the run controller, which calls [`TimelineState::finalize`].

use crate::protocol::{AgentKind, AgentStart, Event, Summary};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event received in a state where it cannot apply. Never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("'{event}' received with no step in flight")]
    NoStepInFlight { event: String },
}

/// Output retained for a completed step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summaries: Option<Vec<Summary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A finished unit of work. Immutable once in [`TimelineState::completed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    pub task_id: i64,
    pub agent: AgentKind,
    pub prompt: String,
    pub output: StepOutput,
}

/// Partial data staged while a step runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summaries: Option<Vec<Summary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// The step currently accumulating details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightStep {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    pub task_id: i64,
    pub agent: AgentKind,
    pub prompt: String,
    pub details: StepDetails,
}

impl InFlightStep {
    fn open(ordinal: usize, start: &AgentStart) -> Self {
        Self {
            unique_id: step_id(ordinal, start.task_id),
            task_id: start.task_id,
            agent: start.agent.clone(),
            prompt: start.prompt.clone(),
            details: StepDetails::default(),
        }
    }
}

impl From<InFlightStep> for Step {
    /// Queries and URLs are staging data for display only; they are dropped.
    fn from(step: InFlightStep) -> Self {
        Self {
            unique_id: step.unique_id,
            task_id: step.task_id,
            agent: step.agent,
            prompt: step.prompt,
            output: StepOutput {
                summaries: step.details.summaries,
                code: step.details.code,
                result: None,
            },
        }
    }
}

fn step_id(ordinal: usize, task_id: i64) -> String {
    format!("step-{}-task-{}", ordinal, task_id)
}

/// Reconstructed timeline of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineState {
    pub completed: Vec<Step>,
    pub in_flight: Option<InFlightStep>,
    /// Number of `agent_start` events seen so far
    #[serde(default)]
    pub steps_started: usize,
}

impl TimelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event in place.
    ///
    /// Detail events with no step in flight are rejected with a
    /// [`ProtocolViolation`] and leave the state untouched.
    pub fn apply(&mut self, event: &Event) -> Result<(), ProtocolViolation> {
        match event {
            Event::AgentStart(start) => {
                self.finalize();
                self.steps_started += 1;
                self.in_flight = Some(InFlightStep::open(self.steps_started, start));
                Ok(())
            }
            Event::QueriesGenerated { queries } => {
                let details = self.details_mut(event)?;
                details.queries = Some(queries.clone());
                Ok(())
            }
            Event::UrlsFound { urls } => {
                // A new URL set re-scopes the step; earlier summaries no longer apply.
                let details = self.details_mut(event)?;
                details.urls = Some(urls.clone());
                details.summaries = Some(Vec::new());
                Ok(())
            }
            Event::SummaryComplete(summary) => {
                let details = self.details_mut(event)?;
                details
                    .summaries
                    .get_or_insert_with(Vec::new)
                    .push(summary.clone());
                Ok(())
            }
            Event::CodeExecuting { code } => {
                let details = self.details_mut(event)?;
                details.code = Some(code.clone());
                Ok(())
            }
            Event::Log { .. }
            | Event::Complete(_)
            | Event::Error { .. }
            | Event::Unrecognized { .. } => Ok(()),
        }
    }

    fn details_mut(&mut self, event: &Event) -> Result<&mut StepDetails, ProtocolViolation> {
        self.in_flight
            .as_mut()
            .map(|step| &mut step.details)
            .ok_or_else(|| ProtocolViolation::NoStepInFlight {
                event: event.name().to_string(),
            })
    }

    /// Move the in-flight step, if any, into `completed`.
    pub fn finalize(&mut self) {
        if let Some(step) = self.in_flight.take() {
            self.completed.push(step.into());
        }
    }

    /// Finalize and hand back the full step history
    pub fn into_history(mut self) -> Vec<Step> {
        self.finalize();
        self.completed
    }

    /// Progress line for the current position in the run
    pub fn activity_label(&self) -> &'static str {
        match &self.in_flight {
            Some(step) => step.agent.activity_label(),
            None => "Planning research strategy...",
        }
    }
}

/// Pure transition: `(state, event) -> state'`.
///
/// Protocol violations are logged and dropped; the state passes through.
pub fn reduce(mut state: TimelineState, event: &Event) -> TimelineState {
    if let Err(violation) = state.apply(event) {
        tracing::warn!(%violation, "Ignoring out-of-order stream event");
    }
    state
}
