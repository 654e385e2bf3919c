//! Run controller
//!
//! Drives one research run from start to a terminal outcome: replays
//! archived runs, otherwise registers the run as pending, opens an
//! [`EventSource`], folds events into a [`TimelineState`] and archives the
//! result on success.

mod progress;

pub use progress::{RunPhase, RunTracker, RunUpdate};

use crate::api::ResearchRequest;
use crate::archive::{Archive, ArchiveError, RunRecord};
use crate::protocol::{Event, FinalReport};
use crate::settings::SettingsStore;
use crate::stream::{EventSource, StreamError};
use crate::timeline::{reduce, TimelineState};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shown when the body ends without a `complete` or `error` event
pub const STREAM_ENDED_EARLY: &str = "Research stream ended before the run completed.";

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Run {0} is already streaming")]
    AlreadyStreaming(Uuid),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunRecord),
    /// Server-reported or transport failure; the run is left unarchived
    Failed { detail: String },
    /// Not an error: nothing is archived and nothing is reported
    Cancelled,
}

enum Terminal {
    Completed(FinalReport),
    Failed(String),
    Cancelled,
}

type ActiveRuns = Arc<Mutex<HashSet<Uuid>>>;

/// Marks a run id as streaming until dropped
struct ActiveRun {
    active: ActiveRuns,
    run_id: Uuid,
}

impl ActiveRun {
    fn claim(active: &ActiveRuns, run_id: Uuid) -> Option<Self> {
        let mut runs = active.lock().unwrap_or_else(|e| e.into_inner());
        if !runs.insert(run_id) {
            return None;
        }
        Some(Self {
            active: active.clone(),
            run_id,
        })
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let mut runs = self.active.lock().unwrap_or_else(|e| e.into_inner());
        runs.remove(&self.run_id);
    }
}

pub struct RunController {
    source: Arc<dyn EventSource>,
    archive: Archive,
    settings: SettingsStore,
    active: ActiveRuns,
}

impl RunController {
    pub fn new(source: Arc<dyn EventSource>, archive: Archive, settings: SettingsStore) -> Self {
        Self {
            source,
            archive,
            settings,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Whether a session is currently open for `run_id`
    pub fn is_streaming(&self, run_id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&run_id)
    }

    /// Run `query` under `run_id` until it completes, fails or `cancel` fires.
    ///
    /// An id that is already archived is replayed without touching the
    /// network. Starting an id that is still streaming is rejected.
    pub async fn start(
        &self,
        run_id: Uuid,
        query: &str,
        cancel: CancellationToken,
        updates: mpsc::Sender<RunUpdate>,
    ) -> Result<RunOutcome, RunError> {
        let tracker = RunTracker::new(run_id, updates, cancel.clone());

        if let Some(record) = self.archive.get(run_id).await {
            tracing::info!(%run_id, "Replaying archived run");
            let timeline = TimelineState {
                steps_started: record.history.len(),
                completed: record.history.clone(),
                in_flight: None,
            };
            tracker.completed(&timeline).await;
            return Ok(RunOutcome::Completed(record));
        }

        let _active =
            ActiveRun::claim(&self.active, run_id).ok_or(RunError::AlreadyStreaming(run_id))?;

        tracker.starting().await;
        self.archive.start_pending(run_id, query).await?;

        let request = ResearchRequest {
            query: query.to_string(),
            model_configs: self.settings.model_configs().await,
        };

        let mut timeline = TimelineState::new();
        tracker.streaming(&timeline).await;
        tracing::info!(%run_id, %query, "Research run started");

        let terminal = self
            .stream_events(&request, &cancel, &tracker, &mut timeline)
            .await;

        match terminal {
            Terminal::Completed(report) => {
                timeline.finalize();
                let record = match self
                    .archive
                    .save(run_id, query, report, timeline.completed.clone())
                    .await
                {
                    Ok(record) => record,
                    Err(e) => {
                        tracker.failed(e.to_string(), &timeline).await;
                        return Err(e.into());
                    }
                };
                tracker.completed(&timeline).await;
                Ok(RunOutcome::Completed(record))
            }
            Terminal::Failed(detail) => {
                timeline.finalize();
                tracing::warn!(%run_id, %detail, "Research run failed");
                tracker.failed(detail.clone(), &timeline).await;
                Ok(RunOutcome::Failed { detail })
            }
            Terminal::Cancelled => {
                tracing::info!(%run_id, "Research run cancelled");
                tracker.cancelled(&timeline).await;
                Ok(RunOutcome::Cancelled)
            }
        }
    }

    /// Open the source and fold events until a terminal condition.
    /// The event stream is dropped on return, which closes the connection.
    async fn stream_events(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
        tracker: &RunTracker,
        timeline: &mut TimelineState,
    ) -> Terminal {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Terminal::Cancelled,
            opened = self.source.open(request, cancel.clone()) => opened,
        };

        let mut events = match opened {
            Ok(events) => events,
            Err(StreamError::Cancelled) => return Terminal::Cancelled,
            Err(e) => return Terminal::Failed(e.to_string()),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Terminal::Cancelled,
                next = events.next() => next,
            };

            let event = match next {
                None if cancel.is_cancelled() => return Terminal::Cancelled,
                None => return Terminal::Failed(STREAM_ENDED_EARLY.to_string()),
                Some(Err(StreamError::Cancelled)) => return Terminal::Cancelled,
                Some(Err(e)) => return Terminal::Failed(e.to_string()),
                Some(Ok(event)) => event,
            };

            match event {
                Event::Complete(report) => return Terminal::Completed(report),
                Event::Error { detail } => return Terminal::Failed(detail),
                event => {
                    if let Event::Log { message } = &event {
                        tracing::debug!(%message, "Orchestrator log");
                    }
                    *timeline = reduce(std::mem::take(timeline), &event);
                    tracker.streaming(timeline).await;
                }
            }
        }
    }
}
