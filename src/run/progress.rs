//! Run progress publishing
//!
//! Every state change of a run is pushed to observers as a [`RunUpdate`]
//! carrying a full snapshot of the timeline.

use crate::timeline::TimelineState;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle position of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    /// Registering the run before the stream opens
    Starting,
    Streaming,
    Completed,
    /// Carries the message shown to the user
    Failed { detail: String },
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }
}

/// Snapshot sent after every transition and every applied event
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub timeline: TimelineState,
    pub activity: &'static str,
    pub elapsed_ms: u64,
}

/// Sends [`RunUpdate`]s for a single run. A closed receiver is ignored.
///
/// A full channel applies backpressure until the run is cancelled; after
/// that, updates that do not fit are dropped.
pub struct RunTracker {
    tx: mpsc::Sender<RunUpdate>,
    run_id: Uuid,
    start_time: Instant,
    cancel: CancellationToken,
}

impl RunTracker {
    pub fn new(run_id: Uuid, tx: mpsc::Sender<RunUpdate>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            run_id,
            start_time: Instant::now(),
            cancel,
        }
    }

    pub async fn update(&self, phase: RunPhase, timeline: &TimelineState) {
        let update = RunUpdate {
            run_id: self.run_id,
            activity: timeline.activity_label(),
            phase,
            timeline: timeline.clone(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
        };
        tokio::select! {
            biased;
            _ = self.tx.send(update) => {}
            _ = self.cancel.cancelled() => {
                tracing::debug!(run_id = %self.run_id, "Dropped update for stalled observer");
            }
        }
    }

    pub async fn starting(&self) {
        self.update(RunPhase::Starting, &TimelineState::new()).await;
    }

    pub async fn streaming(&self, timeline: &TimelineState) {
        self.update(RunPhase::Streaming, timeline).await;
    }

    pub async fn completed(&self, timeline: &TimelineState) {
        self.update(RunPhase::Completed, timeline).await;
    }

    pub async fn failed(&self, detail: impl Into<String>, timeline: &TimelineState) {
        self.update(
            RunPhase::Failed {
                detail: detail.into(),
            },
            timeline,
        )
        .await;
    }

    pub async fn cancelled(&self, timeline: &TimelineState) {
        self.update(RunPhase::Cancelled, timeline).await;
    }
}
