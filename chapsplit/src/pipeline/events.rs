//! User-facing progress events.
//!
//! Pipelines post [`PipelineEvent`]s through an [`EventSink`]; the UI
//! subscribes on its own task. Posting never waits on a subscriber: a slow
//! receiver lags and skips events instead of stalling the pipeline.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::JobState;
use crate::domain::{BatchSummary, MediaFileInfo, PipelineOutcome, TrackWorkItem};

/// Default channel capacity for pipeline events.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Stage a log event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetching,
    Extracting,
    Scanning,
    Measuring,
    Normalizing,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetch",
            Self::Extracting => "extract",
            Self::Scanning => "scan",
            Self::Measuring => "measure",
            Self::Normalizing => "normalize",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Everything a pipeline reports to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Log {
        phase: Phase,
        severity: Severity,
        message: String,
    },
    /// Overall item counter. `completed` only ever grows.
    Progress { completed: usize, total: usize },
    /// Throttled download progress for the job currently fetching.
    Transfer {
        job: usize,
        percent: f64,
        speed: Option<String>,
    },
    JobStateChanged { job: usize, state: JobState },
    /// A job could not be fetched; none of its tracks will be extracted.
    JobFailed { job: usize, url: String, message: String },
    TrackFinished(PipelineOutcome<TrackWorkItem>),
    /// A measurement finished; `file` carries the loudness when it succeeded.
    FileMeasured {
        index: usize,
        file: MediaFileInfo,
        error: Option<String>,
    },
    FileNormalized(PipelineOutcome<MediaFileInfo>),
    Finished(BatchSummary),
}

/// Posting side of the event channel.
///
/// Once the owning pipeline is cancelled the sink goes quiet, so nothing is
/// reported after a cancel.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<PipelineEvent>,
    cancellation_token: CancellationToken,
}

impl EventSink {
    pub fn new(capacity: usize, cancellation_token: CancellationToken) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            cancellation_token,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Post an event. Returns the number of receivers that got it.
    pub fn emit(&self, event: PipelineEvent) -> usize {
        if self.cancellation_token.is_cancelled() {
            return 0;
        }
        // No receivers is fine
        self.sender.send(event).unwrap_or(0)
    }

    pub fn log(&self, phase: Phase, severity: Severity, message: impl Into<String>) -> usize {
        self.emit(PipelineEvent::Log {
            phase,
            severity,
            message: message.into(),
        })
    }

    pub fn progress(&self, completed: usize, total: usize) -> usize {
        self.emit(PipelineEvent::Progress { completed, total })
    }
}
