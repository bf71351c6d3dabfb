//! Batch and directory pipelines.
//!
//! Both fan their work out through [`pipeline_common::WorkerPool`] and
//! report to the UI through [`EventSink`] subscriptions.

mod controller;
mod directory;
pub mod events;
mod progress;
mod state;

pub use controller::{BatchPipeline, BatchSettings};
pub use directory::{DirectoryPipeline, MeasuredFiles};
pub use events::{EventSink, Phase, PipelineEvent, Severity};
pub use progress::BatchProgress;
pub use state::JobState;
