//! Application-wide error types.

use std::path::{Path, PathBuf};

use pipeline_common::PipelineError;
use process_utils::ProcessError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad user input. Surfaced before any pipeline starts.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Metadata lookup or asset download failed. Fatal for one job only.
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("Failed to write tags to {}: {message}", .path.display())]
    TagWrite { path: PathBuf, message: String },

    #[error("Loudness measurement failed for {}: {message}", .path.display())]
    LoudnessMeasurement { path: PathBuf, message: String },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn external_tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn tag_write(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::TagWrite {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn loudness(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::LoudnessMeasurement {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Whether the error belongs to a single work item.
    ///
    /// Item-scoped errors are turned into a failed outcome for that item and
    /// never abort the surrounding job.
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            Self::ExternalTool { .. }
                | Self::TagWrite { .. }
                | Self::LoudnessMeasurement { .. }
                | Self::Pipeline(_)
                | Self::Process(_)
        )
    }

    /// Whether the error aborts the enclosing job.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}
