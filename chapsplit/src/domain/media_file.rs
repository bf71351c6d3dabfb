//! Files discovered by the directory scan.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::utils::format::{format_lufs, format_size};

/// One audio file in the directory-normalization mode.
///
/// `loudness_lufs` starts absent and is filled in once by the measurement
/// stage; a file whose measurement failed keeps it absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaFileInfo {
    path: PathBuf,
    display_name: String,
    size_bytes: u64,
    loudness_lufs: Option<f64>,
}

impl MediaFileInfo {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            path,
            display_name,
            size_bytes,
            loudness_lufs: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn loudness_lufs(&self) -> Option<f64> {
        self.loudness_lufs
    }

    pub fn with_loudness(&self, lufs: f64) -> Self {
        Self {
            loudness_lufs: Some(lufs),
            ..self.clone()
        }
    }

    pub fn size_label(&self) -> String {
        format_size(self.size_bytes)
    }

    /// `-18.3 LUFS`, or `None` when no value is present.
    pub fn loudness_label(&self) -> Option<String> {
        self.loudness_lufs.map(format_lufs)
    }
}
