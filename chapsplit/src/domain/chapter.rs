//! Chapter time spans.

use serde::{Deserialize, Serialize};

use crate::utils::format::format_duration;
use crate::{Error, Result};

/// A time range inside a source asset.
///
/// Created once, either from the source's chapter list or as a synthetic
/// whole-file span, and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSpan {
    index: usize,
    title: String,
    start_time: f64,
    end_time: f64,
}

impl ChapterSpan {
    /// Create a span, enforcing `0 <= start < end`.
    pub fn new(index: usize, title: impl Into<String>, start_time: f64, end_time: f64) -> Result<Self> {
        let title = title.into();
        if !start_time.is_finite() || start_time < 0.0 {
            return Err(Error::validation(format!(
                "Chapter '{title}' has an invalid start time: {start_time}"
            )));
        }
        if !end_time.is_finite() || end_time <= start_time {
            return Err(Error::validation(format!(
                "Chapter '{title}' must end after it starts ({start_time} >= {end_time})"
            )));
        }

        Ok(Self {
            index,
            title,
            start_time,
            end_time,
        })
    }

    /// A span covering a whole asset.
    ///
    /// A non-positive or unknown `total_duration` produces `0..0`, which the
    /// gateway treats as "whole file, no trim".
    pub fn full_file(index: usize, title: impl Into<String>, total_duration: f64) -> Self {
        let end_time = if total_duration.is_finite() && total_duration > 0.0 {
            total_duration
        } else {
            0.0
        };

        Self {
            index,
            title: title.into(),
            start_time: 0.0,
            end_time,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// True for the `start = 0, end <= 0` passthrough span.
    pub fn is_whole_file(&self) -> bool {
        self.start_time == 0.0 && self.end_time <= 0.0
    }

    /// Duration as `m:ss` / `h:mm:ss`.
    pub fn duration_label(&self) -> String {
        format_duration(self.duration())
    }
}
