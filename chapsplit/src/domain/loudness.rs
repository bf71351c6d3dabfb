//! Loudness targets and statistics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::MediaFileInfo;
use crate::{Error, Result};

pub const DEFAULT_TARGET_LUFS: f64 = -19.0;
pub const MIN_TARGET_LUFS: f64 = -70.0;
pub const MAX_TARGET_LUFS: f64 = 0.0;

/// A validated integrated-loudness target in LUFS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct TargetLoudness(f64);

impl TargetLoudness {
    pub fn new(lufs: f64) -> Result<Self> {
        if !lufs.is_finite() || !(MIN_TARGET_LUFS..=MAX_TARGET_LUFS).contains(&lufs) {
            return Err(Error::validation(format!(
                "Target must be between {MIN_TARGET_LUFS:.1} and {MAX_TARGET_LUFS:.1} LUFS."
            )));
        }
        Ok(Self(lufs))
    }

    /// Parse user input such as `-16` or ` -23.5 `.
    pub fn parse(input: &str) -> Result<Self> {
        let lufs: f64 = input
            .trim()
            .parse()
            .map_err(|_| Error::validation("Please enter a valid number."))?;
        Self::new(lufs)
    }

    pub fn lufs(self) -> f64 {
        self.0
    }
}

impl Default for TargetLoudness {
    fn default() -> Self {
        Self(DEFAULT_TARGET_LUFS)
    }
}

impl fmt::Display for TargetLoudness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} LUFS", self.0)
    }
}

impl FromStr for TargetLoudness {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<f64> for TargetLoudness {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TargetLoudness> for f64 {
    fn from(value: TargetLoudness) -> Self {
        value.0
    }
}

/// Mean and median over the files that have a measured loudness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessStats {
    pub measured: usize,
    pub mean: f64,
    pub median: f64,
}

impl LoudnessStats {
    /// `None` when there is nothing to summarise.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };

        Some(Self {
            measured: n,
            mean,
            median,
        })
    }

    /// Statistics over every file with a present loudness value.
    pub fn from_files(files: &[MediaFileInfo]) -> Option<Self> {
        Self::from_values(files.iter().filter_map(MediaFileInfo::loudness_lufs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("-19", -19.0)]
    #[case(" -23.5 ", -23.5)]
    #[case("0", 0.0)]
    #[case("-70.0", -70.0)]
    fn test_parse_accepts_range(#[case] input: &str, #[case] expected: f64) {
        assert_eq!(TargetLoudness::parse(input).unwrap().lufs(), expected);
    }

    #[rstest]
    #[case("loud", "Please enter a valid number.")]
    #[case("", "Please enter a valid number.")]
    #[case("-70.1", "Target must be between -70.0 and 0.0 LUFS.")]
    #[case("3", "Target must be between -70.0 and 0.0 LUFS.")]
    #[case("NaN", "Target must be between -70.0 and 0.0 LUFS.")]
    fn test_parse_rejects(#[case] input: &str, #[case] message: &str) {
        match TargetLoudness::parse(input) {
            Err(Error::Validation(msg)) => assert_eq!(msg, message),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_and_display() {
        assert_eq!(TargetLoudness::default().lufs(), DEFAULT_TARGET_LUFS);
        assert_eq!(TargetLoudness::default().to_string(), "-19.0 LUFS");
    }

    #[test]
    fn test_stats_mean_and_median() {
        let stats = LoudnessStats::from_values([-20.0, -10.0, -15.0]).unwrap();
        assert_eq!(stats.measured, 3);
        assert_eq!(stats.mean, -15.0);
        assert_eq!(stats.median, -15.0);

        let even = LoudnessStats::from_values([-20.0, -10.0, -12.0, -14.0]).unwrap();
        assert_eq!(even.median, -13.0);
        assert_eq!(even.mean, -14.0);

        assert!(LoudnessStats::from_values([]).is_none());
    }
}
