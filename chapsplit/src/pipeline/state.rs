//! Per-job state machine for the batch pipeline.

use serde::Serialize;

use crate::Error;

/// Lifecycle of one download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Scratch space is being set up.
    #[default]
    Preparing,
    /// The source asset is downloading.
    Fetching,
    /// Tracks are being cut and tagged.
    Extracting,
    /// Extracted tracks are being brought to the target loudness.
    Normalizing,
    Done,
    Cancelled,
    /// The source asset could not be fetched.
    FailedFatal,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "PREPARING",
            Self::Fetching => "FETCHING",
            Self::Extracting => "EXTRACTING",
            Self::Normalizing => "NORMALIZING",
            Self::Done => "DONE",
            Self::Cancelled => "CANCELLED",
            Self::FailedFatal => "FAILED_FATAL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::FailedFatal)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        match (self, target) {
            (Done | Cancelled | FailedFatal, _) => false,

            (Preparing, Fetching) => true,
            (Fetching, Extracting | FailedFatal) => true,
            (Extracting, Normalizing | Done) => true,
            (Normalizing, Done) => true,

            // Any live state can be cancelled
            (_, Cancelled) => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: JobState) -> Result<JobState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = JobState::default();
        let state = state.transition_to(JobState::Fetching).unwrap();
        let state = state.transition_to(JobState::Extracting).unwrap();
        let state = state.transition_to(JobState::Normalizing).unwrap();
        let state = state.transition_to(JobState::Done).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_normalizing_is_optional() {
        assert!(JobState::Extracting.can_transition_to(JobState::Done));
    }

    #[test]
    fn test_any_live_state_can_be_cancelled() {
        for state in [
            JobState::Preparing,
            JobState::Fetching,
            JobState::Extracting,
            JobState::Normalizing,
        ] {
            assert!(state.can_transition_to(JobState::Cancelled), "{state}");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for state in [JobState::Done, JobState::Cancelled, JobState::FailedFatal] {
            assert!(!state.can_transition_to(JobState::Fetching));
            assert!(!state.can_transition_to(JobState::Cancelled));
        }
    }

    #[test]
    fn test_invalid_transition_is_error() {
        let err = JobState::Preparing.transition_to(JobState::Normalizing).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert!(err.to_string().contains("PREPARING"));
        assert!(err.to_string().contains("NORMALIZING"));
    }

    #[test]
    fn test_fatal_failure_only_from_fetching() {
        assert!(JobState::Fetching.can_transition_to(JobState::FailedFatal));
        for state in [
            JobState::Preparing,
            JobState::Extracting,
            JobState::Normalizing,
        ] {
            assert!(!state.can_transition_to(JobState::FailedFatal), "{state}");
        }
        assert!(JobState::Preparing.transition_to(JobState::FailedFatal).is_err());
    }

    #[test]
    fn test_no_skipping_fetch() {
        assert!(!JobState::Preparing.can_transition_to(JobState::Extracting));
        assert!(!JobState::Extracting.can_transition_to(JobState::FailedFatal));
    }
}
