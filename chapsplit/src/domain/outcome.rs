//! Per-item outcomes and batch summaries.

use serde::Serialize;

/// The terminal record for exactly one work item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome<T> {
    pub item: T,
    pub succeeded: bool,
    pub error_message: Option<String>,
}

impl<T> PipelineOutcome<T> {
    pub fn success(item: T) -> Self {
        Self {
            item,
            succeeded: true,
            error_message: None,
        }
    }

    pub fn failure(item: T, message: impl Into<String>) -> Self {
        Self {
            item,
            succeeded: false,
            error_message: Some(message.into()),
        }
    }
}

/// Counts derived from the emitted outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, succeeded: bool) {
        if succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Items that never produced an outcome (only non-zero after cancellation).
    pub fn incomplete(&self) -> usize {
        self.total.saturating_sub(self.completed())
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.succeeded == self.total
    }
}

/// Every outcome of a run together with its summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport<T> {
    pub outcomes: Vec<PipelineOutcome<T>>,
    pub summary: BatchSummary,
}

impl<T> BatchReport<T> {
    /// Build a report whose counts come solely from `outcomes`.
    pub fn from_outcomes(outcomes: Vec<PipelineOutcome<T>>, total: usize, cancelled: bool) -> Self {
        let mut summary = BatchSummary::new(total);
        summary.cancelled = cancelled;
        for outcome in &outcomes {
            summary.record(outcome.succeeded);
        }
        Self { outcomes, summary }
    }

    pub fn failures(&self) -> impl Iterator<Item = &PipelineOutcome<T>> {
        self.outcomes.iter().filter(|o| !o.succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_come_from_outcomes() {
        let report = BatchReport::from_outcomes(
            vec![
                PipelineOutcome::success("a"),
                PipelineOutcome::failure("b", "ffmpeg failed"),
            ],
            3,
            true,
        );

        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.incomplete(), 1);
        assert!(!report.summary.all_succeeded());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_complete_summary() {
        let mut summary = BatchSummary::new(2);
        summary.record(true);
        summary.record(true);
        assert_eq!(summary.incomplete(), 0);
        assert!(summary.all_succeeded());
    }
}
