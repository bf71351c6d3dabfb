//! Batch-wide completion counter.

/// Counts finished items across every job of one run.
///
/// Owned by the controller task and advanced once per outcome, so it needs
/// no synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    completed: usize,
    total: usize,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self { completed: 0, total }
    }

    /// Record one finished item and return the new `(completed, total)`.
    pub fn advance(&mut self) -> (usize, usize) {
        self.completed = (self.completed + 1).min(self.total);
        (self.completed, self.total)
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
