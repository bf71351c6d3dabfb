//! Bounded worker pool for fan-out stages.
//!
//! A run is an explicit queue/channel pair: the submitted items sit in a
//! shared queue, a fixed number of worker tasks pull from it, push each
//! result into a completion channel, and a single consumer drains that
//! channel through [`PoolRun::next`]. Completions therefore arrive in the
//! order work finishes, not the order it was submitted.
//!
//! Cancellation is cooperative. Workers check the token before taking a new
//! item, and the consumer stops yielding as soon as the token fires. An
//! invocation that is already running is left to finish on its own; its
//! result is never observed. [`PoolRun::drain`] waits for those invocations
//! so nothing is still writing when the caller moves on.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::PipelineError;

/// Upper bound on the default worker count.
///
/// The transforms run external tools that spawn their own processes, so the
/// pool never fans out wider than this unless asked to explicitly.
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// `min(available_parallelism, MAX_DEFAULT_WORKERS)`, computed once per call site.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

/// One finished work item and what its transform returned.
#[derive(Debug)]
pub struct Completion<I, R, E> {
    pub item: I,
    pub result: Result<R, E>,
}

/// A fixed-size executor for independent work items.
pub struct WorkerPool {
    /// Maximum concurrent invocations.
    max_workers: usize,
    /// Pool-wide cancellation signal.
    cancellation_token: CancellationToken,
}

impl WorkerPool {
    /// Create a pool with its own cancellation token.
    pub fn new(max_workers: usize) -> Self {
        Self::with_token(max_workers, CancellationToken::new())
    }

    /// Create a pool driven by an existing token (usually a child of the
    /// caller's token, so cancelling the caller cancels the pool).
    pub fn with_token(max_workers: usize, cancellation_token: CancellationToken) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancellation_token,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Stop dispatching new work. Running invocations finish naturally.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Run every item through `worker` with at most `max_workers` in flight.
    ///
    /// Each invocation runs on its own task, so an error or a panic in one of
    /// them is captured as that item's failed result and never disturbs its
    /// siblings.
    pub fn run<I, R, E, F, Fut>(&self, items: Vec<I>, worker: F) -> PoolRun<I, R, E>
    where
        I: Clone + Send + 'static,
        R: Send + 'static,
        E: From<PipelineError> + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let total = items.len();
        let worker_count = self.max_workers.min(total);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::from(items)),
            dispatched: AtomicUsize::new(0),
        });
        let worker = Arc::new(worker);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        info!(
            items = total,
            workers = worker_count,
            "Starting worker pool run"
        );

        for worker_id in 0..worker_count {
            let shared = shared.clone();
            let worker = worker.clone();
            let tx = tx.clone();
            let token = self.cancellation_token.clone();

            workers.spawn(async move {
                loop {
                    if token.is_cancelled() {
                        debug!(worker_id, "Cancellation observed, no further dispatch");
                        break;
                    }

                    let Some(item) = shared.take_next() else {
                        break;
                    };

                    let invocation = tokio::spawn(worker(item.clone()));
                    let result = match invocation.await {
                        Ok(result) => result,
                        Err(e) => Err(E::from(join_failure(worker_id, e))),
                    };

                    if tx.send(Completion { item, result }).is_err() {
                        // Consumer is gone; nobody will read further results.
                        break;
                    }
                }
                debug!(worker_id, "Worker finished");
            });
        }

        PoolRun {
            results: rx,
            cancellation_token: self.cancellation_token.clone(),
            workers,
            shared,
            total,
            received: 0,
        }
    }
}

struct Shared<I> {
    queue: Mutex<VecDeque<I>>,
    dispatched: AtomicUsize,
}

impl<I> Shared<I> {
    fn take_next(&self) -> Option<I> {
        let item = self.queue.lock().pop_front();
        if item.is_some() {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
        }
        item
    }
}

fn join_failure(worker_id: usize, error: JoinError) -> PipelineError {
    if error.is_panic() {
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        warn!(worker_id, panic = %message, "Work item panicked");
        PipelineError::WorkerPanicked(message)
    } else {
        PipelineError::WorkerCancelled
    }
}

/// The lazy completion sequence of one pool run.
///
/// Dropping it stops the worker loops; invocations already in flight run to
/// completion in the background. Call [`drain`](Self::drain) to wait for them.
pub struct PoolRun<I, R, E> {
    results: mpsc::UnboundedReceiver<Completion<I, R, E>>,
    cancellation_token: CancellationToken,
    workers: JoinSet<()>,
    shared: Arc<Shared<I>>,
    total: usize,
    received: usize,
}

impl<I, R, E> PoolRun<I, R, E> {
    /// Wait for the next completed item.
    ///
    /// Returns `None` once every item has completed, or immediately once the
    /// pool has been cancelled, even if finished results are still queued.
    pub async fn next(&mut self) -> Option<Completion<I, R, E>> {
        if self.cancellation_token.is_cancelled() {
            return None;
        }

        let completion = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => None,
            completion = self.results.recv() => completion,
        };

        if completion.is_some() {
            self.received += 1;
        }
        completion
    }

    /// Number of submitted items.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of items handed to a worker so far.
    pub fn dispatched(&self) -> usize {
        self.shared.dispatched.load(Ordering::SeqCst)
    }

    /// Number of completions yielded to the consumer so far.
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Wait until no invocation of this run is still executing.
    ///
    /// Results that were not consumed yet are discarded and no further item
    /// is picked up.
    pub async fn drain(mut self) {
        self.results.close();
        let mut settled = 0usize;
        while self.workers.join_next().await.is_some() {
            settled += 1;
        }
        debug!(workers = settled, "Worker pool run drained");
    }

    /// Adapt the run into a [`Stream`] of completions.
    pub fn into_stream(self) -> impl Stream<Item = Completion<I, R, E>> {
        futures::stream::unfold(self, |mut run| async move {
            run.next().await.map(|completion| (completion, run))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_tracing;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_default_concurrency_is_capped() {
        let workers = default_concurrency();
        assert!(workers >= 1);
        assert!(workers <= MAX_DEFAULT_WORKERS);
    }

    #[test]
    fn test_zero_workers_is_clamped_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.max_workers(), 1);
    }

    #[tokio::test]
    async fn test_completions_arrive_in_completion_order() {
        init_tracing();
        let pool = WorkerPool::new(4);
        // Later submissions finish first.
        let mut run = pool.run(vec![0u64, 1, 2, 3], |i| async move {
            tokio::time::sleep(Duration::from_millis((4 - i) * 40)).await;
            Ok::<u64, PipelineError>(i)
        });

        let mut order = Vec::new();
        while let Some(completion) = run.next().await {
            order.push(completion.item);
        }

        assert_eq!(order.len(), 4);
        assert_eq!(order[0], 3);
        assert_ne!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_item() {
        let pool = WorkerPool::new(3);
        let mut run = pool.run((0u32..6).collect(), |i| async move {
            if i % 2 == 1 {
                Err(PipelineError::WorkerPanicked(format!("odd {i}")))
            } else {
                Ok(i * 10)
            }
        });

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        while let Some(completion) = run.next().await {
            match completion.result {
                Ok(value) => ok.push(value),
                Err(_) => failed.push(completion.item),
            }
        }

        ok.sort_unstable();
        failed.sort_unstable();
        assert_eq!(ok, vec![0, 20, 40]);
        assert_eq!(failed, vec![1, 3, 5]);
        assert_eq!(run.received(), 6);
    }

    #[tokio::test]
    async fn test_panics_are_captured_as_failures() {
        let pool = WorkerPool::new(2);
        let mut run = pool.run(vec![1u32, 2, 3], |i| async move {
            if i == 2 {
                panic!("item two exploded");
            }
            Ok::<u32, PipelineError>(i)
        });

        let mut results = Vec::new();
        while let Some(completion) = run.next().await {
            results.push((completion.item, completion.result));
        }
        results.sort_by_key(|(item, _)| *item);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1, Ok(1));
        assert_eq!(
            results[1].1,
            Err(PipelineError::WorkerPanicked("item two exploded".to_string()))
        );
        assert_eq!(results[2].1, Ok(3));
    }

    #[tokio::test]
    async fn test_in_flight_work_never_exceeds_bound() {
        let pool = WorkerPool::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let run_in_flight = in_flight.clone();
        let run_peak = peak.clone();
        let mut run = pool.run((0u32..12).collect(), move |i| {
            let in_flight = run_in_flight.clone();
            let peak = run_peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<u32, PipelineError>(i)
            }
        });

        let mut count = 0;
        while run.next().await.is_some() {
            count += 1;
        }

        assert_eq!(count, 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch_and_results() {
        let pool = WorkerPool::new(2);
        let mut run = pool.run((0u32..10).collect(), |i| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<u32, PipelineError>(i)
        });

        let first = run.next().await;
        assert!(first.is_some());

        pool.cancel();
        let dispatched_at_cancel = run.dispatched();
        assert!(dispatched_at_cancel < 10);
        assert!(run.received() <= dispatched_at_cancel);

        assert!(run.next().await.is_none());

        // Let in-flight invocations drain; nothing new may be picked up.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(run.dispatched(), dispatched_at_cancel);
        assert!(run.next().await.is_none());
        assert_eq!(run.received(), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_work() {
        let pool = WorkerPool::new(2);
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        let mut run = pool.run((0u32..6).collect(), move |i| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, PipelineError>(i)
            }
        });

        // Both workers pick up an item before the cancel.
        while run.dispatched() < 2 {
            tokio::task::yield_now().await;
        }
        pool.cancel();
        assert!(run.next().await.is_none());
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        let dispatched = run.dispatched();
        run.drain().await;
        assert_eq!(finished.load(Ordering::SeqCst), dispatched);
        assert_eq!(dispatched, 2);
    }

    #[tokio::test]
    async fn test_cancelled_pool_dispatches_nothing() {
        let pool = WorkerPool::new(4);
        pool.cancel();

        let mut run = pool.run(vec![1u32, 2, 3], |i| async move {
            Ok::<u32, PipelineError>(i)
        });

        assert!(run.next().await.is_none());
        tokio::task::yield_now().await;
        assert_eq!(run.dispatched(), 0);
    }

    #[tokio::test]
    async fn test_child_token_follows_parent() {
        let parent = CancellationToken::new();
        let pool = WorkerPool::with_token(2, parent.child_token());
        assert!(!pool.is_cancelled());
        parent.cancel();
        assert!(pool.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_run_finishes_immediately() {
        let pool = WorkerPool::new(4);
        let mut run = pool.run(Vec::<u32>::new(), |i| async move {
            Ok::<u32, PipelineError>(i)
        });

        assert_eq!(run.total(), 0);
        assert!(run.next().await.is_none());
    }

    #[tokio::test]
    async fn test_into_stream_yields_every_completion() {
        let pool = WorkerPool::new(4);
        let run = pool.run((0u32..20).collect(), |i| async move {
            Ok::<u32, PipelineError>(i + 1)
        });

        let mut values: Vec<u32> = run
            .into_stream()
            .filter_map(|completion| async move { completion.result.ok() })
            .collect()
            .await;
        values.sort_unstable();

        assert_eq!(values, (1u32..=20).collect::<Vec<_>>());
    }
}
