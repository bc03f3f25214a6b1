//! Bounded-concurrency batch executor.
//!
//! A fixed pool of asynchronous workers drains a shared work queue. The pool
//! bounds outstanding store calls, not CPU parallelism: the only suspension
//! points are the store operations inside the worker future, and each queue
//! pop is a single atomic step, so no item is ever handed to two workers.
//! The queue is always fully drained — item failures are tallied and
//! classified, never retried within one run, and never abort the batch.

use crate::castflow::store::StoreError;
use log::{error, warn};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

/// Aggregate outcome of one batch run. Completion order is unspecified, so
/// `side_effects` carries no ordering guarantee either.
#[derive(Debug)]
pub struct BatchRunResult<T> {
    pub succeeded: usize,
    pub failed: usize,
    pub side_effects: Vec<T>,
}

impl<T> BatchRunResult<T> {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs `worker` over every item with at most `concurrency` outstanding
/// invocations.
///
/// A transient store contention error logs at warning level, anything else
/// at error level; both count as failures. The caller decides afterwards
/// whether the aggregate failure count warrants a batch-level escalation.
pub async fn run_batch<W, T, F, Fut>(concurrency: usize, items: Vec<W>, worker: F) -> BatchRunResult<T>
where
    W: Send + 'static,
    T: Send + 'static,
    F: Fn(W) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, StoreError>> + Send + 'static,
{
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let mut join_set = JoinSet::new();

    for _ in 0..concurrency.max(1) {
        let queue = queue.clone();
        let worker = worker.clone();
        join_set.spawn(async move {
            let mut succeeded = 0usize;
            let mut failed = 0usize;
            let mut side_effects = Vec::new();
            loop {
                let item = queue.lock().expect("work queue lock").pop_front();
                let Some(item) = item else {
                    break;
                };
                match worker(item).await {
                    Ok(mut effects) => {
                        succeeded += 1;
                        side_effects.append(&mut effects);
                    }
                    Err(e) if e.is_transient() => {
                        failed += 1;
                        warn!("Store contention while draining batch: {}", e);
                    }
                    Err(e) => {
                        failed += 1;
                        error!("Work item failed while draining batch: {}", e);
                    }
                }
            }
            (succeeded, failed, side_effects)
        });
    }

    let mut result = BatchRunResult {
        succeeded: 0,
        failed: 0,
        side_effects: Vec::new(),
    };
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((succeeded, failed, mut effects)) => {
                result.succeeded += succeeded;
                result.failed += failed;
                result.side_effects.append(&mut effects);
            }
            Err(e) => {
                // A panicked worker loses its local tallies; surface it as a
                // failed batch so the upstream redelivers.
                result.failed += 1;
                error!("Batch worker task failed: {}", e);
            }
        }
    }
    result
}
