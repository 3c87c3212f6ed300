/*!
 * Bounded worker pool
 *
 * Each worker loop takes a concurrency permit, pops a task and dispatches
 * on its status:
 * - `Pending`: run the transfer pipeline, record the outcome on the task and
 *   push it back onto the same queue
 * - terminal: deliver the one terminal notification and drop the task
 *
 * Every task therefore passes through the queue twice, and occupies a slot
 * for both passes.
 */

use crate::core::concurrency::ConcurrencyLimiter;
use crate::core::pipeline::TransferPipeline;
use crate::core::queue::TaskQueue;
use courier_core_interface::{Task, TaskKey, TaskStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

struct Inner {
    queue: TaskQueue,
    limiter: ConcurrencyLimiter,
    pipeline: TransferPipeline,
    /// Submitted tasks without a delivered terminal notification
    outstanding: watch::Sender<usize>,
    shutdown: CancellationToken,
}

/// Task scheduler with a fixed number of worker slots
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(pipeline: TransferPipeline, workers: usize) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                queue: TaskQueue::new(),
                limiter: ConcurrencyLimiter::new(workers.max(1)),
                pipeline,
                outstanding,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.inner.limiter.max_concurrent()
    }

    /// Enqueue a pending task
    pub fn submit(&self, task: Task) {
        debug!(task = %task, id = task.id(), "task submitted");
        self.inner.outstanding.send_modify(|n| *n += 1);
        self.inner.queue.push(task);
    }

    /// Cancel every queued or in-flight task with `key`
    ///
    /// Returns whether any task was found.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        let outcome = self.inner.queue.cancel(key);
        let found = outcome.found();
        for task in outcome.removed {
            self.inner.notify(task);
        }
        found
    }

    /// Number of queued entries, including tasks waiting for notification
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Submitted tasks that have not yet been notified
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    /// Spawn the worker loops, one per slot
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        (0..self.workers())
            .map(|index| {
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.worker_loop(index).await })
            })
            .collect()
    }

    /// Wait until every submitted task has delivered its terminal notification
    pub async fn drain(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // The sender lives in `inner`, which outlives this call.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop the worker loops after their current dispatch
    pub fn shutdown(&self) {
        info!("scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.limiter.close();
    }
}

impl Inner {
    async fn worker_loop(&self, index: usize) {
        debug!(worker = index, "worker started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = self.limiter.acquire() => match permit {
                    Some(permit) => permit,
                    None => break,
                },
            };

            let task = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = self.queue.pop() => task,
            };

            self.dispatch(task).await;
            drop(permit);
        }

        debug!(worker = index, "worker stopped");
    }

    async fn dispatch(&self, mut task: Task) {
        if task.status().is_terminal() {
            self.notify(task);
            return;
        }

        let outcome = self.pipeline.run(&mut task).await;
        let recorded = match outcome {
            Ok(()) => task.advance(TaskStatus::Succeeded),
            Err(e) if e.is_canceled() || task.cancel_token().is_cancelled() => {
                info!(task = %task, "task canceled");
                task.advance(TaskStatus::Canceled)
            }
            Err(e) => {
                error!(task = %task, error = %e, "task failed");
                task.fail(&e)
            }
        };
        if let Err(e) = recorded {
            error!(task = %task, error = %e, "could not record task outcome");
        }

        self.queue.push(task);
    }

    fn notify(&self, task: Task) {
        let summary = task.summary();
        task.sink()
            .report_terminal(&summary, task.status(), task.error());
        debug!(task = %task, status = %task.status(), "task notified");
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}
