/*!
 * Task queue shared by producers and worker loops
 *
 * A FIFO list with an async blocking pop. Pending tasks popped by a worker
 * are tracked as in flight until they come back with a terminal status, so
 * a cancel request can reach them.
 */

use courier_core_interface::{Task, TaskKey, TaskStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    list: VecDeque<Task>,
    active: HashMap<u64, (TaskKey, CancellationToken)>,
}

/// Result of a [`TaskQueue::cancel`] request
#[derive(Debug, Default)]
pub struct Cancellation {
    /// In-flight tasks whose cancellation signal was asserted
    pub signaled: usize,
    /// Queued tasks taken out before reaching a worker, already `Canceled`
    pub removed: Vec<Task>,
}

impl Cancellation {
    pub fn found(&self) -> bool {
        self.signaled > 0 || !self.removed.is_empty()
    }
}

#[derive(Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task and wake one waiting worker
    ///
    /// There is no deduplication: the same logical file pushed twice yields
    /// two independent entries.
    pub fn push(&self, task: Task) {
        {
            let mut state = self.lock();
            if task.status().is_terminal() {
                state.active.remove(&task.id());
            }
            state.list.push_back(task);
        }
        self.available.notify_one();
    }

    /// Remove the front task, waiting until one is available
    pub async fn pop(&self) -> Task {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.try_pop() {
                return task;
            }
            notified.await;
        }
    }

    /// Remove the front task if there is one
    pub fn try_pop(&self) -> Option<Task> {
        let mut state = self.lock();
        let task = state.list.pop_front()?;
        if task.status() == TaskStatus::Pending {
            state
                .active
                .insert(task.id(), (task.key(), task.cancel_token().clone()));
        }
        let more = !state.list.is_empty();
        drop(state);

        // Hand a leftover wakeup to the next waiter.
        if more {
            self.available.notify_one();
        }
        Some(task)
    }

    /// Cancel every task with `key`
    ///
    /// In-flight tasks have their signal asserted and finish on their own.
    /// Queued pending tasks are removed, marked `Canceled` and returned so
    /// the caller can acknowledge them.
    pub fn cancel(&self, key: &TaskKey) -> Cancellation {
        let mut outcome = Cancellation::default();
        let mut state = self.lock();

        for (active_key, token) in state.active.values() {
            if active_key == key {
                token.cancel();
                outcome.signaled += 1;
            }
        }

        let mut kept = VecDeque::with_capacity(state.list.len());
        for mut task in state.list.drain(..) {
            if task.status() == TaskStatus::Pending && &task.key() == key {
                task.cancel_token().cancel();
                if task.advance(TaskStatus::Canceled).is_ok() {
                    outcome.removed.push(task);
                    continue;
                }
            }
            kept.push_back(task);
        }
        state.list = kept;

        debug!(
            key = %key,
            signaled = outcome.signaled,
            removed = outcome.removed.len(),
            "cancel requested"
        );
        outcome
    }

    /// Current queue depth
    pub fn len(&self) -> usize {
        self.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
