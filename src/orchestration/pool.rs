//! Bounded worker pool for task dispatch.
//!
//! Every submitted task is spawned immediately but waits on a semaphore
//! permit before running, so at most `max_workers` tasks execute at once.
//! [`WorkerPool::wait_all`] is the barrier between phases.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};

use crate::backend::TaskRunner;
use crate::model::{EventStatus, ProgressEvent, Task};
use crate::stats::StatsAggregator;
use crate::stream::EventSender;
use crate::{olog_debug, olog_error};

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
    running: JoinSet<()>,
    /// Join id → task id, for reporting tasks that panicked.
    names: HashMap<Id, String>,
    runner: Arc<dyn TaskRunner>,
    events: EventSender,
    stats: Arc<StatsAggregator>,
}

impl WorkerPool {
    /// `max_workers` is clamped to at least one.
    pub fn new(
        max_workers: usize,
        runner: Arc<dyn TaskRunner>,
        events: EventSender,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            running: JoinSet::new(),
            names: HashMap::new(),
            runner,
            events,
            stats,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Tasks submitted and not yet joined.
    pub fn pending(&self) -> usize {
        self.running.len()
    }

    pub fn spawn(&mut self, task: Task) {
        let permits = Arc::clone(&self.permits);
        let runner = Arc::clone(&self.runner);
        let events = self.events.clone();
        let stats = Arc::clone(&self.stats);
        let id = task.id.clone();

        let handle = self.running.spawn(async move {
            // The semaphore is never closed while tasks are queued.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            runner.run_task(&task, &events, &stats).await;
        });
        self.names.insert(handle.id(), id);
    }

    pub fn spawn_all(&mut self, tasks: impl IntoIterator<Item = Task>) {
        for task in tasks {
            self.spawn(task);
        }
    }

    /// Wait for every submitted task. Returns how many tasks did not finish
    /// normally; each of those gets an error event and a recorded failure.
    pub async fn wait_all(&mut self) -> usize {
        let mut lost = 0;
        while let Some(joined) = self.running.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    self.names.remove(&id);
                }
                Err(e) => {
                    lost += 1;
                    let task_id = self.names.remove(&e.id()).unwrap_or_default();
                    olog_error!("task {} aborted: {}", task_id, e);
                    self.stats.record_failure(Some(&task_id), false);
                    self.events.send(ProgressEvent::for_task(
                        &task_id,
                        EventStatus::Error,
                        format!("execution error: {}", e),
                    ));
                }
            }
        }
        olog_debug!("worker pool drained, {} task(s) lost", lost);
        lost
    }

    /// Dispatch `tasks` and wait for all of them.
    pub async fn run_batch(&mut self, tasks: impl IntoIterator<Item = Task>) -> usize {
        self.spawn_all(tasks);
        self.wait_all().await
    }

    /// Abort anything still queued or running.
    pub fn close(&mut self) {
        self.permits.close();
        self.running.abort_all();
        self.names.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.running.abort_all();
    }
}
