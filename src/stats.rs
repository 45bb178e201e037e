//! Execution statistics shared by every task of a session.
//!
//! All mutation happens under one mutex. Readers take a [`Stats`] snapshot,
//! an owned copy, so reporting never holds the lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub executions: u64,
    pub failures: u64,
}

/// Point-in-time copy of the aggregated counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_executions: u64,
    pub total_failures: u64,
    pub per_task: BTreeMap<String, Counter>,
    pub command_stats: Counter,
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<Stats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Stats> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reset(&self) {
        *self.lock() = Stats::default();
    }

    /// Count one execution, either of an ad-hoc command or of a task.
    pub fn record_execution(&self, task_id: Option<&str>, is_command: bool) {
        let mut stats = self.lock();
        stats.total_executions += 1;
        if let Some(counter) = Self::slot(&mut stats, task_id, is_command) {
            counter.executions += 1;
        }
    }

    pub fn record_failure(&self, task_id: Option<&str>, is_command: bool) {
        let mut stats = self.lock();
        stats.total_failures += 1;
        if let Some(counter) = Self::slot(&mut stats, task_id, is_command) {
            counter.failures += 1;
        }
    }

    fn slot<'a>(
        stats: &'a mut Stats,
        task_id: Option<&str>,
        is_command: bool,
    ) -> Option<&'a mut Counter> {
        if is_command {
            return Some(&mut stats.command_stats);
        }
        task_id.map(|id| stats.per_task.entry(id.to_string()).or_default())
    }

    pub fn snapshot(&self) -> Stats {
        self.lock().clone()
    }
}
