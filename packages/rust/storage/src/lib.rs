//! In-memory task state store.
//!
//! The [`TaskStore`] maps task ids to their progress and result. It is the
//! single source of truth polled by clients:
//!
//! - one writer per task (the pipeline running it), any number of readers
//! - progress is clamped to be non-decreasing and frozen once it reaches 100
//! - [`TaskStore::finish`] writes result and terminal progress in one step
//! - finished entries expire after a retention period; see [`TaskStore::spawn_sweeper`]
//!
//! Each entry sits behind its own shard lock, so a read never observes a
//! half-written record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use exposecast_shared::{Progress, TaskId, TaskResult};

#[derive(Debug, Clone)]
struct TaskEntry {
    progress: Progress,
    result: Option<TaskResult>,
    finished_at: Option<Instant>,
}

impl TaskEntry {
    fn new(progress: Progress) -> Self {
        let finished_at = progress.is_terminal().then(Instant::now);
        Self {
            progress,
            result: None,
            finished_at,
        }
    }
}

/// Consistent view of one task, taken under a single entry lock.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub progress: Progress,
    pub result: TaskResult,
}

/// Process-wide task state, shared via `Arc`.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<TaskId, TaskEntry>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh task in the queued state and return its id.
    pub fn create(&self) -> TaskId {
        let task_id = TaskId::new();
        self.tasks
            .insert(task_id.clone(), TaskEntry::new(Progress::queued()));
        debug!(%task_id, "task created");
        task_id
    }

    /// Upsert the progress of `task_id`.
    ///
    /// The percent never moves backwards, and a task at 100 ignores further
    /// updates.
    pub fn update_progress(&self, task_id: &TaskId, status: impl Into<String>, percent: u8) {
        let status = status.into();
        let mut entry = self
            .tasks
            .entry(task_id.clone())
            .or_insert_with(|| TaskEntry::new(Progress::queued()));

        if entry.progress.is_terminal() {
            debug!(%task_id, %status, "ignoring progress update for finished task");
            return;
        }

        let percent = percent.min(100).max(entry.progress.percent);
        entry.progress = Progress::new(status, percent);
        if entry.progress.is_terminal() {
            entry.finished_at = Some(Instant::now());
        }
        debug!(%task_id, percent, "progress updated");
    }

    /// Current progress, or the not-found sentinel for unknown ids.
    pub fn get_progress(&self, task_id: &TaskId) -> Progress {
        self.tasks
            .get(task_id)
            .map(|entry| entry.progress.clone())
            .unwrap_or_else(Progress::not_found)
    }

    /// Store the result of `task_id`, replacing any previous one.
    pub fn set_result(&self, task_id: &TaskId, result: TaskResult) {
        let mut entry = self
            .tasks
            .entry(task_id.clone())
            .or_insert_with(|| TaskEntry::new(Progress::queued()));
        entry.result = Some(result);
    }

    /// Stored result, or an all-default result when none was stored.
    pub fn get_result(&self, task_id: &TaskId) -> TaskResult {
        self.tasks
            .get(task_id)
            .and_then(|entry| entry.result.clone())
            .unwrap_or_default()
    }

    /// Progress and result of `task_id` read together, `None` for unknown ids.
    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.tasks.get(task_id).map(|entry| TaskSnapshot {
            progress: entry.progress.clone(),
            result: entry.result.clone().unwrap_or_default(),
        })
    }

    /// Terminate `task_id`: store `result` and move progress to 100 with `status`.
    ///
    /// Only the first call for a task takes effect. Returns whether this call
    /// finished the task.
    pub fn finish(&self, task_id: &TaskId, status: impl Into<String>, result: TaskResult) -> bool {
        let status = status.into();
        let mut entry = self
            .tasks
            .entry(task_id.clone())
            .or_insert_with(|| TaskEntry::new(Progress::queued()));

        if entry.progress.is_terminal() {
            debug!(%task_id, %status, "task already finished");
            return false;
        }

        entry.result = Some(result);
        entry.progress = Progress::new(status, 100);
        entry.finished_at = Some(Instant::now());
        true
    }

    /// Drop finished tasks older than `retention`. Returns the number removed.
    pub fn evict_expired(&self, retention: Duration) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| {
            entry
                .finished_at
                .is_none_or(|finished| finished.elapsed() < retention)
        });
        before.saturating_sub(self.tasks.len())
    }

    /// Number of tracked tasks, finished or not.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run [`evict_expired`](Self::evict_expired) every `interval` on the tokio runtime.
    ///
    /// The sweeper lives until the returned handle is aborted.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        retention: Duration,
        interval: Duration,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.evict_expired(retention);
                if evicted > 0 {
                    info!(evicted, remaining = store.len(), "evicted expired tasks");
                }
            }
        })
    }
}
