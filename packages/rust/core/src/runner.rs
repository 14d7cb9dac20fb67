//! Bounded execution of submitted documents.
//!
//! At most `max_concurrent` pipelines run at once; up to `max_queued` more
//! admitted tasks wait for a slot in the `Queued` state. Anything beyond
//! that is refused with [`ExposecastError::Overloaded`] and no task is
//! created.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use exposecast_shared::{ExposecastError, Progress, Result, TaskId, TaskResult};
use exposecast_storage::TaskStore;

use crate::pipeline::Pipeline;

/// Admission-controlled front of the [`Pipeline`].
pub struct TaskRunner {
    pipeline: Pipeline,
    slots: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    capacity: usize,
}

impl TaskRunner {
    pub fn new(pipeline: Pipeline) -> Self {
        let config = pipeline.config();
        let max_concurrent = config.max_concurrent.max(1);
        let capacity = max_concurrent + config.max_queued;

        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            admitted: Arc::new(AtomicUsize::new(0)),
            capacity,
            pipeline,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        self.pipeline.store()
    }

    /// Tasks admitted and not yet finished, running or queued.
    pub fn in_flight(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Admit `document` and start its pipeline in the background.
    ///
    /// Returns immediately with the new task id. Must be called from within
    /// a tokio runtime.
    pub fn submit(&self, document: Vec<u8>) -> Result<TaskId> {
        let reserved = self
            .admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            });
        if let Err(in_flight) = reserved {
            warn!(in_flight, capacity = self.capacity, "refusing submission, runner is full");
            return Err(ExposecastError::Overloaded { in_flight });
        }

        let admission = Admission(Arc::clone(&self.admitted));
        let task_id = self.store().create();
        info!(%task_id, bytes = document.len(), "task admitted");

        let pipeline = self.pipeline.clone();
        let slots = Arc::clone(&self.slots);
        let id = task_id.clone();
        tokio::spawn(async move {
            let _admission = admission;
            let Ok(_permit) = slots.acquire_owned().await else {
                pipeline.store().finish(
                    &id,
                    Progress::failed("runner shut down").status,
                    TaskResult::default(),
                );
                return;
            };
            debug!(task_id = %id, "pipeline slot acquired");
            pipeline.run(id, document).await;
        });

        Ok(task_id)
    }
}

/// Releases one admission when the task's unit of work ends.
struct Admission(Arc<AtomicUsize>);

impl Drop for Admission {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
