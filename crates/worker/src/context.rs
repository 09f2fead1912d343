use crate::errors::WorkerError;
use ipc::{IpcError, ResourceNames, Semaphore, SharedStats, TaskQueue};

/// The three shared resources a worker holds for its whole life.
pub struct WorkerContext {
    pub queue: TaskQueue,
    pub stats: SharedStats,
    pub semaphore: Semaphore,
}

impl WorkerContext {
    /// Open every resource created by the coordinator. Any failure is fatal
    /// to the worker, which then never becomes active.
    pub fn attach(names: &ResourceNames, slot: usize) -> Result<Self, WorkerError> {
        let queue = TaskQueue::open(&names.queue).map_err(WorkerError::attach("task queue"))?;
        let stats =
            SharedStats::open(&names.stats).map_err(WorkerError::attach("statistics region"))?;
        let semaphore = Semaphore::open(&names.semaphore)
            .map_err(|e| WorkerError::attach("admission semaphore")(IpcError::from(e)))?;

        if slot >= stats.slot_count() {
            return Err(WorkerError::attach("statistics region")(
                IpcError::SlotOutOfRange {
                    slot,
                    pool_size: stats.slot_count(),
                },
            ));
        }

        tracing::debug!(slot, prefix = %names.prefix, "Attached to shared resources");
        Ok(Self {
            queue,
            stats,
            semaphore,
        })
    }
}
