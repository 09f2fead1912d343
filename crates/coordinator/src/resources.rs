use anyhow::Context;
use ipc::{InstanceLock, ResourceNames, Semaphore, SharedStats, TaskQueue};

/// The three named IPC resources of one run, owned by the coordinator.
///
/// Created fresh (stale same-named resources are replaced) while holding the
/// instance lock, and destroyed exactly once through [`destroy`].
///
/// [`destroy`]: SharedResources::destroy
pub struct SharedResources {
    names: ResourceNames,
    pub queue: TaskQueue,
    pub stats: SharedStats,
    pub semaphore: Semaphore,
    _lock: InstanceLock,
}

impl SharedResources {
    pub fn create(
        names: &ResourceNames,
        pool_size: usize,
        queue_capacity: usize,
        io_permits: u32,
    ) -> anyhow::Result<Self> {
        let lock = InstanceLock::acquire(names.lock_path())
            .context("Failed to take the instance lock")?;

        let queue = TaskQueue::create(&names.queue, queue_capacity)
            .with_context(|| format!("Failed to create task queue {}", names.queue))?;

        let stats = match SharedStats::create(&names.stats, pool_size) {
            Ok(stats) => stats,
            Err(e) => {
                discard(queue.destroy(), &names.queue);
                return Err(e)
                    .with_context(|| format!("Failed to create statistics region {}", names.stats));
            }
        };

        let semaphore = match Semaphore::create(&names.semaphore, io_permits) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                discard(queue.destroy(), &names.queue);
                discard(stats.destroy(), &names.stats);
                return Err(e)
                    .with_context(|| format!("Failed to create semaphore {}", names.semaphore));
            }
        };

        tracing::info!(
            queue = %names.queue,
            stats = %names.stats,
            semaphore = %names.semaphore,
            pool_size,
            queue_capacity,
            io_permits,
            "Shared resources created"
        );

        Ok(Self {
            names: names.clone(),
            queue,
            stats,
            semaphore,
            _lock: lock,
        })
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Close and unlink every resource. Failures are logged, not returned,
    /// so one stuck resource does not leak the others.
    pub fn destroy(self) {
        let Self {
            names,
            queue,
            stats,
            semaphore,
            _lock,
        } = self;

        discard(queue.destroy(), &names.queue);
        discard(stats.destroy(), &names.stats);
        discard(semaphore.destroy(), &names.semaphore);

        tracing::info!(prefix = %names.prefix, "Shared resources destroyed");
    }
}

fn discard<E: std::fmt::Display>(result: Result<(), E>, name: &str) {
    if let Err(e) = result {
        tracing::error!(resource = name, error = %e, "Failed to destroy shared resource");
    }
}
