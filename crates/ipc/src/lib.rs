pub mod errors;
pub mod lock;
pub mod log_channel;
pub mod names;
pub mod semaphore;
pub mod stats_region;
pub mod task_queue;

pub use errors::IpcError;
pub use lock::InstanceLock;
pub use log_channel::{FORWARD_TARGET, LogSender, spawn_forwarder};
pub use names::{DEFAULT_PREFIX, DEFAULT_QUEUE_CAPACITY, MAX_FILENAME, ResourceNames};
pub use semaphore::{Permit, Semaphore, SemaphoreError};
pub use stats_region::{IDLE_MARKER, SharedStats, StatsCounters, StatsGuard, StatsSnapshot};
pub use task_queue::{MESSAGE_SIZE, MessageKind, TaskMessage, TaskQueue};
