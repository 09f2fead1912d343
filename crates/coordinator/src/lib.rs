pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod jobs;
pub mod monitor;
pub mod pool;
pub mod resources;
pub mod summary;
pub mod termination;

pub use cli::{Cli, Command, RunArgs, WorkerArgs};
pub use config::PipelineConfig;
pub use coordinator::{Coordinator, RunOutcome};
pub use dispatch::{DispatchReport, dispatch_jobs};
pub use jobs::{scan_jobs, shared_stems};
pub use monitor::{MonitorEnd, ProgressMonitor, monitor};
pub use pool::{WorkerExit, WorkerPool};
pub use resources::SharedResources;
pub use summary::RunSummary;
pub use termination::TerminationReason;
