pub mod context;
pub mod errors;
pub mod fan_out;
pub mod service;
pub mod settings;

use common::{Environment, Observability, setup_logging};
use ipc::LogSender;

pub use context::WorkerContext;
pub use errors::WorkerError;
pub use fan_out::{FanOutReport, FilterOutcome, fan_out};
pub use service::{WorkerService, WorkerSummary};
pub use settings::{WORKER_SUBCOMMAND, WorkerSettings};

/// Normal drain after a terminate message.
pub const EXIT_OK: i32 = 0;
/// A shared resource could not be opened at startup.
pub const EXIT_ATTACH_FAILED: i32 = 2;
/// The statistics region failed mid-run.
pub const EXIT_RUNTIME_FAILURE: i32 = 3;

/// Entry point of a worker process. Returns the process exit code.
pub fn run_worker_main(settings: WorkerSettings) -> i32 {
    let environment = Environment::from_env();
    let _observability = match Observability::init("imgpool-worker", environment.clone()) {
        Ok(observability) => Some(observability),
        Err(e) => {
            setup_logging(environment);
            tracing::warn!(error = %e, "Telemetry unavailable, logging only");
            None
        }
    };

    let slot = settings.slot;
    let context = match WorkerContext::attach(&settings.names, slot) {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(slot, error = %e, "Worker failed to start");
            return EXIT_ATTACH_FAILED;
        }
    };

    let mut service = WorkerService::new(settings, context, LogSender::stdout(slot));
    match service.run() {
        Ok(_) => EXIT_OK,
        Err(e) => {
            tracing::error!(slot, error = %e, "Worker stopped");
            EXIT_RUNTIME_FAILURE
        }
    }
}
