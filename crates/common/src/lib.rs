pub mod config;
pub mod logging;
pub mod observability;
pub mod telemetry;

pub use config::Environment;
pub use logging::setup_logging;
pub use observability::Observability;
pub use telemetry::TelemetryGuard;
