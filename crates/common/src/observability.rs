use crate::{Environment, TelemetryGuard, config::otel_endpoint_from_env, setup_logging};
use anyhow::Context;

/// Logging (and, when `OTEL_ENDPOINT` is set, OTLP export) for one process.
///
/// The OTLP exporters need a Tokio runtime for their whole lifetime, so the
/// runtime is owned here and outlives the guard.
pub struct Observability {
    telemetry: Option<TelemetryGuard>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl Observability {
    pub fn init(service_name: &str, environment: Environment) -> anyhow::Result<Self> {
        let Some(endpoint) = otel_endpoint_from_env() else {
            setup_logging(environment);
            return Ok(Self {
                telemetry: None,
                runtime: None,
            });
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("Failed to create Tokio runtime for telemetry")?;
        let guard =
            runtime.block_on(async { TelemetryGuard::init(service_name, &endpoint, environment) })?;

        tracing::info!(endpoint = %endpoint, service_name, "Telemetry export enabled");

        Ok(Self {
            telemetry: Some(guard),
            runtime: Some(runtime),
        })
    }

    pub fn exporting(&self) -> bool {
        self.telemetry.is_some()
    }
}

impl Drop for Observability {
    fn drop(&mut self) {
        if let Some(runtime) = &self.runtime {
            let _enter = runtime.enter();
            self.telemetry.take();
        }
    }
}
