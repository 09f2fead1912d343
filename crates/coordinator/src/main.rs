use anyhow::Context;
use clap::Parser;
use common::{Environment, Observability, setup_logging};
use coordinator::{Cli, Command, Coordinator, PipelineConfig, RunArgs, RunOutcome};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use worker::run_worker_main;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Worker(args)) = cli.command {
        let settings = match args.into_settings() {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Error: invalid worker arguments: {:#}", e);
                return ExitCode::from(worker::EXIT_ATTACH_FAILED as u8);
            }
        };
        return ExitCode::from(run_worker_main(settings) as u8);
    }

    let environment = Environment::from_env();
    let _observability = match Observability::init("imgpool", environment.clone()) {
        Ok(observability) => Some(observability),
        Err(e) => {
            setup_logging(environment);
            tracing::warn!(error = %e, "Telemetry unavailable, logging only");
            None
        }
    };

    match run(&cli.run) {
        Ok(RunOutcome::Completed(summary)) => {
            summary.print();
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Interrupted) => {
            eprintln!("Interrupted");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &RunArgs) -> anyhow::Result<RunOutcome> {
    let config = PipelineConfig::load(args)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown)).context("Failed to register SIGTERM")?;
    flag::register(SIGINT, Arc::clone(&shutdown)).context("Failed to register SIGINT")?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    tracing::info!(
        input = %config.input_dir.display(),
        output = %config.output_dir.display(),
        workers = config.pool_size,
        filters = %config.filters,
        format = %config.format,
        prefix = %config.ipc_prefix,
        environment = config.environment.as_str(),
        "Starting image pool"
    );

    Coordinator::new(config, shutdown)?.run()
}
