use crate::config::PipelineConfig;
use crate::dispatch::{DispatchReport, dispatch_jobs};
use crate::jobs::scan_jobs;
use crate::monitor::{MonitorEnd, ProgressMonitor, monitor, record_exits};
use crate::pool::{WorkerExit, WorkerPool};
use crate::resources::SharedResources;
use crate::summary::RunSummary;
use anyhow::Context;
use common::span;
use opentelemetry::{global, metrics::Counter};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

struct CoordinatorMetrics {
    dispatch_dropped: Counter<u64>,
    abnormal_exits: Counter<u64>,
}

impl CoordinatorMetrics {
    fn new() -> Self {
        let meter = global::meter("coordinator");
        Self {
            dispatch_dropped: meter
                .u64_counter("coordinator_dispatch_dropped_total")
                .with_description("Jobs dropped because their task message could not be sent")
                .build(),
            abnormal_exits: meter
                .u64_counter("coordinator_worker_abnormal_exits_total")
                .with_description("Worker processes that did not exit cleanly")
                .build(),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Stopped by the operator. Workers were terminated and resources removed.
    Interrupted,
}

/// Owns everything one run needs. Constructed once at startup.
pub struct Coordinator {
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
    worker_program: PathBuf,
    metrics: CoordinatorMetrics,
}

impl Coordinator {
    /// Workers are started from the running executable.
    pub fn new(config: PipelineConfig, shutdown: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let worker_program = env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self::with_worker_program(config, shutdown, worker_program))
    }

    pub fn with_worker_program(
        config: PipelineConfig,
        shutdown: Arc<AtomicBool>,
        worker_program: PathBuf,
    ) -> Self {
        Self {
            config,
            shutdown,
            worker_program,
            metrics: CoordinatorMetrics::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> anyhow::Result<RunOutcome> {
        let started = Instant::now();
        let config = &self.config;
        let _s = span!("run", pool_size = config.pool_size);

        let names = config.resource_names()?;
        let resources = SharedResources::create(
            &names,
            config.pool_size,
            config.queue_capacity,
            config.io_permits(),
        )?;

        let result = match scan_jobs(&config.input_dir) {
            Ok(jobs) if jobs.is_empty() => Err(anyhow::anyhow!(
                "No input images found in {}",
                config.input_dir.display()
            )),
            Ok(jobs) => {
                tracing::info!(
                    jobs = jobs.len(),
                    input = %config.input_dir.display(),
                    "Input scanned"
                );
                self.run_batch(&resources, &jobs, started)
            }
            Err(e) => Err(e),
        };

        resources.destroy();
        result
    }

    fn run_batch(
        &self,
        resources: &SharedResources,
        jobs: &[String],
        started: Instant,
    ) -> anyhow::Result<RunOutcome> {
        let config = &self.config;

        resources
            .stats
            .set_total(jobs.len() as u64)
            .context("Failed to initialize statistics")?;
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.output_dir.display()
            )
        })?;

        let mut pool = WorkerPool::spawn(&self.worker_program, config.pool_size, |slot| {
            Ok(config.worker_settings(slot)?.to_args())
        })?;
        let progress = ProgressMonitor::new(jobs.len() as u64);
        let mut exits = Vec::new();

        let supervised = self.supervise(resources, &mut pool, &progress, jobs, &mut exits);
        let stop_workers = match &supervised {
            Ok((end, _)) => *end == MonitorEnd::Interrupted,
            Err(_) => true,
        };
        if stop_workers {
            pool.terminate_all();
        }
        record_exits(pool.wait_all(), &mut exits);
        progress.finish();

        let (end, dispatch) = supervised?;
        let abnormal_exits: Vec<WorkerExit> = exits
            .into_iter()
            .filter(|exit| exit.reason.is_abnormal())
            .collect();
        self.metrics
            .abnormal_exits
            .add(abnormal_exits.len() as u64, &[]);

        if end == MonitorEnd::Interrupted {
            tracing::warn!("Interrupted, workers stopped");
            return Ok(RunOutcome::Interrupted);
        }

        let snapshot = resources.stats.snapshot()?;
        let summary = RunSummary {
            counters: snapshot.counters,
            dropped: dispatch.dropped,
            undispatched: dispatch.unsent.len(),
            wall_clock: started.elapsed(),
            output_dir: config.output_dir.clone(),
            abnormal_exits,
        };
        if !summary.fully_accounted() {
            tracing::warn!(
                total = summary.counters.total,
                completed = summary.counters.completed(),
                "Some jobs were never completed"
            );
        }
        Ok(RunOutcome::Completed(summary))
    }

    /// Dispatch, then monitor. Returns before any worker is reaped.
    fn supervise(
        &self,
        resources: &SharedResources,
        pool: &mut WorkerPool,
        progress: &ProgressMonitor,
        jobs: &[String],
        exits: &mut Vec<WorkerExit>,
    ) -> anyhow::Result<(MonitorEnd, DispatchReport)> {
        let poll_interval = self.config.poll_interval();

        let dispatch = dispatch_jobs(
            &resources.queue,
            jobs,
            self.config.pool_size,
            poll_interval,
            || {
                if self.shutdown.load(Ordering::SeqCst) {
                    return false;
                }
                record_exits(pool.poll_exits(), exits);
                if pool.all_exited() {
                    return false;
                }
                if let Ok(snapshot) = resources.stats.snapshot() {
                    progress.refresh(&snapshot);
                }
                true
            },
        )?;

        if !dispatch.dropped.is_empty() {
            self.metrics
                .dispatch_dropped
                .add(dispatch.dropped.len() as u64, &[]);
        }

        if self.shutdown.load(Ordering::SeqCst) {
            return Ok((MonitorEnd::Interrupted, dispatch));
        }
        if dispatch.abandoned() {
            tracing::error!(
                unsent = dispatch.unsent.len(),
                "Every worker exited before dispatch finished"
            );
        }

        let end = monitor(
            &resources.stats,
            pool,
            progress,
            &self.shutdown,
            poll_interval,
            exits,
        )?;
        Ok((end, dispatch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(input: &TempDir, output: PathBuf, tag: &str) -> PipelineConfig {
        let mut config = PipelineConfig::test_default();
        config.input_dir = input.path().to_path_buf();
        config.output_dir = output;
        config.ipc_prefix = format!("/imgpool_coord_{}_{}", tag, std::process::id());
        config
    }

    #[test]
    fn test_empty_input_fails_before_touching_output() {
        let input = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let output = scratch.path().join("out");
        let config = config_for(&input, output.clone(), "empty");
        let names = config.resource_names().unwrap();

        // A worker program that must never run
        let coordinator = Coordinator::with_worker_program(
            config,
            Arc::new(AtomicBool::new(false)),
            PathBuf::from("/nonexistent/imgpool"),
        );
        let err = coordinator.run().unwrap_err();

        assert!(err.to_string().contains("No input images"));
        assert!(!output.exists());
        assert!(ipc::TaskQueue::open(&names.queue).is_err(), "Resources torn down");
    }

    #[test]
    fn test_missing_input_directory_is_a_setup_error() {
        let input = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let mut config = config_for(&input, scratch.path().join("out"), "missing");
        config.input_dir = input.path().join("absent");

        let coordinator = Coordinator::with_worker_program(
            config,
            Arc::new(AtomicBool::new(false)),
            PathBuf::from("/nonexistent/imgpool"),
        );
        assert!(coordinator.run().is_err());
    }

    #[test]
    fn test_spawn_failure_tears_down_resources() {
        let input = TempDir::new().unwrap();
        fs::write(input.path().join("a.png"), b"x").unwrap();
        let scratch = TempDir::new().unwrap();
        let config = config_for(&input, scratch.path().join("out"), "spawn");
        let names = config.resource_names().unwrap();

        let coordinator = Coordinator::with_worker_program(
            config,
            Arc::new(AtomicBool::new(false)),
            PathBuf::from("/nonexistent/imgpool"),
        );
        assert!(coordinator.run().is_err());
        assert!(ipc::TaskQueue::open(&names.queue).is_err());
        assert!(ipc::SharedStats::open(&names.stats).is_err());
    }
}
