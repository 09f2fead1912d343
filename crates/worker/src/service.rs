use crate::context::WorkerContext;
use crate::errors::WorkerError;
use crate::fan_out::{FanOutReport, fan_out};
use crate::settings::WorkerSettings;
use common::span;
use ipc::{LogSender, TaskMessage};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(10);

struct WorkerMetrics {
    tasks: Counter<u64>,
    duration: Histogram<f64>,
    filter_failures: Counter<u64>,
}

impl WorkerMetrics {
    fn new() -> Self {
        let meter = global::meter("worker");
        let latency_buckets = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
        Self {
            tasks: meter
                .u64_counter("worker_tasks_total")
                .with_description("Tasks finished, by outcome")
                .build(),
            duration: meter
                .f64_histogram("worker_task_duration_seconds")
                .with_description("Time from task receipt to fan-out join")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            filter_failures: meter
                .u64_counter("worker_filter_failures_total")
                .with_description("Individual filter invocations that failed")
                .build(),
        }
    }
}

/// Tasks this worker finished before draining.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: u64,
    pub failed: u64,
}

pub struct WorkerService<W: Write> {
    settings: WorkerSettings,
    context: WorkerContext,
    log: LogSender<W>,
    metrics: WorkerMetrics,
}

impl<W: Write> WorkerService<W> {
    pub fn new(settings: WorkerSettings, context: WorkerContext, log: LogSender<W>) -> Self {
        Self {
            settings,
            context,
            log,
            metrics: WorkerMetrics::new(),
        }
    }

    /// Consume tasks until a terminate message arrives.
    pub fn run(&mut self) -> Result<WorkerSummary, WorkerError> {
        let slot = self.settings.slot;
        let _s = span!("worker", slot);

        self.context.stats.mark_worker_active()?;
        self.context.stats.set_current_file(slot, None)?;
        self.log.send(&format!("started (pid {})", std::process::id()));
        tracing::info!(slot, "Worker active");

        let mut summary = WorkerSummary::default();
        loop {
            let message = match self.context.queue.receive() {
                Ok(message) => message,
                Err(e) => {
                    if e.is_transient() {
                        tracing::debug!(slot, error = %e, "Receive interrupted, polling again");
                    } else {
                        tracing::warn!(slot, error = %e, "Receive failed, polling again");
                    }
                    thread::sleep(RECEIVE_RETRY_DELAY);
                    continue;
                }
            };

            if message.is_terminate() {
                break;
            }

            if self.process_task(&message)? {
                summary.processed += 1;
            } else {
                summary.failed += 1;
            }
        }

        self.context.stats.set_current_file(slot, None)?;
        self.log.send(&format!(
            "finished: {} processed, {} failed",
            summary.processed, summary.failed
        ));
        tracing::info!(
            slot,
            processed = summary.processed,
            failed = summary.failed,
            "Worker draining"
        );
        self.context.stats.mark_worker_done()?;

        Ok(summary)
    }

    /// Run one task to completion and report it. Returns whether it succeeded.
    ///
    /// Only failures of the statistics region itself are returned as errors;
    /// everything that goes wrong with the image counts as a failed task.
    fn process_task(&mut self, message: &TaskMessage) -> Result<bool, WorkerError> {
        let slot = self.settings.slot;
        let _s = span!("task", sequence = message.sequence, file = %message.filename);
        let start = Instant::now();

        self.context
            .stats
            .set_current_file(slot, Some(&message.filename))?;

        let outcome = self.execute(&message.filename);
        let elapsed = start.elapsed();
        let success = outcome.is_ok();

        self.context.stats.record_completion(success, elapsed)?;
        self.context.stats.set_current_file(slot, None)?;

        let label = if success { "processed" } else { "failed" };
        self.metrics.tasks.add(1, &[KeyValue::new("outcome", label)]);
        self.metrics.duration.record(elapsed.as_secs_f64(), &[]);

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    file = %message.filename,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Task processed"
                );
                self.log.send(&format!(
                    "processed {} in {:.3}s",
                    message.filename,
                    elapsed.as_secs_f64()
                ));
            }
            Err(e) => {
                tracing::warn!(file = %message.filename, error = %e, "Task failed");
                self.log.send(&format!("failed {}: {}", message.filename, e));
            }
        }

        Ok(success)
    }

    fn execute(&self, filename: &str) -> Result<(), WorkerError> {
        let input = self.settings.input_dir.join(filename);

        let image = {
            // The permit is returned on every path out of this block
            let _permit = self.context.semaphore.permit()?;
            filters::decode(&input)?
        };

        let report = fan_out(
            &image,
            filename,
            &self.settings.filters,
            &self.settings.output_dir,
            self.settings.format,
        );
        self.record_filter_failures(&report);

        if report.all_succeeded() {
            Ok(())
        } else {
            Err(WorkerError::FanOut {
                failed: report.failure_count(),
                total: report.outcomes.len(),
            })
        }
    }

    fn record_filter_failures(&self, report: &FanOutReport) {
        for failure in report.failures() {
            self.metrics
                .filter_failures
                .add(1, &[KeyValue::new("filter", failure.kind.name())]);
            if let Err(e) = &failure.result {
                tracing::warn!(
                    filter = %failure.kind,
                    path = %failure.path.display(),
                    error = %e,
                    "Filter failed"
                );
            }
        }
    }

    pub fn into_log(self) -> LogSender<W> {
        self.log
    }
}
