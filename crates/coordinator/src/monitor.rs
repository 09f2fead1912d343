//! Progress monitoring
//!
//! Blocks on the statistics region's condition variable, bounded by the poll
//! interval, and renders the cumulative counters with indicatif.

use crate::pool::{WorkerExit, WorkerPool};
use indicatif::{ProgressBar, ProgressStyle};
use ipc::{IDLE_MARKER, SharedStats, StatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Why monitoring stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEnd {
    /// Every worker marked itself done.
    Completed,
    /// The operator asked for shutdown.
    Interrupted,
    /// Every worker process is gone, some without draining.
    WorkersExited,
}

pub struct ProgressMonitor {
    bar: ProgressBar,
}

impl ProgressMonitor {
    pub fn new(total: u64) -> Self {
        Self::with_bar(ProgressBar::new(total))
    }

    pub fn hidden(total: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total);
        Self::with_bar(bar)
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    pub fn refresh(&self, snapshot: &StatsSnapshot) {
        let counters = &snapshot.counters;
        self.bar.set_position(counters.completed());

        let busy: Vec<&str> = snapshot
            .current_files
            .iter()
            .map(String::as_str)
            .filter(|file| *file != IDLE_MARKER)
            .collect();
        let mut msg = format!(
            "failed: {} | workers: {} active, {} done",
            counters.failed, counters.workers_active, counters.workers_done
        );
        if !busy.is_empty() {
            msg.push_str(" | ");
            msg.push_str(&busy.join(", "));
        }
        self.bar.set_message(msg);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Log exits as they are observed and keep them for the summary.
pub fn record_exits(observed: Vec<WorkerExit>, exits: &mut Vec<WorkerExit>) {
    for exit in observed {
        if exit.reason.is_abnormal() {
            tracing::error!(
                slot = exit.slot,
                pid = exit.pid,
                reason = %exit.reason,
                "Worker terminated abnormally"
            );
        } else {
            tracing::debug!(slot = exit.slot, pid = exit.pid, "Worker exited");
        }
        exits.push(exit);
    }
}

/// Follow the run until every worker is done, every worker process is gone,
/// or `shutdown` is raised.
///
/// The counters are cumulative: a refresh may skip intermediate states but
/// never loses an update.
pub fn monitor(
    stats: &SharedStats,
    pool: &mut WorkerPool,
    progress: &ProgressMonitor,
    shutdown: &AtomicBool,
    poll_interval: Duration,
    exits: &mut Vec<WorkerExit>,
) -> anyhow::Result<MonitorEnd> {
    let pool_size = pool.len();
    let mut snapshot = stats.snapshot()?;
    progress.refresh(&snapshot);

    loop {
        if snapshot.counters.workers_done as usize >= pool_size {
            return Ok(MonitorEnd::Completed);
        }
        if shutdown.load(Ordering::SeqCst) {
            return Ok(MonitorEnd::Interrupted);
        }

        record_exits(pool.poll_exits(), exits);
        if pool.all_exited() {
            // A worker may have marked itself done just before exiting
            snapshot = stats.snapshot()?;
            progress.refresh(&snapshot);
            if snapshot.counters.workers_done as usize >= pool_size {
                return Ok(MonitorEnd::Completed);
            }
            tracing::error!(
                done = snapshot.counters.workers_done,
                pool_size,
                "Every worker exited before the pool drained"
            );
            return Ok(MonitorEnd::WorkersExited);
        }

        snapshot = stats.wait_for_change(snapshot.counters.generation, poll_interval)?;
        progress.refresh(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_stats(pool_size: usize) -> SharedStats {
        let name = format!(
            "/imgpool_monitor_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        SharedStats::create(&name, pool_size).unwrap()
    }

    fn sleepers(count: usize) -> WorkerPool {
        WorkerPool::spawn(Path::new("/bin/sh"), count, |_| {
            Ok(vec![OsString::from("-c"), OsString::from("exec sleep 30")])
        })
        .unwrap()
    }

    #[test]
    fn test_completes_when_workers_mark_done() {
        let stats = unique_stats(2);
        stats.set_total(2).unwrap();
        let mut pool = sleepers(2);
        let progress = ProgressMonitor::hidden(2);
        let shutdown = AtomicBool::new(false);
        let mut exits = Vec::new();

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2 {
                    stats.mark_worker_active().unwrap();
                }
                for _ in 0..2 {
                    thread::sleep(Duration::from_millis(20));
                    stats.record_completion(true, Duration::from_millis(5)).unwrap();
                    stats.mark_worker_done().unwrap();
                }
            });

            let end = monitor(
                &stats,
                &mut pool,
                &progress,
                &shutdown,
                Duration::from_millis(50),
                &mut exits,
            )
            .unwrap();
            assert_eq!(end, MonitorEnd::Completed);
        });

        assert_eq!(progress.position(), 2);
        assert!(exits.is_empty());

        pool.terminate_all();
        pool.wait_all();
        stats.destroy().unwrap();
    }

    #[test]
    fn test_shutdown_flag_interrupts() {
        let stats = unique_stats(1);
        let mut pool = sleepers(1);
        let progress = ProgressMonitor::hidden(1);
        let shutdown = AtomicBool::new(true);
        let mut exits = Vec::new();

        let end = monitor(
            &stats,
            &mut pool,
            &progress,
            &shutdown,
            Duration::from_millis(10),
            &mut exits,
        )
        .unwrap();
        assert_eq!(end, MonitorEnd::Interrupted);

        pool.terminate_all();
        pool.wait_all();
        stats.destroy().unwrap();
    }

    #[test]
    fn test_dead_pool_does_not_hang_the_monitor() {
        let stats = unique_stats(2);
        stats.set_total(4).unwrap();
        let mut pool = WorkerPool::spawn(Path::new("/bin/sh"), 2, |_| {
            Ok(vec![OsString::from("-c"), OsString::from("kill -9 $$")])
        })
        .unwrap();
        let progress = ProgressMonitor::hidden(4);
        let shutdown = AtomicBool::new(false);
        let mut exits = Vec::new();

        let started = Instant::now();
        let end = monitor(
            &stats,
            &mut pool,
            &progress,
            &shutdown,
            Duration::from_millis(10),
            &mut exits,
        )
        .unwrap();

        assert_eq!(end, MonitorEnd::WorkersExited);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|e| e.reason.is_abnormal()));

        stats.destroy().unwrap();
    }
}
