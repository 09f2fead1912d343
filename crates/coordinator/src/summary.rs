use crate::pool::WorkerExit;
use ipc::StatsCounters;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Final aggregate of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub counters: StatsCounters,
    /// Jobs whose dispatch failed.
    pub dropped: Vec<String>,
    /// Jobs never dispatched because the pool died first.
    pub undispatched: usize,
    pub wall_clock: Duration,
    pub output_dir: PathBuf,
    pub abnormal_exits: Vec<WorkerExit>,
}

impl RunSummary {
    /// Every job was either processed or recorded as failed.
    pub fn fully_accounted(&self) -> bool {
        self.counters.completed() == self.counters.total
    }

    pub fn print(&self) {
        println!("{self}");
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f)?;
        writeln!(f, "Run complete")?;
        writeln!(f, "{}", "-".repeat(40))?;
        writeln!(f, "  total: {}", c.total)?;
        writeln!(f, "  processed: {}", c.processed)?;
        writeln!(f, "  failed: {}", c.failed)?;
        writeln!(f, "  dropped: {}", self.dropped.len())?;
        if self.undispatched > 0 {
            writeln!(f, "  undispatched: {}", self.undispatched)?;
        }
        writeln!(f, "  task time: {:.3}s", c.total_processing_secs)?;
        writeln!(f, "  average task time: {:.3}s", c.average_secs())?;
        writeln!(f, "  wall clock: {:.3}s", self.wall_clock.as_secs_f64())?;
        write!(f, "  output directory: {}", self.output_dir.display())?;
        for exit in &self.abnormal_exits {
            write!(
                f,
                "\n  abnormal exit: worker {} (pid {}) {}",
                exit.slot, exit.pid, exit.reason
            )?;
        }
        Ok(())
    }
}
