//! Worker process pool.
//!
//! Each worker is a fresh process image started from the coordinator's own
//! executable, told which resources to attach to on its command line. Its
//! stdout is the log channel, drained by one forwarding thread per worker.

use crate::termination::TerminationReason;
use anyhow::Context;
use ipc::spawn_forwarder;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

/// How one worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub slot: usize,
    pub pid: u32,
    pub reason: TerminationReason,
}

struct WorkerHandle {
    slot: usize,
    child: Child,
    forwarder: Option<JoinHandle<usize>>,
    exit: Option<TerminationReason>,
}

impl WorkerHandle {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn record(&mut self, reason: TerminationReason) -> WorkerExit {
        self.exit = Some(reason);
        WorkerExit {
            slot: self.slot,
            pid: self.pid(),
            reason,
        }
    }

    fn join_forwarder(&mut self) {
        let Some(forwarder) = self.forwarder.take() else {
            return;
        };
        match forwarder.join() {
            Ok(lines) => tracing::debug!(slot = self.slot, lines, "Log channel drained"),
            Err(_) => tracing::warn!(slot = self.slot, "Log forwarder panicked"),
        }
    }
}

pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Start `pool_size` workers running `program` with per-slot arguments.
    ///
    /// If any worker fails to start, the ones already running are stopped
    /// and reaped before the error is returned.
    pub fn spawn<F>(program: &Path, pool_size: usize, args_for_slot: F) -> anyhow::Result<Self>
    where
        F: Fn(usize) -> anyhow::Result<Vec<OsString>>,
    {
        let mut pool = Self {
            workers: Vec::with_capacity(pool_size),
        };

        for slot in 0..pool_size {
            match Self::spawn_one(program, slot, &args_for_slot) {
                Ok(handle) => {
                    tracing::info!(slot, pid = handle.pid(), "Worker started");
                    pool.workers.push(handle);
                }
                Err(e) => {
                    tracing::error!(slot, error = %e, "Worker failed to start, stopping the pool");
                    pool.terminate_all();
                    pool.wait_all();
                    return Err(e);
                }
            }
        }

        Ok(pool)
    }

    fn spawn_one<F>(program: &Path, slot: usize, args_for_slot: &F) -> anyhow::Result<WorkerHandle>
    where
        F: Fn(usize) -> anyhow::Result<Vec<OsString>>,
    {
        let args = args_for_slot(slot)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn worker {slot} from {}", program.display()))?;

        let forwarder = match child.stdout.take().map(|out| spawn_forwarder(slot, out)) {
            Some(Ok(handle)) => Some(handle),
            Some(Err(e)) => {
                tracing::warn!(slot, error = %e, "Log forwarder unavailable");
                None
            }
            None => None,
        };

        Ok(WorkerHandle {
            slot,
            child,
            forwarder,
            exit: None,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Reap any worker that has exited since the last call, without blocking.
    pub fn poll_exits(&mut self) -> Vec<WorkerExit> {
        let mut exits = Vec::new();
        for worker in self.workers.iter_mut().filter(|w| w.exit.is_none()) {
            match worker.child.try_wait() {
                Ok(Some(status)) => {
                    exits.push(worker.record(TerminationReason::from_status(status)));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(slot = worker.slot, error = %e, "Failed to poll worker");
                }
            }
        }
        exits
    }

    pub fn all_exited(&self) -> bool {
        self.workers.iter().all(|w| w.exit.is_some())
    }

    /// Send SIGTERM to every worker not yet reaped.
    pub fn terminate_all(&self) {
        for worker in self.workers.iter().filter(|w| w.exit.is_none()) {
            let pid = Pid::from_raw(worker.pid() as i32);
            match signal::kill(pid, Signal::SIGTERM) {
                Ok(()) => tracing::debug!(slot = worker.slot, pid = worker.pid(), "Sent SIGTERM"),
                // Already gone, reaped below
                Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(slot = worker.slot, error = %e, "Failed to signal worker"),
            }
        }
    }

    /// Block until every worker has exited and its log channel is drained.
    ///
    /// Returns the exits not already reported by [`poll_exits`].
    ///
    /// [`poll_exits`]: WorkerPool::poll_exits
    pub fn wait_all(&mut self) -> Vec<WorkerExit> {
        let mut exits = Vec::new();
        for worker in &mut self.workers {
            if worker.exit.is_none() {
                let reason = match worker.child.wait() {
                    Ok(status) => TerminationReason::from_status(status),
                    Err(e) => {
                        tracing::error!(slot = worker.slot, error = %e, "Failed to wait for worker");
                        TerminationReason::Unknown
                    }
                };
                exits.push(worker.record(reason));
            }
            worker.join_forwarder();
        }
        exits
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in self.workers.iter_mut().filter(|w| w.exit.is_none()) {
            let _ = worker.child.kill();
            let _ = worker.child.wait();
            worker.exit = Some(TerminationReason::Unknown);
        }
    }
}
