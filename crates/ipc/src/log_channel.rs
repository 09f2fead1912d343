//! Worker-to-coordinator progress lines.
//!
//! A worker writes `[worker N] message` lines to its stdout, which the
//! coordinator holds as the read end of a pipe.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::thread::{self, JoinHandle};

/// Tracing target used when the coordinator re-emits worker lines.
pub const FORWARD_TARGET: &str = "worker_log";

pub struct LogSender<W: Write> {
    slot: usize,
    out: W,
}

impl LogSender<io::Stdout> {
    pub fn stdout(slot: usize) -> Self {
        Self::new(slot, io::stdout())
    }
}

impl<W: Write> LogSender<W> {
    pub fn new(slot: usize, out: W) -> Self {
        Self { slot, out }
    }

    /// Write one line. A broken channel never fails the caller.
    pub fn send(&mut self, message: &str) {
        let result = writeln!(self.out, "[worker {}] {}", self.slot, message)
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            tracing::debug!(slot = self.slot, error = %e, "Log channel write failed");
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Forward lines from a worker's pipe into tracing until EOF.
///
/// The thread returns how many lines it forwarded.
pub fn spawn_forwarder<R>(slot: usize, reader: R) -> io::Result<JoinHandle<usize>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("worker-log-{slot}"))
        .spawn(move || forward_lines(slot, reader))
}

fn forward_lines<R: Read>(slot: usize, reader: R) -> usize {
    let mut forwarded = 0;
    for line in BufReader::new(reader).lines() {
        match line {
            Ok(line) => {
                tracing::debug!(target: FORWARD_TARGET, slot, "{}", line);
                forwarded += 1;
            }
            Err(e) => {
                tracing::debug!(slot, error = %e, "Worker log channel closed with error");
                break;
            }
        }
    }
    forwarded
}
