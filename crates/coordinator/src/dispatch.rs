use anyhow::Context;
use ipc::{IpcError, TaskMessage, TaskQueue};
use std::thread;
use std::time::Duration;

/// Outcome of publishing a batch onto the task queue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Task messages accepted by the queue.
    pub sent: u64,
    /// Jobs whose send failed. Counted as neither processed nor failed.
    pub dropped: Vec<String>,
    /// Jobs never attempted because dispatch was abandoned.
    pub unsent: Vec<String>,
    /// Terminate messages accepted by the queue.
    pub terminates: usize,
}

impl DispatchReport {
    pub fn abandoned(&self) -> bool {
        !self.unsent.is_empty()
    }
}

enum SendOutcome {
    Sent,
    Abandoned,
    Failed(IpcError),
}

/// Publish one task per job, in order, then one terminate per worker.
///
/// The queue is switched to non-blocking mode. While it is full the producer
/// sleeps `poll_interval` and asks `keep_waiting` whether to carry on, which
/// lets the caller refresh progress and observe an interrupt or a dead pool.
/// Once abandoned, no further tasks or terminates are sent.
pub fn dispatch_jobs<F>(
    queue: &TaskQueue,
    jobs: &[String],
    pool_size: usize,
    poll_interval: Duration,
    mut keep_waiting: F,
) -> anyhow::Result<DispatchReport>
where
    F: FnMut() -> bool,
{
    queue
        .set_nonblocking(true)
        .context("Failed to switch the task queue to non-blocking mode")?;

    let mut report = DispatchReport::default();

    for (sequence, job) in jobs.iter().enumerate() {
        let message = TaskMessage::task(job, sequence as u64);
        match send_with_retry(queue, &message, poll_interval, &mut keep_waiting) {
            SendOutcome::Sent => {
                tracing::debug!(sequence, file = %job, "Task dispatched");
                report.sent += 1;
            }
            SendOutcome::Failed(e) => {
                tracing::error!(sequence, file = %job, error = %e, "Failed to dispatch task, dropping it");
                report.dropped.push(job.clone());
            }
            SendOutcome::Abandoned => {
                report.unsent = jobs[sequence..].to_vec();
                tracing::warn!(unsent = report.unsent.len(), "Dispatch abandoned");
                return Ok(report);
            }
        }
    }

    let terminate = TaskMessage::terminate();
    for _ in 0..pool_size {
        match send_with_retry(queue, &terminate, poll_interval, &mut keep_waiting) {
            SendOutcome::Sent => report.terminates += 1,
            SendOutcome::Abandoned => break,
            // A worker left without a terminate would block forever
            SendOutcome::Failed(e) => {
                return Err(e).context("Failed to send terminate message");
            }
        }
    }

    tracing::info!(
        sent = report.sent,
        dropped = report.dropped.len(),
        terminates = report.terminates,
        "Dispatch finished"
    );
    Ok(report)
}

fn send_with_retry<F>(
    queue: &TaskQueue,
    message: &TaskMessage,
    poll_interval: Duration,
    keep_waiting: &mut F,
) -> SendOutcome
where
    F: FnMut() -> bool,
{
    loop {
        match queue.send(message) {
            Ok(()) => return SendOutcome::Sent,
            Err(IpcError::WouldBlock) => {
                thread::sleep(poll_interval);
                if !keep_waiting() {
                    return SendOutcome::Abandoned;
                }
            }
            Err(e) => return SendOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_queue(capacity: usize) -> TaskQueue {
        let name = format!(
            "/imgpool_dispatch_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        TaskQueue::create(&name, capacity).unwrap()
    }

    fn jobs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tasks_then_one_terminate_per_worker() {
        let queue = unique_queue(10);
        let jobs = jobs(&["a.png", "b.png", "c.png"]);

        let report =
            dispatch_jobs(&queue, &jobs, 2, Duration::from_millis(1), || true).unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.terminates, 2);
        assert!(!report.abandoned());

        for (seq, job) in jobs.iter().enumerate() {
            let msg = queue.receive().unwrap();
            assert_eq!(msg, TaskMessage::task(job, seq as u64));
        }
        assert!(queue.receive().unwrap().is_terminate());
        assert!(queue.receive().unwrap().is_terminate());
        assert!(matches!(queue.receive(), Err(IpcError::WouldBlock)));

        queue.destroy().unwrap();
    }

    #[test]
    fn test_full_queue_waits_then_abandons() {
        let queue = unique_queue(2);
        let jobs = jobs(&["a.png", "b.png", "c.png", "d.png"]);

        let mut waits = 0;
        let report = dispatch_jobs(&queue, &jobs, 1, Duration::from_millis(1), || {
            waits += 1;
            waits < 3
        })
        .unwrap();

        assert_eq!(waits, 3);
        assert_eq!(report.sent, 2);
        assert_eq!(report.unsent, vec!["c.png", "d.png"]);
        assert_eq!(report.terminates, 0);
        assert_eq!(queue.pending().unwrap(), 2);

        queue.destroy().unwrap();
    }

    #[test]
    fn test_full_queue_resumes_when_drained() {
        let queue = unique_queue(1);
        let jobs = jobs(&["a.png", "b.png"]);

        let mut received = Vec::new();
        let report = dispatch_jobs(&queue, &jobs, 1, Duration::from_millis(1), || {
            // Stand in for a worker consuming while the producer waits
            received.push(queue.receive().unwrap());
            true
        })
        .unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.terminates, 1);
        received.push(queue.receive().unwrap());
        assert_eq!(received.len(), 3);
        assert!(received[2].is_terminate());

        queue.destroy().unwrap();
    }
}
