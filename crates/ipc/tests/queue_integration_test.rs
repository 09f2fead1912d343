use ipc::{IpcError, MessageKind, TaskMessage, TaskQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    format!(
        "/imgpool_it_queue_{}_{}_{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Messages arrive in the order they were sent.
#[test]
fn test_fifo_delivery() {
    let name = unique_name("fifo");
    let queue = TaskQueue::create(&name, 8).unwrap();

    for (seq, file) in ["a.png", "b.png", "c.png"].iter().enumerate() {
        queue.send(&TaskMessage::task(file, seq as u64)).unwrap();
    }
    queue.send_terminate().unwrap();
    assert_eq!(queue.pending().unwrap(), 4);

    let consumer = TaskQueue::open(&name).unwrap();
    assert_eq!(consumer.capacity(), 8);

    let received: Vec<_> = (0..4).map(|_| consumer.receive().unwrap()).collect();
    assert_eq!(received[0].filename, "a.png");
    assert_eq!(received[1].filename, "b.png");
    assert_eq!(received[2].filename, "c.png");
    assert_eq!(received[3].kind, MessageKind::Terminate);

    drop(consumer);
    queue.destroy().unwrap();
    assert!(TaskQueue::open(&name).is_err(), "Name removed on destroy");
}

/// A full non-blocking queue reports WouldBlock instead of stalling.
#[test]
fn test_nonblocking_send_on_full_queue() {
    let name = unique_name("full");
    let queue = TaskQueue::create(&name, 2).unwrap();
    queue.set_nonblocking(true).unwrap();

    queue.send(&TaskMessage::task("one.png", 0)).unwrap();
    queue.send(&TaskMessage::task("two.png", 1)).unwrap();
    let err = queue.send(&TaskMessage::task("three.png", 2)).unwrap_err();
    assert!(matches!(err, IpcError::WouldBlock));
    assert!(err.is_transient());

    queue.receive().unwrap();
    queue.send(&TaskMessage::task("three.png", 2)).unwrap();

    queue.destroy().unwrap();
}

/// Each message reaches exactly one of several competing consumers, and each
/// consumer drains after exactly one terminate message.
#[test]
fn test_competing_consumers_each_drain_once() {
    let name = unique_name("compete");
    let queue = TaskQueue::create(&name, 10).unwrap();
    let consumers = 3;
    let tasks = 30u64;

    let handles: Vec<_> = (0..consumers)
        .map(|_| {
            let name = name.clone();
            thread::spawn(move || {
                let handle = TaskQueue::open(&name).unwrap();
                let mut seen = Vec::new();
                loop {
                    let msg = handle.receive().unwrap();
                    if msg.is_terminate() {
                        return seen;
                    }
                    seen.push(msg.sequence);
                }
            })
        })
        .collect();

    for seq in 0..tasks {
        queue
            .send(&TaskMessage::task(&format!("{seq}.png"), seq))
            .unwrap();
    }
    for _ in 0..consumers {
        queue.send_terminate().unwrap();
    }

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..tasks).collect::<Vec<_>>(), "No loss, no duplicates");
    assert_eq!(queue.pending().unwrap(), 0);

    queue.destroy().unwrap();
}

/// With fewer terminate messages than consumers, the under-served consumer
/// stays blocked in receive.
#[test]
fn test_missing_terminate_leaves_consumer_blocked() {
    let name = unique_name("hazard");
    let queue = TaskQueue::create(&name, 4).unwrap();
    let (done_tx, done_rx) = mpsc::channel();

    for _ in 0..2 {
        let name = name.clone();
        let done_tx = done_tx.clone();
        // Detached: the blocked consumer is never joined.
        thread::spawn(move || {
            let handle = TaskQueue::open(&name).unwrap();
            while let Ok(msg) = handle.receive() {
                if msg.is_terminate() {
                    let _ = done_tx.send(());
                    return;
                }
            }
        });
    }

    queue.send_terminate().unwrap();

    assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    assert!(
        done_rx.recv_timeout(Duration::from_millis(300)).is_err(),
        "Second consumer must still be waiting for its terminate message"
    );

    // Unblock the straggler before removing the name.
    queue.send_terminate().unwrap();
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    queue.destroy().unwrap();
}

#[test]
fn test_create_replaces_stale_queue() {
    let name = unique_name("stale");
    let stale = TaskQueue::create(&name, 3).unwrap();
    stale.send(&TaskMessage::task("leftover.png", 0)).unwrap();
    drop(stale);

    let fresh = TaskQueue::create(&name, 3).unwrap();
    assert_eq!(fresh.pending().unwrap(), 0, "Stale messages must not leak");
    fresh.destroy().unwrap();
}
