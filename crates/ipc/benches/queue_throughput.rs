use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ipc::{SharedStats, TaskMessage, TaskQueue};
use std::time::Duration;

fn benchmark_queue_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_queue");
    let name = format!("/imgpool_bench_queue_{}", std::process::id());
    let queue = TaskQueue::create(&name, 10).unwrap();

    let filenames = [
        ("short", "a.png".to_string()),
        ("max", "x".repeat(ipc::MAX_FILENAME)),
    ];

    for (label, filename) in filenames.iter() {
        let msg = TaskMessage::task(filename, 1);
        group.bench_with_input(BenchmarkId::new("send_receive", label), &msg, |b, msg| {
            b.iter(|| {
                queue.send(black_box(msg)).unwrap();
                black_box(queue.receive().unwrap());
            });
        });
    }

    group.finish();
    queue.destroy().unwrap();
}

fn benchmark_stats_completion(c: &mut Criterion) {
    let name = format!("/imgpool_bench_stats_{}", std::process::id());
    let stats = SharedStats::create(&name, 2).unwrap();
    stats.set_total(u64::MAX).unwrap();

    c.bench_function("stats_record_completion", |b| {
        b.iter(|| {
            stats
                .record_completion(black_box(true), Duration::from_micros(5))
                .unwrap();
        });
    });

    stats.destroy().unwrap();
}

criterion_group!(benches, benchmark_queue_roundtrip, benchmark_stats_completion);
criterion_main!(benches);
