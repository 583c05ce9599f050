use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use ordo_core::TaskOptions;
use ordo_infra::workers::{TaskQueue, TaskRegistry, WorkerPool, WorkerPoolConfig};
use serde_json::json;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn pool(workers: usize) -> Arc<WorkerPool> {
    let registry = TaskRegistry::new().with("add", |(a, b): (i64, i64)| Ok::<_, String>(a + b));
    Arc::new(
        WorkerPool::new(
            WorkerPoolConfig::default()
                .with_name("bench")
                .with_max_workers(workers)
                .with_queue_limit(100_000)
                .with_profiling(false),
            registry,
            None,
        )
        .unwrap(),
    )
}

/// Round trip of one trivial task through the dispatcher and a worker.
fn bench_single_task_latency(c: &mut Criterion) {
    let rt = runtime();
    let pool = pool(1);

    let mut group = c.benchmark_group("task_latency");
    group.sample_size(500);
    group.bench_function("execute_task_round_trip", |b| {
        b.iter(|| {
            rt.block_on(async {
                let r = pool
                    .execute_task("add", json!([1, 2]), TaskOptions::default())
                    .await
                    .unwrap();
                black_box(r)
            })
        });
    });
    group.finish();
    rt.block_on(pool.shutdown(Duration::from_secs(1)));
}

/// Concurrent submissions spread over several workers.
fn bench_dispatch_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("dispatch_throughput");

    for workers in [1usize, 4] {
        let pool = pool(workers);
        for batch in [10usize, 100, 1000] {
            group.throughput(Throughput::Elements(batch as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{workers}_workers"), batch),
                &batch,
                |b, &batch| {
                    b.iter(|| {
                        rt.block_on(async {
                            let handles: Vec<_> = (0..batch)
                                .map(|i| {
                                    let pool = pool.clone();
                                    tokio::spawn(async move {
                                        pool.execute_task(
                                            "add",
                                            json!([i, 1]),
                                            TaskOptions::new().with_priority((i % 10) as i32),
                                        )
                                        .await
                                    })
                                })
                                .collect();
                            for h in handles {
                                black_box(h.await.unwrap().unwrap());
                            }
                        })
                    });
                },
            );
        }
        rt.block_on(pool.shutdown(Duration::from_secs(1)));
    }
    group.finish();
}

/// Priority queue push/pop without any threads involved.
fn bench_priority_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue");
    for size in [100u64, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("push_pop", size), &size, |b, &size| {
            b.iter(|| {
                let mut q = TaskQueue::new();
                for seq in 0..size {
                    q.push((seq % 7) as i32, seq, seq);
                }
                while let Some(item) = q.pop() {
                    black_box(item);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_task_latency,
    bench_dispatch_throughput,
    bench_priority_queue
);
criterion_main!(benches);
