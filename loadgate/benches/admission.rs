use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use loadgate::{
    AdmissionEngine, BucketParams, GcraBucket, Instant, SweepConfig, TierConfig, TokenBucket,
};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn engine(rt: &tokio::runtime::Runtime, tiers: usize) -> AdmissionEngine {
    rt.block_on(
        AdmissionEngine::builder()
            .default_limit(BucketParams::per_second(1000.0, 1000).unwrap())
            .tiers((0..tiers).map(|order| {
                TierConfig::new(
                    order,
                    BucketParams::per_second(1_000_000.0 / (order + 1) as f64, 10_000).unwrap(),
                    BucketParams::per_second(100.0 / (order + 1) as f64, 100).unwrap(),
                )
            }))
            .sweep(SweepConfig::disabled())
            .start(),
    )
    .unwrap()
}

fn benchmark_bucket(c: &mut Criterion) {
    let mut group = c.benchmark_group("gcra_bucket");
    group.throughput(Throughput::Elements(1));

    group.bench_function("try_consume_allowed", |b| {
        let now = Instant::now();
        let bucket = GcraBucket::new(BucketParams::per_second(1e9, 1_000_000).unwrap(), now);
        let mut offset = 0u64;

        b.iter(|| {
            offset += 1;
            black_box(bucket.try_consume(1, now + Duration::from_micros(offset)))
        });
    });

    // Worst case: the bucket stays empty
    group.bench_function("try_consume_denied", |b| {
        let now = Instant::now();
        let bucket = GcraBucket::new(BucketParams::per_second(1.0, 1).unwrap(), now);
        bucket.try_consume(1, now);

        b.iter(|| black_box(bucket.try_consume(1, black_box(now))));
    });

    group.finish();
}

fn benchmark_engine(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("admission_engine");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(10));

    for tiers in [0usize, 1, 3] {
        group.bench_with_input(BenchmarkId::new("single_client", tiers), &tiers, |b, &tiers| {
            let engine = engine(&rt, tiers);
            b.iter(|| black_box(engine.admit(black_box("10.0.0.1"))));
        });

        group.bench_with_input(
            BenchmarkId::new("rotating_clients_10k", tiers),
            &tiers,
            |b, &tiers| {
                let engine = engine(&rt, tiers);
                let ids: Vec<String> = (0..10_000)
                    .map(|i| format!("10.0.{}.{}", i / 256, i % 256))
                    .collect();
                let mut counter = 0usize;

                b.iter(|| {
                    let id = &ids[counter % ids.len()];
                    counter += 1;
                    black_box(engine.admit(black_box(id)))
                });
            },
        );
    }

    group.finish();
}

fn benchmark_contention(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("admission_contention");
    group.measurement_time(Duration::from_secs(10));

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * 1000));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let engine = Arc::new(engine(&rt, 1));

            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let engine = Arc::clone(&engine);
                        thread::spawn(move || {
                            for i in 0..1000 {
                                black_box(engine.admit(&format!("client-{}-{}", t, i % 50)));
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_bucket, benchmark_engine, benchmark_contention);
criterion_main!(benches);
