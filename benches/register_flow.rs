//! Benchmarks for register flow control and scheduling
//!
//! Run with: cargo bench

use actorflow::actor::{
    with_blob_accessor, ActorId, BlobBinding, RegstDesc, RegstDescId, RegstPool, RegstRole,
    RegstStore,
};
use actorflow::config::JobConfig;
use actorflow::runtime::{demo_training_plan, GraphOptions, LocalScheduler};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn store(register_num: usize, consumers: usize, features: usize) -> Arc<RegstStore> {
    let consumers: Vec<ActorId> = (1..=consumers as u32).map(ActorId).collect();
    let desc = RegstDesc::new(RegstDescId(0), "data", ActorId(0))
        .with_consumers(&consumers)
        .with_register_num(register_num)
        .with_blob("data", &[features]);
    Arc::new(RegstStore::new(desc))
}

fn bench_publish_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_release");

    for consumers in [1usize, 2, 8].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("consumers", consumers),
            consumers,
            |b, &consumers| {
                let mut pool = RegstPool::new(ActorId(0), store(2, consumers, 1)).unwrap();
                b.iter(|| {
                    let handle = pool.publish().unwrap();
                    for _ in 0..consumers {
                        black_box(pool.release(handle).unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_blob_accessor(c: &mut Criterion) {
    let mut group = c.benchmark_group("blob_accessor");

    for features in [16usize, 1024, 65_536].iter() {
        group.throughput(Throughput::Bytes((*features * 4) as u64));
        group.bench_with_input(
            BenchmarkId::new("copy", features),
            features,
            |b, &features| {
                let input = store(1, 1, features);
                let output = store(1, 1, features);
                let bindings = vec![
                    BlobBinding::read(RegstRole::Input, input.clone(), input.handle(0)),
                    BlobBinding::write(RegstRole::Output, output.clone(), output.handle(0)),
                ];
                b.iter(|| {
                    with_blob_accessor(&bindings, |blobs| {
                        if let Some((src, dst)) = blobs.input_and_output("data", "data") {
                            dst.copy_from(src);
                        }
                        Ok(())
                    })
                    .unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_local_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_run");
    group.sample_size(20);

    for pieces_per_batch in [4u64, 32].iter() {
        let job = JobConfig::train(*pieces_per_batch, 8);
        group.throughput(Throughput::Elements(job.total_pieces()));
        group.bench_with_input(
            BenchmarkId::new("demo", pieces_per_batch),
            &job,
            |b, job| {
                let plan = demo_training_plan(16).unwrap();
                b.iter(|| {
                    let options = GraphOptions::new(job.clone());
                    let mut scheduler = LocalScheduler::from_plan(&plan, &options).unwrap();
                    black_box(scheduler.run_until_idle(usize::MAX).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_release,
    bench_blob_accessor,
    bench_local_run,
);

criterion_main!(benches);
