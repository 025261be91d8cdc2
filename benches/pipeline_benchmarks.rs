use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sluice::prelude::*;
use std::hint::black_box;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_basic_pipe(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("basic_pipe");

    for size in [100i64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("identity", size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let sink = CountConsumer::new();
                    pipe_to_end(range(0..size), sink.clone()).await.unwrap();
                    black_box(sink.count().await)
                })
            });
        });

        group.bench_with_input(BenchmarkId::new("map_filter_take", size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let sink = CountConsumer::new();
                    let source = range(0..size)
                        .map(|x| black_box(x * 2))
                        .filter(|x| x % 3 == 0)
                        .take(size as usize / 4);
                    pipe_to_end(source, sink.clone()).await.unwrap();
                    black_box(sink.count().await)
                })
            });
        });
    }

    group.finish();
}

fn bench_stage(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("stage");

    for capacity in [1usize, 16, 256].iter() {
        group.throughput(Throughput::Elements(10000));
        group.bench_with_input(
            BenchmarkId::new("writer_to_reader", capacity),
            capacity,
            |b, &capacity| {
                b.iter(|| {
                    rt.block_on(async {
                        let (writer, reader) = stage::<u64>(capacity).unwrap();
                        let feed = tokio::spawn(pipe_to_end(range(0..10000u64), writer));
                        let sink = CountConsumer::new();
                        pipe_to_end(reader, sink.clone()).await.unwrap();
                        feed.await.unwrap().unwrap();
                        black_box(sink.count().await)
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_flattening(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("flattening");

    for fan_out in [10u32, 100].iter() {
        group.throughput(Throughput::Elements(u64::from(*fan_out) * 10));

        group.bench_with_input(BenchmarkId::new("merge_map", fan_out), fan_out, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let sink = CountConsumer::new();
                    let out = range(0..n).merge_map(|x| range(x * 10..x * 10 + 10));
                    pipe_to_end(out, sink.clone()).await.unwrap();
                    black_box(sink.count().await)
                })
            });
        });

        group.bench_with_input(BenchmarkId::new("concat_map", fan_out), fan_out, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let sink = CountConsumer::new();
                    let out = range(0..n).concat_map(|x| range(x * 10..x * 10 + 10));
                    pipe_to_end(out, sink.clone()).await.unwrap();
                    black_box(sink.count().await)
                })
            });
        });
    }

    group.finish();
}

fn bench_combinators(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("combinators");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("zip2", |b| {
        b.iter(|| {
            rt.block_on(async {
                let sink = CountConsumer::new();
                pipe_to_end(zip2(range(0..1000u32), range(0..1000u64)), sink.clone())
                    .await
                    .unwrap();
                black_box(sink.count().await)
            })
        });
    });

    group.bench_function("merge4", |b| {
        b.iter(|| {
            rt.block_on(async {
                let sink = CountConsumer::new();
                let sources = (0..4u32).map(|i| range(i * 250..(i + 1) * 250).boxed()).collect();
                pipe_to_end(merge(sources), sink.clone()).await.unwrap();
                black_box(sink.count().await)
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_basic_pipe,
    bench_stage,
    bench_flattening,
    bench_combinators
);
criterion_main!(benches);
