//! Benchmarks for channel hand-off between producer and consumer
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use medflow::data::{DataRef, Value};
use medflow::pipeline::channel::{create_channel, ChannelKind, DataChannel};
use std::sync::Arc;

const FRAMES: u64 = 1_000;

fn frames(count: u64) -> Vec<DataRef> {
    (0..count).map(|i| Value::create(i) as DataRef).collect()
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_single_thread");
    group.throughput(Throughput::Elements(FRAMES));

    for kind in [ChannelKind::Queued, ChannelKind::NewestOnly, ChannelKind::Static] {
        let input = frames(FRAMES);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", kind)),
            &kind,
            |b, &kind| {
                let channel = create_channel(kind, None, FRAMES as usize);
                b.iter(|| {
                    for frame in &input {
                        channel.add_frame(frame.clone()).unwrap();
                        black_box(channel.next_frame().unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_queue_across_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_across_threads");
    group.throughput(Throughput::Elements(FRAMES));

    for capacity in [1usize, 8, 50] {
        let input = frames(FRAMES);
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let channel: Arc<dyn DataChannel> =
                        create_channel(ChannelKind::Queued, None, capacity);
                    let producer = {
                        let channel = channel.clone();
                        let input = input.clone();
                        std::thread::spawn(move || {
                            for frame in input {
                                channel.add_frame(frame).unwrap();
                            }
                        })
                    };
                    for _ in 0..FRAMES {
                        black_box(channel.next_frame().unwrap());
                    }
                    producer.join().unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_queue_across_threads);
criterion_main!(benches);
