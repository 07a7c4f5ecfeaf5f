/*
Measures the post-pause drain of a sensor worker: one thread ships a
buffer of N items in chunks over the bounded hand-off channel while the
caller collects them, for several chunk sizes.
*/

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use force_daq::acquisition::{
    handoff,
    signals::WorkerSignals,
    types::{ForceSample, WorkerItem},
};
use std::{hint::black_box, sync::Arc, thread};

const BUFFER_LEN: usize = 60_000;
const CHUNK_SIZES: &[usize] = &[1_000, 10_000, 60_000];

fn buffer(n: usize) -> Vec<WorkerItem> {
    (0..n)
        .map(|i| {
            WorkerItem::Sample(ForceSample {
                time: i as i64,
                device_id: 1,
                seq: i as u64 + 1,
                forces: [0.5; 6],
                trigger: [0.0; 2],
            })
        })
        .collect()
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff_drain");
    group.throughput(Throughput::Elements(BUFFER_LEN as u64));
    group.sample_size(20);

    for &chunk in CHUNK_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let (tx, rx) = handoff::channel(handoff::CHUNK_DEPTH, chunk);
                let signals = Arc::new(WorkerSignals::new());
                let mut items = buffer(BUFFER_LEN);
                signals.set_pending(items.len());
                signals.draining.set();

                let s = Arc::clone(&signals);
                let producer = thread::spawn(move || tx.ship(&mut items, &s));

                let got = rx.collect(&signals, || true);
                let _ = producer.join();
                black_box(got.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_drain);
criterion_main!(benches);
