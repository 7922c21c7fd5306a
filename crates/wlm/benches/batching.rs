// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for queue submission and batch formation.

use criterion::{criterion_group, criterion_main, Criterion};
use streaming::StreamConfig;
use wlm::{Job, JobQueue};

fn job(id: u64, payload_len: usize) -> Job {
    let (publisher, _result) = streaming::channel(StreamConfig::default());
    Job::new(id, "bench", vec![0u8; payload_len], publisher, None)
}

fn bench_queue_push_take(c: &mut Criterion) {
    c.bench_function("queue_push_take_32x256b", |b| {
        b.iter(|| {
            let queue = JobQueue::new(64);
            for id in 0..32 {
                queue.push(job(id, 256)).unwrap();
            }
            let mut drained = 0;
            while !queue.is_empty() {
                drained += std::hint::black_box(queue.take_batch(8)).len();
            }
            drained
        })
    });
}

fn bench_batch_formation_checks(c: &mut Criterion) {
    // The batcher's per-wakeup decision: queue length plus head age.
    let queue = JobQueue::new(128);
    for id in 0..64 {
        queue.push(job(id, 64)).unwrap();
    }
    c.bench_function("batch_policy_scan_64", |b| {
        b.iter(|| {
            let len = std::hint::black_box(queue.len());
            let age = std::hint::black_box(queue.head_age());
            (len, age)
        })
    });
}

fn bench_full_batch_drain(c: &mut Criterion) {
    c.bench_function("take_full_batch_16", |b| {
        b.iter(|| {
            let queue = JobQueue::new(16);
            for id in 0..16 {
                queue.push(job(id, 64)).unwrap();
            }
            std::hint::black_box(queue.take_batch(16))
        })
    });
}

criterion_group!(
    benches,
    bench_queue_push_take,
    bench_batch_formation_checks,
    bench_full_batch_drain
);
criterion_main!(benches);
