//! Benchmarks for the per-sample conditioning pipeline

use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rtsp_mic::audio::SignalConditioner;
use rtsp_mic::config::AudioConfig;

fn make_block(len: usize) -> Vec<i32> {
    (0..len)
        .map(|i| ((i as f32 * 0.05).sin() * 20000.0) as i32)
        .collect()
}

fn bench_conditioner(c: &mut Criterion) {
    let block = make_block(1024);

    c.bench_function("condition_1024_plain", |b| {
        let mut conditioner = SignalConditioner::new();
        let cfg = AudioConfig::default();
        b.iter(|| {
            let out = conditioner
                .process_block(black_box(&block), &cfg, false, Instant::now())
                .unwrap();
            black_box(out);
        })
    });

    c.bench_function("condition_1024_highpass_gain", |b| {
        let mut conditioner = SignalConditioner::new();
        let cfg = AudioConfig {
            highpass_enabled: true,
            highpass_cutoff_hz: 120,
            gain: 3.5,
            ..Default::default()
        };
        b.iter(|| {
            let out = conditioner
                .process_block(black_box(&block), &cfg, false, Instant::now())
                .unwrap();
            black_box(out);
        })
    });

    c.bench_function("condition_1024_shift11", |b| {
        let mut conditioner = SignalConditioner::new();
        let cfg = AudioConfig {
            bit_shift: 11,
            ..Default::default()
        };
        let wide = make_block(1024).iter().map(|s| s << 11).collect::<Vec<_>>();
        b.iter(|| {
            let out = conditioner
                .process_block(black_box(&wide), &cfg, true, Instant::now())
                .unwrap();
            black_box(out);
        })
    });
}

criterion_group!(benches, bench_conditioner);
criterion_main!(benches);
