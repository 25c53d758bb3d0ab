//! Benchmarks for segment planning and resegmentation
//!
//! Tests planning over long sample timelines and the full
//! extract/plan/write pass on synthetic tracks.

use cmafkit_media::fixture::TrackFixture;
use cmafkit_media::segment::plan_segments;
use cmafkit_media::{resegment, ResegmentOptions, Sample, TrackModel};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// A timeline of `count` samples, each `duration` long
fn timeline(count: usize, duration: u32) -> Vec<Sample> {
    (0..count)
        .map(|i| Sample {
            start_decode_time: i as u64 * duration as u64,
            duration,
            size: 400,
            byte_offset: 1000 + i as u64 * 400,
            flags: 0x0200_0000,
            composition_time_offset: 0,
        })
        .collect()
}

fn bench_plan_segments(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_segments");

    // One hour of 48 kHz AAC frames and of 25 fps video
    let audio = timeline(168_750, 1024);
    let video = timeline(90_000, 3600);

    for target_ms in [2000u64, 4000, 10_000] {
        group.bench_with_input(BenchmarkId::new("audio_1h", target_ms), &target_ms, |b, &ms| {
            b.iter(|| plan_segments(black_box(&audio), 48000, ms));
        });
        group.bench_with_input(BenchmarkId::new("video_1h", target_ms), &target_ms, |b, &ms| {
            b.iter(|| plan_segments(black_box(&video), 90000, ms));
        });
    }

    group.finish();
}

fn bench_resegment(c: &mut Criterion) {
    let mut group = c.benchmark_group("resegment");

    let audio = TrackFixture::audio(48000, 1024).fragments(300, 94).with_sidx().build();
    let video = TrackFixture::video(90000, 3600).fragments(300, 50).with_sidx().build();

    group.bench_function("extract/audio", |b| {
        b.iter(|| TrackModel::extract(black_box(&audio)));
    });

    let options = ResegmentOptions {
        target_ms: 4000,
        write_sidx: true,
    };
    group.bench_function("resegment/audio", |b| {
        b.iter(|| resegment(black_box(&audio), &options));
    });
    group.bench_function("resegment/video", |b| {
        b.iter(|| resegment(black_box(&video), &options));
    });

    group.finish();
}

criterion_group!(benches, bench_plan_segments, bench_resegment);
criterion_main!(benches);
