//! Criterion benchmarks for segment decoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use depoview::codec::{decode_segment, encode_segment};
use depoview::trajectory::{Frame, Position};

fn make_segment(frames: usize, particles: usize) -> Vec<u8> {
    let species: Vec<u8> = (0..particles).map(|i| (i % 8) as u8).collect();
    let frames: Vec<Frame> = (0..frames)
        .map(|f| {
            Frame::new(
                (0..particles)
                    .map(|p| Position::new(p as f32 * 0.01, f as f32 * 0.1, 1.0))
                    .collect(),
            )
        })
        .collect();
    encode_segment(1, &species, &frames)
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_segment");

    for (frames, particles) in [(10usize, 500usize), (10, 5_000), (50, 5_000)] {
        let buf = make_segment(frames, particles);
        group.throughput(Throughput::Bytes(buf.len() as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{frames}x"), particles),
            &buf,
            |b, buf| b.iter(|| black_box(decode_segment(black_box(buf)).map(|s| s.frame_count()))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
