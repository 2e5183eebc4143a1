//! Benchmark suite for conductor hot paths.
//!
//! - Output normalization and digests (run on every failed attempt)
//! - Loop detection over a full guardian window
//! - File block parsing of generator transcripts
//!
//! ```bash
//! cargo bench
//! cargo bench -- --save-baseline main
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use conductor::guardian::normalize::{digest, normalize};
use conductor::guardian::{GuardianConfig, LoopGuardian};
use conductor::task::parse_blocks;

/// A failing-test transcript with every volatile category in it.
fn noisy_transcript(lines: usize) -> String {
    (0..lines)
        .map(|i| {
            format!(
                "2026-02-13T10:{:02}:{:02}Z iteration {i} pid={} tid={} at 0x7ffd{i:04x} \
                 in /home/dev/project/src/mod_{i}.py (epoch 17{i:08})\n",
                i % 60,
                (i * 7) % 60,
                4000 + i,
                9000 + i
            )
        })
        .collect()
}

// ============================================================================
// Normalizer Benchmarks
// ============================================================================

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for lines in [10, 100, 1000] {
        let text = noisy_transcript(lines);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("normalize", lines), &text, |b, text| {
            b.iter(|| black_box(normalize(black_box(text))));
        });
        group.bench_with_input(BenchmarkId::new("digest", lines), &text, |b, text| {
            b.iter(|| black_box(digest(black_box(text))));
        });
    }

    group.finish();
}

// ============================================================================
// Guardian Benchmarks
// ============================================================================

fn bench_detect_loop(c: &mut Criterion) {
    let text = noisy_transcript(100);

    c.bench_function("detect_loop_full_window", |b| {
        b.iter_batched(
            || {
                let mut guardian = LoopGuardian::new(GuardianConfig::default());
                for _ in 0..3 {
                    guardian.increment_iteration();
                }
                guardian
            },
            |mut guardian| {
                for _ in 0..4 {
                    black_box(guardian.detect_loop(black_box(&text)));
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

// ============================================================================
// Transcript Parsing Benchmarks
// ============================================================================

fn bench_parse_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_blocks");

    for files in [1, 10, 50] {
        let transcript: String = (0..files)
            .map(|i| format!("# filename: pkg/file_{i}.py\nprint({i})\nassert {i} == {i}\n\n"))
            .collect();
        group.throughput(Throughput::Elements(files as u64));
        group.bench_with_input(BenchmarkId::from_parameter(files), &transcript, |b, t| {
            b.iter(|| black_box(parse_blocks(black_box(t))));
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(guardian_benches, bench_normalize, bench_detect_loop);

criterion_group!(task_benches, bench_parse_blocks);

criterion_main!(guardian_benches, task_benches);
