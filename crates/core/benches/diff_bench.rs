//! Diff engine benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fsmon_core::{DirectoryEntry, Generation, Snapshot, SnapshotDiff};

fn listing(count: u64, renamed_every: u64) -> Snapshot {
    let entries = (0..count)
        .map(|i| {
            let name = if renamed_every > 0 && i % renamed_every == 0 {
                format!("renamed-{i}")
            } else {
                format!("file-{i}")
            };
            DirectoryEntry::new(name, i + 1, Generation::default())
        })
        .collect();
    Snapshot::from_entries("/bench", entries)
}

fn bench_diff(c: &mut Criterion) {
    let small_prev = listing(100, 0);
    let small_cur = listing(100, 10);

    c.bench_function("diff_100_entries_10_renames", |b| {
        b.iter(|| SnapshotDiff::compute(black_box(&small_prev), black_box(&small_cur)))
    });

    let large_prev = listing(10_000, 0);
    let large_cur = listing(10_000, 100);

    c.bench_function("diff_10k_entries_100_renames", |b| {
        b.iter(|| SnapshotDiff::compute(black_box(&large_prev), black_box(&large_cur)))
    });

    c.bench_function("diff_10k_entries_unchanged", |b| {
        b.iter(|| SnapshotDiff::compute(black_box(&large_prev), black_box(&large_prev)))
    });
}

criterion_group!(benches, bench_diff);
criterion_main!(benches);
