use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use dupindex::config::IndexConfig;
use dupindex::index::{Index, NameComponentStore, ScanConfig};
use dupindex::scanner::{Hasher, Walker, WalkerConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// Every other file in a directory shares its content with the previous one,
// so each size ends up in a multi bucket.
fn setup_test_dir(depth: usize, files_per_dir: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    create_dir_recursive(temp_dir.path(), depth, files_per_dir);
    temp_dir
}

fn create_dir_recursive(path: &Path, depth: usize, files_per_dir: usize) {
    if depth == 0 {
        return;
    }
    fs::create_dir_all(path).expect("Failed to create dir");

    for i in 0..files_per_dir {
        let content = "x".repeat(100 + i / 2);
        fs::write(path.join(format!("file_{i}.txt")), content).expect("Failed to write file");
    }

    if depth > 1 {
        for i in 0..2 {
            create_dir_recursive(&path.join(format!("dir_{i}")), depth - 1, files_per_dir);
        }
    }
}

fn sample_paths(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("/home/user/projects/p{}/src/module_{}/file_{}.rs", i % 17, i % 101, i))
        .collect()
}

// 1. Path interning
fn bench_names(c: &mut Criterion) {
    let paths = sample_paths(10_000);
    let mut group = c.benchmark_group("names");

    group.bench_function("pack_10k_fresh", |b| {
        b.iter_batched(
            NameComponentStore::new,
            |mut store| {
                for path in &paths {
                    black_box(store.pack(path).unwrap());
                }
                store
            },
            BatchSize::SmallInput,
        )
    });

    let mut warm = NameComponentStore::new();
    let packed: Vec<_> = paths.iter().map(|p| warm.pack(p).unwrap()).collect();

    group.bench_function("try_pack_10k_warm", |b| {
        b.iter(|| {
            for path in &paths {
                black_box(warm.try_pack(path));
            }
        })
    });

    group.bench_function("unpack_10k", |b| {
        b.iter(|| {
            for p in &packed {
                black_box(warm.unpack(p).unwrap());
            }
        })
    });

    group.finish();
}

// 2. Hashing
fn bench_hasher(c: &mut Criterion) {
    let mut group = c.benchmark_group("hasher");
    let hasher = Hasher::default();
    let temp_dir = TempDir::new().unwrap();

    for size_kb in [1u64, 1024] {
        let size = size_kb * 1024;
        let path: PathBuf = temp_dir.path().join(format!("blob_{size_kb}"));
        fs::write(&path, vec![0xA5u8; size as usize]).unwrap();

        group.bench_with_input(BenchmarkId::new("hash", format!("{size_kb}KB")), &path, |b, p| {
            b.iter(|| black_box(hasher.hash(p, size).unwrap()))
        });
    }
    group.finish();
}

// 3. Walking and indexing
fn bench_scan(c: &mut Criterion) {
    let temp_dir = setup_test_dir(4, 10);

    c.bench_function("walker_150_files", |b| {
        b.iter(|| {
            let walker = Walker::new(temp_dir.path(), WalkerConfig::default());
            let files: Vec<_> = walker.walk().collect();
            black_box(files);
        })
    });

    c.bench_function("scan_150_files_fresh_index", |b| {
        b.iter_batched(
            || {
                let index_dir = TempDir::new().unwrap();
                let index = Index::new(IndexConfig::with_index_dir(index_dir.path())).unwrap();
                (index_dir, index)
            },
            |(index_dir, mut index)| {
                let summary = index.scan(temp_dir.path(), &ScanConfig::default()).unwrap();
                black_box(summary);
                index_dir
            },
            BatchSize::PerIteration,
        )
    });

    let index_dir = TempDir::new().unwrap();
    let mut index = Index::new(IndexConfig::with_index_dir(index_dir.path())).unwrap();
    index.scan(temp_dir.path(), &ScanConfig::default()).unwrap();

    c.bench_function("rescan_150_files", |b| {
        b.iter(|| black_box(index.scan(temp_dir.path(), &ScanConfig::default()).unwrap()))
    });
}

criterion_group!(benches, bench_names, bench_hasher, bench_scan);
criterion_main!(benches);
