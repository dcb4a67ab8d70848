// Write performance benchmarks for unqdb

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tempfile::TempDir;
use unqdb::{Database, Options};

fn bench_options() -> Options {
    Options::default().sync(false)
}

fn benchmark_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let db = Database::open(temp_dir.path().join("db"), bench_options()).unwrap();

                db.begin().unwrap();
                for i in 0..size {
                    let key = format!("key{:08}", i);
                    let value = format!("value{:08}", i);
                    db.store(key.as_bytes(), value.as_bytes()).unwrap();
                }
                db.commit().unwrap();

                black_box(&db);
            });
        });
    }

    group.finish();
}

fn benchmark_random_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_write");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                use rand::Rng;
                let mut rng = rand::rng();
                let temp_dir = TempDir::new().unwrap();
                let db = Database::open(temp_dir.path().join("db"), bench_options()).unwrap();

                db.begin().unwrap();
                for _ in 0..size {
                    let key = format!("key{:08}", rng.random_range(0..size * 10));
                    db.store(key.as_bytes(), b"value").unwrap();
                }
                db.commit().unwrap();

                black_box(&db);
            });
        });
    }

    group.finish();
}

fn benchmark_auto_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("auto_commit");
    group.sample_size(20);

    for sync in [false, true] {
        group.bench_with_input(BenchmarkId::new("sync", sync), &sync, |b, &sync| {
            let temp_dir = TempDir::new().unwrap();
            let db = Database::open(temp_dir.path().join("db"), Options::default().sync(sync)).unwrap();
            let mut i = 0u64;

            b.iter(|| {
                let key = format!("key{:08}", i);
                db.store(key.as_bytes(), b"value").unwrap();
                i += 1;
            });
        });
    }

    group.finish();
}

fn benchmark_value_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_size");

    for value_size in [16, 256, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*value_size as u64 * 100));
        group.bench_with_input(
            BenchmarkId::from_parameter(value_size),
            value_size,
            |b, &value_size| {
                let value = vec![0x5au8; value_size];
                b.iter(|| {
                    let temp_dir = TempDir::new().unwrap();
                    let db = Database::open(temp_dir.path().join("db"), bench_options()).unwrap();

                    db.begin().unwrap();
                    for i in 0..100 {
                        let key = format!("key{:08}", i);
                        db.store(key.as_bytes(), &value).unwrap();
                    }
                    db.commit().unwrap();

                    black_box(&db);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_write,
    benchmark_random_write,
    benchmark_auto_commit,
    benchmark_value_size
);
criterion_main!(benches);
