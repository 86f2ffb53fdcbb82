//! Engine throughput: writes, hot reads, and lookups that miss.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use lsm_kv::{DB, Options};
use rand::Rng;
use tempfile::TempDir;

fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.r#gen()).collect()
}

fn open(memtable: usize) -> (TempDir, DB) {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::open_with(dir.path(), Options::new().max_memtable_size(memtable)).unwrap();
    (dir, db)
}

fn populated(count: u32) -> (TempDir, DB) {
    let (dir, db) = open(64 * 1024);
    let value = random_data(100);
    for i in 0..count {
        db.put(format!("key{i:08}").as_bytes(), &value).unwrap();
    }
    db.flush().unwrap();
    (dir, db)
}

/// Every put is an fsynced WAL append.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    for size in [64, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (_dir, db) = open(1024 * 1024);
            let value = random_data(size);
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                db.put(&i.to_be_bytes(), black_box(&value)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    let count = 20_000u32;
    let (_dir, db) = populated(count);

    group.bench_function("hit", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let key = format!("key{:08}", rng.gen_range(0..count));
            black_box(db.get(key.as_bytes()).unwrap());
        });
    });

    // Misses are mostly answered by the membership filters.
    group.bench_function("miss", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let key = format!("nokey{:08}", rng.gen_range(0..count));
            black_box(db.get(key.as_bytes()).unwrap());
        });
    });
    group.finish();
}

fn bench_compact(c: &mut Criterion) {
    c.bench_function("compact_20k", |b| {
        b.iter_with_setup(|| populated(20_000), |(_dir, db)| db.compact().unwrap());
    });
}

criterion_group!(benches, bench_put, bench_get, bench_compact);
criterion_main!(benches);
