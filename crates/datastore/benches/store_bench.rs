use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use datastore::Store;
use tempfile::tempdir;

const N_KEYS: usize = 1_000;
const VALUE_SIZE: usize = 100;

fn fill_store(store: &Store) {
    let value = "x".repeat(VALUE_SIZE);
    for i in 0..N_KEYS {
        store.put(&format!("key{}", i), &value).unwrap();
    }
}

fn put_benchmark(c: &mut Criterion) {
    c.bench_function("store_put_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let store = Store::open(dir.path()).unwrap();
                (dir, store)
            },
            |(_dir, store)| {
                fill_store(&store);
            },
            BatchSize::SmallInput,
        );
    });
}

fn get_benchmark(c: &mut Criterion) {
    c.bench_function("store_get_hit_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let store = Store::open(dir.path()).unwrap();
                fill_store(&store);
                (dir, store)
            },
            |(_dir, store)| {
                for i in 0..N_KEYS {
                    let v = store.get(&format!("key{}", i)).unwrap();
                    assert_eq!(v.len(), VALUE_SIZE);
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, put_benchmark, get_benchmark);
criterion_main!(benches);
