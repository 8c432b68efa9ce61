//! Performance benchmarks for vmtrie
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use vmtrie::data::NibblePath;
use vmtrie::merkle::{keccak512, Hash, VersionedTrie};
use vmtrie::store::{LruNodeCache, MemoryNodeStore, NodeCache, NodeReader};

/// Generate random bytes
fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

fn build_trie() -> (VersionedTrie, Arc<MemoryNodeStore>) {
    let store = Arc::new(MemoryNodeStore::new());
    let cache = Arc::new(LruNodeCache::with_capacity(200_000));
    let trie = VersionedTrie::new(
        Arc::clone(&store) as Arc<dyn NodeReader>,
        cache as Arc<dyn NodeCache>,
    );
    (trie, store)
}

fn random_updates(count: usize) -> Vec<(Hash, Option<Vec<u8>>)> {
    (0..count)
        .map(|_| (keccak512(&random_bytes(32)), Some(random_bytes(64))))
        .collect()
}

/// Benchmark NibblePath operations
fn bench_nibble_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("NibblePath");

    let data = random_bytes(64);
    group.bench_function("from_key_hash_64", |b| {
        b.iter(|| NibblePath::from_key_hash(black_box(&data)))
    });

    let path = NibblePath::from_key_hash(&data);
    group.bench_function("get_nibble", |b| {
        b.iter(|| path.get(black_box(100)).unwrap())
    });

    group.bench_function("push_pop", |b| {
        b.iter(|| {
            let mut p = path.clone();
            p.push(black_box(0xA)).unwrap();
            p.pop();
            p
        })
    });

    group.finish();
}

/// Benchmark node hashing
fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hashing");

    let data = random_bytes(128);
    group.throughput(Throughput::Bytes(128));
    group.bench_function("keccak512_128b", |b| {
        b.iter(|| keccak512(black_box(&data)))
    });

    group.finish();
}

/// Benchmark batch apply at various sizes
fn bench_put_value_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_value_set");
    group.sample_size(10);

    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new("fresh_tree", size),
            &size,
            |b, &size| {
                let updates = random_updates(size);
                b.iter(|| {
                    let (trie, _) = build_trie();
                    trie.put_value_set(black_box(updates.clone()), 1, None, None)
                        .unwrap()
                })
            },
        );
    }

    // Incremental update on top of an existing version.
    group.bench_function("incremental_100_over_10k", |b| {
        let (trie, store) = build_trie();
        let base = trie
            .put_value_set(random_updates(10_000), 1, None, None)
            .unwrap();
        store.apply(&base);
        let updates = random_updates(100);
        b.iter(|| {
            trie.put_value_set(
                black_box(updates.clone()),
                2,
                Some(base.new_root_hash),
                Some(1),
            )
            .unwrap()
        })
    });

    group.finish();
}

/// Benchmark point lookups
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    let (trie, store) = build_trie();
    let updates = random_updates(10_000);
    let keys: Vec<Hash> = updates.iter().map(|(k, _)| *k).collect();
    let batch = trie.put_value_set(updates, 1, None, None).unwrap();
    store.apply(&batch);

    group.bench_function("warm_cache_10k", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let key = keys.choose(&mut rng).unwrap();
            trie.get(black_box(key), 1).unwrap()
        })
    });

    group.bench_function("absent_key_10k", |b| {
        let absent = keccak512(b"not-in-the-tree");
        b.iter(|| trie.get(black_box(&absent), 1).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_nibble_path,
    bench_hashing,
    bench_put_value_set,
    bench_get
);
criterion_main!(benches);
