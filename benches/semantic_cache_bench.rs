//! # 语义缓存与密钥选择性能基准测试
//!
//! 语义缓存读取是线性扫描，这里测量不同条目数下的查找耗时

use api_key_manager::cache::{SemanticCache, SemanticCacheConfig, cosine_similarity};
use api_key_manager::key_pool::{KeyPool, SelectionStrategy, create_key_selector};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::Rng;
use std::hint::black_box;

const DIMENSIONS: usize = 256;

fn random_vector(rng: &mut impl Rng) -> Vec<f32> {
    (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// 创建填满的缓存
fn create_cache(entries: usize) -> SemanticCache<String> {
    let cache = SemanticCache::new(SemanticCacheConfig {
        threshold: 0.95,
        ttl_secs: 3600,
        max_entries: entries,
    });
    let mut rng = rand::thread_rng();
    for i in 0..entries {
        cache.set(format!("prompt {i}"), random_vector(&mut rng), format!("response {i}"));
    }
    cache
}

/// 余弦相似度基准测试
fn bench_cosine(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let a = random_vector(&mut rng);
    let b = random_vector(&mut rng);

    c.bench_function("cosine_similarity_256", |bench| {
        bench.iter(|| cosine_similarity(black_box(&a), black_box(&b)));
    });
}

/// 缓存查找基准测试
fn bench_cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("semantic_cache_lookup");
    let mut rng = rand::thread_rng();

    for entries in [50, 500, 2000] {
        let cache = create_cache(entries);
        let probe = random_vector(&mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |bench, _| {
            bench.iter(|| cache.get(black_box(&probe)));
        });
    }
    group.finish();
}

/// 写入并淘汰基准测试
fn bench_cache_set_with_eviction(c: &mut Criterion) {
    let cache = create_cache(500);
    let mut rng = rand::thread_rng();
    let vector = random_vector(&mut rng);
    let mut counter = 0_u64;

    c.bench_function("semantic_cache_set_evict", |bench| {
        bench.iter(|| {
            counter += 1;
            cache.set(format!("new prompt {counter}"), vector.clone(), String::from("value"));
        });
    });
}

/// 密钥选择基准测试
fn bench_key_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_selection");
    let keys: Vec<String> = (0..50).map(|i| format!("key-{i:04}")).collect();

    for strategy in [
        SelectionStrategy::Standard,
        SelectionStrategy::Weighted,
        SelectionStrategy::Latency,
    ] {
        let pool = KeyPool::builder()
            .keys(keys.iter().cloned())
            .selector(create_key_selector(strategy))
            .build();
        group.bench_function(strategy.as_str(), |bench| {
            bench.iter(|| black_box(pool.get_key()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cosine,
    bench_cache_lookup,
    bench_cache_set_with_eviction,
    bench_key_selection
);
criterion_main!(benches);
