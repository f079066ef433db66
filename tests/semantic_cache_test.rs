//! # 语义缓存集成测试
//!
//! 嵌入函数按关键词映射到固定向量，相同主题的提示词视为相似

mod common;

use api_key_manager::key_pool::PoolEvent;
use api_key_manager::manager::CACHE_HIT_KEY;
use api_key_manager::{
    ApiError, ApiKeyManager, ExecuteOptions, ManagerOptions, SemanticCacheConfig,
    SemanticCacheOptions,
};
use common::EventLog;
use futures::StreamExt;
use futures::stream;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn topic_vector(prompt: &str) -> Vec<f32> {
    if prompt.contains("weather") {
        vec![1.0, 0.0, 0.0]
    } else if prompt.contains("stock") {
        vec![0.0, 1.0, 0.0]
    } else {
        vec![0.0, 0.0, 1.0]
    }
}

fn cached_manager(log: &Arc<EventLog>) -> ApiKeyManager<String> {
    ApiKeyManager::new(
        ["k1"],
        ManagerOptions::default()
            .with_listener(log.clone())
            .with_semantic_cache(SemanticCacheOptions::new(
                SemanticCacheConfig::default(),
                |prompt: String| async move { Ok::<_, anyhow::Error>(topic_vector(&prompt)) },
            )),
    )
}

async fn ask(manager: &ApiKeyManager<String>, calls: &Arc<AtomicUsize>, prompt: &str) -> String {
    let counter = calls.clone();
    let prompt_owned = prompt.to_string();
    manager
        .execute(
            move |_key, _token| {
                counter.fetch_add(1, Ordering::SeqCst);
                let answer = format!("answer to {prompt_owned}");
                async move { Ok::<_, ApiError>(answer) }
            },
            ExecuteOptions::new().prompt(prompt),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_similar_prompt_served_from_cache() {
    let log = EventLog::shared();
    let manager = cached_manager(&log);
    let calls = Arc::new(AtomicUsize::new(0));

    let first = ask(&manager, &calls, "what is the weather in Paris").await;
    let second = ask(&manager, &calls, "weather in Paris please").await;

    assert_eq!(first, "answer to what is the weather in Paris");
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        log.count(|e| matches!(
            e,
            PoolEvent::ExecuteSucceeded { key, duration }
                if key == CACHE_HIT_KEY && *duration == Duration::ZERO
        )),
        1
    );

    let stats = manager.cache_stats().unwrap();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.miss_count, 1);
}

#[tokio::test]
async fn test_unrelated_prompt_goes_live() {
    let log = EventLog::shared();
    let manager = cached_manager(&log);
    let calls = Arc::new(AtomicUsize::new(0));

    ask(&manager, &calls, "weather tomorrow").await;
    let answer = ask(&manager, &calls, "stock price of ACME").await;

    assert_eq!(answer, "answer to stock price of ACME");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.cache_stats().unwrap().entries, 2);
}

#[tokio::test]
async fn test_calls_without_prompt_bypass_cache() {
    let log = EventLog::shared();
    let manager = cached_manager(&log);

    manager
        .execute(
            |_key, _token| async { Ok::<_, ApiError>("no prompt".to_string()) },
            ExecuteOptions::new(),
        )
        .await
        .unwrap();

    let stats = manager.cache_stats().unwrap();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.hit_count + stats.miss_count, 0);
}

#[tokio::test]
async fn test_embedding_failure_proceeds_to_live_call() {
    let manager: ApiKeyManager<String> = ApiKeyManager::new(
        ["k1"],
        ManagerOptions::default().with_semantic_cache(SemanticCacheOptions::new(
            SemanticCacheConfig::default(),
            |_prompt: String| async { Err::<Vec<f32>, _>(anyhow::anyhow!("embedding service down")) },
        )),
    );
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(ask(&manager, &calls, "weather").await, "answer to weather");
    assert_eq!(ask(&manager, &calls, "weather").await, "answer to weather");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.cache_stats().unwrap().entries, 0);
}

#[tokio::test]
async fn test_fallback_results_are_not_cached() {
    let manager: ApiKeyManager<String> = ApiKeyManager::new(
        Vec::<String>::new(),
        ManagerOptions::default()
            .with_fallback(|| async { Ok::<_, anyhow::Error>("fallback".to_string()) })
            .with_semantic_cache(SemanticCacheOptions::new(
                SemanticCacheConfig::default(),
                |prompt: String| async move { Ok::<_, anyhow::Error>(topic_vector(&prompt)) },
            )),
    );

    let value = manager
        .execute(
            |_key, _token| async { Ok::<_, ApiError>("live".to_string()) },
            ExecuteOptions::new().prompt("weather"),
        )
        .await
        .unwrap();

    assert_eq!(value, "fallback");
    assert_eq!(manager.cache_stats().unwrap().entries, 0);
}

#[tokio::test]
async fn test_nested_call_inside_embedding_skips_cache() {
    let slot: Arc<OnceLock<ApiKeyManager<String>>> = Arc::new(OnceLock::new());
    let embeddings = Arc::new(AtomicUsize::new(0));
    let live_calls = Arc::new(AtomicUsize::new(0));

    let embed_slot = slot.clone();
    let embed_count = embeddings.clone();
    let manager: ApiKeyManager<String> = ApiKeyManager::new(
        ["k1"],
        ManagerOptions::default().with_semantic_cache(SemanticCacheOptions::new(
            SemanticCacheConfig::default(),
            move |prompt: String| {
                let slot = embed_slot.clone();
                let count = embed_count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    let manager = slot.get().cloned().ok_or_else(|| anyhow::anyhow!("not ready"))?;
                    // 通过同一个管理器计算嵌入
                    let raw = manager
                        .execute(
                            |_key, _token| async { Ok::<_, ApiError>("0.6,0.8".to_string()) },
                            ExecuteOptions::new().prompt(prompt),
                        )
                        .await
                        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
                    let vector = raw
                        .split(',')
                        .map(str::parse::<f32>)
                        .collect::<Result<Vec<f32>, _>>()?;
                    Ok::<_, anyhow::Error>(vector)
                }
            },
        )),
    );
    assert!(slot.set(manager.clone()).is_ok());

    let counter = live_calls.clone();
    let value = manager
        .execute(
            move |_key, _token| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ApiError>("completion".to_string()) }
            },
            ExecuteOptions::new().prompt("hello"),
        )
        .await
        .unwrap();

    assert_eq!(value, "completion");
    assert_eq!(embeddings.load(Ordering::SeqCst), 1);
    assert_eq!(live_calls.load(Ordering::SeqCst), 1);
    // 只有外层调用写入缓存
    assert_eq!(manager.cache_stats().unwrap().entries, 1);
    assert_eq!(manager.pool().key_state("k1").unwrap().success_count, 2);
}

#[tokio::test]
async fn test_completed_stream_is_replayed_from_cache() {
    let log = EventLog::shared();
    let manager = cached_manager(&log);
    let calls = Arc::new(AtomicUsize::new(0));

    let run = |prompt: &'static str| {
        let counter = calls.clone();
        let manager = manager.clone();
        async move {
            let stream = manager
                .execute_stream(
                    move |_key, _token| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let items: Vec<Result<String, ApiError>> =
                            vec![Ok("sun".to_string()), Ok("ny".to_string())];
                        async move { Ok::<_, ApiError>(stream::iter(items)) }
                    },
                    ExecuteOptions::new().prompt(prompt),
                )
                .await
                .unwrap();
            stream.map(Result::unwrap).collect::<Vec<String>>().await
        }
    };

    assert_eq!(run("weather today").await, vec!["sun", "ny"]);
    assert_eq!(run("weather now").await, vec!["sun", "ny"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // 流式分片不会被普通调用命中
    let calls_plain = Arc::new(AtomicUsize::new(0));
    assert_eq!(ask(&manager, &calls_plain, "weather").await, "answer to weather");
    assert_eq!(calls_plain.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_interrupted_stream_is_not_cached() {
    let log = EventLog::shared();
    let manager = cached_manager(&log);

    let stream = manager
        .execute_stream(
            |_key, _token| async {
                let items: Vec<Result<String, ApiError>> =
                    vec![Ok("part".to_string()), Err(ApiError::new(500, "reset"))];
                Ok::<_, ApiError>(stream::iter(items))
            },
            ExecuteOptions::new().prompt("weather"),
        )
        .await
        .unwrap();
    let items: Vec<Result<String, ApiError>> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(manager.cache_stats().unwrap().entries, 0);
}
