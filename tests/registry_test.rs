//! # 配置、预设、注册表与持久化集成测试

mod common;

use api_key_manager::health::FnProbe;
use api_key_manager::{
    ApiError, ApiKeyManager, CircuitState, ExecuteOptions, FileStorage, HealthCheckScheduler,
    ManagerConfig, ManagerOptions, PoolRegistry, ProviderPreset, SelectionStrategy,
};
use common::status;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn test_registry_routes_to_preset_managers() {
    let dir = tempfile::tempdir().unwrap();
    let registry: PoolRegistry<String> = PoolRegistry::new();

    for (preset, keys) in [
        (ProviderPreset::gemini(), vec!["gm-1", "gm-2"]),
        (ProviderPreset::openai(), vec!["sk-1"]),
    ] {
        let state_file = dir.path().join(format!("{}.json", preset.provider));
        let preset = preset.with_state_file(state_file);
        let inputs = preset.resolve_keys_with(|name| {
            (name == preset.env_keys[0]).then(|| keys.join(","))
        });
        let options = preset.options().unwrap();
        registry
            .get_or_create(&preset.provider, || preset.build_with(inputs, options))
            .unwrap();
    }

    assert_eq!(registry.providers(), vec!["gemini".to_string(), "openai".to_string()]);
    assert_eq!(registry.get_key("openai"), Some("sk-1".to_string()));
    assert!(registry.get_key("mistral").is_none());

    let used = registry
        .execute(
            |key, _token| async move { Ok::<_, ApiError>(key) },
            ExecuteOptions::new().provider("gemini"),
        )
        .await
        .unwrap();
    assert!(used.starts_with("gm-"));

    let gemini = registry.get("gemini").unwrap();
    assert_eq!(gemini.pool().len(), 2);
    assert_eq!(gemini.stats().total, 2);
    assert!(dir.path().join("gemini.json").exists());
}

#[tokio::test]
async fn test_manager_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let config = ManagerConfig::from_toml_str(&format!(
        r#"
        provider = "openai"
        keys = ["sk-a", "sk-b"]
        strategy = "weighted"
        max_concurrency = 4
        state_file = "{}"
        "#,
        state_file.display().to_string().replace('\\', "\\\\")
    ))
    .unwrap();
    assert_eq!(config.strategy, SelectionStrategy::Weighted);

    let manager: ApiKeyManager<String> =
        ApiKeyManager::new(config.resolve_keys_with(|_| None), config.manager_options(None).unwrap());

    let key = manager
        .execute(
            |key, _token| async move { Ok::<_, ApiError>(key) },
            ExecuteOptions::new().provider("openai"),
        )
        .await
        .unwrap();
    assert!(key == "sk-a" || key == "sk-b");
    assert!(state_file.exists());
}

#[tokio::test]
async fn test_state_survives_restart_when_not_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.json");

    {
        let storage = Arc::new(FileStorage::new(&path, true).unwrap());
        let manager: ApiKeyManager<String> =
            ApiKeyManager::new(["k1", "k2"], ManagerOptions::default().with_storage(storage));
        let _ = manager
            .execute(
                |key, _token| async move {
                    if key == "k1" {
                        Err(status(403))
                    } else {
                        Ok(key)
                    }
                },
                ExecuteOptions::new(),
            )
            .await;
        assert!(manager.pool().key_state("k1").unwrap().is_dead());
    }

    let storage = Arc::new(FileStorage::new(&path, false).unwrap());
    let restored: ApiKeyManager<String> =
        ApiKeyManager::new(["k1", "k2"], ManagerOptions::default().with_storage(storage));
    assert_eq!(
        restored.pool().key_state("k1").unwrap().circuit_state,
        CircuitState::Dead
    );
    assert_eq!(restored.get_key(), Some("k2".to_string()));
}

#[tokio::test]
async fn test_health_scheduler_revives_open_key() {
    let manager: ApiKeyManager<String> = ApiKeyManager::new(["flaky"], ManagerOptions::default());
    let quota = manager.classify_error(&status(429), None);
    manager.mark_failed("flaky", &quota);
    assert_eq!(
        manager.pool().key_state("flaky").unwrap().circuit_state,
        CircuitState::Open
    );

    let probe = FnProbe::new(|_key: String| async { Ok::<(), anyhow::Error>(()) });
    let scheduler = HealthCheckScheduler::new(manager.pool().clone(), Arc::new(probe), None);
    let report = scheduler.run_once().await;

    assert_eq!(report.passed, 1);
    let state = manager.pool().key_state("flaky").unwrap();
    assert_eq!(state.circuit_state, CircuitState::Closed);
    assert!(!state.is_quota_error);
}
