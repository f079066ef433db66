//! # 环境变量密钥解析
//!
//! 每个变量可以是 JSON 字符串数组，也可以是逗号分隔的列表。
//! 结果去除空白与空项，并按首次出现的顺序去重。

use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use std::collections::HashSet;

/// 从进程环境变量读取密钥
#[must_use]
pub fn parse_keys_from_env<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    parse_keys_with(names, |name| std::env::var(name).ok())
}

/// 使用给定的查找函数解析密钥
pub fn parse_keys_with<S, F>(names: &[S], lookup: F) -> Vec<String>
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<String>,
{
    let mut seen = HashSet::new();
    let mut keys = Vec::new();

    for name in names {
        let name = name.as_ref();
        let Some(raw) = lookup(name) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let entries = split_value(name, raw);
        for key in entries {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }
    keys
}

fn split_value(name: &str, raw: &str) -> Vec<String> {
    if raw.starts_with('[') {
        match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
            Ok(values) => {
                return values
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            Err(e) => {
                ldebug!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Config,
                    "env_keys_not_json",
                    "Env value looks like JSON but failed to parse, splitting by comma",
                    variable = name,
                    error = %e
                );
            }
        }
    }

    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
