//! # 语义缓存模块
//!
//! 以嵌入向量为键的响应缓存，余弦相似度超过阈值即视为命中

pub mod semantic;

pub use semantic::{
    CacheStats, CachedResponse, SemanticCache, SemanticCacheConfig, cosine_similarity,
};
