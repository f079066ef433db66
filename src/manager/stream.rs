//! # 流式执行
//!
//! 与 `execute` 的区别只在成功路径：取得第一个元素之前的失败走重试策略，
//! 之后的元素与错误原样透传给调用方。舱壁许可在整个流的生命周期内保持。

use super::bulkhead::BulkheadPermit;
use super::executor::{ApiKeyManager, Outcome};
use super::options::ExecuteOptions;
use crate::cache::CachedResponse;
use crate::error::ExecuteError;
use crate::key_pool::UpstreamError;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::future::{self, Future};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// 流正常结束后写入缓存
struct ChunkSink<T> {
    manager: ApiKeyManager<T>,
    prompt: String,
    vector: Vec<f32>,
    chunks: Vec<T>,
}

/// 透传状态：首个元素、剩余流、可选的缓存收集器与舱壁许可
struct Relay<T, S> {
    first: Option<T>,
    rest: Pin<Box<S>>,
    sink: Option<ChunkSink<T>>,
    _permit: BulkheadPermit,
}

impl<T, E, S> Relay<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Stream<Item = Result<T, E>>,
{
    async fn advance(mut self) -> Option<(Result<T, E>, Self)> {
        if let Some(first) = self.first.take() {
            if let Some(sink) = self.sink.as_mut() {
                sink.chunks.push(first.clone());
            }
            return Some((Ok(first), self));
        }

        match self.rest.next().await {
            Some(Ok(item)) => {
                if let Some(sink) = self.sink.as_mut() {
                    sink.chunks.push(item.clone());
                }
                Some((Ok(item), self))
            }
            Some(Err(error)) => {
                // 中途出错的流不完整，不缓存
                self.sink = None;
                Some((Err(error), self))
            }
            None => {
                if let Some(sink) = self.sink.take() {
                    sink.manager.store_in_cache(
                        Some(&sink.prompt),
                        Some(sink.vector),
                        CachedResponse::Chunks(sink.chunks),
                    );
                }
                None
            }
        }
    }
}

impl<T> ApiKeyManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 流式执行
    ///
    /// 操作返回一个元素流。建立连接或取得首个元素时的失败按重试策略处理；
    /// 缓存命中时回放缓存的分片。
    pub async fn execute_stream<F, Fut, S, E>(
        &self,
        operation: F,
        options: ExecuteOptions,
    ) -> Result<BoxStream<'static, Result<T, E>>, ExecuteError<E>>
    where
        F: Fn(String, CancellationToken) -> Fut,
        Fut: Future<Output = Result<S, E>>,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: UpstreamError + Send + 'static,
    {
        let vector = self.embed_prompt(options.prompt.as_deref()).await;
        if let Some(vector) = &vector
            && let Some(cache) = &self.inner.cache
            && let Some(hit) = cache.get(vector)
        {
            self.emit_cache_hit();
            let items = match hit {
                CachedResponse::Value(value) => vec![value],
                CachedResponse::Chunks(chunks) => chunks,
            };
            return Ok(stream::iter(items.into_iter().map(Ok)).boxed());
        }

        let permit = self.admit::<E>()?;

        let connect = |key: String, token: CancellationToken| {
            let pending = operation(key, token);
            async move {
                let mut stream = match pending.await {
                    Ok(stream) => Box::pin(stream),
                    Err(error) => return Err(error),
                };
                match stream.next().await {
                    Some(Ok(first)) => Ok(Some((first, stream))),
                    Some(Err(error)) => Err(error),
                    None => Ok(None),
                }
            }
        };

        match self.run_attempts(connect, &options).await? {
            Outcome::Fallback(value) => Ok(stream::once(future::ready(Ok(value))).boxed()),
            Outcome::Live(None) => Ok(stream::empty().boxed()),
            Outcome::Live(Some((first, rest))) => {
                let sink = match (vector, options.prompt) {
                    (Some(vector), Some(prompt)) if self.inner.cache.is_some() => Some(ChunkSink {
                        manager: self.clone(),
                        prompt,
                        vector,
                        chunks: Vec::new(),
                    }),
                    _ => None,
                };
                let relay = Relay {
                    first: Some(first),
                    rest,
                    sink,
                    _permit: permit,
                };
                Ok(stream::unfold(relay, Relay::advance).boxed())
            }
        }
    }
}
