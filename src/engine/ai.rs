// ==========================================
// 商品目录导入引擎 - AI 加工
// ==========================================
// 职责: 调用外部文本生成提供方（超时 + 有界重试 + 指数退避）
// 缓存: (provider, model, prompt) 内容哈希 → 响应,跨任务共享,TTL 过期
// 红线: 单字段 AI 失败不得中止导入,由流水线降级为回退值
// ==========================================

use crate::config::AiSettings;
use crate::domain::AiSpec;
use crate::engine::error::{ProcessingError, ProcessingResult};
use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 单次 AI 调用请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRequest {
    pub provider: String,
    pub model: String,
    pub prompt: String,
}

// ==========================================
// AiProvider Trait - 外部文本生成提供方
// ==========================================
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// 提供方名称（注册键）
    fn name(&self) -> &str;

    /// 执行一次调用; 超时由调用方控制
    async fn complete(&self, request: &AiRequest) -> anyhow::Result<String>;
}

// ==========================================
// AiProviderRegistry - 提供方注册表
// ==========================================
#[derive(Default, Clone)]
pub struct AiProviderRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
}

impl AiProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AiProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ==========================================
// AiResponseCache - 响应缓存
// ==========================================
// 同键同值,并发写入无害
#[derive(Clone)]
pub struct AiResponseCache {
    inner: Cache<String, Arc<String>>,
}

impl AiResponseCache {
    pub fn new(max_capacity: u64, ttl: std::time::Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    pub fn from_settings(settings: &AiSettings) -> Self {
        Self::new(settings.cache_capacity, settings.cache_ttl())
    }

    /// 缓存键: sha256(provider \0 model \0 prompt)
    pub fn cache_key(request: &AiRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.provider.as_bytes());
        hasher.update([0u8]);
        hasher.update(request.model.as_bytes());
        hasher.update([0u8]);
        hasher.update(request.prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn get(&self, request: &AiRequest) -> Option<Arc<String>> {
        self.inner.get(&Self::cache_key(request)).await
    }

    pub async fn insert(&self, request: &AiRequest, response: String) {
        self.inner
            .insert(Self::cache_key(request), Arc::new(response))
            .await;
    }
}

// ==========================================
// AiProcessor - AI 加工阶段
// ==========================================
#[derive(Clone)]
pub struct AiProcessor {
    registry: AiProviderRegistry,
    cache: AiResponseCache,
    settings: AiSettings,
}

impl AiProcessor {
    pub fn new(registry: AiProviderRegistry, cache: AiResponseCache, settings: AiSettings) -> Self {
        Self {
            registry,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &AiSettings {
        &self.settings
    }

    /// 构造请求: 提供方取映射声明,否则取默认提供方
    pub fn build_request(&self, spec: &AiSpec, value: &str) -> ProcessingResult<AiRequest> {
        let provider = spec
            .provider
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.settings.default_provider.clone())
            .ok_or_else(|| ProcessingError::ProviderError {
                provider: String::new(),
                message: "未配置 AI 提供方".to_string(),
            })?;

        Ok(AiRequest {
            provider,
            model: spec.model.clone(),
            prompt: spec.render_prompt(value),
        })
    }

    /// 执行 AI 加工（命中缓存则不调用提供方）
    pub async fn process(&self, spec: &AiSpec, value: &str) -> ProcessingResult<String> {
        let request = self.build_request(spec, value)?;

        if let Some(cached) = self.cache.get(&request).await {
            debug!(provider = %request.provider, "AI 响应缓存命中");
            return Ok(cached.as_ref().clone());
        }

        let provider = self
            .registry
            .get(&request.provider)
            .ok_or_else(|| ProcessingError::ProviderError {
                provider: request.provider.clone(),
                message: "提供方未注册".to_string(),
            })?;

        let response = self.call_with_retry(provider.as_ref(), &request).await?;
        self.cache.insert(&request, response.clone()).await;
        Ok(response)
    }

    async fn call_with_retry(
        &self,
        provider: &dyn AiProvider,
        request: &AiRequest,
    ) -> ProcessingResult<String> {
        let max_attempts = self.settings.max_retries.saturating_add(1);
        let timeout = self.settings.timeout();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let error = match tokio::time::timeout(timeout, provider.complete(request)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => ProcessingError::ProviderError {
                    provider: request.provider.clone(),
                    message: e.to_string(),
                },
                Err(_) => ProcessingError::ProviderTimeout {
                    provider: request.provider.clone(),
                    timeout_ms: self.settings.timeout_ms,
                },
            };

            warn!(
                provider = %request.provider,
                attempt = attempt + 1,
                max_attempts,
                error = %error,
                "AI 调用失败"
            );
            last_error = Some(error);

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.settings.backoff(attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| ProcessingError::ProviderError {
            provider: request.provider.clone(),
            message: "未执行任何调用".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl AiProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, request: &AiRequest) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("upstream 503");
            }
            Ok(format!("AI[{}]", request.prompt))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl AiProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _request: &AiRequest) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn fast_settings(default_provider: &str) -> AiSettings {
        AiSettings {
            default_provider: Some(default_provider.to_string()),
            timeout_ms: 50,
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..AiSettings::default()
        }
    }

    fn processor(provider: Arc<dyn AiProvider>) -> AiProcessor {
        let settings = fast_settings(provider.name());
        AiProcessor::new(
            AiProviderRegistry::new().with(provider),
            AiResponseCache::from_settings(&settings),
            settings,
        )
    }

    #[tokio::test]
    async fn test_retry_then_success_and_cache_hit() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let ai = processor(provider.clone());
        let spec = AiSpec::new("Rewrite: {value}");

        let first = ai.process(&spec, "shirt").await.unwrap();
        assert_eq!(first, "AI[Rewrite: shirt]");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        let second = ai.process(&spec, "shirt").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_provider_error() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let ai = processor(provider.clone());

        let result = ai.process(&AiSpec::new("x {value}"), "y").await;
        assert!(matches!(result, Err(ProcessingError::ProviderError { .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_provider_timeout() {
        let ai = processor(Arc::new(SlowProvider));
        let result = ai.process(&AiSpec::new("{value}"), "y").await;
        assert!(matches!(result, Err(ProcessingError::ProviderTimeout { .. })));
    }

    #[test]
    fn test_cache_key_separates_fields() {
        let a = AiRequest {
            provider: "p".into(),
            model: "ab".into(),
            prompt: "c".into(),
        };
        let b = AiRequest {
            provider: "p".into(),
            model: "a".into(),
            prompt: "bc".into(),
        };
        assert_ne!(AiResponseCache::cache_key(&a), AiResponseCache::cache_key(&b));
        assert_eq!(AiResponseCache::cache_key(&a).len(), 64);
    }
}
