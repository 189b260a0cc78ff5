//! LLM Router: priority-ordered provider selection with key rotation,
//! failure classification, and bounded retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::error::{AppError, Result};

use super::key_store::KeyStore;
use super::{ChatMessage, ChatOptions, LLMProvider, LLMResponse, ProviderCallError};

pub struct LlmRouter {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    priority: Vec<String>,
    key_store: Arc<KeyStore>,
    max_attempts: u32,
    cooldown_secs: u64,
    /// One semaphore per provider bounding concurrent in-flight calls
    /// (default 4 per provider). A provider missing from this map (none
    /// configured) is never selected in the first place.
    provider_semaphores: HashMap<String, Arc<Semaphore>>,
    t_wait: Duration,
}

impl LlmRouter {
    pub fn new(
        providers: HashMap<String, Arc<dyn LLMProvider>>,
        config: &AppConfig,
        key_store: Arc<KeyStore>,
    ) -> Self {
        let concurrency = config.llm_concurrency_per_provider.max(1);
        let provider_semaphores = config
            .llm_provider_priority
            .iter()
            .map(|p| (p.clone(), Arc::new(Semaphore::new(concurrency))))
            .collect();
        Self {
            providers,
            priority: config.llm_provider_priority.clone(),
            key_store,
            max_attempts: config.max_attempts,
            cooldown_secs: config.t_cool_secs,
            provider_semaphores,
            t_wait: config.t_wait(),
        }
    }

    /// Pick the first priority provider with an eligible key, try keys
    /// round-robin, classify failures, retry/cooldown/failover within
    /// `max_attempts`.
    pub async fn complete(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<LLMResponse> {
        let mut attempts = 0u32;
        let mut excluded_providers: Vec<String> = Vec::new();
        let mut consecutive_failures: HashMap<String, u32> = HashMap::new();

        loop {
            if attempts >= self.max_attempts {
                return Err(AppError::LlmError("max attempts exceeded".to_string()));
            }

            let Some(provider_name) = self
                .priority
                .iter()
                .find(|p| !excluded_providers.contains(*p) && self.key_store.has_eligible_key(p))
                .cloned()
            else {
                return Err(AppError::NoCapacity);
            };

            let Some(selected) = self.key_store.select_next(&provider_name) else {
                excluded_providers.push(provider_name);
                continue;
            };

            let Some(provider) = self.providers.get(&provider_name) else {
                excluded_providers.push(provider_name);
                continue;
            };

            attempts += 1;

            // Backpressure: bound concurrent in-flight calls per provider.
            // Wait up to t_wait for a permit; if none frees up, this
            // provider is BUSY for this attempt and we fail the request
            // rather than queue indefinitely (no other provider is implied
            // busy, so we don't treat this as a failover trigger).
            let _permit = match self.provider_semaphores.get(&provider_name) {
                Some(sem) => match tokio::time::timeout(self.t_wait, sem.acquire()).await {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) | Err(_) => return Err(AppError::Busy),
                },
                None => None,
            };

            match provider.complete(&selected.key_material, messages, options).await {
                Ok(mut response) => {
                    self.key_store.record_success(&provider_name, selected.index);
                    response.provider = provider_name;
                    return Ok(response);
                }
                Err(ProviderCallError::RateLimited) | Err(ProviderCallError::Auth) => {
                    self.key_store.mark_exhausted_today(&provider_name, selected.index);
                }
                Err(ProviderCallError::Timeout) | Err(ProviderCallError::Server5xx) => {
                    self.key_store.mark_cooldown(&provider_name, selected.index, self.cooldown_secs);
                    let count = consecutive_failures.entry(provider_name.clone()).or_insert(0);
                    *count += 1;
                    if *count >= 2 {
                        excluded_providers.push(provider_name);
                    }
                }
                Err(ProviderCallError::Other) => {
                    return Err(AppError::LlmError(format!("provider {provider_name} call failed")));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::config::LlmKeyConfig;
    use crate::providers::Usage;

    struct ScriptedProvider {
        name: String,
        calls: AtomicU32,
        outcomes: Vec<Result<LLMResponse, ProviderCallError>>,
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            _key_material: &str,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<LLMResponse, ProviderCallError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match &self.outcomes[i.min(self.outcomes.len() - 1)] {
                Ok(r) => Ok(LLMResponse {
                    text: r.text.clone(),
                    usage: Usage {
                        total_tokens: r.usage.total_tokens,
                    },
                    provider: r.provider.clone(),
                }),
                Err(e) => Err(*e),
            }
        }
    }

    fn cfg_with_priority(providers: &[&str]) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm_provider_priority = providers.iter().map(|s| s.to_string()).collect();
        for p in providers {
            cfg.llm_keys.insert(
                p.to_string(),
                vec![LlmKeyConfig {
                    key_material: format!("{p}-key"),
                    daily_request_limit: 1000,
                }],
            );
        }
        cfg
    }

    #[tokio::test]
    async fn success_on_first_provider() {
        let cfg = cfg_with_priority(&["cerebras"]);
        let key_store = Arc::new(KeyStore::from_config(&cfg));
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert(
            "cerebras".to_string(),
            Arc::new(ScriptedProvider {
                name: "cerebras".to_string(),
                calls: AtomicU32::new(0),
                outcomes: vec![Ok(LLMResponse {
                    text: "hello".to_string(),
                    usage: Usage { total_tokens: 42 },
                    provider: String::new(),
                })],
            }),
        );
        let router = LlmRouter::new(providers, &cfg, key_store);
        let result = router
            .complete(&[ChatMessage { role: "user".into(), content: "hi".into() }], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "hello");
        assert_eq!(result.usage.total_tokens, 42);
    }

    #[tokio::test]
    async fn failover_to_second_provider_on_rate_limit() {
        let cfg = cfg_with_priority(&["cerebras", "groq"]);
        let key_store = Arc::new(KeyStore::from_config(&cfg));
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert(
            "cerebras".to_string(),
            Arc::new(ScriptedProvider {
                name: "cerebras".to_string(),
                calls: AtomicU32::new(0),
                outcomes: vec![Err(ProviderCallError::RateLimited)],
            }),
        );
        providers.insert(
            "groq".to_string(),
            Arc::new(ScriptedProvider {
                name: "groq".to_string(),
                calls: AtomicU32::new(0),
                outcomes: vec![Ok(LLMResponse {
                    text: "from groq".to_string(),
                    usage: Usage { total_tokens: 10 },
                    provider: String::new(),
                })],
            }),
        );
        let router = LlmRouter::new(providers, &cfg, Arc::clone(&key_store));
        let result = router
            .complete(&[ChatMessage { role: "user".into(), content: "hi".into() }], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "from groq");
        // the rate-limited key's requests_today stays untouched, only marked ineligible
        assert_eq!(key_store.requests_today("cerebras", 0), Some(0));
    }

    #[tokio::test]
    async fn no_capacity_when_all_keys_exhausted() {
        let cfg = cfg_with_priority(&["cerebras"]);
        let key_store = Arc::new(KeyStore::from_config(&cfg));
        key_store.mark_exhausted_today("cerebras", 0);
        let providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        let router = LlmRouter::new(providers, &cfg, key_store);
        let result = router
            .complete(&[ChatMessage { role: "user".into(), content: "hi".into() }], &ChatOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::NoCapacity)));
    }

    #[tokio::test]
    async fn busy_when_provider_semaphore_exhausted() {
        let mut cfg = cfg_with_priority(&["cerebras"]);
        cfg.llm_concurrency_per_provider = 1;
        cfg.t_wait_secs = 0;
        let key_store = Arc::new(KeyStore::from_config(&cfg));
        let providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::from([(
            "cerebras".to_string(),
            Arc::new(ScriptedProvider {
                name: "cerebras".to_string(),
                calls: AtomicU32::new(0),
                outcomes: vec![Ok(LLMResponse {
                    text: "unreachable".to_string(),
                    usage: Usage { total_tokens: 1 },
                    provider: String::new(),
                })],
            }) as Arc<dyn LLMProvider>,
        )]);
        let router = LlmRouter::new(providers, &cfg, key_store);
        // Hold the provider's only permit so the router can't acquire one.
        let _held = router.provider_semaphores["cerebras"].acquire().await.unwrap();
        let result = router
            .complete(&[ChatMessage { role: "user".into(), content: "hi".into() }], &ChatOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::Busy)));
    }

    #[tokio::test]
    async fn other_error_propagates_immediately() {
        let cfg = cfg_with_priority(&["cerebras"]);
        let key_store = Arc::new(KeyStore::from_config(&cfg));
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert(
            "cerebras".to_string(),
            Arc::new(ScriptedProvider {
                name: "cerebras".to_string(),
                calls: AtomicU32::new(0),
                outcomes: vec![Err(ProviderCallError::Other)],
            }),
        );
        let router = LlmRouter::new(providers, &cfg, key_store);
        let result = router
            .complete(&[ChatMessage { role: "user".into(), content: "hi".into() }], &ChatOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::LlmError(_))));
    }
}
