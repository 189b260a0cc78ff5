//! Shared client for OpenAI-compatible chat-completion endpoints
//! (Cerebras, Groq, Cloudflare Workers AI, etc.), parameterized by base URL
//! and model name rather than duplicated per provider.
//!
//! Mirrors `gemini.rs`'s shape: one struct per upstream, a single
//! `complete()` entry point, and reliance on the centralized
//! `classify_result` for failure taxonomy instead of inspecting status
//! codes inline.

use async_trait::async_trait;
use serde_json::json;

use super::{classify_result, ChatMessage, ChatOptions, LLMProvider, LLMResponse, ProviderCallError, Usage};

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        key_material: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<LLMResponse, ProviderCallError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        let send = self
            .client
            .post(&self.base_url)
            .bearer_auth(key_material)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;

        if let Some(err) = classify_result(&send) {
            return Err(err);
        }
        let resp = send.map_err(|_| ProviderCallError::Other)?;

        let value: serde_json::Value = resp.json().await.map_err(|_| ProviderCallError::Other)?;

        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let total_tokens = value["usage"]["total_tokens"].as_u64().unwrap_or(0);

        Ok(LLMResponse {
            text,
            usage: Usage { total_tokens },
            provider: self.name.clone(),
        })
    }
}
