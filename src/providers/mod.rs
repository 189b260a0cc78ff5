//! LLM provider abstraction: a single trait implemented once per upstream,
//! plus the Key Store and Router that select among them.
//!
//! Shaped after the `gemini.rs` provider module: an auth/request type per
//! provider, a shared `LLMProvider` trait surface, and one centralized
//! error-classification function rather than per-provider duplication.

pub mod key_store;
pub mod openai_compat;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Usage {
    /// The single number this provider reports as "tokens used" for this
    /// call — trusted as-is, never re-derived from sub-fields (see
    /// DESIGN.md's Open Question decision on token-counting convention).
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub text: String,
    pub usage: Usage,
    /// Name of the provider that actually answered, filled in by the
    /// Router after a successful call (providers themselves don't know
    /// their own place in the priority list).
    pub provider: String,
}

/// Classification of an outbound LLM call failure, driving the Router's
/// retry/cooldown/failover policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCallError {
    RateLimited,
    Auth,
    Timeout,
    Server5xx,
    Other,
}

impl std::fmt::Display for ProviderCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderCallError::RateLimited => "rate_limited",
            ProviderCallError::Auth => "auth",
            ProviderCallError::Timeout => "timeout",
            ProviderCallError::Server5xx => "server_5xx",
            ProviderCallError::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Classify a `reqwest` result into the failure taxonomy the Router acts on.
/// The single authoritative classifier — every provider implementation
/// calls this instead of inspecting status codes itself.
pub fn classify_result(
    result: &Result<reqwest::Response, reqwest::Error>,
) -> Option<ProviderCallError> {
    match result {
        Ok(resp) => {
            let status = resp.status();
            if status.as_u16() == 429 {
                Some(ProviderCallError::RateLimited)
            } else if status.as_u16() == 401 || status.as_u16() == 403 {
                Some(ProviderCallError::Auth)
            } else if status.is_server_error() {
                Some(ProviderCallError::Server5xx)
            } else if status.is_success() {
                None
            } else {
                Some(ProviderCallError::Other)
            }
        }
        Err(e) if e.is_timeout() => Some(ProviderCallError::Timeout),
        Err(_) => Some(ProviderCallError::Other),
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Stable provider name, matching the keys in `AppConfig.llm_keys` and
    /// `llm_provider_priority`.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        key_material: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<LLMResponse, ProviderCallError>;
}
