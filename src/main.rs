//! citeforge: citation-grounded research assistant backend.
//!
//! Wires every shared singleton once in `main` and hands them to the HTTP
//! layer via `AppState`, the same construct-once/thread-with-Arc shape the
//! config and auth modules document.

mod api;
mod auth;
mod config;
mod error;
mod finance;
mod papers;
mod pipeline;
mod providers;
mod quota;
mod websearch;

use std::collections::HashMap;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use config::{AppConfig, LogFormat};
use finance::{FinanceAdapter, FactsStore, SymbolMap};
use finance::market_data::MarketDataClient;
use papers::openalex::OpenAlexSource;
use papers::semantic_scholar::SemanticScholarSource;
use papers::PaperSource;
use providers::key_store::KeyStore;
use providers::openai_compat::OpenAiCompatProvider;
use providers::router::LlmRouter;
use providers::LLMProvider;
use quota::QuotaLedger;
use websearch::WebSearchClient;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

fn build_llm_providers(config: &AppConfig) -> HashMap<String, Arc<dyn LLMProvider>> {
    let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
    for provider_name in config.llm_keys.keys() {
        let (base_url, model) = match provider_name.as_str() {
            "cerebras" => ("https://api.cerebras.ai/v1/chat/completions", "llama3.1-8b"),
            "groq" => ("https://api.groq.com/openai/v1/chat/completions", "llama-3.1-8b-instant"),
            "cloudflare" => (
                "https://api.cloudflare.com/client/v4/accounts/workers-ai/run/chat/completions",
                "@cf/meta/llama-3.1-8b-instruct",
            ),
            _ => continue,
        };
        providers.insert(
            provider_name.clone(),
            Arc::new(OpenAiCompatProvider::new(
                provider_name.clone(),
                base_url,
                model,
                config.t_llm(),
            )),
        );
    }
    providers
}

fn build_paper_sources(config: &AppConfig) -> Vec<Arc<dyn PaperSource>> {
    let mut sources: Vec<Arc<dyn PaperSource>> = Vec::new();
    for name in &config.paper_sources {
        match name.as_str() {
            "openalex" => sources.push(Arc::new(OpenAlexSource::new())),
            "semantic_scholar" => sources.push(Arc::new(SemanticScholarSource::new())),
            _ => tracing::warn!(source = %name, "unknown paper source in PAPER_SOURCES, ignoring"),
        }
    }
    sources
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env();
    init_tracing(&config);

    let user_store = Arc::new(auth::UserStore::load_or_default(config.state_path("users.json")));
    let quota = Arc::new(QuotaLedger::load_or_default(
        config.state_path("quota.json"),
        config.daily_ceiling,
    ));

    let key_store = Arc::new(KeyStore::from_config(&config));
    let llm_providers = build_llm_providers(&config);
    let router = Arc::new(LlmRouter::new(llm_providers, &config, key_store));

    let symbol_map = Arc::new(SymbolMap::seeded());
    let facts_store = Arc::new(FactsStore::with_concurrency(
        config.fact_cache_ttl_secs,
        config.duration_band_q_days,
        config.duration_band_a_days,
        config.sec_concurrency,
        config.t_wait(),
    ));
    let market_data = Arc::new(MarketDataClient::new());
    let finance_adapter = Arc::new(FinanceAdapter::new(facts_store, symbol_map, market_data));

    let paper_sources = build_paper_sources(&config);
    let web_search = Arc::new(WebSearchClient::new(&config));
    let paper_cache = Arc::new(papers::PaperCache::new());

    let query_pipeline = Arc::new(pipeline::QueryPipeline::new(
        Arc::clone(&quota),
        Arc::clone(&router),
        Arc::clone(&finance_adapter),
        paper_sources,
        Arc::clone(&paper_cache),
        Arc::clone(&web_search),
        config.t_fanout(),
        config.conversation_history_n,
    ));

    let config = Arc::new(config);
    let state = api::AppState::new(
        Arc::clone(&config),
        user_store,
        quota,
        finance_adapter,
        query_pipeline,
        Arc::clone(&router),
        paper_cache,
    );

    api::start_server(&config, state).await
}
