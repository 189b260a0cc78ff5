//! `POST /api/synthesize` — summarizes a set of previously-seen papers
//! through the LLM Router, bypassing intent classification and adapter
//! fan-out since the caller already knows which papers it wants.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::papers::Paper;
use crate::providers::{ChatMessage, ChatOptions};

use super::super::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub paper_ids: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SynthesizeResponse {
    pub summary: String,
    pub model: String,
    pub tokens_used: u64,
}

pub async fn synthesize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SynthesizeRequest>,
) -> Result<Json<SynthesizeResponse>> {
    if body.paper_ids.is_empty() {
        return Err(AppError::MalformedRequest("paper_ids must not be empty".to_string()));
    }

    let mut papers: Vec<Paper> = Vec::with_capacity(body.paper_ids.len());
    for id in &body.paper_ids {
        match state.paper_cache.get(id) {
            Some(paper) => papers.push(paper),
            None => return Err(AppError::UnknownPaper(id.clone())),
        }
    }

    let prompt = build_prompt(&papers, body.style.as_deref(), body.focus.as_deref());
    let messages = vec![ChatMessage {
        role: "user".to_string(),
        content: prompt,
    }];
    let response = state.router.complete(&messages, &ChatOptions::default()).await?;

    Ok(Json(SynthesizeResponse {
        summary: response.text,
        model: response.provider,
        tokens_used: response.usage.total_tokens,
    }))
}

fn build_prompt(papers: &[Paper], style: Option<&str>, focus: Option<&str>) -> String {
    let mut prompt = String::from(
        "Summarize the following papers for a researcher. Ground every claim in the abstracts given; do not invent findings.\n\n",
    );
    for paper in papers {
        let authors = paper.authors.join(", ");
        let year = paper
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "unknown year".to_string());
        prompt.push_str(&format!("- \"{}\" ({authors}, {year})\n", paper.title));
        if let Some(abstract_text) = &paper.abstract_text {
            prompt.push_str(&format!("  Abstract: {abstract_text}\n"));
        }
    }
    if let Some(style) = style {
        prompt.push_str(&format!("\nStyle: {style}\n"));
    }
    if let Some(focus) = focus {
        prompt.push_str(&format!("Focus on: {focus}\n"));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserStore;
    use crate::config::AppConfig;
    use crate::finance::market_data::MarketDataClient;
    use crate::finance::{FactsStore, FinanceAdapter, SymbolMap};
    use crate::papers::PaperCache;
    use crate::pipeline::QueryPipeline;
    use crate::providers::key_store::KeyStore;
    use crate::providers::router::LlmRouter;
    use crate::quota::QuotaLedger;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, Arc<AppState>, Arc<PaperCache>) {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(AppConfig::default());
        let users = Arc::new(UserStore::load_or_default(tmp.path().join("users.json")));
        let quota = Arc::new(QuotaLedger::load_or_default(
            tmp.path().join("quota.json"),
            config.daily_ceiling,
        ));
        let key_store = Arc::new(KeyStore::from_config(&config));
        let router = Arc::new(LlmRouter::new(HashMap::new(), &config, key_store));
        let facts_store = Arc::new(FactsStore::new(
            config.fact_cache_ttl_secs,
            config.duration_band_q_days,
            config.duration_band_a_days,
        ));
        let symbol_map = Arc::new(SymbolMap::seeded());
        let market_data = Arc::new(MarketDataClient::new());
        let finance = Arc::new(FinanceAdapter::new(facts_store, symbol_map, market_data));
        let web_search = Arc::new(crate::websearch::WebSearchClient::new(&config));
        let paper_cache = Arc::new(PaperCache::new());
        let pipeline = Arc::new(QueryPipeline::new(
            Arc::clone(&quota),
            Arc::clone(&router),
            Arc::clone(&finance),
            Vec::new(),
            Arc::clone(&paper_cache),
            web_search,
            config.t_fanout(),
            config.conversation_history_n,
        ));
        let state = Arc::new(AppState::new(
            config,
            users,
            quota,
            finance,
            pipeline,
            router,
            Arc::clone(&paper_cache),
        ));
        (tmp, state, paper_cache)
    }

    fn sample_paper(id: &str) -> Paper {
        Paper {
            paper_id: id.to_string(),
            title: "Duration-filtered period matching".to_string(),
            authors: vec!["A. Researcher".to_string()],
            year: Some(2023),
            venue: None,
            doi: None,
            abstract_text: Some("We study period coherence in financial facts.".to_string()),
            source: "openalex".to_string(),
            relevance: None,
        }
    }

    #[tokio::test]
    async fn unknown_paper_id_rejected() {
        let (_tmp, state, _cache) = test_state();
        let result = synthesize(
            State(state),
            Json(SynthesizeRequest {
                paper_ids: vec!["missing-id".to_string()],
                style: None,
                focus: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::UnknownPaper(id)) if id == "missing-id"));
    }

    #[tokio::test]
    async fn empty_paper_ids_rejected() {
        let (_tmp, state, _cache) = test_state();
        let result = synthesize(
            State(state),
            Json(SynthesizeRequest {
                paper_ids: Vec::new(),
                style: None,
                focus: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::MalformedRequest(_))));
    }

    #[test]
    fn prompt_includes_title_and_abstract() {
        let papers = vec![sample_paper("p1")];
        let prompt = build_prompt(&papers, Some("concise"), Some("methodology"));
        assert!(prompt.contains("Duration-filtered period matching"));
        assert!(prompt.contains("period coherence"));
        assert!(prompt.contains("Style: concise"));
        assert!(prompt.contains("Focus on: methodology"));
    }

    #[tokio::test]
    async fn cached_paper_resolves_without_network() {
        let (_tmp, _state, cache) = test_state();
        cache.insert_all(&[sample_paper("p1")]);
        assert!(cache.get("p1").is_some());
        assert!(cache.get("missing").is_none());
    }
}
