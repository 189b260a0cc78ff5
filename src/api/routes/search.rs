//! `POST /api/search` — direct access to the Paper Adapter, independent of
//! the Query Pipeline's intent classification.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::papers::{self, openalex::OpenAlexSource, semantic_scholar::SemanticScholarSource, Paper, PaperSource};

use super::super::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub papers: Vec<Paper>,
    pub empty_results: bool,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    if body.query.trim().is_empty() {
        return Err(AppError::MalformedRequest("query must not be empty".to_string()));
    }

    let enabled: Vec<String> = body
        .sources
        .unwrap_or_else(|| state.config.paper_sources.clone());

    let openalex = OpenAlexSource::new();
    let semantic_scholar = SemanticScholarSource::new();
    let mut sources: Vec<&(dyn PaperSource)> = Vec::new();
    if enabled.iter().any(|s| s == "openalex") {
        sources.push(&openalex);
    }
    if enabled.iter().any(|s| s == "semantic_scholar") {
        sources.push(&semantic_scholar);
    }

    let result = papers::search_papers(&sources, &body.query, body.limit, Duration::from_secs(10)).await;
    state.paper_cache.insert_all(&result.papers);

    Ok(Json(SearchResponse {
        papers: result.papers,
        empty_results: result.empty_results,
    }))
}
