//! Semantic Scholar-backed `PaperSource`, used as a second, independent
//! upstream so cross-source dedup has something real to dedup against.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Paper, PaperSource, PaperSourceError};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Vec<PaperRecord>,
}

#[derive(Debug, Deserialize)]
struct PaperRecord {
    #[serde(rename = "paperId")]
    paper_id: String,
    title: Option<String>,
    #[serde(default)]
    authors: Vec<AuthorRecord>,
    year: Option<i32>,
    venue: Option<String>,
    #[serde(rename = "externalIds")]
    external_ids: Option<ExternalIds>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorRecord {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

pub struct SemanticScholarSource {
    client: reqwest::Client,
    base_url: String,
}

impl SemanticScholarSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.semanticscholar.org/graph/v1/paper/search".to_string(),
        }
    }
}

impl Default for SemanticScholarSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaperSource for SemanticScholarSource {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Paper>, PaperSourceError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("query", query.to_string()),
                ("limit", limit.to_string()),
                (
                    "fields",
                    "title,authors,year,venue,externalIds,abstract".to_string(),
                ),
            ])
            .send()
            .await
            .map_err(|_| PaperSourceError::Other)?;

        if resp.status().as_u16() == 400 {
            return Err(PaperSourceError::Validation);
        }
        if !resp.status().is_success() {
            return Err(PaperSourceError::Other);
        }

        let body: SearchResponse = resp.json().await.map_err(|_| PaperSourceError::Other)?;

        Ok(body
            .data
            .into_iter()
            .map(|record| Paper {
                paper_id: record.paper_id,
                title: record.title.unwrap_or_default(),
                authors: record
                    .authors
                    .into_iter()
                    .filter_map(|a| a.name)
                    .collect(),
                year: record.year,
                venue: record.venue,
                doi: record.external_ids.and_then(|ids| ids.doi),
                abstract_text: record.abstract_text,
                source: "semantic_scholar".to_string(),
                relevance: None,
            })
            .collect())
    }
}
