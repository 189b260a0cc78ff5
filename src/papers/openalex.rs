//! OpenAlex-backed `PaperSource`. OpenAlex requires no API key and returns
//! a relevance-sorted works list by default, which we pass through as
//! `relevance` so it wins ties against sources that report none.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Paper, PaperSource, PaperSourceError};

#[derive(Debug, Deserialize)]
struct WorksResponse {
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: String,
    title: Option<String>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    publication_year: Option<i32>,
    doi: Option<String>,
    #[serde(default)]
    host_venue: Option<Venue>,
    relevance_score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    author: AuthorName,
}

#[derive(Debug, Deserialize)]
struct AuthorName {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Venue {
    display_name: Option<String>,
}

pub struct OpenAlexSource {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAlexSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openalex.org/works".to_string(),
        }
    }
}

impl Default for OpenAlexSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaperSource for OpenAlexSource {
    fn name(&self) -> &str {
        "openalex"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Paper>, PaperSourceError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search", query.to_string()),
                ("per-page", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|_| PaperSourceError::Other)?;

        if resp.status().as_u16() == 422 {
            return Err(PaperSourceError::Validation);
        }
        if !resp.status().is_success() {
            return Err(PaperSourceError::Other);
        }

        let body: WorksResponse = resp.json().await.map_err(|_| PaperSourceError::Other)?;

        Ok(body
            .results
            .into_iter()
            .map(|work| Paper {
                paper_id: work.id,
                title: work.title.unwrap_or_default(),
                authors: work
                    .authorships
                    .into_iter()
                    .filter_map(|a| a.author.display_name)
                    .collect(),
                year: work.publication_year,
                venue: work.host_venue.and_then(|v| v.display_name),
                doi: work.doi,
                abstract_text: None,
                source: "openalex".to_string(),
                relevance: work.relevance_score,
            })
            .collect())
    }
}
