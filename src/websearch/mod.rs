//! Web Search Adapter: last-resort free-text retrieval used only when
//! paper/finance intents did not fire or returned no usable context. A
//! single upstream, no further validation beyond non-empty `url`, and
//! failures degrade to an empty result set rather than a pipeline-level
//! error.

use serde::Deserialize;

use crate::config::AppConfig;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

pub struct WebSearchClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl WebSearchClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.web_search_api_key.clone(),
            base_url: "https://api.search.brave.com/res/v1/web/search".to_string(),
        }
    }

    /// Returns an empty vec on any failure: missing key, network error,
    /// non-2xx response, or unparsable body. The caller never sees an error
    /// from this adapter.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let Some(api_key) = &self.api_key else {
            return Vec::new();
        };

        let response = self
            .client
            .get(&self.base_url)
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .query(&[("q", query.to_string()), ("count", limit.to_string())])
            .send()
            .await;

        let Ok(response) = response else {
            return Vec::new();
        };
        if !response.status().is_success() {
            return Vec::new();
        }
        let Ok(body) = response.json::<BraveSearchResponse>().await else {
            return Vec::new();
        };

        body.web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| {
                let url = r.url?;
                if url.trim().is_empty() {
                    return None;
                }
                Some(SearchResult {
                    title: r.title.unwrap_or_default(),
                    snippet: r.description.unwrap_or_default(),
                    url,
                })
            })
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_with_empty_url_is_excluded() {
        let raw = vec![
            BraveResult {
                title: Some("Has url".to_string()),
                description: Some("snippet".to_string()),
                url: Some("https://example.com".to_string()),
            },
            BraveResult {
                title: Some("No url".to_string()),
                description: Some("snippet".to_string()),
                url: Some("".to_string()),
            },
        ];
        let filtered: Vec<SearchResult> = raw
            .into_iter()
            .filter_map(|r| {
                let url = r.url?;
                if url.trim().is_empty() {
                    return None;
                }
                Some(SearchResult {
                    title: r.title.unwrap_or_default(),
                    snippet: r.description.unwrap_or_default(),
                    url,
                })
            })
            .collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].title, "Has url");
    }

    #[tokio::test]
    async fn missing_api_key_returns_empty_without_network_call() {
        let config = AppConfig {
            web_search_api_key: None,
            ..AppConfig::default()
        };
        let client = WebSearchClient::new(&config);
        let results = client.search("quantum computing", 5).await;
        assert!(results.is_empty());
    }
}
