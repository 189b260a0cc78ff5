//! Paper Adapter: fans out to academic-paper sources concurrently,
//! normalizes and validates records, deduplicates across sources, and
//! ranks the merged result.
//!
//! Shaped like the LLM provider surface: one small struct per upstream
//! implementing a shared async trait, `reqwest` as the common client, and
//! one orchestrator that owns fan-out/dedup/ranking rather than leaving it
//! to each source.

pub mod openalex;
pub mod semantic_scholar;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub paper_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub doi: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub source: String,
    /// Source-supplied relevance score, if any. Sources without one sort
    /// after every source that provides one.
    #[serde(skip)]
    pub relevance: Option<f32>,
}

impl Paper {
    /// Minimum metadata check. A Paper with an empty title or no year
    /// never reaches the synthesis prompt.
    pub fn has_minimum_metadata(&self) -> bool {
        !self.title.trim().is_empty() && self.year.is_some()
    }

    fn dedup_key(&self) -> String {
        if let Some(doi) = &self.doi {
            return format!("doi:{}", doi.to_lowercase());
        }
        let first_author = self
            .authors
            .first()
            .map(|a| a.to_lowercase())
            .unwrap_or_default();
        format!(
            "ty:{}|{}|{}",
            self.title.trim().to_lowercase(),
            self.year.unwrap_or(0),
            first_author
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperSourceError {
    /// Client-side validation failure (e.g. HTTP 422): the caller retries
    /// once with a reduced parameter set before giving up on this source.
    Validation,
    Other,
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Paper>, PaperSourceError>;
}

pub struct PaperSearchResult {
    pub papers: Vec<Paper>,
    pub empty_results: bool,
}

/// Concurrent per-source fetch under `per_source_timeout`, minimum-metadata
/// validation, cross-source dedup, and relevance-ranked merge capped at
/// `limit`.
pub async fn search_papers(
    sources: &[&(dyn PaperSource)],
    query: &str,
    limit: usize,
    per_source_timeout: Duration,
) -> PaperSearchResult {
    let fetches = sources.iter().map(|source| {
        let query = query.to_string();
        async move {
            let first = timeout(per_source_timeout, source.search(&query, limit)).await;
            match first {
                Ok(Ok(papers)) => papers,
                Ok(Err(PaperSourceError::Validation)) => {
                    // Retry once with a reduced parameter set (half the
                    // limit, floor of 1) before excluding the source.
                    let reduced_limit = (limit / 2).max(1);
                    match timeout(per_source_timeout, source.search(&query, reduced_limit)).await {
                        Ok(Ok(papers)) => papers,
                        _ => {
                            tracing::warn!(source = source.name(), "paper source excluded after retry");
                            Vec::new()
                        }
                    }
                }
                Ok(Err(PaperSourceError::Other)) => {
                    tracing::warn!(source = source.name(), "paper source returned an error");
                    Vec::new()
                }
                Err(_) => {
                    tracing::warn!(source = source.name(), "paper source timed out");
                    Vec::new()
                }
            }
        }
    });

    let per_source_results = join_all(fetches).await;
    let all: Vec<Paper> = per_source_results.into_iter().flatten().collect();

    let validated: Vec<Paper> = all.into_iter().filter(Paper::has_minimum_metadata).collect();

    let mut seen = HashSet::new();
    let mut deduped = Vec::new();
    for paper in validated {
        if seen.insert(paper.dedup_key()) {
            deduped.push(paper);
        }
    }

    // Sources without a relevance score sort after those that provide one;
    // stable within each bucket.
    deduped.sort_by(|a, b| match (a.relevance, b.relevance) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    deduped.truncate(limit);
    let empty_results = deduped.is_empty();

    PaperSearchResult {
        papers: deduped,
        empty_results,
    }
}

/// Bounded in-memory cache of papers seen in search results, so
/// `/api/synthesize` can resolve a `paper_id` to the record a prior
/// `/api/search` or `/query` call surfaced without a durable papers table.
const PAPER_CACHE_CAPACITY: usize = 1_000;

pub struct PaperCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    by_id: HashMap<String, Paper>,
    order: VecDeque<String>,
}

impl PaperCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                by_id: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn insert_all(&self, papers: &[Paper]) {
        let mut inner = self.inner.lock().unwrap();
        for paper in papers {
            if !inner.by_id.contains_key(&paper.paper_id) {
                inner.order.push_back(paper.paper_id.clone());
            }
            inner.by_id.insert(paper.paper_id.clone(), paper.clone());
        }
        while inner.order.len() > PAPER_CACHE_CAPACITY {
            if let Some(oldest) = inner.order.pop_front() {
                inner.by_id.remove(&oldest);
            }
        }
    }

    pub fn get(&self, paper_id: &str) -> Option<Paper> {
        self.inner.lock().unwrap().by_id.get(paper_id).cloned()
    }
}

impl Default for PaperCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(title: &str, year: Option<i32>, doi: Option<&str>, author: &str) -> Paper {
        Paper {
            paper_id: format!("p-{title}"),
            title: title.to_string(),
            authors: vec![author.to_string()],
            year,
            venue: None,
            doi: doi.map(str::to_string),
            abstract_text: None,
            source: "test".to_string(),
            relevance: None,
        }
    }

    #[test]
    fn missing_title_fails_minimum_metadata() {
        let p = paper("", Some(2020), None, "A");
        assert!(!p.has_minimum_metadata());
    }

    #[test]
    fn missing_year_fails_minimum_metadata() {
        let p = paper("Title", None, None, "A");
        assert!(!p.has_minimum_metadata());
    }

    #[test]
    fn valid_paper_passes_minimum_metadata() {
        let p = paper("Title", Some(2020), None, "A");
        assert!(p.has_minimum_metadata());
    }

    #[test]
    fn dedup_key_prefers_doi() {
        let a = paper("Title A", Some(2020), Some("10.1/X"), "Smith");
        let b = paper("Title A (preprint)", Some(2020), Some("10.1/X"), "Smith");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_falls_back_to_title_year_author() {
        let a = paper("Same Title", Some(2021), None, "Jones");
        let b = paper("same title", Some(2021), None, "jones");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    struct EmptySource;

    #[async_trait]
    impl PaperSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Paper>, PaperSourceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn empty_results_flagged_when_nothing_found() {
        let sources: Vec<&(dyn PaperSource)> = vec![&EmptySource];
        let result = search_papers(&sources, "zxqv nonsense 7742", 5, Duration::from_secs(1)).await;
        assert!(result.papers.is_empty());
        assert!(result.empty_results);
    }

    struct DuplicateAcrossSources(&'static str);

    #[async_trait]
    impl PaperSource for DuplicateAcrossSources {
        fn name(&self) -> &str {
            self.0
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Paper>, PaperSourceError> {
            Ok(vec![paper("Shared Paper", Some(2022), Some("10.9/Z"), "Lee")])
        }
    }

    #[tokio::test]
    async fn dedups_across_sources_by_doi() {
        let a = DuplicateAcrossSources("source-a");
        let b = DuplicateAcrossSources("source-b");
        let sources: Vec<&(dyn PaperSource)> = vec![&a, &b];
        let result = search_papers(&sources, "shared paper", 10, Duration::from_secs(1)).await;
        assert_eq!(result.papers.len(), 1);
        assert!(!result.empty_results);
    }

    struct TimeoutSource;

    #[async_trait]
    impl PaperSource for TimeoutSource {
        fn name(&self) -> &str {
            "slow"
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Paper>, PaperSourceError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn per_source_timeout_excludes_slow_source_without_failing_request() {
        let sources: Vec<&(dyn PaperSource)> = vec![&TimeoutSource];
        let result = search_papers(&sources, "q", 5, Duration::from_millis(10)).await;
        assert!(result.empty_results);
    }

    #[test]
    fn paper_cache_roundtrip() {
        let cache = PaperCache::new();
        let p = paper("Cached", Some(2020), None, "Author");
        cache.insert_all(&[p.clone()]);
        assert_eq!(cache.get(&p.paper_id).unwrap().title, "Cached");
        assert!(cache.get("missing-id").is_none());
    }
}
