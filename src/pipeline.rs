//! Query Pipeline: classifies a question into intents, fans adapters out
//! concurrently under a wall-clock budget, assembles a grounded prompt,
//! calls the LLM Router, attaches citations, and debits quota.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use crate::error::{AppError, Result};
use crate::finance::{CalcResult, FinanceAdapter};
use crate::papers::{self, Paper, PaperCache, PaperSource};
use crate::providers::router::LlmRouter;
use crate::providers::{ChatMessage, ChatOptions};
use crate::quota::{QuotaCheckResult, QuotaDebitResult, QuotaLedger};
use crate::websearch::{SearchResult, WebSearchClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    PaperSearch,
    FinanceFact,
    WebLookup,
    General,
}

/// Cheap keyword classification. Multiple intents may fire; `General`
/// always fires alongside whatever else does, since the LLM still answers
/// in its own words even when adapters contribute grounding context.
pub fn classify(question: &str) -> HashSet<Intent> {
    let q = question.to_lowercase();
    let mut intents = HashSet::new();
    intents.insert(Intent::General);

    const PAPER_WORDS: &[&str] = &["paper", "study", "research", "publication", "journal", "arxiv"];
    const FINANCE_WORDS: &[&str] = &[
        "revenue", "earnings", "stock", "ticker", "margin", "eps", "price", "market cap",
        "net income", "quarter", "10-q", "10-k",
    ];
    const WEB_WORDS: &[&str] = &["latest", "news", "today", "current", "who is", "what is"];

    if PAPER_WORDS.iter().any(|w| q.contains(w)) {
        intents.insert(Intent::PaperSearch);
    }
    if FINANCE_WORDS.iter().any(|w| q.contains(w)) {
        intents.insert(Intent::FinanceFact);
    }
    if WEB_WORDS.iter().any(|w| q.contains(w)) {
        intents.insert(Intent::WebLookup);
    }
    intents
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub kind: &'static str,
    pub id: String,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub tools_used: Vec<&'static str>,
    pub quality_flags: Vec<&'static str>,
    pub tokens_charged: u64,
}

struct GatheredContext {
    papers: Vec<Paper>,
    papers_empty: bool,
    finance: Option<CalcResult>,
    web: Vec<SearchResult>,
    web_empty: bool,
    tools_used: Vec<&'static str>,
    quality_flags: Vec<&'static str>,
}

pub struct QueryPipeline {
    quota: Arc<QuotaLedger>,
    router: Arc<LlmRouter>,
    finance: Arc<FinanceAdapter>,
    paper_sources: Vec<Arc<dyn PaperSource>>,
    paper_cache: Arc<PaperCache>,
    web_search: Arc<WebSearchClient>,
    t_fanout: Duration,
    conversation_history_n: usize,
}

impl QueryPipeline {
    pub fn new(
        quota: Arc<QuotaLedger>,
        router: Arc<LlmRouter>,
        finance: Arc<FinanceAdapter>,
        paper_sources: Vec<Arc<dyn PaperSource>>,
        paper_cache: Arc<PaperCache>,
        web_search: Arc<WebSearchClient>,
        t_fanout: Duration,
        conversation_history_n: usize,
    ) -> Self {
        Self {
            quota,
            router,
            finance,
            paper_sources,
            paper_cache,
            web_search,
            t_fanout,
            conversation_history_n,
        }
    }

    pub async fn handle(
        &self,
        user_id: &str,
        question: &str,
        conversation_history: &[HistoryTurn],
    ) -> Result<QueryResponse> {
        // Step 2: quota precheck. Estimated cost is a conservative flat
        // placeholder; the real debit in step 7 uses the provider's
        // reported count.
        const ESTIMATED_COST: u64 = 500;
        if matches!(
            self.quota.check(user_id, ESTIMATED_COST),
            QuotaCheckResult::Exceeded { .. }
        ) {
            return Err(AppError::QuotaExceeded);
        }

        let intents = classify(question);

        // Step 3: fan-out under T_fanout. Each adapter gets its own budget,
        // so one slow adapter only empties its own slot and flags
        // PARTIAL_CONTEXT rather than discarding everything else that
        // already finished.
        let gathered = self.gather(&intents, question).await;

        // Step 4: assemble prompt.
        let prompt = self.build_prompt(question, conversation_history, &gathered);

        // Step 5: call the LLM Router. A router failure is fatal; no debit.
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: prompt,
        }];
        let response = self.router.complete(&messages, &ChatOptions::default()).await?;

        // Step 6: attach citations, discarding any the model names that
        // were never in the context (hallucination-containment post-filter
        // is implicit here: we only ever offer eligible citations, never
        // trust the model's own citation claims).
        let citations = self.eligible_citations(&gathered);

        let mut quality_flags = gathered.quality_flags.clone();
        if gathered.papers_empty && intents.contains(&Intent::PaperSearch) {
            quality_flags.push("EMPTY_RESULTS");
        }
        if gathered.web_empty && intents.contains(&Intent::WebLookup) {
            quality_flags.push("EMPTY_RESULTS");
        }
        if let Some(calc) = &gathered.finance {
            quality_flags.extend(calc.quality_flags.iter().copied());
        }
        quality_flags.dedup();

        // Step 7: debit quota using the provider's reported token count. A
        // post-hoc debit failure (e.g. a concurrent request pushed the
        // total over) never discards an answer the LLM already produced —
        // the response is still returned, and the caller's *next* request
        // is the one that sees QUOTA_EXCEEDED.
        let tokens_charged = match self.quota.debit(user_id, response.usage.total_tokens) {
            QuotaDebitResult::Ok { tokens_consumed } => tokens_consumed,
            QuotaDebitResult::Exceeded { tokens_consumed } => {
                tracing::warn!(user_id, "quota debit exceeded ceiling post-hoc; returning response anyway");
                tokens_consumed
            }
        };

        Ok(QueryResponse {
            answer_text: response.text,
            citations,
            tools_used: gathered.tools_used,
            quality_flags,
            tokens_charged,
        })
    }

    async fn gather(&self, intents: &HashSet<Intent>, question: &str) -> GatheredContext {
        // Each branch is an independent future, individually budgeted by
        // T_fanout and run concurrently via `tokio::join!`. A slow adapter
        // times out on its own slot — its result is simply empty, flagged
        // PARTIAL_CONTEXT — and never holds up or discards the others.
        let papers_fut = async {
            if intents.contains(&Intent::PaperSearch) {
                let sources: Vec<&(dyn PaperSource)> =
                    self.paper_sources.iter().map(|s| s.as_ref()).collect();
                let result = papers::search_papers(&sources, question, 5, Duration::from_secs(10)).await;
                self.paper_cache.insert_all(&result.papers);
                Some(result)
            } else {
                None
            }
        };

        let finance_fut = async {
            if intents.contains(&Intent::FinanceFact) {
                match extract_finance_triple(question) {
                    Some((ticker, metric, period)) => {
                        Some(self.finance.resolve(&ticker, &metric, &period).await)
                    }
                    None => None,
                }
            } else {
                None
            }
        };

        let web_fut = async {
            if intents.contains(&Intent::WebLookup) {
                Some(self.web_search.search(question, 5).await)
            } else {
                None
            }
        };

        let (papers_timed, finance_timed, web_timed) = tokio::join!(
            timeout(self.t_fanout, papers_fut),
            timeout(self.t_fanout, finance_fut),
            timeout(self.t_fanout, web_fut),
        );

        let mut tools_used = Vec::new();
        let mut quality_flags = Vec::new();

        let (papers, papers_empty) = match papers_timed {
            Ok(Some(result)) => {
                tools_used.push("paper_search");
                (result.papers, result.empty_results)
            }
            Ok(None) => (Vec::new(), true),
            Err(_) => {
                quality_flags.push("PARTIAL_CONTEXT");
                (Vec::new(), true)
            }
        };

        let finance = match finance_timed {
            Ok(Some(Ok(calc))) => {
                tools_used.push("finance_calc");
                Some(calc)
            }
            Ok(Some(Err(_))) => {
                tools_used.push("finance_calc");
                quality_flags.push("EMPTY_RESULTS");
                None
            }
            Ok(None) => None,
            Err(_) => {
                quality_flags.push("PARTIAL_CONTEXT");
                None
            }
        };

        let (web, web_empty) = match web_timed {
            Ok(Some(results)) => {
                tools_used.push("web_search");
                let empty = results.is_empty();
                (results, empty)
            }
            Ok(None) => (Vec::new(), true),
            Err(_) => {
                quality_flags.push("PARTIAL_CONTEXT");
                (Vec::new(), true)
            }
        };

        GatheredContext {
            papers,
            papers_empty,
            finance,
            web,
            web_empty,
            tools_used,
            quality_flags,
        }
    }

    fn build_prompt(
        &self,
        question: &str,
        conversation_history: &[HistoryTurn],
        context: &GatheredContext,
    ) -> String {
        let mut prompt = String::new();

        if !conversation_history.is_empty() {
            prompt.push_str("Recent conversation:\n");
            let start = conversation_history
                .len()
                .saturating_sub(self.conversation_history_n);
            for turn in &conversation_history[start..] {
                prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
            prompt.push('\n');
        }

        prompt.push_str("Context:\n");

        prompt.push_str("papers: ");
        if context.papers_empty {
            prompt.push_str("EMPTY_RESULTS=true. Do not fabricate papers.\n");
        } else {
            for paper in &context.papers {
                prompt.push_str(&format!(
                    "- [{}] {} ({})\n",
                    paper.paper_id,
                    paper.title,
                    paper.year.unwrap_or(0)
                ));
            }
        }

        prompt.push_str("finance: ");
        match &context.finance {
            Some(calc) => {
                prompt.push_str(&format!(
                    "{} {} for {} = {} {}\n",
                    calc.ticker, calc.metric, calc.period, calc.value, calc.unit
                ));
            }
            None => prompt.push_str("EMPTY_RESULTS=true. Do not fabricate figures.\n"),
        }

        prompt.push_str("web: ");
        if context.web_empty {
            prompt.push_str("EMPTY_RESULTS=true. Do not fabricate sources.\n");
        } else {
            for result in &context.web {
                prompt.push_str(&format!("- {} ({})\n", result.title, result.url));
            }
        }

        prompt.push_str(&format!("\nQuestion: {question}\n"));
        prompt
    }

    fn eligible_citations(&self, context: &GatheredContext) -> Vec<Citation> {
        let mut citations = Vec::new();
        for paper in &context.papers {
            citations.push(Citation {
                kind: "paper",
                id: paper.paper_id.clone(),
                source: paper.source.clone(),
            });
        }
        if let Some(calc) = &context.finance {
            citations.push(Citation {
                kind: "fact",
                id: calc.primary.accession_id.clone(),
                source: calc.primary.source.clone(),
            });
        }
        for result in &context.web {
            citations.push(Citation {
                kind: "web",
                id: result.url.clone(),
                source: "web_search".to_string(),
            });
        }
        citations
    }
}

/// Best-effort `(ticker, metric, period)` extraction for the finance intent.
/// A full NL parser is out of scope; this recognizes an all-caps token as
/// the ticker and a small set of metric keywords, defaulting to `"latest"`.
fn extract_finance_triple(question: &str) -> Option<(String, String, String)> {
    let ticker = question
        .split_whitespace()
        .find(|w| w.len() >= 2 && w.len() <= 5 && w.chars().all(|c| c.is_ascii_uppercase()))?
        .to_string();

    let q = question.to_lowercase();
    let metric = if q.contains("gross profit") {
        "grossProfit"
    } else if q.contains("net margin") {
        "netMargin"
    } else if q.contains("operating margin") {
        "operatingMargin"
    } else if q.contains("net income") {
        "netIncome"
    } else if q.contains("operating income") {
        "operatingIncome"
    } else if q.contains("revenue") {
        "revenue"
    } else if q.contains("eps") {
        "eps"
    } else if q.contains("price") {
        "price"
    } else {
        return None;
    };

    Some((ticker, metric.to_string(), "latest".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_detects_paper_intent() {
        let intents = classify("Can you find a research paper about transformers?");
        assert!(intents.contains(&Intent::PaperSearch));
    }

    #[test]
    fn classify_detects_finance_intent() {
        let intents = classify("What was PLTR's revenue last quarter?");
        assert!(intents.contains(&Intent::FinanceFact));
    }

    #[test]
    fn classify_always_includes_general() {
        let intents = classify("hello there");
        assert!(intents.contains(&Intent::General));
    }

    #[test]
    fn extract_finance_triple_parses_ticker_and_metric() {
        let (ticker, metric, period) = extract_finance_triple("What is PLTR revenue?").unwrap();
        assert_eq!(ticker, "PLTR");
        assert_eq!(metric, "revenue");
        assert_eq!(period, "latest");
    }

    #[test]
    fn extract_finance_triple_none_without_ticker() {
        assert!(extract_finance_triple("what is the revenue").is_none());
    }
}
