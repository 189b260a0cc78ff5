//! Finance Adapter: resolves a `(ticker, metric, period)` triple into a
//! cited numeric fact, computing derived metrics from primitive ones.
//! Metrics with no XBRL representation (e.g. `price`) resolve entirely
//! through the market-data quote fallback instead.
//!
//! The computed-concept table is a static map from metric name to its input
//! concept list plus a combining closure, checked against Symbol Map and
//! Facts Store results before arithmetic is applied.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{AppError, Result};

use super::facts_store::{Fact, FactsStore, Frequency};
use super::market_data::MarketDataClient;
use super::symbol_map::SymbolMap;

/// Metrics with no XBRL representation, resolved entirely through the
/// market-data fallback rather than a primary structured source.
const QUOTE_ONLY_METRICS: &[&str] = &["price"];

/// A primitive concept is a direct mapping to one SEC XBRL tag.
static PRIMITIVE_CONCEPTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("revenue", "Revenues"),
        ("costOfRevenue", "CostOfRevenue"),
        ("netIncome", "NetIncomeLoss"),
        ("operatingIncome", "OperatingIncomeLoss"),
        ("totalAssets", "Assets"),
        ("totalLiabilities", "Liabilities"),
        ("eps", "EarningsPerShareDiluted"),
    ])
});

type Combine = fn(&HashMap<String, f64>) -> Option<f64>;

struct ComputedConcept {
    inputs: &'static [&'static str],
    combine: Combine,
}

static COMPUTED_CONCEPTS: Lazy<HashMap<&'static str, ComputedConcept>> = Lazy::new(|| {
    HashMap::from([
        (
            "grossProfit",
            ComputedConcept {
                inputs: &["revenue", "costOfRevenue"],
                combine: |inputs| Some(inputs.get("revenue")? - inputs.get("costOfRevenue")?),
            },
        ),
        (
            "netMargin",
            ComputedConcept {
                inputs: &["netIncome", "revenue"],
                combine: |inputs| {
                    let revenue = *inputs.get("revenue")?;
                    if revenue == 0.0 {
                        return None;
                    }
                    Some(inputs.get("netIncome")? / revenue)
                },
            },
        ),
        (
            "operatingMargin",
            ComputedConcept {
                inputs: &["operatingIncome", "revenue"],
                combine: |inputs| {
                    let revenue = *inputs.get("revenue")?;
                    if revenue == 0.0 {
                        return None;
                    }
                    Some(inputs.get("operatingIncome")? / revenue)
                },
            },
        ),
    ])
});

/// Result of resolving a finance query. `primary` is the single Fact a
/// client citation should reference: the fact itself for a primitive
/// metric, or the first input consulted for a computed one.
#[derive(Debug, Clone)]
pub struct CalcResult {
    pub ticker: String,
    pub metric: String,
    pub period: String,
    pub value: f64,
    pub unit: String,
    pub inputs: HashMap<String, Fact>,
    pub primary: Fact,
    pub quality_flags: Vec<&'static str>,
}

/// A specific period label like `"2025-Q2"` implies quarterly frequency;
/// a bare year like `"2025"` implies annual; `"latest"` defaults to
/// quarterly, the more commonly requested granularity.
fn infer_frequency(period: &str) -> Frequency {
    if period == "latest" {
        return Frequency::Quarterly;
    }
    if period.contains('Q') {
        Frequency::Quarterly
    } else {
        Frequency::Annual
    }
}

pub struct FinanceAdapter {
    facts_store: Arc<FactsStore>,
    symbol_map: Arc<SymbolMap>,
    market_data: Arc<MarketDataClient>,
}

impl FinanceAdapter {
    pub fn new(
        facts_store: Arc<FactsStore>,
        symbol_map: Arc<SymbolMap>,
        market_data: Arc<MarketDataClient>,
    ) -> Self {
        Self {
            facts_store,
            symbol_map,
            market_data,
        }
    }

    pub async fn resolve(&self, ticker: &str, metric: &str, period: &str) -> Result<CalcResult> {
        let cik = self
            .symbol_map
            .resolve(ticker)
            .ok_or_else(|| AppError::UnknownTicker(ticker.to_string()))?
            .to_string();
        let freq = infer_frequency(period);

        if QUOTE_ONLY_METRICS.contains(&metric) {
            return self.resolve_quote(ticker, metric, period).await;
        }

        if let Some(&xbrl_concept) = PRIMITIVE_CONCEPTS.get(metric) {
            return self
                .resolve_primitive(ticker, &cik, metric, xbrl_concept, period, freq)
                .await;
        }

        if let Some(computed) = COMPUTED_CONCEPTS.get(metric) {
            return self
                .resolve_computed(ticker, &cik, metric, computed, period, freq)
                .await;
        }

        Err(AppError::UnknownMetric(metric.to_string()))
    }

    /// Metrics with no XBRL tag at all (e.g. `price`) go straight to the
    /// market-data fallback; there is no primary source to miss first.
    async fn resolve_quote(&self, ticker: &str, metric: &str, period: &str) -> Result<CalcResult> {
        let fact = self.market_data_fact(ticker, metric).await?;
        Ok(CalcResult {
            ticker: ticker.to_string(),
            metric: metric.to_string(),
            period: period.to_string(),
            value: fact.value,
            unit: fact.unit.clone(),
            primary: fact.clone(),
            inputs: HashMap::from([(metric.to_string(), fact)]),
            quality_flags: Vec::new(),
        })
    }

    /// Build a synthetic `Fact` from a market-data quote, used as the
    /// fallback source when the primary (XBRL) source has nothing.
    async fn market_data_fact(&self, ticker: &str, metric: &str) -> Result<Fact> {
        let quote = self.market_data.get_quote(ticker).await?;
        Ok(Fact {
            ticker: ticker.to_string(),
            concept: metric.to_string(),
            value: quote.price,
            unit: quote.currency.clone(),
            period_label: "latest".to_string(),
            period_start: quote.as_of.date_naive(),
            period_end: quote.as_of.date_naive(),
            accession_id: format!("quote:{}", quote.as_of.timestamp()),
            source: "yahoo_finance".to_string(),
            frequency: Frequency::Quarterly,
        })
    }

    async fn resolve_primitive(
        &self,
        ticker: &str,
        cik: &str,
        metric: &str,
        xbrl_concept: &str,
        period: &str,
        freq: Frequency,
    ) -> Result<CalcResult> {
        let found = self
            .facts_store
            .get_fact(ticker, cik, xbrl_concept, period, freq)
            .await?;

        // Primary source has nothing: attempt the market-data fallback
        // before giving up.
        let (fact, flags) = match found {
            Some(pair) => pair,
            None => {
                let fact = self
                    .market_data_fact(ticker, metric)
                    .await
                    .map_err(|_| AppError::NoDataAvailable(format!("{ticker}/{metric}/{period}")))?;
                (fact, Vec::new())
            }
        };

        Ok(CalcResult {
            ticker: ticker.to_string(),
            metric: metric.to_string(),
            period: period.to_string(),
            value: fact.value,
            unit: fact.unit.clone(),
            primary: fact.clone(),
            inputs: HashMap::from([(metric.to_string(), fact)]),
            quality_flags: flags,
        })
    }

    async fn resolve_computed(
        &self,
        ticker: &str,
        cik: &str,
        metric: &str,
        computed: &ComputedConcept,
        period: &str,
        freq: Frequency,
    ) -> Result<CalcResult> {
        let mut inputs: HashMap<String, Fact> = HashMap::new();
        let mut values: HashMap<String, f64> = HashMap::new();

        for &input_name in computed.inputs {
            let xbrl_concept = PRIMITIVE_CONCEPTS
                .get(input_name)
                .copied()
                .ok_or_else(|| AppError::UnknownMetric(input_name.to_string()))?;
            let found = self
                .facts_store
                .get_fact(ticker, cik, xbrl_concept, period, freq)
                .await?;
            let fact = match found {
                Some((fact, _flags)) => fact,
                None => self.market_data_fact(ticker, input_name).await.map_err(|_| {
                    AppError::NoDataAvailable(format!("{ticker}/{input_name}/{period}"))
                })?,
            };
            values.insert(input_name.to_string(), fact.value);
            inputs.insert(input_name.to_string(), fact);
        }

        let value = (computed.combine)(&values)
            .ok_or_else(|| AppError::NoDataAvailable(format!("{ticker}/{metric}/{period}")))?;

        let mut quality_flags = Vec::new();
        if !period_coherent(&inputs) {
            quality_flags.push("PERIOD_MISMATCH");
        }
        if inputs.values().any(|f| f.is_stale()) {
            quality_flags.push("OLD_DATA");
        }

        let primary = inputs
            .get(computed.inputs[0])
            .cloned()
            .expect("first computed input was just inserted");
        let unit = primary.unit.clone();

        Ok(CalcResult {
            ticker: ticker.to_string(),
            metric: metric.to_string(),
            period: period.to_string(),
            value,
            unit,
            inputs,
            primary,
            quality_flags,
        })
    }
}

/// Every input must share either `accession_id` or an
/// identical `(period_start, period_end)` pair.
fn period_coherent(inputs: &HashMap<String, Fact>) -> bool {
    let mut facts = inputs.values();
    let Some(first) = facts.next() else {
        return true;
    };
    facts.all(|f| {
        f.accession_id == first.accession_id
            || (f.period_start == first.period_start && f.period_end == first.period_end)
    })
}
