//! SEC EDGAR XBRL fetch and normalization into `Fact`.
//!
//! Parses the SEC company-facts JSON API
//! (`https://data.sec.gov/api/xbrl/companyfacts/CIK{cik}.json`) into
//! `Fact`s, filtering by duration band at ingest so malformed or
//! mismatched-frequency observations never enter the cache.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{AppError, Result};

use super::facts_store::{Fact, Frequency};

#[derive(Debug, Deserialize)]
struct SecApiResponse {
    facts: HashMap<String, TaxonomyFacts>,
}

#[derive(Debug, Deserialize)]
struct TaxonomyFacts(HashMap<String, ConceptData>);

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ConceptData {
    units: HashMap<String, UnitFacts>,
}

#[derive(Debug, Deserialize)]
struct UnitFacts(Vec<FactData>);

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct FactData {
    end: String,
    val: f64,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    accn: Option<String>,
    #[serde(default)]
    fp: Option<String>,
}

pub struct XbrlClient {
    client: reqwest::Client,
    base_url: String,
}

impl XbrlClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("citeforge/0.1 (research-assistant-backend)")
            .build()
            .expect("failed to build XBRL HTTP client");
        Self {
            client,
            base_url: "https://data.sec.gov/api/xbrl".to_string(),
        }
    }

    /// Fetch and normalize all facts for `concept` belonging to `cik`.
    pub async fn fetch_concept_facts(
        &self,
        cik: &str,
        ticker: &str,
        concept: &str,
        duration_band_q: (i64, i64),
        duration_band_a: (i64, i64),
    ) -> Result<Vec<Fact>> {
        let cik_padded = format!("{:0>10}", cik);
        let url = format!("{}/companyfacts/CIK{}.json", self.base_url, cik_padded);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::NoDataAvailable(format!(
                "SEC EDGAR returned {} for CIK {cik}",
                response.status()
            )));
        }

        let api_response: SecApiResponse = response.json().await?;
        Ok(normalize(
            &api_response,
            ticker,
            concept,
            duration_band_q,
            duration_band_a,
        ))
    }
}

impl Default for XbrlClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize raw SEC facts matching `concept` into `Fact`s, filtering by
/// duration band and requiring non-empty provenance (accession id).
fn normalize(
    api_response: &SecApiResponse,
    ticker: &str,
    concept: &str,
    duration_band_q: (i64, i64),
    duration_band_a: (i64, i64),
) -> Vec<Fact> {
    let mut out = Vec::new();
    for (taxonomy, taxonomy_facts) in &api_response.facts {
        let Some(concept_data) = taxonomy_facts.0.get(concept) else {
            continue;
        };
        let full_concept = format!("{taxonomy}:{concept}");
        for (unit, unit_facts) in &concept_data.units {
            for fd in &unit_facts.0 {
                let Ok(period_end) = NaiveDate::parse_from_str(&fd.end, "%Y-%m-%d") else {
                    continue;
                };
                let period_start = fd
                    .start
                    .as_ref()
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

                // Instant facts (no period_start) carry no duration-band
                // invariant; only duration facts are frequency-filtered.
                let Some(start) = period_start else {
                    continue;
                };

                let accession_id = match &fd.accn {
                    Some(a) if !a.is_empty() => a.clone(),
                    _ => continue, // discard facts with no provenance.
                };

                let days = period_end.signed_duration_since(start).num_days();
                let frequency = if duration_band_q.0 <= days && days <= duration_band_q.1 {
                    Frequency::Quarterly
                } else if duration_band_a.0 <= days && days <= duration_band_a.1 {
                    Frequency::Annual
                } else {
                    continue; // outside both bands, discard at ingest.
                };

                out.push(Fact {
                    ticker: ticker.to_string(),
                    concept: full_concept.clone(),
                    value: fd.val,
                    unit: unit.clone(),
                    period_label: fd.fp.clone().unwrap_or_default(),
                    period_start: start,
                    period_end,
                    accession_id,
                    source: "sec_edgar_xbrl".to_string(),
                    frequency,
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response(entries: Vec<(&str, f64, &str)>) -> SecApiResponse {
        // (end_date, value, accn) pairs, all with a fixed 91-day start -> quarterly
        let facts: Vec<FactData> = entries
            .into_iter()
            .map(|(end, val, accn)| FactData {
                end: end.to_string(),
                val,
                start: Some("2025-01-01".to_string()),
                accn: Some(accn.to_string()),
                fp: Some("Q1".to_string()),
            })
            .collect();
        let mut units = HashMap::new();
        units.insert("USD".to_string(), UnitFacts(facts));
        let mut concepts = HashMap::new();
        concepts.insert("Revenues".to_string(), ConceptData { units });
        let mut taxonomies = HashMap::new();
        taxonomies.insert("us-gaap".to_string(), TaxonomyFacts(concepts));
        SecApiResponse { facts: taxonomies }
    }

    #[test]
    fn quarterly_fact_within_band_kept() {
        let resp = sample_response(vec![("2025-04-01", 1_003_697_000.0, "A-1")]);
        let facts = normalize(&resp, "PLTR", "Revenues", (60, 120), (300, 400));
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].frequency, Frequency::Quarterly);
        assert_eq!(facts[0].accession_id, "A-1");
    }

    #[test]
    fn missing_accession_discarded() {
        let mut resp = sample_response(vec![("2025-04-01", 1.0, "")]);
        if let Some(tf) = resp.facts.get_mut("us-gaap") {
            for cd in tf.0.values_mut() {
                for uf in cd.units.values_mut() {
                    uf.0[0].accn = None;
                }
            }
        }
        let facts = normalize(&resp, "X", "Revenues", (60, 120), (300, 400));
        assert!(facts.is_empty(), "facts without accession must be discarded");
    }

    #[test]
    fn out_of_band_duration_discarded() {
        // start 2025-01-01, end far beyond both bands (e.g. 500 days) should drop.
        let resp = sample_response(vec![("2026-05-16", 1.0, "A-2")]);
        let facts = normalize(&resp, "X", "Revenues", (60, 120), (300, 400));
        assert!(facts.is_empty(), "out-of-band duration must be discarded at ingest");
    }
}
