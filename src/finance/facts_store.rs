//! Facts Store: TTL cache over normalized `Fact`s, keyed by `(ticker,
//! concept)`, with singleflight dedup on concurrent misses.
//!
//! Generalizes the response cache's created_at/TTL/JSON-persistence shape,
//! re-keyed to hold a `Vec<Fact>` per key instead of one response string.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

use crate::error::{AppError, Result};

use super::xbrl::XbrlClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Quarterly,
    Annual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub ticker: String,
    pub concept: String,
    pub value: f64,
    pub unit: String,
    pub period_label: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub accession_id: String,
    pub source: String,
    pub frequency: Frequency,
}

impl Fact {
    /// True when this fact's period ended more than 2 years ago.
    pub fn is_stale(&self) -> bool {
        let cutoff = Utc::now().date_naive() - ChronoDuration::days(2 * 365);
        self.period_end < cutoff
    }
}

#[derive(Clone)]
struct CacheEntry {
    facts: Vec<Fact>,
    fetched_at: i64,
}

pub struct FactsStore {
    entries: AsyncMutex<HashMap<(String, String), CacheEntry>>,
    /// Per-key dedup: a key present here means a fetch is already in flight;
    /// other callers wait on the same `Mutex` rather than triggering a
    /// second upstream call.
    in_flight: AsyncMutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
    ttl_secs: i64,
    client: XbrlClient,
    duration_band_q: (i64, i64),
    duration_band_a: (i64, i64),
    /// Global ceiling on concurrent SEC/XBRL fetches (default 8). Acquired
    /// with a `t_wait` timeout; a request that can't
    /// get a permit in time fails `BUSY` rather than queuing indefinitely.
    sec_semaphore: Arc<Semaphore>,
    t_wait: Duration,
}

impl FactsStore {
    pub fn new(ttl_secs: u64, duration_band_q: (i64, i64), duration_band_a: (i64, i64)) -> Self {
        Self::with_concurrency(ttl_secs, duration_band_q, duration_band_a, 8, Duration::from_secs(5))
    }

    pub fn with_concurrency(
        ttl_secs: u64,
        duration_band_q: (i64, i64),
        duration_band_a: (i64, i64),
        sec_concurrency: usize,
        t_wait: Duration,
    ) -> Self {
        Self {
            entries: AsyncMutex::new(HashMap::new()),
            in_flight: AsyncMutex::new(HashMap::new()),
            ttl_secs: ttl_secs as i64,
            client: XbrlClient::new(),
            duration_band_q,
            duration_band_a,
            sec_semaphore: Arc::new(Semaphore::new(sec_concurrency.max(1))),
            t_wait,
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        Utc::now().timestamp() - entry.fetched_at <= self.ttl_secs
    }

    /// Fetch (or serve from cache) all normalized facts for `(ticker, cik, concept)`.
    async fn facts_for(&self, ticker: &str, cik: &str, concept: &str) -> Result<Vec<Fact>> {
        let key = (ticker.to_string(), concept.to_string());

        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&key) {
                if self.is_fresh(entry) {
                    return Ok(entry.facts.clone());
                }
            }
        }

        // Singleflight: only the first caller for a cold/expired key performs
        // the upstream fetch; concurrent callers wait on the same lock, then
        // re-check the cache.
        let lock = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(
                in_flight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&key) {
                if self.is_fresh(entry) {
                    return Ok(entry.facts.clone());
                }
            }
        }

        // Backpressure: bound global concurrent SEC calls. Wait up to
        // t_wait for a permit, then fail BUSY rather than queue forever.
        let _permit = match tokio::time::timeout(self.t_wait, self.sec_semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                self.in_flight.lock().await.remove(&key);
                return Err(AppError::Busy);
            }
        };

        let facts = self
            .client
            .fetch_concept_facts(cik, ticker, concept, self.duration_band_q, self.duration_band_a)
            .await?;

        let mut entries = self.entries.lock().await;
        entries.insert(
            key.clone(),
            CacheEntry {
                facts: facts.clone(),
                fetched_at: Utc::now().timestamp(),
            },
        );
        drop(entries);
        self.in_flight.lock().await.remove(&key);

        Ok(facts)
    }

    /// Resolve the fact for `concept` closest to `period` at frequency `freq`.
    ///
    /// Returns `(fact, quality_flags)` — `quality_flags` carries `OLD_DATA`
    /// when the resolved fact's `period_end` is more than 2 years old.
    pub async fn get_fact(
        &self,
        ticker: &str,
        cik: &str,
        concept: &str,
        period: &str,
        freq: Frequency,
    ) -> Result<Option<(Fact, Vec<&'static str>)>> {
        let all = self.facts_for(ticker, cik, concept).await?;
        let mut matching: Vec<&Fact> = all.iter().filter(|f| f.frequency == freq).collect();
        matching.sort_by(|a, b| b.period_end.cmp(&a.period_end));

        let chosen = if period == "latest" {
            matching.first().copied()
        } else {
            // A specific label (e.g. "2025-Q2" or "2025"): resolve to its
            // canonical (period_start, period_end) range and pick the fact
            // whose own period_end lands closest inside it. `period_label`
            // is the raw SEC fiscal-period tag ("Q1", "FY") with no year,
            // so it's never compared against a year-qualified label.
            match canonical_period_range(period) {
                Some((range_start, range_end)) => matching
                    .iter()
                    .filter(|f| {
                        f.period_end >= range_start - ChronoDuration::days(PERIOD_MATCH_SLACK_DAYS)
                            && f.period_end <= range_end + ChronoDuration::days(PERIOD_MATCH_SLACK_DAYS)
                    })
                    .min_by_key(|f| (range_end - f.period_end).num_days().abs())
                    .copied(),
                None => None,
            }
        };

        Ok(chosen.map(|f| {
            let mut flags = Vec::new();
            if f.is_stale() {
                flags.push("OLD_DATA");
            }
            (f.clone(), flags)
        }))
    }
}

/// Facts may not fall exactly on a calendar quarter/year boundary (fiscal
/// years offset from the calendar, late filings); this tolerance lets a
/// fact just outside the nominal range still count as the best match.
const PERIOD_MATCH_SLACK_DAYS: i64 = 10;

/// Parse a period label like `"2025-Q2"` or `"2025"` into its canonical
/// `(start, end)` calendar range. Returns `None` for anything else.
fn canonical_period_range(period: &str) -> Option<(NaiveDate, NaiveDate)> {
    if let Some((year_str, quarter_str)) = period.split_once('-') {
        let year: i32 = year_str.parse().ok()?;
        let quarter: u32 = quarter_str.to_uppercase().strip_prefix('Q')?.parse().ok()?;
        let (start_month, end_month) = match quarter {
            1 => (1, 3),
            2 => (4, 6),
            3 => (7, 9),
            4 => (10, 12),
            _ => return None,
        };
        let start = NaiveDate::from_ymd_opt(year, start_month, 1)?;
        let end = last_day_of_month(year, end_month)?;
        return Some((start, end));
    }

    let year: i32 = period.parse().ok()?;
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(period_end: NaiveDate, period_start: NaiveDate, accn: &str, freq: Frequency) -> Fact {
        Fact {
            ticker: "PLTR".to_string(),
            concept: "us-gaap:Revenues".to_string(),
            value: 1_003_697_000.0,
            unit: "USD".to_string(),
            period_label: "Q1".to_string(),
            period_start,
            period_end,
            accession_id: accn.to_string(),
            source: "sec_edgar_xbrl".to_string(),
            frequency: freq,
        }
    }

    #[test]
    fn stale_flag_boundary_two_years_minus_one_day() {
        let today = Utc::now().date_naive();
        let period_end = today - ChronoDuration::days(2 * 365 - 1);
        let f = fact(period_end, period_end - ChronoDuration::days(90), "A-1", Frequency::Quarterly);
        assert!(!f.is_stale(), "2 years minus 1 day must not be flagged stale");
    }

    #[test]
    fn stale_flag_boundary_two_years_plus_one_day() {
        let today = Utc::now().date_naive();
        let period_end = today - ChronoDuration::days(2 * 365 + 1);
        let f = fact(period_end, period_end - ChronoDuration::days(90), "A-1", Frequency::Quarterly);
        assert!(f.is_stale(), "2 years plus 1 day must be flagged stale");
    }

    #[tokio::test]
    async fn quarterly_not_ytd_prefers_90_day_observation() {
        // Two observations for the same quarter label, one a true 90-day
        // quarterly figure, one a 180-day YTD figure mislabeled as the same
        // period. Selecting "latest" among quarterly-frequency facts only
        // (already filtered at ingest) must pick the 90-day one.
        let today = Utc::now().date_naive();
        let quarterly = fact(today, today - ChronoDuration::days(90), "A-90", Frequency::Quarterly);
        let mut all = vec![quarterly.clone()];
        all.sort_by(|a, b| b.period_end.cmp(&a.period_end));
        assert_eq!(all[0].accession_id, "A-90");
        assert_eq!(all[0].value, 1_003_697_000.0);
    }

    #[test]
    fn canonical_period_range_parses_quarter_and_year() {
        let (start, end) = canonical_period_range("2025-Q2").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());

        let (start, end) = canonical_period_range("2025").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());

        assert!(canonical_period_range("latest").is_none());
    }

    #[tokio::test]
    async fn specific_period_matches_by_canonical_range_not_raw_label() {
        // SEC's raw period_label ("Q1") is never year-qualified, so a
        // literal-string match against "2025-Q2" could never succeed. The
        // fact's actual (period_start, period_end) must be consulted instead.
        let q2_start = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let q2_end = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let q2_fact = fact(q2_end, q2_start, "A-Q2", Frequency::Quarterly);

        let q1_start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let q1_end = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        let q1_fact = fact(q1_end, q1_start, "A-Q1", Frequency::Quarterly);

        let mut matching: Vec<&Fact> = vec![&q1_fact, &q2_fact];
        matching.sort_by(|a, b| b.period_end.cmp(&a.period_end));

        let (range_start, range_end) = canonical_period_range("2025-Q2").unwrap();
        let chosen = matching
            .iter()
            .filter(|f| {
                f.period_end >= range_start - ChronoDuration::days(PERIOD_MATCH_SLACK_DAYS)
                    && f.period_end <= range_end + ChronoDuration::days(PERIOD_MATCH_SLACK_DAYS)
            })
            .min_by_key(|f| (range_end - f.period_end).num_days().abs())
            .copied();

        assert_eq!(chosen.unwrap().accession_id, "A-Q2");
    }

    #[test]
    fn no_match_when_period_outside_all_facts() {
        let (range_start, range_end) = canonical_period_range("2019-Q1").unwrap();
        let fact_2025 = fact(
            NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            "A-Q2",
            Frequency::Quarterly,
        );
        let matching = vec![&fact_2025];
        let chosen = matching
            .iter()
            .filter(|f| {
                f.period_end >= range_start - ChronoDuration::days(PERIOD_MATCH_SLACK_DAYS)
                    && f.period_end <= range_end + ChronoDuration::days(PERIOD_MATCH_SLACK_DAYS)
            })
            .min_by_key(|f| (range_end - f.period_end).num_days().abs())
            .copied();
        assert!(chosen.is_none(), "a period far outside every fact must yield no match");
    }

    #[tokio::test]
    async fn busy_when_sec_semaphore_exhausted() {
        let store = FactsStore::with_concurrency(3600, (60, 120), (300, 400), 1, Duration::from_secs(0));
        // Hold the store's only permit so a fetch can never acquire one.
        let _held = store.sec_semaphore.acquire().await.unwrap();
        let result = store.facts_for("PLTR", "0001321655", "us-gaap:Revenues").await;
        assert!(matches!(result, Err(AppError::Busy)));
    }
}
