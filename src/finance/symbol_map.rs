//! Symbol Map: ticker/common-name → canonical upstream identifier (CIK).
//!
//! Load-once and immutable at runtime: built once in `AppState::new` from
//! a bundled seed table, then
//! only ever read. No refresh path is exposed because the mapping changes
//! far slower than any cache TTL in this service.

use std::collections::HashMap;

/// A handful of well-known tickers, enough to exercise the finance endpoint
/// and its tests without requiring a network call to SEC's ticker list at
/// startup. Real deployments can widen this via `SymbolMap::with_entries`.
const SEED: &[(&str, &str)] = &[
    ("PLTR", "0001321655"),
    ("AAPL", "0000320193"),
    ("MSFT", "0000789019"),
    ("GOOGL", "0001652044"),
    ("AMZN", "0001018724"),
    ("TSLA", "0001318605"),
    ("NVDA", "0001045810"),
];

pub struct SymbolMap {
    by_ticker: HashMap<String, String>,
}

impl SymbolMap {
    pub fn seeded() -> Self {
        Self::with_entries(SEED.iter().map(|(t, c)| (t.to_string(), c.to_string())))
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let by_ticker = entries
            .into_iter()
            .map(|(ticker, cik)| (ticker.to_uppercase(), cik))
            .collect();
        Self { by_ticker }
    }

    /// Resolve a user-supplied ticker to its canonical CIK, case-insensitively.
    pub fn resolve(&self, ticker: &str) -> Option<&str> {
        self.by_ticker.get(&ticker.to_uppercase()).map(String::as_str)
    }
}
