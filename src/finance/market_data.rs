//! Market-data quote fallback, used when the primary XBRL source has no
//! structured fact for a metric (e.g. `price`, which SEC filings never
//! carry). Mirrors the shape of the quote-fetching clients in the
//! examples pack: one endpoint, one normalized return type, no retries —
//! callers treat a failure here as just another `NO_DATA_AVAILABLE`.

use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Quote {
    pub price: f64,
    pub currency: String,
    pub as_of: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponseWrapper {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponseBody,
}

#[derive(Debug, Deserialize)]
struct QuoteResponseBody {
    result: Vec<QuoteResult>,
}

#[derive(Debug, Deserialize)]
struct QuoteResult {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    currency: Option<String>,
}

pub struct MarketDataClient {
    client: reqwest::Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://query1.finance.yahoo.com/v7/finance/quote".to_string(),
        }
    }

    pub async fn get_quote(&self, ticker: &str) -> Result<Quote> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("symbols", ticker)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::NoDataAvailable(format!(
                "market data unavailable for {ticker}"
            )));
        }
        let body: QuoteResponseWrapper = resp.json().await?;
        let result = body
            .quote_response
            .result
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NoDataAvailable(format!("no quote for {ticker}")))?;
        let price = result
            .regular_market_price
            .ok_or_else(|| AppError::NoDataAvailable(format!("no price for {ticker}")))?;
        Ok(Quote {
            price,
            currency: result.currency.unwrap_or_else(|| "USD".to_string()),
            as_of: chrono::Utc::now(),
        })
    }
}

impl Default for MarketDataClient {
    fn default() -> Self {
        Self::new()
    }
}
