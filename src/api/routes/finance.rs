//! `GET /v1/finance/calc/{ticker}/{metric}?period=latest|YYYY-Qn|YYYY`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;

use crate::error::Result;
use crate::finance::Fact;

use super::super::server::AppState;

#[derive(Debug, Serialize)]
pub struct CitationBody {
    pub accession_id: String,
    pub source: String,
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct CalcResponse {
    pub ticker: String,
    pub metric: String,
    pub period: String,
    pub value: f64,
    pub unit: String,
    pub inputs: HashMap<String, Fact>,
    pub citation: CitationBody,
    pub quality_flags: Vec<&'static str>,
}

pub async fn calc(
    State(state): State<Arc<AppState>>,
    Path((ticker, metric)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CalcResponse>> {
    let period = params
        .get("period")
        .cloned()
        .unwrap_or_else(|| "latest".to_string());

    let calc_result = state.finance.resolve(&ticker, &metric, &period).await?;

    Ok(Json(CalcResponse {
        ticker: calc_result.ticker,
        metric: calc_result.metric,
        period: calc_result.period,
        value: calc_result.value,
        unit: calc_result.unit,
        inputs: calc_result.inputs,
        citation: CitationBody {
            accession_id: calc_result.primary.accession_id,
            source: calc_result.primary.source,
            start: calc_result.primary.period_start,
            end: calc_result.primary.period_end,
        },
        quality_flags: calc_result.quality_flags,
    }))
}
