//! `POST /query` — the Query Pipeline's single entry point.

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::pipeline::{HistoryTurn, QueryResponse};

use super::super::middleware::AuthenticatedUser;
use super::super::server::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurnInput>,
    #[serde(default)]
    pub api_context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryTurnInput {
    pub role: String,
    pub content: String,
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let history: Vec<HistoryTurn> = body
        .conversation_history
        .into_iter()
        .map(|t| HistoryTurn {
            role: t.role,
            content: t.content,
        })
        .collect();

    // Overall end-to-end deadline (default 60s). Dropping the pipeline
    // future on timeout cancels whatever adapter/LLM call was in flight
    // cooperatively; since the Quota Ledger is only debited after the LLM
    // call returns inside `handle`, a timeout here never commits a debit.
    let response = tokio::time::timeout(
        state.config.request_deadline(),
        state.pipeline.handle(&user.0, &body.question, &history),
    )
    .await
    .map_err(|_| AppError::Timeout)??;

    Ok(Json(response))
}
