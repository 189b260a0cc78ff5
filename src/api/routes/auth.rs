//! `POST /api/auth/register` and `POST /api/auth/login`.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::error::{AppError, Result};

use super::super::server::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
    pub daily_ceiling: u64,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>> {
    if !auth::is_strong_password(&body.password) {
        return Err(AppError::WeakPassword);
    }
    let hash = auth::hash_password(&body.password, state.config.bcrypt_cost)?;
    let user = state.users.create(&body.email, &hash)?;
    let issued = auth::issue_token(&user.user_id, &state.config.jwt_secret)?;
    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        daily_ceiling: state.quota.daily_ceiling(),
    }))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>> {
    let user = match state.users.find_by_email(&body.email) {
        Some(user) => user,
        None if state.config.auto_register_on_unknown => {
            let hash = auth::hash_password(&body.password, state.config.bcrypt_cost)?;
            state.users.create(&body.email, &hash)?
        }
        None => return Err(AppError::InvalidCredentials),
    };

    if !auth::verify_password(&body.password, &user.password_hash) {
        return Err(AppError::InvalidCredentials);
    }

    let issued = auth::issue_token(&user.user_id, &state.config.jwt_secret)?;
    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        daily_ceiling: state.quota.daily_ceiling(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::finance::market_data::MarketDataClient;
    use crate::finance::{FactsStore, FinanceAdapter, SymbolMap};
    use crate::pipeline::QueryPipeline;
    use crate::providers::key_store::KeyStore;
    use crate::providers::router::LlmRouter;
    use crate::quota::QuotaLedger;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, Arc<AppState>) {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(AppConfig::default());
        let users = Arc::new(auth::UserStore::load_or_default(tmp.path().join("users.json")));
        let quota = Arc::new(QuotaLedger::load_or_default(
            tmp.path().join("quota.json"),
            config.daily_ceiling,
        ));
        let key_store = Arc::new(KeyStore::from_config(&config));
        let router = Arc::new(LlmRouter::new(HashMap::new(), &config, key_store));
        let facts_store = Arc::new(FactsStore::new(
            config.fact_cache_ttl_secs,
            config.duration_band_q_days,
            config.duration_band_a_days,
        ));
        let symbol_map = Arc::new(SymbolMap::seeded());
        let market_data = Arc::new(MarketDataClient::new());
        let finance = Arc::new(FinanceAdapter::new(facts_store, symbol_map, market_data));
        let web_search = Arc::new(crate::websearch::WebSearchClient::new(&config));
        let paper_cache = Arc::new(crate::papers::PaperCache::new());
        let pipeline = Arc::new(QueryPipeline::new(
            Arc::clone(&quota),
            Arc::clone(&router),
            Arc::clone(&finance),
            Vec::new(),
            Arc::clone(&paper_cache),
            web_search,
            config.t_fanout(),
            config.conversation_history_n,
        ));
        (tmp, Arc::new(AppState::new(
            config, users, quota, finance, pipeline, router, paper_cache,
        )))
    }

    #[tokio::test]
    async fn register_then_login_succeeds() {
        let (_tmp, state) = test_state();
        let reg = register(
            State(state.clone()),
            Json(CredentialsRequest {
                email: "alice@example.com".to_string(),
                password: "longenoughpassword".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(!reg.0.token.is_empty());

        let login_resp = login(
            State(state),
            Json(CredentialsRequest {
                email: "alice@example.com".to_string(),
                password: "longenoughpassword".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(!login_resp.0.token.is_empty());
    }

    #[tokio::test]
    async fn register_weak_password_rejected() {
        let (_tmp, state) = test_state();
        let result = register(
            State(state),
            Json(CredentialsRequest {
                email: "bob@example.com".to_string(),
                password: "short".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::WeakPassword)));
    }

    #[tokio::test]
    async fn login_unknown_email_rejected_without_auto_register() {
        let (_tmp, state) = test_state();
        let result = login(
            State(state),
            Json(CredentialsRequest {
                email: "nobody@example.com".to_string(),
                password: "whatever123".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn login_wrong_password_rejected() {
        let (_tmp, state) = test_state();
        register(
            State(state.clone()),
            Json(CredentialsRequest {
                email: "carol@example.com".to_string(),
                password: "correctpassword".to_string(),
            }),
        )
        .await
        .unwrap();
        let result = login(
            State(state),
            Json(CredentialsRequest {
                email: "carol@example.com".to_string(),
                password: "wrongpassword".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidCredentials)));
    }
}
