//! Shared `AppState` and the `build_router`/`start_server` split, following
//! the same constructor/router/listener layout the panel server used:
//! `AppState::new` assembles dependencies once, `build_router` wires
//! routes and layers, `start_server` binds and serves.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::UserStore;
use crate::config::AppConfig;
use crate::finance::FinanceAdapter;
use crate::papers::PaperCache;
use crate::pipeline::QueryPipeline;
use crate::providers::router::LlmRouter;
use crate::quota::QuotaLedger;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<UserStore>,
    pub quota: Arc<QuotaLedger>,
    pub finance: Arc<FinanceAdapter>,
    pub pipeline: Arc<QueryPipeline>,
    pub router: Arc<LlmRouter>,
    pub paper_cache: Arc<PaperCache>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        users: Arc<UserStore>,
        quota: Arc<QuotaLedger>,
        finance: Arc<FinanceAdapter>,
        pipeline: Arc<QueryPipeline>,
        router: Arc<LlmRouter>,
        paper_cache: Arc<PaperCache>,
    ) -> Self {
        Self {
            config,
            users,
            quota,
            finance,
            pipeline,
            router,
            paper_cache,
        }
    }
}

/// Build the axum router with every route, a body-size limit, a
/// permissive-but-explicit CORS layer, and the bearer-auth middleware
/// (bypass list: health, register, login).
pub fn build_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/api/health", get(super::routes::health::get_health))
        .route("/api/auth/register", post(super::routes::auth::register))
        .route("/api/auth/login", post(super::routes::auth::login))
        .route("/query", post(super::routes::query::query))
        .route(
            "/v1/finance/calc/{ticker}/{metric}",
            get(super::routes::finance::calc),
        )
        .route("/api/search", post(super::routes::search::search))
        .route("/api/synthesize", post(super::routes::synthesize::synthesize))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(axum_mw::from_fn_with_state(
            shared_state.clone(),
            super::middleware::auth_middleware,
        ))
        .with_state(shared_state)
}

/// Bind a `TcpListener` and serve forever.
pub async fn start_server(
    config: &AppConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("citeforge listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserStore;
    use crate::finance::market_data::MarketDataClient;
    use crate::finance::{FactsStore, FinanceAdapter, SymbolMap};
    use crate::providers::key_store::KeyStore;
    use crate::providers::router::LlmRouter;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(AppConfig::default());
        let users = Arc::new(UserStore::load_or_default(tmp.path().join("users.json")));
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
        let state = AppState::new(config, users, quota, finance, pipeline, router, paper_cache);
        (tmp, state)
    }

    #[test]
    fn build_router_succeeds() {
        let (_tmp, state) = test_state();
        let _router = build_router(state);
    }
}
