//! Startup configuration.
//!
//! Loaded once in `main` from the process environment (via `dotenvy`, then
//! `std::env`) into a single typed value, then threaded through every
//! component as `Arc<AppConfig>`. No other module reads environment
//! variables directly.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_daily_ceiling() -> u64 {
    25_000
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_bcrypt_cost() -> u32 {
    12
}
fn default_fact_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_duration_band_q() -> (i64, i64) {
    (60, 120)
}
fn default_duration_band_a() -> (i64, i64) {
    (300, 400)
}
fn default_t_fanout_secs() -> u64 {
    20
}
fn default_t_llm_secs() -> u64 {
    30
}
fn default_t_wait_secs() -> u64 {
    5
}
fn default_t_cool_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    5
}
fn default_request_deadline_secs() -> u64 {
    60
}
fn default_sec_concurrency() -> usize {
    8
}
fn default_llm_concurrency_per_provider() -> usize {
    4
}
fn default_conversation_history_n() -> usize {
    3
}

/// Parse a `"min,max"` env value into a duration-band tuple.
fn parse_band(raw: &str) -> Option<(i64, i64)> {
    let (min, max) = raw.split_once(',')?;
    Some((min.trim().parse().ok()?, max.trim().parse().ok()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// A single LLM provider key, loaded from configuration (never persisted by
/// the service itself).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmKeyConfig {
    pub key_material: String,
    #[serde(default = "default_daily_request_limit")]
    pub daily_request_limit: u32,
}

fn default_daily_request_limit() -> u32 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,

    pub jwt_secret: String,
    pub bcrypt_cost: u32,

    pub daily_ceiling: u64,
    pub auto_register_on_unknown: bool,

    pub llm_provider_priority: Vec<String>,
    pub llm_keys: HashMap<String, Vec<LlmKeyConfig>>,

    pub fact_cache_ttl_secs: u64,
    pub duration_band_q_days: (i64, i64),
    pub duration_band_a_days: (i64, i64),

    pub paper_sources: Vec<String>,
    pub web_search_api_key: Option<String>,

    pub t_fanout_secs: u64,
    pub t_llm_secs: u64,
    pub t_wait_secs: u64,
    pub t_cool_secs: u64,
    pub max_attempts: u32,
    pub request_deadline_secs: u64,

    pub sec_concurrency: usize,
    pub llm_concurrency_per_provider: usize,

    pub conversation_history_n: usize,

    pub log_format: LogFormat,
    pub state_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind(),
            port: default_port(),
            jwt_secret: "dev-secret-change-me".to_string(),
            bcrypt_cost: default_bcrypt_cost(),
            daily_ceiling: default_daily_ceiling(),
            auto_register_on_unknown: false,
            llm_provider_priority: Vec::new(),
            llm_keys: HashMap::new(),
            fact_cache_ttl_secs: default_fact_cache_ttl_secs(),
            duration_band_q_days: default_duration_band_q(),
            duration_band_a_days: default_duration_band_a(),
            paper_sources: vec!["openalex".to_string()],
            web_search_api_key: None,
            t_fanout_secs: default_t_fanout_secs(),
            t_llm_secs: default_t_llm_secs(),
            t_wait_secs: default_t_wait_secs(),
            t_cool_secs: default_t_cool_secs(),
            max_attempts: default_max_attempts(),
            request_deadline_secs: default_request_deadline_secs(),
            sec_concurrency: default_sec_concurrency(),
            llm_concurrency_per_provider: default_llm_concurrency_per_provider(),
            conversation_history_n: default_conversation_history_n(),
            log_format: LogFormat::default(),
            state_dir: ".citeforge".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `.env` (best-effort) plus process environment,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut cfg = AppConfig::default();

        if let Ok(v) = std::env::var("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(p) = v.parse() {
                cfg.port = p;
            }
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            cfg.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("BCRYPT_COST") {
            if let Ok(c) = v.parse() {
                cfg.bcrypt_cost = c;
            }
        }
        if let Ok(v) = std::env::var("DAILY_CEILING") {
            if let Ok(c) = v.parse() {
                cfg.daily_ceiling = c;
            }
        }
        if let Ok(v) = std::env::var("AUTO_REGISTER_ON_UNKNOWN") {
            cfg.auto_register_on_unknown = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER_PRIORITY") {
            cfg.llm_provider_priority =
                v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("LLM_KEYS") {
            match serde_json::from_str::<HashMap<String, Vec<LlmKeyConfig>>>(&v) {
                Ok(keys) => cfg.llm_keys = keys,
                Err(e) => tracing::warn!(error = %e, "LLM_KEYS is not valid JSON, ignoring"),
            }
        }
        if let Ok(v) = std::env::var("FACT_CACHE_TTL") {
            if let Ok(t) = v.parse() {
                cfg.fact_cache_ttl_secs = t;
            }
        }
        if let Ok(v) = std::env::var("DURATION_BAND_Q") {
            if let Some(band) = parse_band(&v) {
                cfg.duration_band_q_days = band;
            }
        }
        if let Ok(v) = std::env::var("DURATION_BAND_A") {
            if let Some(band) = parse_band(&v) {
                cfg.duration_band_a_days = band;
            }
        }
        if let Ok(v) = std::env::var("PAPER_SOURCES") {
            cfg.paper_sources =
                v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("WEB_SEARCH_API_KEY") {
            cfg.web_search_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("T_FANOUT") {
            if let Ok(t) = v.parse() {
                cfg.t_fanout_secs = t;
            }
        }
        if let Ok(v) = std::env::var("T_LLM") {
            if let Ok(t) = v.parse() {
                cfg.t_llm_secs = t;
            }
        }
        if let Ok(v) = std::env::var("T_WAIT") {
            if let Ok(t) = v.parse() {
                cfg.t_wait_secs = t;
            }
        }
        if let Ok(v) = std::env::var("T_COOL") {
            if let Ok(t) = v.parse() {
                cfg.t_cool_secs = t;
            }
        }
        if let Ok(v) = std::env::var("MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                cfg.max_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            if v.eq_ignore_ascii_case("json") {
                cfg.log_format = LogFormat::Json;
            }
        }
        if let Ok(v) = std::env::var("STATE_DIR") {
            cfg.state_dir = v;
        }

        cfg
    }

    pub fn t_fanout(&self) -> Duration {
        Duration::from_secs(self.t_fanout_secs)
    }
    pub fn t_llm(&self) -> Duration {
        Duration::from_secs(self.t_llm_secs)
    }
    pub fn t_wait(&self) -> Duration {
        Duration::from_secs(self.t_wait_secs)
    }
    pub fn t_cool(&self) -> Duration {
        Duration::from_secs(self.t_cool_secs)
    }
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    pub fn state_path(&self, file: &str) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.state_dir).join(file)
    }
}
