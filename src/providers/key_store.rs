//! Key Store: per-provider LLM credentials with per-key daily-request
//! counters and round-robin rotation.
//!
//! `requests_today`/`last_reset_utc_date` rollover mirrors the provider
//! quota tracker's period-key pattern, scoped per key instead of per
//! provider-period.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};

use crate::config::AppConfig;

#[derive(Debug, Clone)]
struct KeyState {
    key_material: String,
    daily_request_limit: u32,
    requests_today: u32,
    last_reset_utc_date: NaiveDate,
    /// Cooldown deadline (unix seconds) set on TIMEOUT/5xx failures.
    cooldown_until: Option<i64>,
    /// Set on a RATE_LIMITED/AUTH failure: ineligible for the rest of the
    /// UTC day without touching `requests_today`, which only ever counts
    /// calls that were actually sent. Cleared on rollover.
    exhausted_today: bool,
}

struct ProviderKeys {
    keys: Vec<KeyState>,
    /// Index of the last successfully used key, for round-robin start.
    last_used: usize,
}

pub struct KeyStore {
    providers: Mutex<HashMap<String, ProviderKeys>>,
}

#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub provider: String,
    pub index: usize,
    pub key_material: String,
}

impl KeyStore {
    pub fn from_config(config: &AppConfig) -> Self {
        let today = Utc::now().date_naive();
        let mut providers = HashMap::new();
        for (provider, keys) in &config.llm_keys {
            let states = keys
                .iter()
                .map(|k| KeyState {
                    key_material: k.key_material.clone(),
                    daily_request_limit: k.daily_request_limit,
                    requests_today: 0,
                    last_reset_utc_date: today,
                    cooldown_until: None,
                    exhausted_today: false,
                })
                .collect();
            providers.insert(
                provider.clone(),
                ProviderKeys {
                    keys: states,
                    last_used: 0,
                },
            );
        }
        Self {
            providers: Mutex::new(providers),
        }
    }

    fn rollover_locked(keys: &mut [KeyState], today: NaiveDate) {
        for k in keys.iter_mut() {
            if k.last_reset_utc_date != today {
                k.requests_today = 0;
                k.last_reset_utc_date = today;
                k.exhausted_today = false;
            }
        }
    }

    /// `true` iff the key's counter is below its limit, it hasn't been
    /// marked exhausted by a rate-limit/auth failure today, and it is not
    /// in an active cooldown.
    fn is_eligible(key: &KeyState, now: i64) -> bool {
        key.requests_today < key.daily_request_limit
            && !key.exhausted_today
            && !key.cooldown_until.map(|until| now <= until).unwrap_or(false)
    }

    /// Whether `provider` currently has at least one eligible key.
    pub fn has_eligible_key(&self, provider: &str) -> bool {
        let mut providers = self.providers.lock().unwrap();
        let Some(entry) = providers.get_mut(provider) else {
            return false;
        };
        let today = Utc::now().date_naive();
        Self::rollover_locked(&mut entry.keys, today);
        let now = Utc::now().timestamp();
        entry.keys.iter().any(|k| Self::is_eligible(k, now))
    }

    /// Select the next eligible key for `provider` in round-robin order,
    /// starting just after the last successfully used key.
    pub fn select_next(&self, provider: &str) -> Option<SelectedKey> {
        let mut providers = self.providers.lock().unwrap();
        let entry = providers.get_mut(provider)?;
        let today = Utc::now().date_naive();
        Self::rollover_locked(&mut entry.keys, today);
        let now = Utc::now().timestamp();
        let n = entry.keys.len();
        if n == 0 {
            return None;
        }
        for offset in 1..=n {
            let idx = (entry.last_used + offset) % n;
            if Self::is_eligible(&entry.keys[idx], now) {
                return Some(SelectedKey {
                    provider: provider.to_string(),
                    index: idx,
                    key_material: entry.keys[idx].key_material.clone(),
                });
            }
        }
        None
    }

    /// Record a successful call: increments the counter and advances the
    /// round-robin pointer.
    pub fn record_success(&self, provider: &str, index: usize) {
        let mut providers = self.providers.lock().unwrap();
        if let Some(entry) = providers.get_mut(provider) {
            if let Some(k) = entry.keys.get_mut(index) {
                k.requests_today = k.requests_today.saturating_add(1);
            }
            entry.last_used = index;
        }
    }

    /// Mark a key ineligible for the rest of the UTC day (rate-limited/auth
    /// failure). Does not touch `requests_today`.
    pub fn mark_exhausted_today(&self, provider: &str, index: usize) {
        let mut providers = self.providers.lock().unwrap();
        if let Some(entry) = providers.get_mut(provider) {
            if let Some(k) = entry.keys.get_mut(index) {
                k.exhausted_today = true;
            }
        }
    }

    /// Place a key in cooldown for `cooldown_secs` (timeout/5xx failure).
    pub fn mark_cooldown(&self, provider: &str, index: usize, cooldown_secs: u64) {
        let mut providers = self.providers.lock().unwrap();
        if let Some(entry) = providers.get_mut(provider) {
            if let Some(k) = entry.keys.get_mut(index) {
                k.cooldown_until = Some(Utc::now().timestamp() + cooldown_secs as i64);
            }
        }
    }

    pub fn requests_today(&self, provider: &str, index: usize) -> Option<u32> {
        let providers = self.providers.lock().unwrap();
        providers
            .get(provider)
            .and_then(|e| e.keys.get(index))
            .map(|k| k.requests_today)
    }
}
