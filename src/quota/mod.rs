//! Quota Ledger: per-user, per-UTC-day token counter with atomic debit.
//!
//! Keyed on `(user_id, utc_date)` rather than `(provider, period)`, this
//! generalizes the provider-quota tracker's period-key/state-map shape:
//! a mutex-guarded map, rollover keyed on a formatted date string, and
//! best-effort JSON persistence after each mutation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheckResult {
    Ok { remaining: u64 },
    Exceeded { remaining: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDebitResult {
    Ok { tokens_consumed: u64 },
    /// The debit still committed the full `actual_cost` — the work was
    /// already done by the time this is called — but the resulting total
    /// breaches `daily_ceiling`. Carries the persisted total so the caller
    /// can charge the client the true amount; the *next* `check` for this
    /// user will report `Exceeded`.
    Exceeded { tokens_consumed: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct QuotaState {
    /// Keyed by `"{user_id}|{utc_date}"`.
    entries: HashMap<String, u64>,
}

pub struct QuotaLedger {
    state: Mutex<QuotaState>,
    path: PathBuf,
    daily_ceiling: u64,
}

fn entry_key(user_id: &str, date: NaiveDate) -> String {
    format!("{user_id}|{date}")
}

impl QuotaLedger {
    pub fn load_or_default(path: PathBuf, daily_ceiling: u64) -> Self {
        let state = load_state(&path).unwrap_or_default();
        Self {
            state: Mutex::new(state),
            path,
            daily_ceiling,
        }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Non-mutating: returns the remaining allowance for today, and whether
    /// `estimated_cost` would exceed it.
    pub fn check(&self, user_id: &str, estimated_cost: u64) -> QuotaCheckResult {
        let key = entry_key(user_id, Self::today());
        let consumed = {
            let state = self.state.lock().unwrap();
            *state.entries.get(&key).unwrap_or(&0)
        };
        let remaining = self.daily_ceiling.saturating_sub(consumed);
        if consumed.saturating_add(estimated_cost) > self.daily_ceiling {
            QuotaCheckResult::Exceeded { remaining }
        } else {
            QuotaCheckResult::Ok { remaining }
        }
    }

    /// Atomic read-modify-write, called once the underlying work is already
    /// done (the pipeline debits only after the LLM has answered). The full
    /// `actual_cost` is always committed — there is no token to refund, the
    /// call already happened — but a post-debit total over `daily_ceiling`
    /// is reported as `Exceeded` so the caller can warn and so the next
    /// `check` for this user sees no remaining allowance.
    pub fn debit(&self, user_id: &str, actual_cost: u64) -> QuotaDebitResult {
        let key = entry_key(user_id, Self::today());
        let mut state = self.state.lock().unwrap();
        let consumed = *state.entries.get(&key).unwrap_or(&0);
        let new_total = consumed + actual_cost;
        state.entries.insert(key, new_total);
        let snapshot = state.clone();
        drop(state);
        persist_state(&self.path, &snapshot);
        if new_total > self.daily_ceiling {
            QuotaDebitResult::Exceeded {
                tokens_consumed: new_total,
            }
        } else {
            QuotaDebitResult::Ok {
                tokens_consumed: new_total,
            }
        }
    }

    /// Current tokens consumed today, for diagnostics/tests.
    pub fn tokens_consumed_today(&self, user_id: &str) -> u64 {
        let key = entry_key(user_id, Self::today());
        *self.state.lock().unwrap().entries.get(&key).unwrap_or(&0)
    }

    pub fn daily_ceiling(&self) -> u64 {
        self.daily_ceiling
    }

    /// Idempotent day-rollover hook. Because entries are keyed by
    /// `(user_id, utc_date)`, a new UTC day simply has no entry yet — there
    /// is nothing to reset in place. This exists to make the rollover an
    /// explicit, callable step matching `check`/`debit`'s implicit
    /// invocation of it, rather than leaving the rollover undocumented.
    pub fn reset_if_new_day(&self, _user_id: &str) {}
}

fn load_state(path: &PathBuf) -> Option<QuotaState> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

fn persist_state(path: &PathBuf, state: &QuotaState) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(json) = serde_json::to_string_pretty(state) {
        if let Err(e) = std::fs::write(path, json) {
            tracing::warn!(error = %e, "failed to persist quota ledger");
        }
    }
}
