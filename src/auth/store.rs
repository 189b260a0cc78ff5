//! Persisted user store: `users(user_id PK, email UNIQUE, password_hash, created_at)`.
//!
//! Held in-process behind a mutex and flushed to a JSON file on every write,
//! the same best-effort load/persist shape the quota ledger uses — acceptable
//! here because registrations are comparatively rare writes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    /// Keyed by lowercased email for uniqueness enforcement.
    by_email: HashMap<String, UserRecord>,
}

pub struct UserStore {
    state: Mutex<UsersFile>,
    path: PathBuf,
}

impl UserStore {
    pub fn load_or_default(path: PathBuf) -> Self {
        let state = load_state(&path).unwrap_or_default();
        Self {
            state: Mutex::new(state),
            path,
        }
    }

    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        let key = email.to_lowercase();
        self.state.lock().unwrap().by_email.get(&key).cloned()
    }

    pub fn find_by_id(&self, user_id: &str) -> Option<UserRecord> {
        self.state
            .lock()
            .unwrap()
            .by_email
            .values()
            .find(|u| u.user_id == user_id)
            .cloned()
    }

    /// Insert a new user. Fails with `AppError::EmailTaken` if the email is
    /// already registered (case-insensitively).
    pub fn create(&self, email: &str, password_hash: &str) -> Result<UserRecord> {
        let key = email.to_lowercase();
        let mut state = self.state.lock().unwrap();
        if state.by_email.contains_key(&key) {
            return Err(AppError::EmailTaken);
        }
        let record = UserRecord {
            user_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        state.by_email.insert(key, record.clone());
        let snapshot = UsersFile {
            by_email: state.by_email.clone(),
        };
        drop(state);
        persist_state(&self.path, &snapshot);
        Ok(record)
    }
}

fn load_state(path: &PathBuf) -> Option<UsersFile> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

fn persist_state(path: &PathBuf, state: &UsersFile) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(json) = serde_json::to_string_pretty(state) {
        if let Err(e) = std::fs::write(path, json) {
            tracing::warn!(error = %e, "failed to persist user store");
        }
    }
}
