//! User store — durable map of username → `{salt, password_hash, public_key}`
//! plus a transient map of username → pending challenge.
//!
//! Realized as a single JSON file rather than a SQL engine — database engine
//! choice is an external collaborator concern (see SPEC_FULL.md §4.4/§6); the
//! access contract below is what's normative.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already registered")]
    Duplicate,
    #[error("user not found")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub salt: String,          // hex
    pub password_hash: String, // hex
    pub public_key: String,    // PEM, SubjectPublicKeyInfo
    pub registration_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub challenge_b64: String,
    pub issued_at: u64,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    users: HashMap<String, UserRecord>,
}

/// Durable user records plus the transient per-username challenge table.
/// `create_user` inserts both the credential and public-key fields of a
/// record in one write, so it is all-or-nothing by construction.
pub struct UserStore {
    users: RwLock<HashMap<String, UserRecord>>,
    challenges: RwLock<HashMap<String, PendingChallenge>>,
    path: Option<PathBuf>,
}

impl UserStore {
    /// Load from `path` if it exists, otherwise start empty. `path = None`
    /// means in-memory only (used by tests).
    pub fn new(path: Option<PathBuf>) -> Self {
        let users = path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|raw| serde_json::from_str::<PersistedState>(&raw).ok())
            .map(|state| state.users)
            .unwrap_or_default();

        Self {
            users: RwLock::new(users),
            challenges: RwLock::new(HashMap::new()),
            path,
        }
    }

    async fn persist(&self, users: &HashMap<String, UserRecord>) {
        let Some(path) = &self.path else { return };
        let state = PersistedState {
            users: users.clone(),
        };
        match serde_json::to_string_pretty(&state) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(error = %e, "failed to persist user store");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize user store"),
        }
    }

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        salt: &str,
        public_key: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(StoreError::Duplicate);
        }
        users.insert(
            username.to_string(),
            UserRecord {
                salt: salt.to_string(),
                password_hash: password_hash.to_string(),
                public_key: public_key.to_string(),
                registration_time: now_secs(),
            },
        );
        self.persist(&users).await;
        Ok(())
    }

    pub async fn user_exists(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username)
    }

    pub async fn get_user_data(&self, username: &str) -> Option<UserRecord> {
        self.users.read().await.get(username).cloned()
    }

    /// Upsert the caller's public key. Errors `NotFound` if the username has
    /// no credential row to attach the key to.
    pub async fn store_public_key(&self, username: &str, pem: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let Some(record) = users.get_mut(username) else {
            return Err(StoreError::NotFound);
        };
        record.public_key = pem.to_string();
        self.persist(&users).await;
        Ok(())
    }

    pub async fn get_public_key(&self, username: &str) -> Option<String> {
        self.users
            .read()
            .await
            .get(username)
            .map(|r| r.public_key.clone())
    }

    /// Overwrite any prior pending challenge for this user.
    pub async fn store_challenge(&self, username: &str, challenge_b64: &str) {
        self.challenges.write().await.insert(
            username.to_string(),
            PendingChallenge {
                challenge_b64: challenge_b64.to_string(),
                issued_at: now_secs(),
            },
        );
    }

    pub async fn get_challenge(&self, username: &str) -> Option<PendingChallenge> {
        self.challenges.read().await.get(username).cloned()
    }

    /// Consume (remove) the pending challenge, used once verification
    /// succeeds or fails so a stale challenge can't be replayed.
    pub async fn take_challenge(&self, username: &str) -> Option<PendingChallenge> {
        self.challenges.write().await.remove(username)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
