//! Two-factor action tokens.
//!
//! A state-changing request that needs out-of-band confirmation is turned
//! into a list of [`ActionDescriptor`]s, serialized and stashed under a
//! random single-use handle with an expiry.  Redeeming the handle removes the
//! row first and only then executes the actions, so a token runs at most
//! once even when redeemed concurrently: removal is the single-consumer gate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

pub const TOKEN_LEN: usize = 32;
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// A deferred action carried by a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionDescriptor {
    DeleteLink { channel: String, link_id: u64 },
    ChangeEmail { channel: String, email: String },
    RevokeSessions { channel: String },
}

impl ActionDescriptor {
    pub fn channel(&self) -> &str {
        match self {
            ActionDescriptor::DeleteLink { channel, .. }
            | ActionDescriptor::ChangeEmail { channel, .. }
            | ActionDescriptor::RevokeSessions { channel } => channel,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ActionDescriptor::DeleteLink { link_id, .. } => format!("delete link {}", link_id),
            ActionDescriptor::ChangeEmail { email, .. } => format!("change email to {}", email),
            ActionDescriptor::RevokeSessions { .. } => "sign out all sessions".to_string(),
        }
    }
}

/// Executes redeemed actions.  `Ok(None)` means the action has no result
/// worth returning.
#[async_trait::async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ActionDescriptor) -> Result<Option<Value>>;
}

/// Persistence contract for stashed actions.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn stash(&self, handle: &str, json: String, expires_at: DateTime<Utc>) -> Result<()>;
    /// Atomically remove and return the row for `handle`.  Expired rows are
    /// removed too but reported as absent.
    async fn unstash(&self, handle: &str) -> Result<Option<String>>;
}

#[derive(Clone, Debug)]
struct StashedRow {
    json: String,
    expires_at: DateTime<Utc>,
}

/// In-process token store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryTokenStore {
    rows: DashMap<String, StashedRow>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        self.rows.retain(|_, row| row.expires_at > now);
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn stash(&self, handle: &str, json: String, expires_at: DateTime<Utc>) -> Result<()> {
        self.purge_expired(Utc::now());
        if self.rows.contains_key(handle) {
            return Err(AppError::Storage(format!("token handle collision on {}", handle)));
        }
        self.rows
            .insert(handle.to_string(), StashedRow { json, expires_at });
        Ok(())
    }

    async fn unstash(&self, handle: &str) -> Result<Option<String>> {
        match self.rows.remove(handle) {
            Some((_, row)) if row.expires_at > Utc::now() => Ok(Some(row.json)),
            Some(_) => {
                tracing::debug!("discarded expired token");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

fn generate_handle() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn is_valid_handle(handle: &str) -> bool {
    handle.len() == TOKEN_LEN && handle.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Issues and redeems two-factor action tokens.
#[derive(Clone)]
pub struct TwoFactor {
    store: Arc<dyn TokenStore>,
    ttl: Duration,
}

impl TwoFactor {
    pub fn new(store: Arc<dyn TokenStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs.min(u32::MAX as u64) as i64),
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl.num_seconds().max(0) as u64
    }

    /// Stash `actions` under a fresh handle and return the handle.
    pub async fn create_token(&self, actions: &[ActionDescriptor]) -> Result<String> {
        if actions.is_empty() {
            return Err(AppError::Validation(
                "a two-factor token needs at least one action".into(),
            ));
        }
        let json = serde_json::to_string(actions)
            .map_err(|e| AppError::Storage(format!("failed to serialize actions: {}", e)))?;
        let handle = generate_handle();
        let expires_at = Utc::now() + self.ttl;
        self.store.stash(&handle, json, expires_at).await?;
        tracing::info!(actions = actions.len(), %expires_at, "issued two-factor token");
        Ok(handle)
    }

    /// Consume `handle` and run its actions in order.  Returns the last
    /// non-null action result, or `{"status":"ok"}`.
    pub async fn redeem(&self, handle: &str, executor: &dyn ActionExecutor) -> Result<Value> {
        if !is_valid_handle(handle) {
            return Err(AppError::TokenNotFoundOrExpired);
        }
        let json = self
            .store
            .unstash(handle)
            .await?
            .ok_or(AppError::TokenNotFoundOrExpired)?;
        let actions: Vec<ActionDescriptor> = serde_json::from_str(&json)
            .map_err(|e| AppError::Storage(format!("stashed actions are unreadable: {}", e)))?;

        let mut last = None;
        for action in &actions {
            tracing::info!(channel = %action.channel(), action = %action.summary(), "executing two-factor action");
            if let Some(result) = executor.execute(action).await? {
                last = Some(result);
            }
        }
        Ok(last.unwrap_or_else(|| serde_json::json!({"status": "ok"})))
    }
}
