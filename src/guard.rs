//! Double-submission guard.
//!
//! A short-lived idempotency lock keyed by a hash of the call site and the
//! serialized request payload.  The first submission inserts the key; any
//! identical submission inside the TTL is rejected.  Keys are never released
//! explicitly, expiry is the only way out.  The cache is in-memory and
//! best-effort: it only guards against accidental double clicks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::util::content_key;

/// Sweep expired keys once the map grows past this many entries.
const SWEEP_THRESHOLD: usize = 10_000;

/// Shared cache with an atomic "add if absent" primitive.
pub trait IdempotencyCache: Send + Sync {
    /// Insert `key` with `ttl` unless a live entry exists.  Returns true when
    /// the key was inserted.
    fn add_if_absent(&self, key: &str, ttl: Duration) -> bool;
    fn contains(&self, key: &str) -> bool;
}

/// Expiry of a cached key.  `None` is a TTL too long to represent as an
/// `Instant`, which never expires.
type Expiry = Option<Instant>;

fn is_live(expires: &Expiry, now: Instant) -> bool {
    expires.map_or(true, |at| at > now)
}

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Expiry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self, now: Instant) {
        self.entries.retain(|_, expires| is_live(expires, now));
    }
}

impl IdempotencyCache for MemoryCache {
    fn add_if_absent(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        if self.entries.len() > SWEEP_THRESHOLD {
            self.sweep(now);
        }
        let expires = now.checked_add(ttl);
        // the entry holds the shard lock, which makes check-and-insert atomic
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut live) => {
                if is_live(live.get(), now) {
                    false
                } else {
                    live.insert(expires);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(expires);
                true
            }
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|expires| is_live(expires.value(), Instant::now()))
            .unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct SubmissionGuard {
    cache: Arc<dyn IdempotencyCache>,
    default_ttl: Duration,
}

impl SubmissionGuard {
    pub fn new(cache: Arc<dyn IdempotencyCache>, default_ttl: Duration) -> Self {
        Self { cache, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Lock `payload` for `callsite` during the default TTL.
    pub fn check<T: Serialize + ?Sized>(&self, callsite: &str, payload: &T) -> Result<()> {
        self.guard(callsite, payload, self.default_ttl)
    }

    pub fn guard<T: Serialize + ?Sized>(
        &self,
        callsite: &str,
        payload: &T,
        ttl: Duration,
    ) -> Result<()> {
        let serialized = serde_json::to_string(payload)
            .map_err(|e| AppError::Validation(format!("payload cannot be serialized: {}", e)))?;
        let key = content_key(callsite, &serialized);
        if self.cache.add_if_absent(&key, ttl) {
            Ok(())
        } else {
            tracing::info!(callsite, "duplicate submission rejected");
            Err(AppError::DuplicateSubmission {
                ttl_secs: ttl.as_secs().max(1),
            })
        }
    }
}
