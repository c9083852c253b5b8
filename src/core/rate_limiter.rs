//! Per-client rate limiting.
//!
//! Requests are counted per client address in fixed windows. The counters live
//! behind the [`RateLimitStore`] trait; [`MemoryStore`] keeps them in a
//! process-local `DashMap`, where the check and the increment for one key
//! happen under the same shard lock.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::AppError;

/// Length of the rate window used by the HTTP endpoints.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Result of counting one request against a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted; `remaining` more fit in the current window
    Allowed { remaining: u32 },
    /// Quota exhausted until the window resets
    Rejected { reset_after: Duration },
}

/// Backing store for rate-limit counters.
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key` and decide whether it fits in `limit`
    /// requests per `window`. Check and increment must be atomic per key.
    fn hit(&self, key: &str, limit: u32, window: Duration) -> Admission;

    /// Drop windows that ended at least `window` ago.
    fn purge_expired(&self, window: Duration);
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    started: Instant,
    count: u32,
}

/// In-memory fixed-window counter store.
#[derive(Default)]
pub struct MemoryStore {
    windows: DashMap<String, WindowCounter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl RateLimitStore for MemoryStore {
    fn hit(&self, key: &str, limit: u32, window: Duration) -> Admission {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowCounter {
                started: now,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let reset_after = window.saturating_sub(now.saturating_duration_since(entry.started));
            return Admission::Rejected { reset_after };
        }

        entry.count += 1;
        Admission::Allowed {
            remaining: limit - entry.count,
        }
    }

    fn purge_expired(&self, window: Duration) {
        let now = Instant::now();
        self.windows
            .retain(|_, counter| now.saturating_duration_since(counter.started) < window);
    }
}

/// Build the store described by a storage URI.
///
/// Only the in-memory store ships with this build; any other location is
/// reported and replaced by the memory store.
pub fn store_from_uri(uri: &str) -> Arc<dyn RateLimitStore> {
    if !uri.starts_with("memory://") {
        tracing::warn!(
            storage_uri = %uri,
            "Shared rate-limit store is not supported, counting in memory"
        );
    }
    Arc::new(MemoryStore::new())
}

/// Quota for one endpoint, counted per client.
#[derive(Clone)]
pub struct RateLimiter {
    scope: &'static str,
    limit: u32,
    window: Duration,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Create a limiter admitting `limit` requests per client per minute.
    pub fn per_minute(scope: &'static str, limit: u32, store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_window(scope, limit, DEFAULT_WINDOW, store)
    }

    pub fn with_window(
        scope: &'static str,
        limit: u32,
        window: Duration,
        store: Arc<dyn RateLimitStore>,
    ) -> Self {
        Self {
            scope,
            limit,
            window,
            store,
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check if a request from `client` is allowed.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the request is allowed
    /// * `Err(AppError::RateLimited)` if the quota for the window is used up
    pub fn check(&self, client: &str) -> Result<(), AppError> {
        let key = format!("{}:{}", self.scope, client);
        match self.store.hit(&key, self.limit, self.window) {
            Admission::Allowed { .. } => Ok(()),
            Admission::Rejected { reset_after } => {
                let retry_after_secs = reset_after.as_secs_f64().ceil().max(1.0) as u64;
                tracing::warn!(
                    scope = self.scope,
                    client = %client,
                    limit = self.limit,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                Err(AppError::RateLimited { retry_after_secs })
            }
        }
    }

    /// Drop expired windows from the backing store.
    pub fn purge_expired(&self) {
        self.store.purge_expired(self.window);
    }
}
