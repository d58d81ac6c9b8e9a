//! Per-key request budgets.
//!
//! Two variants with deliberately different window semantics:
//!
//! - [`RateLimiter`] is the client-side budget. It is a *lazily-reset fixed
//!   window*: the window is anchored to the first qualifying request and only
//!   resets once that anchor ages out. Bursts that straddle a window boundary
//!   are not smoothed; that is an accepted approximation. Records persist
//!   in durable storage so the budget survives restarts.
//! - [`SlidingWindowLimiter`] is the server-side per-IP limiter: a true
//!   sliding window over an in-process timestamp list. It is more precise
//!   because it runs in a long-lived process, and best-effort across restarts
//!   because it holds no durable state.
//!
//! The asymmetry between the two is intentional and preserved; unifying them
//! would be a policy change.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;

use crate::storage::KvStore;

pub const DEFAULT_WINDOW_MS: i64 = 60_000;
pub const DEFAULT_MAX_REQUESTS: u32 = 5;

/// Window length and request budget for the client-side limiter.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub window_ms: i64,
    pub max_requests: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

/// Client-side fixed-window budget tracker with durable per-key records.
#[derive(Clone)]
pub struct RateLimiter {
    store: KvStore,
    config: QuotaConfig,
}

impl RateLimiter {
    pub fn new(store: KvStore, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    fn count_key(key: &str) -> String {
        format!("quota:{key}:count")
    }

    fn window_key(key: &str) -> String {
        format!("quota:{key}:window_start")
    }

    /// Load the stored record for `key`; an unknown key reads as an empty
    /// record (`count = 0`, `window_start = 0`).
    async fn load(&self, key: &str) -> Result<(u32, i64)> {
        let count = self
            .store
            .get(&Self::count_key(key))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let window_start = self
            .store
            .get(&Self::window_key(key))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok((count, window_start))
    }

    /// Try to spend one request from the budget for `key`.
    ///
    /// Returns `false` without mutating state once the budget is exhausted.
    /// The window anchor is set on the first counted request of a window and
    /// kept there; it does not slide forward on later requests. A clock that
    /// runs backwards (negative elapsed time) counts as "within the window".
    pub async fn try_consume(&self, key: &str, now_ms: i64) -> Result<bool> {
        let (mut count, mut window_start) = self.load(key).await?;

        if now_ms - window_start > self.config.window_ms {
            count = 0;
        }
        if count >= self.config.max_requests {
            return Ok(false);
        }

        if count == 0 {
            window_start = now_ms;
        }
        count += 1;

        self.store
            .set(&Self::count_key(key), &count.to_string())
            .await?;
        self.store
            .set(&Self::window_key(key), &window_start.to_string())
            .await?;
        Ok(true)
    }

    /// How many requests `key` has left in its current window.
    pub async fn remaining(&self, key: &str, now_ms: i64) -> Result<u32> {
        let (mut count, window_start) = self.load(key).await?;
        if now_ms - window_start > self.config.window_ms {
            count = 0;
        }
        Ok(self.config.max_requests.saturating_sub(count))
    }
}

/// Server-side per-key sliding-window limiter.
///
/// Keeps the raw request timestamps per key and filters out entries older
/// than the window on every call.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    log: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            log: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key` at the current instant.
    pub async fn try_consume(&self, key: &str) -> bool {
        self.try_consume_at(key, Instant::now()).await
    }

    /// Clock-injected variant used by tests.
    pub async fn try_consume_at(&self, key: &str, now: Instant) -> bool {
        let mut log = self.log.lock().await;
        let entries = log.entry(key.to_string()).or_default();
        entries.retain(|t| now.saturating_duration_since(*t) < self.window);
        if entries.len() >= self.max_requests {
            return false;
        }
        entries.push(now);
        true
    }
}
