//! Refresh orchestration: quota check, fetch+parse+normalize, cache update,
//! and the fallback decisions when either the quota or the network says no.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::config::Config;
use crate::feed::{self, Article, FetchError, ParseError};
use crate::limiter::RateLimiter;
use crate::storage::{FeedCache, KvStore};

/// Where the articles in a `Ready` state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleSource {
    Live,
    Cached,
}

/// Presentation-facing snapshot of one feed key's refresh lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshState {
    Idle,
    Loading,
    Ready {
        articles: Vec<Article>,
        source: ArticleSource,
    },
    /// The request budget is exhausted; no network call was attempted.
    Blocked { cached: Option<Vec<Article>> },
    /// The fetch or parse failed after the budget allowed it.
    Failed { cached: Option<Vec<Article>> },
}

/// Failures on the live path, all downgraded to [`RefreshState::Failed`] at
/// the controller boundary.
#[derive(Debug, Error)]
enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Orchestrates refreshes for the configured feed set.
///
/// Every decision flows through here: consult the limiter, fetch through the
/// proxy on the live path, fall back to the cache on quota denial or failure.
/// Mutation of a key's quota record and cache slot is serialized with a
/// per-key mutex; keys are independent, so there is no cross-key coordination.
pub struct FeedRefreshController {
    feeds: BTreeMap<String, String>,
    client: reqwest::Client,
    proxy_endpoint: String,
    fetch_timeout: Duration,
    limiter: RateLimiter,
    cache: FeedCache,
    states: Mutex<HashMap<String, RefreshState>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FeedRefreshController {
    pub fn new(config: &Config, client: reqwest::Client, store: KvStore) -> Self {
        Self {
            feeds: config.feeds.clone(),
            client,
            proxy_endpoint: config.proxy_endpoint.clone(),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            limiter: RateLimiter::new(store.clone(), config.quota()),
            cache: FeedCache::new(store),
            states: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Configured feed keys, in display order.
    pub fn feed_keys(&self) -> Vec<String> {
        self.feeds.keys().cloned().collect()
    }

    /// Snapshot of the last reported state for `key`.
    pub fn current(&self, key: &str) -> RefreshState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or(RefreshState::Idle)
    }

    /// Requests left in the current quota window for `key`.
    pub async fn remaining(&self, key: &str, now_ms: i64) -> Result<u32> {
        self.limiter.remaining(key, now_ms).await
    }

    /// Feed selection: a key with a cache entry is served from cache without
    /// touching the network or the quota. A live refresh for a cached feed
    /// only ever happens through [`refresh`](Self::refresh); freshness is
    /// traded for quota here, deliberately.
    pub async fn select(&self, key: &str, now_ms: i64) -> Result<RefreshState> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if let Some(cached) = self.cache.get(key).await? {
            tracing::debug!(feed = key, count = cached.articles.len(), "Serving cached feed");
            let state = RefreshState::Ready {
                articles: cached.articles,
                source: ArticleSource::Cached,
            };
            self.set_state(key, state.clone());
            return Ok(state);
        }

        self.refresh_locked(key, now_ms).await
    }

    /// Explicit refresh: always consults the limiter and, if allowed,
    /// attempts a live fetch.
    pub async fn refresh(&self, key: &str, now_ms: i64) -> Result<RefreshState> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.refresh_locked(key, now_ms).await
    }

    async fn refresh_locked(&self, key: &str, now_ms: i64) -> Result<RefreshState> {
        let feed_url = self
            .feeds
            .get(key)
            .ok_or_else(|| anyhow!("unknown feed key: {key}"))?
            .clone();

        if !self.limiter.try_consume(key, now_ms).await? {
            tracing::info!(feed = key, "Refresh blocked by request quota");
            let cached = self.cache.get(key).await?.map(|c| c.articles);
            let state = RefreshState::Blocked { cached };
            self.set_state(key, state.clone());
            return Ok(state);
        }

        self.set_state(key, RefreshState::Loading);

        match self.fetch_live(&feed_url).await {
            Ok(articles) => {
                // Cache only after a fully successful fetch+normalize cycle
                self.cache.put(key, &articles, now_ms).await?;
                tracing::debug!(feed = key, count = articles.len(), "Feed refreshed");
                let state = RefreshState::Ready {
                    articles,
                    source: ArticleSource::Live,
                };
                self.set_state(key, state.clone());
                Ok(state)
            }
            Err(e) => {
                tracing::warn!(feed = key, error = %e, "Refresh failed, falling back to cache");
                let cached = self.cache.get(key).await?.map(|c| c.articles);
                let state = RefreshState::Failed { cached };
                self.set_state(key, state.clone());
                Ok(state)
            }
        }
    }

    async fn fetch_live(&self, feed_url: &str) -> Result<Vec<Article>, RefreshError> {
        let xml = feed::fetch_feed_xml(
            &self.client,
            &self.proxy_endpoint,
            feed_url,
            self.fetch_timeout,
        )
        .await?;
        Ok(feed::parse_articles(&xml)?)
    }

    fn set_state(&self, key: &str, state: RefreshState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), state);
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}
