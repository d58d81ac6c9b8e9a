//! Companion proxy daemon endpoint: per-IP sliding-window rate limiting in
//! front of a single fixed feed, fetched and parsed server-side.
//!
//! Unlike the reader's durable per-feed quota, this limiter lives in process
//! memory and resets on restart, which is acceptable for a long-lived daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::feed::{self, Article};
use crate::limiter::SlidingWindowLimiter;

/// Error message for a caller that exceeded the per-IP quota.
pub const RATE_LIMIT_MESSAGE: &str = "Liikaa pyyntöjä, yritä hetken päästä uudelleen.";
/// Generic failure message; fetch and parse faults are not distinguished.
pub const FETCH_FAILED_MESSAGE: &str = "Uutisten haku epäonnistui.";

/// The fixed feed the daemon serves.
pub const DEFAULT_FEED_URL: &str = "https://yle.fi/rss/t/18-204933/fi";
pub const MAX_REQUESTS_PER_IP: usize = 10;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

pub struct ServerState {
    pub client: reqwest::Client,
    pub feed_url: String,
    pub fetch_timeout: Duration,
    pub limiter: SlidingWindowLimiter,
}

impl ServerState {
    pub fn new(feed_url: String, fetch_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            feed_url,
            fetch_timeout,
            limiter: SlidingWindowLimiter::new(MAX_REQUESTS_PER_IP, RATE_LIMIT_WINDOW),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

pub fn build_app(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/news", get(news))
        .with_state(state)
}

async fn news(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let ip = client_ip(&headers, addr);

    if !state.limiter.try_consume(&ip).await {
        tracing::info!(ip = %ip, "Request rejected by per-IP quota");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody {
                error: RATE_LIMIT_MESSAGE,
            }),
        )
            .into_response();
    }

    match fetch_items(&state).await {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to fetch news items");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: FETCH_FAILED_MESSAGE,
                }),
            )
                .into_response()
        }
    }
}

/// Resolve the caller's IP: `x-forwarded-for` when fronted by a proxy,
/// otherwise the socket address.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

async fn fetch_items(state: &ServerState) -> Result<Vec<Article>> {
    let request = state.client.get(&state.feed_url).send();
    let response = tokio::time::timeout(state.fetch_timeout, request)
        .await
        .map_err(|_| anyhow!("request timed out"))??;
    let response = response.error_for_status()?;
    let body = response.text().await?;
    Ok(feed::parse_articles(&body)?)
}
