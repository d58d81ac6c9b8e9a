//! Configuration file parser for ~/.config/uutiset/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields`
//! off), though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::limiter::QuotaConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CORS proxy endpoint; feeds are fetched as `{proxy_endpoint}?url=...`.
    pub proxy_endpoint: String,

    /// Network fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Length of the per-feed request quota window, in seconds.
    pub quota_window_secs: u64,

    /// Requests allowed per feed key inside one quota window.
    pub quota_max_requests: u32,

    /// Feed key → feed address. Keys double as cache/quota namespaces.
    pub feeds: BTreeMap<String, String>,
}

fn default_feeds() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "uutiset".to_string(),
            "https://yle.fi/rss/t/18-204933/fi".to_string(),
        ),
        (
            "talous".to_string(),
            "https://yle.fi/rss/t/18-19274/fi".to_string(),
        ),
        (
            "urheilu".to_string(),
            "https://yle.fi/rss/t/18-205598/fi".to_string(),
        ),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_endpoint: "https://api.allorigins.win/get".to_string(),
            fetch_timeout_secs: 30,
            quota_window_secs: 60,
            quota_max_requests: 5,
            feeds: default_feeds(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "proxy_endpoint",
                "fetch_timeout_secs",
                "quota_window_secs",
                "quota_max_requests",
                "feeds",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config.validated())
    }

    /// Drop feed entries whose address is not a valid http(s) URL.
    fn validated(mut self) -> Self {
        self.feeds.retain(|key, address| {
            match url::Url::parse(address) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => true,
                _ => {
                    tracing::warn!(feed = %key, address = %address, "Dropping feed with invalid address");
                    false
                }
            }
        });
        self
    }

    /// Quota parameters for the client-side limiter.
    pub fn quota(&self) -> QuotaConfig {
        QuotaConfig {
            window_ms: (self.quota_window_secs as i64).saturating_mul(1000),
            max_requests: self.quota_max_requests,
        }
    }
}
