use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use thiserror::Error;

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors on the network half of a refresh. The controller downgrades all of
/// these to a `Failed` state with cached data attached; none reach the user
/// as distinct messages.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Proxy response was not the expected JSON envelope
    #[error("Malformed proxy envelope: {0}")]
    MalformedEnvelope(String),
    /// Envelope had no `contents` field to decode
    #[error("Proxy envelope missing contents")]
    MissingContents,
    /// `contents` was a data URI that could not be decoded to text
    #[error("Malformed data URI payload: {0}")]
    MalformedDataUri(String),
}

/// JSON envelope returned by the CORS proxy. Only `contents` matters here;
/// the proxy's own status block is ignored.
#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    contents: Option<String>,
}

/// Fetch the raw XML for one feed address through the proxy.
///
/// The proxy is called as `GET {proxy_endpoint}?url={feed_url}` and answers
/// with a JSON envelope whose `contents` field holds either the XML text
/// directly or a `data:` URI wrapping it.
pub async fn fetch_feed_xml(
    client: &reqwest::Client,
    proxy_endpoint: &str,
    feed_url: &str,
    timeout: Duration,
) -> Result<String, FetchError> {
    let request = client.get(proxy_endpoint).query(&[("url", feed_url)]).send();
    let response = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
    let envelope: ProxyEnvelope = serde_json::from_slice(&bytes)
        .map_err(|e| FetchError::MalformedEnvelope(e.to_string()))?;
    let contents = envelope.contents.ok_or(FetchError::MissingContents)?;

    decode_contents(&contents)
}

/// Unwrap the proxy `contents` field to plain XML text.
///
/// Plain text passes through untouched. A `data:` URI has its payload decoded
/// from base64 when the media type says so, and percent-decoded otherwise.
pub fn decode_contents(contents: &str) -> Result<String, FetchError> {
    let Some(rest) = contents.strip_prefix("data:") else {
        return Ok(contents.to_string());
    };

    let (media_type, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::MalformedDataUri("no ',' separator".to_string()))?;

    if media_type.ends_with(";base64") {
        let decoded = BASE64
            .decode(payload.trim())
            .map_err(|e| FetchError::MalformedDataUri(e.to_string()))?;
        String::from_utf8(decoded).map_err(|e| FetchError::MalformedDataUri(e.to_string()))
    } else {
        Ok(percent_decode_str(payload)
            .decode_utf8()
            .map_err(|e| FetchError::MalformedDataUri(e.to_string()))?
            .into_owned())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
