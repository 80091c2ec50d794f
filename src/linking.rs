//! External barcode linking.
//!
//! Scanned raw barcodes are transformed into canonical device identifiers by
//! an external service: the raw value is POSTed, the response body is the
//! canonical barcode (possibly wrapped in double quotes). Any failure
//! (timeout, transport error, non-2xx status, empty body, the literal
//! `null`) means the link is unavailable and the caller falls back to the
//! scanned value verbatim. The linker operates on scalars only.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// How long a successful link stays in the in-memory cache.
const LINK_CACHE_TTL_SECS: i64 = 300;

/// The linking capability. `None` = link unavailable; the caller keeps the
/// raw value.
#[async_trait]
pub trait BarcodeLinker: Send + Sync {
    async fn link(&self, raw: &str) -> Option<String>;
}

/// Interprets a linking response body. Strips one pair of wrapping double
/// quotes; an empty remainder or the literal `null` is no link.
pub fn parse_link_response(body: &str) -> Option<String> {
    let trimmed = body.trim();
    let unquoted = if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };
    if unquoted.is_empty() || unquoted == "null" {
        return None;
    }
    Some(unquoted.to_string())
}

/// Linker used when the service URL is unconfigured or linking is disabled:
/// every lookup falls through.
pub struct DisabledLinker;

#[async_trait]
impl BarcodeLinker for DisabledLinker {
    async fn link(&self, _raw: &str) -> Option<String> {
        None
    }
}

/// HTTP client for the linking service, with a bounded-TTL result cache.
pub struct HttpBarcodeLinker {
    client: reqwest::Client,
    url: String,
    cache: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl HttpBarcodeLinker {
    pub fn new(url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cache_get(&self, raw: &str) -> Option<String> {
        let cache = self.cache.lock().ok()?;
        let (canonical, linked_at) = cache.get(raw)?;
        if Utc::now() - *linked_at > ChronoDuration::seconds(LINK_CACHE_TTL_SECS) {
            return None;
        }
        Some(canonical.clone())
    }

    fn cache_put(&self, raw: &str, canonical: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|_, (_, at)| Utc::now() - *at <= ChronoDuration::seconds(LINK_CACHE_TTL_SECS));
            cache.insert(raw.to_string(), (canonical.to_string(), Utc::now()));
        }
    }
}

#[async_trait]
impl BarcodeLinker for HttpBarcodeLinker {
    async fn link(&self, raw: &str) -> Option<String> {
        if let Some(cached) = self.cache_get(raw) {
            return Some(cached);
        }

        let response = match self.client.post(&self.url).body(raw.to_string()).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(raw, error = %err, "barcode linking transport error");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(raw, status = %response.status(), "barcode linking non-2xx");
            return None;
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(raw, error = %err, "barcode linking body read failed");
                return None;
            }
        };

        let canonical = parse_link_response(&body)?;
        self.cache_put(raw, &canonical);
        Some(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_body_is_unwrapped() {
        assert_eq!(
            parse_link_response("\"20004157-0003285-1022823-101\"").as_deref(),
            Some("20004157-0003285-1022823-101")
        );
    }

    #[test]
    fn unquoted_body_passes_through() {
        assert_eq!(parse_link_response("ABC-123").as_deref(), Some("ABC-123"));
    }

    #[test]
    fn null_and_empty_bodies_are_unavailable() {
        assert_eq!(parse_link_response(""), None);
        assert_eq!(parse_link_response("   "), None);
        assert_eq!(parse_link_response("null"), None);
        assert_eq!(parse_link_response("\"null\""), None);
        assert_eq!(parse_link_response("\"\""), None);
    }

    #[test]
    fn single_quote_character_is_not_stripped() {
        // A body of just '"' must not unwrap into itself.
        assert_eq!(parse_link_response("\"").as_deref(), Some("\""));
    }

    #[test]
    fn disabled_linker_always_falls_through() {
        tokio_test::block_on(async {
            assert_eq!(DisabledLinker.link("XYZ").await, None);
        });
    }
}
