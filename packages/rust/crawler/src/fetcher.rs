//! Page fetching with retry, for plain HTTP and browser-rendered pages.
//!
//! A [`Fetcher`] is created per job. It owns the HTTP client (carrying the
//! jurisdiction's custom headers) and, for JavaScript-dependent
//! jurisdictions, a browser session opened on first use. Call
//! [`Fetcher::cleanup`] when the job ends to release that session.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bylawdb_shared::{BylawError, FetchConfig, Result};
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::charset;
use crate::renderer::{RenderSession, Renderer};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff applied to transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.backoff_base,
            max_delay: config.backoff_cap,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How a page was retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMethod {
    Http,
    Browser,
}

/// Response metadata archived alongside every page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchMetadata {
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub method: FetchMethod,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub elapsed_ms: u64,
    pub content_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    /// Browser navigation timing, when rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<serde_json::Value>,
}

/// A successfully fetched page or file.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub body: Vec<u8>,
    pub metadata: FetchMetadata,
    /// Full-page PNG, when requested from the browser strategy.
    pub screenshot: Option<Vec<u8>>,
}

impl FetchedContent {
    /// Encoding declared by the response headers or the page itself.
    pub fn encoding(&self) -> &'static Encoding {
        charset::detect_encoding(self.metadata.content_type.as_deref(), &self.body)
    }

    /// Body decoded with its declared encoding, replacing invalid sequences.
    pub fn text(&self) -> String {
        charset::decode(self.encoding(), &self.body).into_owned()
    }
}

/// Fetch that failed after exhausting its attempts, or on a permanent error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{url}: {cause} (after {attempts} attempt(s))")]
pub struct FetchError {
    pub url: String,
    pub cause: String,
    pub attempts: u32,
    /// Whether the last failure was of a retryable kind.
    pub transient: bool,
    /// HTTP status of the last response, if one arrived.
    pub status: Option<u16>,
}

impl From<FetchError> for BylawError {
    fn from(err: FetchError) -> Self {
        BylawError::Network(err.to_string())
    }
}

/// Per-request switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Render through the browser session.
    pub render_js: bool,
    /// Capture a screenshot (browser only).
    pub screenshot: bool,
}

impl FetchOptions {
    pub fn http() -> Self {
        Self::default()
    }

    pub fn browser(screenshot: bool) -> Self {
        Self {
            render_js: true,
            screenshot,
        }
    }
}

struct AttemptFailure {
    cause: String,
    transient: bool,
    status: Option<u16>,
}

impl AttemptFailure {
    fn transient(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            transient: true,
            status: None,
        }
    }

    fn permanent(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            transient: false,
            status: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Retrieves pages over HTTP or through a headless browser.
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
    render_timeout: Duration,
    renderer: Arc<dyn Renderer>,
    session: Mutex<Option<Box<dyn RenderSession>>>,
}

impl Fetcher {
    /// Build a fetcher sending `custom_headers` on every HTTP request.
    pub fn new(
        config: &FetchConfig,
        custom_headers: &BTreeMap<String, String>,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(header_map(custom_headers)?)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| BylawError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy: RetryPolicy::from(config),
            render_timeout: config.render_timeout,
            renderer,
            session: Mutex::new(None),
        })
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch `url`, retrying transient failures with backoff.
    ///
    /// Network errors, timeouts, 5xx responses and truncated bodies are
    /// retried; any other status fails on the first attempt.
    #[instrument(skip_all, fields(url = %url, render_js = options.render_js))]
    pub async fn fetch(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> std::result::Result<FetchedContent, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = if options.render_js {
                self.fetch_rendered(url, options.screenshot).await
            } else {
                self.fetch_http(url).await
            };

            match outcome {
                Ok(mut content) => {
                    content.metadata.attempts = attempt;
                    debug!(
                        attempt,
                        status = content.metadata.status,
                        bytes = content.body.len(),
                        "fetched"
                    );
                    return Ok(content);
                }
                Err(failure) if failure.transient && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        cause = %failure.cause,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => {
                    return Err(FetchError {
                        url: url.to_string(),
                        cause: failure.cause,
                        attempts: attempt,
                        transient: failure.transient,
                        status: failure.status,
                    });
                }
            }
        }
    }

    /// Close the browser session, if one was opened. Safe to call twice.
    pub async fn cleanup(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!(error = %e, "failed to close browser session");
            } else {
                debug!(renderer = self.renderer.name(), "browser session released");
            }
        }
    }

    /// Whether a browser session is currently held.
    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn fetch_http(&self, url: &str) -> std::result::Result<FetchedContent, AttemptFailure> {
        let fetched_at = Utc::now();
        let start = Instant::now();

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                AttemptFailure::permanent(format!("invalid request: {e}"))
            } else {
                AttemptFailure::transient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure {
                cause: format!("HTTP {status}"),
                transient: status.is_server_error(),
                status: Some(status.as_u16()),
            });
        }

        let final_url = response.url().to_string();
        let headers = header_pairs(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptFailure::transient(format!("body read failed: {e}")))?
            .to_vec();

        Ok(FetchedContent {
            metadata: FetchMetadata {
                url: url.to_string(),
                final_url,
                method: FetchMethod::Http,
                status: status.as_u16(),
                headers,
                elapsed_ms: start.elapsed().as_millis() as u64,
                content_length: body.len(),
                content_type,
                fetched_at,
                attempts: 1,
                page_title: None,
                performance: None,
            },
            body,
            screenshot: None,
        })
    }

    async fn fetch_rendered(
        &self,
        url: &str,
        screenshot: bool,
    ) -> std::result::Result<FetchedContent, AttemptFailure> {
        let fetched_at = Utc::now();
        let start = Instant::now();

        let mut guard = self.session.lock().await;
        if guard.is_none() {
            let session = self
                .renderer
                .open_session()
                .await
                .map_err(|e| AttemptFailure::permanent(e.to_string()))?;
            debug!(renderer = self.renderer.name(), "opened browser session");
            *guard = Some(session);
        }
        let Some(session) = guard.as_mut() else {
            return Err(AttemptFailure::permanent("browser session unavailable"));
        };

        let navigation = session
            .navigate(url, self.render_timeout)
            .await
            .map_err(|e| AttemptFailure::transient(e.to_string()))?;
        let html = session
            .html()
            .await
            .map_err(|e| AttemptFailure::transient(e.to_string()))?;
        let page_title = session.title().await.ok().flatten();
        let performance = session.performance().await.ok();
        let shot = if screenshot {
            match session.screenshot().await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "screenshot failed");
                    None
                }
            }
        } else {
            None
        };

        let body = html.into_bytes();
        Ok(FetchedContent {
            metadata: FetchMetadata {
                url: url.to_string(),
                final_url: navigation.final_url,
                method: FetchMethod::Browser,
                // The browser reports no status for rendered documents.
                status: 200,
                headers: BTreeMap::new(),
                elapsed_ms: start.elapsed().as_millis() as u64,
                content_length: body.len(),
                content_type: Some("text/html".into()),
                fetched_at,
                attempts: 1,
                page_title,
                performance,
            },
            body,
            screenshot: shot,
        })
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BylawError::config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BylawError::config(format!("invalid value for header '{name}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn header_pairs(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NoopRenderer;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    fn fetcher(headers: &BTreeMap<String, String>) -> Fetcher {
        Fetcher::new(&FetchConfig::default(), headers, Arc::new(NoopRenderer))
            .unwrap()
            .with_policy(fast_policy())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bylaws"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bylaws"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html><h1>Bylaws</h1></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let url = format!("{}/bylaws", server.uri());
        let content = fetcher(&BTreeMap::new())
            .fetch(&url, FetchOptions::http())
            .await
            .expect("third attempt succeeds");

        assert_eq!(content.metadata.attempts, 3);
        assert_eq!(content.metadata.status, 200);
        assert_eq!(content.metadata.method, FetchMethod::Http);
        assert_eq!(content.metadata.content_type.as_deref(), Some("text/html"));
        assert!(content.text().contains("Bylaws"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/missing", server.uri());
        let err = fetcher(&BTreeMap::new())
            .fetch(&url, FetchOptions::http())
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(err.status, Some(404));
        assert!(!err.transient);
        assert!(matches!(BylawError::from(err), BylawError::Network(_)));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(&BTreeMap::new())
            .fetch(&server.uri(), FetchOptions::http())
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert!(err.transient);
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn sends_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("X-Api-Key".to_string(), "secret".to_string());
        let content = fetcher(&headers)
            .fetch(&server.uri(), FetchOptions::http())
            .await
            .expect("header matched");
        assert_eq!(content.body, b"ok");
    }

    #[test]
    fn invalid_header_is_config_error() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = Fetcher::new(&FetchConfig::default(), &headers, Arc::new(NoopRenderer))
            .err()
            .expect("rejected");
        assert!(matches!(err, BylawError::Config { .. }));
    }

    #[tokio::test]
    async fn browser_unavailable_fails_without_retry() {
        let fetcher = fetcher(&BTreeMap::new());
        let err = fetcher
            .fetch("https://example.org/", FetchOptions::browser(false))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.transient);
        assert!(!fetcher.has_session().await);
        fetcher.cleanup().await;
    }
}
