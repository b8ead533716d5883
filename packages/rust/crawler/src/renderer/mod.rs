//! Renderer abstraction for the browser fetch strategy.
//!
//! A [`Renderer`] opens [`RenderSession`]s; a session is one exclusively
//! owned browser tab used for every JavaScript-rendered page of a job and
//! must be closed when the job ends.

#[cfg(feature = "browser")]
pub mod chromium;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bylawdb_shared::{BylawError, Result};
use serde::{Deserialize, Serialize};

/// Result of navigating a session to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Navigation {
    /// The URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can open rendering sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Launch or attach to a browser and open a fresh session.
    async fn open_session(&self) -> Result<Box<dyn RenderSession>>;

    /// Human-readable renderer name for tracing.
    fn name(&self) -> &str;
}

/// A single browser tab.
#[async_trait]
pub trait RenderSession: Send {
    /// Navigate to `url`, failing after `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Navigation>;
    /// Serialized DOM of the current page.
    async fn html(&self) -> Result<String>;
    async fn title(&self) -> Result<Option<String>>;
    /// `window.performance.timing` of the current page.
    async fn performance(&self) -> Result<serde_json::Value>;
    /// Full-page PNG screenshot.
    async fn screenshot(&self) -> Result<Vec<u8>>;
    /// Close the tab and release the browser.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Renderer used when no browser is compiled in or installed.
/// Every session request fails, so JavaScript-dependent jobs surface a
/// [`BylawError::Browser`] instead of silently falling back to HTTP.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>> {
        Err(BylawError::Browser(
            "browser rendering not available; build with the `browser` feature".into(),
        ))
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// The best renderer this build supports.
pub fn default_renderer() -> Arc<dyn Renderer> {
    #[cfg(feature = "browser")]
    {
        Arc::new(chromium::ChromiumRenderer::new())
    }
    #[cfg(not(feature = "browser"))]
    {
        Arc::new(NoopRenderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_renderer_refuses_sessions() {
        let err = NoopRenderer.open_session().await.err().expect("no session");
        assert!(matches!(err, BylawError::Browser(_)));
        assert_eq!(NoopRenderer.name(), "noop");
    }
}
