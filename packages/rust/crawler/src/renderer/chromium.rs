//! Chromium-based renderer using chromiumoxide.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bylawdb_shared::{BylawError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Navigation, RenderSession, Renderer};

/// Environment variable pointing at a Chromium/Chrome binary.
pub const CHROMIUM_PATH_ENV: &str = "BYLAWDB_CHROMIUM_PATH";

/// Explicit Chromium binary from the environment, if it exists.
/// Without it chromiumoxide searches the usual install locations.
pub fn find_chromium() -> Option<PathBuf> {
    std::env::var(CHROMIUM_PATH_ENV)
        .ok()
        .map(PathBuf::from)
        .filter(|p| p.exists())
}

/// Launches one headless Chromium per session.
#[derive(Debug, Default)]
pub struct ChromiumRenderer;

impl ChromiumRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--window-size=1920,1080")
            .arg("--force-device-scale-factor=1");
        if let Some(path) = find_chromium() {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| BylawError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BylawError::Browser(format!("failed to launch Chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BylawError::Browser(format!("failed to open tab: {e}")))?;

        debug!("chromium session opened");
        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler,
        }))
    }

    fn name(&self) -> &str {
        "chromium"
    }
}

/// One browser process with a single tab. Dropping it kills the process.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Navigation> {
        let start = Instant::now();

        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
            }
            Ok(Err(e)) => return Err(BylawError::Browser(format!("navigation failed: {e}"))),
            Err(_) => {
                return Err(BylawError::Browser(format!(
                    "navigation timed out after {}ms",
                    timeout.as_millis()
                )));
            }
        }

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(Navigation {
            final_url,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn html(&self) -> Result<String> {
        self.page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| BylawError::Browser(format!("failed to read HTML: {e}")))?
            .into_value::<String>()
            .map_err(|e| BylawError::Browser(format!("failed to convert HTML result: {e:?}")))
    }

    async fn title(&self) -> Result<Option<String>> {
        self.page
            .get_title()
            .await
            .map_err(|e| BylawError::Browser(format!("failed to read title: {e}")))
    }

    async fn performance(&self) -> Result<serde_json::Value> {
        self.page
            .evaluate("window.performance.timing.toJSON()")
            .await
            .map_err(|e| BylawError::Browser(format!("failed to read timing: {e}")))?
            .into_value::<serde_json::Value>()
            .map_err(|e| BylawError::Browser(format!("failed to convert timing: {e:?}")))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| BylawError::Browser(format!("screenshot failed: {e}")))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumSession {
            mut browser,
            page,
            handler,
        } = *self;
        let _ = page.close().await;
        let closed = browser.close().await;
        let _ = browser.wait().await;
        handler.abort();
        debug!("chromium session closed");
        closed
            .map(|_| ())
            .map_err(|e| BylawError::Browser(format!("failed to close browser: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn render_data_url() {
        let mut session = ChromiumRenderer::new()
            .open_session()
            .await
            .expect("open session");

        session
            .navigate(
                "data:text/html,<title>Bylaw 12</title><h1>Zoning</h1>",
                Duration::from_secs(10),
            )
            .await
            .expect("navigate");

        let html = session.html().await.expect("html");
        assert!(html.contains("<h1>Zoning</h1>"));
        assert_eq!(session.title().await.unwrap().as_deref(), Some("Bylaw 12"));
        assert!(!session.screenshot().await.unwrap().is_empty());

        session.close().await.expect("close");
    }
}
