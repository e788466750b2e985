//! Headless browser session for rendered fetches and snapshots.
//!
//! One [`BrowserSession`] drives a single Chrome tab at a time. Wrapped in a
//! [`SharedBrowser`] it serves as both the rendered [`PageFetcher`] and the
//! [`SnapshotCapturer`], so a page rendered for extraction is captured
//! without navigating a second time.

mod config;

pub use config::BrowserConfig;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{FetchError, PageFetcher};
use crate::snapshot::{encode_jpeg, CaptureError, SnapshotCapturer};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
#[cfg(feature = "browser")]
use chromiumoxide::page::ScreenshotParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig as ChromeConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tracing::info;

/// Failure inside the browser session, before it is attributed to a fetch
/// or a capture.
#[derive(Debug)]
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
enum RenderError {
    Session(String),
    Navigation(String),
    Timeout(Duration),
    Page(String),
    Unsupported,
}

impl RenderError {
    fn into_fetch(self, url: &str) -> FetchError {
        match self {
            Self::Session(msg) => FetchError::SessionLost(msg),
            Self::Navigation(message) | Self::Page(message) => FetchError::Navigation {
                url: url.to_string(),
                message,
            },
            Self::Timeout(after) => FetchError::Timeout(after),
            Self::Unsupported => FetchError::Unsupported,
        }
    }

    fn into_capture(self, url: &str) -> CaptureError {
        match self {
            Self::Session(msg) => CaptureError::SessionLost(msg),
            Self::Navigation(message) => CaptureError::Navigation {
                url: url.to_string(),
                message,
            },
            Self::Page(msg) => CaptureError::Screenshot(msg),
            Self::Timeout(after) => CaptureError::Timeout(after),
            Self::Unsupported => CaptureError::Unsupported,
        }
    }
}

/// Heuristic for bot-protection interstitials served with a 200.
fn looks_blocked(content: &str) -> bool {
    content.contains("Access Denied") || content.contains("Request unsuccessful")
}

#[cfg(feature = "browser")]
struct RenderedPage {
    url: String,
    page: Page,
}

/// A Chrome instance with at most one open tab.
#[cfg(feature = "browser")]
pub struct BrowserSession {
    config: BrowserConfig,
    user_agent: String,
    browser: Option<Browser>,
    handler: Option<tokio::task::JoinHandle<()>>,
    current: Option<RenderedPage>,
}

#[cfg(feature = "browser")]
impl BrowserSession {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    pub fn new(config: BrowserConfig, user_agent: String) -> Self {
        Self {
            config,
            user_agent,
            browser: None,
            handler: None,
            current: None,
        }
    }

    fn find_chrome() -> Result<std::path::PathBuf, RenderError> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        debug!("Found Chrome in PATH: {}", path);
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(RenderError::Session(
            "Chrome/Chromium not found; install it or set browser.remote_url".to_string(),
        ))
    }

    /// Launch or connect to the browser if not already running.
    async fn ensure_browser(&mut self) -> Result<(), RenderError> {
        if self.browser.is_some() {
            return Ok(());
        }

        let (browser, mut handler) = match self.config.remote_url.clone() {
            Some(remote_url) => self.connect_remote(&remote_url).await?,
            None => {
                info!("Launching browser (headless={})", self.config.headless);
                let (width, height) = self.config.window_size;
                let mut builder = ChromeConfig::builder()
                    .chrome_executable(Self::find_chrome()?)
                    .window_size(width, height);

                if !self.config.headless {
                    builder = builder.with_head();
                }

                builder = builder
                    .arg("--disable-blink-features=AutomationControlled")
                    .arg("--disable-dev-shm-usage")
                    .arg("--no-first-run")
                    .arg("--no-default-browser-check")
                    .arg("--no-sandbox")
                    .arg("--disable-gpu");
                for arg in &self.config.chrome_args {
                    builder = builder.arg(arg);
                }

                let config = builder.build().map_err(RenderError::Session)?;
                Browser::launch(config)
                    .await
                    .map_err(|e| RenderError::Session(format!("Failed to launch browser: {}", e)))?
            }
        };

        self.handler = Some(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        }));
        self.browser = Some(browser);

        Ok(())
    }

    async fn connect_remote(
        &self,
        url: &str,
    ) -> Result<(Browser, chromiumoxide::Handler), RenderError> {
        info!("Connecting to remote browser at {}", url);

        // Resolve the WebSocket URL from the /json/version endpoint
        let http_url = url.replace("ws://", "http://").replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let session_err = |e: &dyn std::fmt::Display| {
            RenderError::Session(format!("Failed to reach remote browser: {}", e))
        };
        let resp: serde_json::Value = reqwest::get(&version_url)
            .await
            .map_err(|e| session_err(&e))?
            .json()
            .await
            .map_err(|e| session_err(&e))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RenderError::Session("No webSocketDebuggerUrl in response".to_string()))?;

        Browser::connect(ws_url).await.map_err(|e| session_err(&e))
    }

    /// Whether the open tab shows `url`.
    fn is_showing(&self, url: &str) -> bool {
        self.current.as_ref().is_some_and(|c| c.url == url)
    }

    /// Navigate a fresh tab to `url`, replacing any open one.
    async fn render(&mut self, url: &str) -> Result<(), RenderError> {
        self.close_page().await;
        self.ensure_browser().await?;

        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| RenderError::Session("browser not running".to_string()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Session(e.to_string()))?;

        page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
            .map_err(|e| RenderError::Page(e.to_string()))?;

        debug!("Navigating to {}", url);
        let timeout = Duration::from_secs(self.config.timeout);
        let outcome = tokio::time::timeout(timeout, page.goto(url))
            .await
            .map(|nav| nav.map(|_| ()).map_err(|e| e.to_string()));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = page.close().await;
                return Err(RenderError::Navigation(message));
            }
            Err(_) => {
                let _ = page.close().await;
                return Err(RenderError::Timeout(timeout));
            }
        }

        self.current = Some(RenderedPage {
            url: url.to_string(),
            page,
        });
        Ok(())
    }

    async fn content(&self) -> Result<String, RenderError> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| RenderError::Page("no page rendered".to_string()))?;
        current
            .page
            .content()
            .await
            .map_err(|e| RenderError::Page(e.to_string()))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, RenderError> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| RenderError::Page("no page rendered".to_string()))?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        current
            .page
            .screenshot(params)
            .await
            .map_err(|e| RenderError::Page(e.to_string()))
    }

    async fn close_page(&mut self) {
        if let Some(current) = self.current.take() {
            let _ = current.page.close().await;
        }
    }

    /// Close the tab and the browser. A remote browser is only disconnected.
    pub async fn close(&mut self) {
        self.close_page().await;
        if let Some(mut browser) = self.browser.take() {
            if self.config.remote_url.is_none() {
                if let Err(e) = browser.close().await {
                    debug!("Browser close failed: {}", e);
                }
                let _ = browser.wait().await;
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserSession;

#[cfg(not(feature = "browser"))]
impl BrowserSession {
    pub fn new(_config: BrowserConfig, _user_agent: String) -> Self {
        Self
    }

    async fn ensure_browser(&mut self) -> Result<(), RenderError> {
        Err(RenderError::Unsupported)
    }

    fn is_showing(&self, _url: &str) -> bool {
        false
    }

    async fn render(&mut self, _url: &str) -> Result<(), RenderError> {
        Err(RenderError::Unsupported)
    }

    async fn content(&self) -> Result<String, RenderError> {
        Err(RenderError::Unsupported)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, RenderError> {
        Err(RenderError::Unsupported)
    }

    async fn close_page(&mut self) {}

    pub async fn close(&mut self) {}
}

/// Browser session shared between the rendered fetcher and the capturer.
#[derive(Clone)]
pub struct SharedBrowser {
    session: Arc<Mutex<BrowserSession>>,
    settle: Duration,
    quality: u8,
}

impl SharedBrowser {
    /// `settle` is how long a page is left to finish rendering before a
    /// snapshot; `quality` is the JPEG quality of stored snapshots.
    pub fn new(session: BrowserSession, settle: Duration, quality: u8) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            settle,
            quality,
        }
    }
}

#[async_trait]
impl PageFetcher for SharedBrowser {
    async fn open(&mut self) -> Result<(), FetchError> {
        let mut session = self.session.lock().await;
        session.ensure_browser().await.map_err(|e| e.into_fetch(""))
    }

    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let mut session = self.session.lock().await;
        session.render(url).await.map_err(|e| e.into_fetch(url))?;
        let content = session.content().await.map_err(|e| e.into_fetch(url))?;

        if looks_blocked(&content) {
            warn!("Page may be blocked: {} (looks like an access-denied page)", url);
        }

        Ok(content)
    }

    async fn close(&mut self) {
        self.session.lock().await.close().await;
    }
}

#[async_trait]
impl SnapshotCapturer for SharedBrowser {
    async fn open(&mut self) -> Result<(), CaptureError> {
        let mut session = self.session.lock().await;
        session.ensure_browser().await.map_err(|e| e.into_capture(""))
    }

    async fn capture(&mut self, url: &str) -> Result<Vec<u8>, CaptureError> {
        let mut session = self.session.lock().await;
        if !session.is_showing(url) {
            session.render(url).await.map_err(|e| e.into_capture(url))?;
        }

        tokio::time::sleep(self.settle).await;
        let shot = session.screenshot().await;
        session.close_page().await;

        let png = shot.map_err(|e| e.into_capture(url))?;
        debug!("Captured {} byte screenshot of {}", png.len(), url);
        encode_jpeg(&png, self.quality)
    }

    async fn close(&mut self) {
        self.session.lock().await.close().await;
    }
}
