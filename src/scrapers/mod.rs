//! Page fetchers.
//!
//! Two interchangeable strategies retrieve a product page: a plain HTTP GET
//! and a browser-rendered fetch. Both implement [`PageFetcher`]; the crawl
//! coordinator never knows which one it drives.

pub mod browser;
mod http_client;
mod politeness;

pub use browser::{BrowserConfig, BrowserSession, SharedBrowser};
pub use http_client::{resolve_user_agent, HttpFetcher, DEFAULT_USER_AGENT};
pub use politeness::Politeness;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    Unsupported,
}

impl FetchError {
    /// Whether the fetcher itself is unusable, as opposed to one page failing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionLost(_) | Self::Unsupported)
    }
}

/// Retrieves one page at a time.
#[async_trait]
pub trait PageFetcher: Send {
    /// Acquire whatever session the fetcher needs. Called once before the
    /// first fetch of a run.
    async fn open(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Fetch `url` and return its document body.
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError>;

    /// Release the session. Must be safe to call more than once.
    async fn close(&mut self) {}
}
