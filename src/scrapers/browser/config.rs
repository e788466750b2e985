//! Browser session configuration.

use serde::{Deserialize, Serialize};

/// Settings for the headless browser used by rendered fetches and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Page load timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Browser window size, which is also the snapshot frame size.
    #[serde(default = "default_window_size")]
    pub window_size: (u32, u32),
}

fn default_headless() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_window_size() -> (u32, u32) {
    (1280, 1024)
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            remote_url: None,
            window_size: default_window_size(),
        }
    }
}
