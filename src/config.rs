//! Configuration management for stocktrail using the prefer crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::ExtractionProfile;
use crate::models::MetadataPolicy;
use crate::scrapers::BrowserConfig;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "stocktrail.db";

/// Default catalog filename, as written by the link-harvesting step.
pub const DEFAULT_CATALOG_FILENAME: &str = "product_data.json";

/// Errors raised while reading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// How product pages are retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Plain HTTP GET
    #[default]
    Http,
    /// Headless browser, DOM after scripts ran
    Rendered,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Catalog file to crawl.
    pub catalog_path: PathBuf,
    /// User agent config (None = default browser-like agent).
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Delay between requests in milliseconds.
    pub request_delay_ms: u64,
    pub fetch_mode: FetchMode,
    /// Store a JPEG snapshot with every observation.
    pub snapshots: bool,
    /// How long a page settles before its snapshot is taken, in milliseconds.
    pub snapshot_settle_ms: u64,
    /// JPEG quality of snapshots (1-100).
    pub snapshot_quality: u8,
    pub metadata_policy: MetadataPolicy,
    pub browser: BrowserConfig,
    pub extraction: ExtractionProfile,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stocktrail");

        Self {
            catalog_path: data_dir.join(DEFAULT_CATALOG_FILENAME),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            user_agent: None,
            request_timeout: 30,
            request_delay_ms: 2000,
            fetch_mode: FetchMode::default(),
            snapshots: false,
            snapshot_settle_ms: 2000,
            snapshot_quality: 70,
            metadata_policy: MetadataPolicy::default(),
            browser: BrowserConfig::default(),
            extraction: ExtractionProfile::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            catalog_path: data_dir.join(DEFAULT_CATALOG_FILENAME),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn snapshot_settle(&self) -> Duration {
        Duration::from_millis(self.snapshot_settle_ms)
    }

    /// Fetch mode actually used. Snapshots need the page open in the
    /// browser, so they force rendered fetches.
    pub fn effective_fetch_mode(&self) -> FetchMode {
        if self.snapshots {
            FetchMode::Rendered
        } else {
            self.fetch_mode
        }
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "target")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Catalog file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    /// User agent string, or "impersonate".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Delay between requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_mode: Option<FetchMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_settle_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_policy: Option<MetadataPolicy>,
    /// Headless browser settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserConfig>,
    /// Selector overrides for the product page layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionProfile>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers stocktrail config files in standard locations.
    pub async fn load() -> Self {
        let Ok(pref_config) = prefer::load("stocktrail").await else {
            return Self::default();
        };
        let Some(path) = pref_config.source_path() else {
            return Self::default();
        };

        match Self::load_from_path(path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        Ok(match ext {
            "toml" => toml::from_str(contents)?,
            "yaml" | "yml" => serde_yaml::from_str(contents)?,
            _ => serde_json::from_str(contents)?,
        })
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let path = match (path_str.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(path_str),
        };

        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.catalog_path = settings.data_dir.join(DEFAULT_CATALOG_FILENAME);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref catalog) = self.catalog {
            settings.catalog_path = self.resolve_path(catalog, base_dir);
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(mode) = self.fetch_mode {
            settings.fetch_mode = mode;
        }
        if let Some(snapshots) = self.snapshots {
            settings.snapshots = snapshots;
        }
        if let Some(settle) = self.snapshot_settle_ms {
            settings.snapshot_settle_ms = settle;
        }
        if let Some(quality) = self.snapshot_quality {
            settings.snapshot_quality = quality.clamp(1, 100);
        }
        if let Some(policy) = self.metadata_policy {
            settings.metadata_policy = policy;
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
        if let Some(ref extraction) = self.extraction {
            settings.extraction = extraction.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory or database file (--target flag).
    pub target: Option<PathBuf>,
}

/// Resolve a `--target` path to (data dir, database filename).
/// A path with a database extension names the database file itself.
fn resolve_target(path: &Path) -> (PathBuf, Option<String>) {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    let is_db_file = path
        .extension()
        .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3");
    if !is_db_file {
        return (path, None);
    }

    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned());
    let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    (dir, filename)
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    // Priority 1: explicit --config flag; otherwise auto-discover via prefer
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let base_dir = if options.use_cwd {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    } else {
        config
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    };

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);

    // --target takes precedence for data_dir
    if let Some(ref target) = options.target {
        let (data_dir, database) = resolve_target(target);
        if config.catalog.is_none() {
            settings.catalog_path = data_dir.join(DEFAULT_CATALOG_FILENAME);
        }
        settings.data_dir = data_dir;
        if let Some(database) = database {
            settings.database_filename = database;
        }
    }

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::with_data_dir(PathBuf::from("/data"));
        assert_eq!(settings.database_path(), PathBuf::from("/data/stocktrail.db"));
        assert_eq!(settings.catalog_path, PathBuf::from("/data/product_data.json"));
        assert_eq!(settings.request_delay(), Duration::from_secs(2));
        assert_eq!(settings.effective_fetch_mode(), FetchMode::Http);
        assert!(!settings.snapshots);
    }

    #[test]
    fn test_snapshots_force_rendered_fetch() {
        let settings = Settings {
            snapshots: true,
            ..Settings::with_data_dir(PathBuf::from("/data"))
        };
        assert_eq!(settings.effective_fetch_mode(), FetchMode::Rendered);
    }

    #[test]
    fn test_parse_formats() {
        let toml = Config::parse(
            "request_delay_ms = 500\nfetch_mode = \"rendered\"\n[extraction]\nper_unit_selector = \"div.ppp\"\n",
            "toml",
        )
        .unwrap();
        assert_eq!(toml.request_delay_ms, Some(500));
        assert_eq!(toml.fetch_mode, Some(FetchMode::Rendered));
        assert_eq!(
            toml.extraction.unwrap().per_unit_selector.as_deref(),
            Some("div.ppp")
        );

        let yaml = Config::parse("metadata_policy: keep\nsnapshots: true\n", "yml").unwrap();
        assert_eq!(yaml.metadata_policy, Some(MetadataPolicy::Keep));
        assert_eq!(yaml.snapshots, Some(true));

        let json = Config::parse(r#"{"target": "/srv/stock", "browser": {"headless": false}}"#, "json")
            .unwrap();
        assert_eq!(json.data_dir.as_deref(), Some("/srv/stock"));
        assert!(!json.browser.unwrap().headless);
    }

    #[test]
    fn test_apply_resolves_relative_paths() {
        let config = Config {
            data_dir: Some("data".to_string()),
            catalog: Some("catalog.json".to_string()),
            snapshot_quality: Some(250),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/etc/stocktrail"));

        assert_eq!(settings.data_dir, PathBuf::from("/etc/stocktrail/data"));
        assert_eq!(settings.catalog_path, PathBuf::from("/etc/stocktrail/catalog.json"));
        assert_eq!(settings.snapshot_quality, 100);
    }

    #[test]
    fn test_resolve_target_database_file() {
        let (dir, file) = resolve_target(Path::new("/srv/stock/history.sqlite"));
        assert_eq!(dir, PathBuf::from("/srv/stock"));
        assert_eq!(file.as_deref(), Some("history.sqlite"));

        let (dir, file) = resolve_target(Path::new("/srv/stock"));
        assert_eq!(dir, PathBuf::from("/srv/stock"));
        assert!(file.is_none());
    }

    #[tokio::test]
    async fn test_explicit_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stocktrail.toml");
        std::fs::write(&path, "data_dir = \"store\"\nrequest_delay_ms = 10\n").unwrap();

        let (settings, config) = load_settings_with_options(LoadOptions {
            config_path: Some(path.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
        assert_eq!(settings.data_dir, dir.path().join("store"));
        assert_eq!(settings.request_delay_ms, 10);
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_error() {
        let result = load_settings_with_options(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/stocktrail.json")),
            ..Default::default()
        })
        .await;
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
