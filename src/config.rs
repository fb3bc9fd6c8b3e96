//! Configuration management with serde serialization/deserialization
//!
//! This module provides the worker configuration, the per-URL request and
//! result records, and the Chrome launch settings derived from the
//! configuration.

use crate::engine::ContextOptions;
use crate::error::ScrapeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// User agent presented by every browsing context unless overridden
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Main configuration structure for the scrape worker
///
/// Every field has a default, so a partial JSON file or an empty environment
/// both produce a usable configuration.
///
/// # Examples
///
/// ```rust
/// use scrape_worker::Config;
///
/// // Use default configuration
/// let config = Config::default();
/// assert!(config.headless);
///
/// // Create custom configuration
/// let config = Config {
///     max_concurrent_scrapes: 10,
///     timeout: 10_000,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Run Chrome without a visible window (default: true)
    pub headless: bool,

    /// Navigation and selector-wait timeout in milliseconds (default: 30000)
    ///
    /// Applies to every page individually. A page that exceeds it fails on
    /// its own without affecting the rest of a batch.
    pub timeout: u64,

    /// Maximum number of pages scraped at once in a batch (default: 5)
    pub max_concurrent_scrapes: usize,

    /// Browser viewport used by the browsing context
    pub viewport: Viewport,

    /// User-Agent string presented by every page
    pub user_agent: String,

    /// Retry attempts for failed scrapes (default: 3)
    ///
    /// Loaded and validated, but no retry policy is applied yet.
    pub max_retries: u32,

    /// Delay between retries in seconds (default: 2)
    ///
    /// Loaded and validated, but no retry policy is applied yet.
    pub retry_delay: u64,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Quiet period in milliseconds with no in-flight requests after which
    /// the network counts as idle (default: 500)
    pub network_idle: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            headless: true,
            timeout: 30_000,
            max_concurrent_scrapes: 5,
            viewport: Viewport::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: 3,
            retry_delay: 2,
            chrome_path: None,
            network_idle: 500,
        }
    }
}

/// Browser viewport configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl Config {
    /// Defaults, then `.env`, then process environment.
    pub fn from_env() -> Result<Self, ScrapeError> {
        dotenvy::dotenv().ok();
        Self::default().with_env_overrides()
    }

    /// Apply overrides from the process environment. Variable names are
    /// matched case-insensitively.
    pub fn with_env_overrides(self) -> Result<Self, ScrapeError> {
        let vars: HashMap<String, String> = std::env::vars()
            .map(|(key, value)| (key.to_ascii_uppercase(), value))
            .collect();
        self.with_overrides_from(|key| vars.get(key).cloned())
    }

    /// Apply overrides from any key lookup. Keys are the upper-case field
    /// names (`HEADLESS`, `TIMEOUT`, `VIEWPORT_WIDTH`, ...).
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ScrapeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HEADLESS") {
            self.headless = parse_bool("HEADLESS", &value)?;
        }
        if let Some(value) = lookup("TIMEOUT") {
            self.timeout = parse_number("TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("MAX_CONCURRENT_SCRAPES") {
            self.max_concurrent_scrapes = parse_number("MAX_CONCURRENT_SCRAPES", &value)?;
        }
        if let Some(value) = lookup("VIEWPORT_WIDTH") {
            self.viewport.width = parse_number("VIEWPORT_WIDTH", &value)?;
        }
        if let Some(value) = lookup("VIEWPORT_HEIGHT") {
            self.viewport.height = parse_number("VIEWPORT_HEIGHT", &value)?;
        }
        if let Some(value) = lookup("USER_AGENT") {
            self.user_agent = value;
        }
        if let Some(value) = lookup("MAX_RETRIES") {
            self.max_retries = parse_number("MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("RETRY_DELAY") {
            self.retry_delay = parse_number("RETRY_DELAY", &value)?;
        }
        if let Some(value) = lookup("CHROME_PATH") {
            self.chrome_path = Some(value).filter(|path| !path.trim().is_empty());
        }
        if let Some(value) = lookup("NETWORK_IDLE") {
            self.network_idle = parse_number("NETWORK_IDLE", &value)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.timeout == 0 {
            return Err(ScrapeError::ConfigurationError(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_scrapes == 0 {
            return Err(ScrapeError::ConfigurationError(
                "Max concurrent scrapes must be greater than 0".to_string(),
            ));
        }

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ScrapeError::ConfigurationError(
                "Viewport dimensions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the arguments of a top-level entry point, then validate.
    pub fn for_entry_point(
        mut self,
        headless: bool,
        max_concurrent: Option<usize>,
    ) -> Result<Self, ScrapeError> {
        self.headless = headless;
        if let Some(max_concurrent) = max_concurrent {
            self.max_concurrent_scrapes = max_concurrent;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn network_idle_duration(&self) -> Duration {
        Duration::from_millis(self.network_idle)
    }

    /// Settings applied to the browsing context created for a session
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            viewport: self.viewport,
            user_agent: self.user_agent.clone(),
            default_timeout: self.timeout_duration(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ScrapeError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ScrapeError::ConfigurationError(format!(
            "{key} must be a boolean, got \"{other}\""
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ScrapeError> {
    value.trim().parse().map_err(|_| {
        ScrapeError::ConfigurationError(format!("{key} must be a number, got \"{value}\""))
    })
}

/// A single page to scrape
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub url: String,
    /// CSS selector that must appear after navigation before extraction
    pub wait_for_selector: Option<String>,
    /// Navigation and selector-wait timeout for this page
    pub timeout: Duration,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>, config: &Config) -> Self {
        Self {
            url: url.into(),
            wait_for_selector: None,
            timeout: config.timeout_duration(),
        }
    }

    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.wait_for_selector = selector;
        self
    }
}

/// Meta tags, canonical link and language collected from a page, in the
/// order they were first seen
pub type Metadata = IndexMap<String, String>;

/// Outcome of one scrape attempt
///
/// Either `success` is true with `html` set and `error` empty, or `success`
/// is false with `error` set and `html` empty.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScrapeResult {
    /// Requested URL, replaced by the final URL once a response arrives
    pub url: String,
    pub html: Option<String>,
    pub title: Option<String>,
    pub meta: Metadata,
    pub status_code: Option<u16>,
    /// When the attempt started
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl ScrapeResult {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: None,
            title: None,
            meta: Metadata::new(),
            status_code: None,
            timestamp: Utc::now(),
            success: false,
            error: None,
        }
    }

    pub fn failure(url: impl Into<String>, error: impl ToString) -> Self {
        let mut result = Self::new(url);
        result.error = Some(error.to_string());
        result
    }
}

/// Generate Chrome command-line arguments based on configuration
///
/// Headless mode, the profile directory and the debugging port are set
/// through the launch builder, so they do not appear here.
///
/// # Examples
///
/// ```rust
/// use scrape_worker::{Config, get_chrome_args};
///
/// let config = Config::default();
/// let args = get_chrome_args(&config);
/// assert!(args.contains(&"--window-size=1920,1080".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!("--user-agent={}", config.user_agent),
    ]
}

/// Build the chromiumoxide launch configuration for one browser process
///
/// `user_data_dir` must be unique per process so concurrent launches never
/// share a profile lock.
pub fn create_browser_config(
    config: &Config,
    user_data_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig, ScrapeError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .request_timeout(config.timeout_duration())
        .user_data_dir(user_data_dir)
        .args(get_chrome_args(config));

    if !config.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ScrapeError::BrowserLaunchFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.headless);
        assert_eq!(config.timeout, 30_000);
        assert_eq!(config.max_concurrent_scrapes, 5);
        assert_eq!(config.viewport, Viewport { width: 1920, height: 1080 });
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, 2);
        assert_eq!(config.network_idle, 500);
    }

    #[test]
    fn test_overrides_applied() {
        let config = Config::default()
            .with_overrides_from(lookup_from(&[
                ("HEADLESS", "False"),
                ("TIMEOUT", "5000"),
                ("MAX_CONCURRENT_SCRAPES", "2"),
                ("VIEWPORT_WIDTH", "1280"),
                ("USER_AGENT", "test-agent"),
                ("CHROME_PATH", "/usr/bin/chromium"),
            ]))
            .unwrap();

        assert!(!config.headless);
        assert_eq!(config.timeout, 5000);
        assert_eq!(config.max_concurrent_scrapes, 2);
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.viewport.height, 1080);
        assert_eq!(config.user_agent, "test-agent");
        assert_eq!(config.chrome_path.as_deref(), Some("/usr/bin/chromium"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let err = Config::default()
            .with_overrides_from(lookup_from(&[("TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ConfigurationError(_)));

        let err = Config::default()
            .with_overrides_from(lookup_from(&[("HEADLESS", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("HEADLESS"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"timeout": 1000, "viewport": {"width": 800}}"#).unwrap();
        assert_eq!(config.timeout, 1000);
        assert_eq!(config.viewport.width, 800);
        assert_eq!(config.viewport.height, 1080);
        assert_eq!(config.max_concurrent_scrapes, 5);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            max_concurrent_scrapes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            viewport: Viewport { width: 0, height: 1080 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_entry_point_config_is_validated() {
        let config = Config::default().for_entry_point(false, Some(2)).unwrap();
        assert!(!config.headless);
        assert_eq!(config.max_concurrent_scrapes, 2);

        let zero_timeout = Config {
            timeout: 0,
            ..Default::default()
        };
        let err = zero_timeout.for_entry_point(true, Some(3)).unwrap_err();
        assert!(matches!(err, ScrapeError::ConfigurationError(_)));

        let err = Config::default().for_entry_point(true, Some(0)).unwrap_err();
        assert!(err.to_string().contains("Max concurrent"));
    }

    #[test]
    fn test_chrome_args_generation() {
        let config = Config::default();
        let args = get_chrome_args(&config);

        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&format!("--user-agent={DEFAULT_USER_AGENT}")));
        assert!(!args.iter().any(|arg| arg.starts_with("--headless")));
    }

    #[test]
    fn test_result_serializes_every_field() {
        let result = ScrapeResult::failure("https://invalid.invalid", "net::ERR_NAME_NOT_RESOLVED");
        let value = serde_json::to_value(&result).unwrap();

        for key in ["url", "html", "title", "meta", "status_code", "timestamp", "success", "error"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["html"].is_null());
        assert!(value["meta"].is_object());
        assert_eq!(value["success"], false);
    }

    #[test]
    fn test_meta_serializes_in_insertion_order() {
        let mut result = ScrapeResult::new("https://example.com");
        result.meta.insert("viewport".to_string(), "width=device-width".to_string());
        result.meta.insert("author".to_string(), "Jane".to_string());
        result.meta.insert("viewport".to_string(), "initial-scale=1".to_string());

        let json = serde_json::to_string(&result.meta).unwrap();
        assert_eq!(json, r#"{"viewport":"initial-scale=1","author":"Jane"}"#);
    }
}
