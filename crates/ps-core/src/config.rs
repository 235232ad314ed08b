//! Configuration structures for the passive-scan pipeline.
//!
//! This module provides configuration types for all components:
//!
//! - [`ApiConfig`] - Remote analysis endpoint, credentials and model
//! - [`ScanConfig`] - Worker pool, retry policy and queue sizing
//! - [`FilterConfig`] - Static-resource and binary-response exclusion tables
//! - [`Config`] - Root configuration combining all settings
//!
//! Every section implements [`Default`] and deserializes with
//! `#[serde(default)]`, so a partial JSON file only overrides what it names.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::RiskRules;

/// Environment variable consulted for the API key when none is configured.
pub const API_KEY_ENV: &str = "PASSIVE_SCAN_API_KEY";

/// Lower bound of the worker pool size.
pub const MIN_THREADS: usize = 1;

/// Upper bound of the worker pool size.
pub const MAX_THREADS: usize = 10;

/// Configuration for the remote analysis endpoint.
///
/// # Examples
///
/// ```
/// use ps_core::ApiConfig;
///
/// let config = ApiConfig::default();
/// assert_eq!(config.model, "gpt-4o-mini");
/// assert!(config.stream);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base url of an OpenAI-compatible API.
    pub base_url: String,

    /// API key. `None` leaves the analysis client unconfigured.
    pub api_key: Option<String>,

    /// Model name sent with every completion request.
    pub model: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Whether to request streamed completions.
    pub stream: bool,

    /// Sampling temperature. `None` uses the server default.
    pub temperature: Option<f32>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_owned(),
            api_key: None,
            model: "gpt-4o-mini".to_owned(),
            timeout_secs: 120,
            stream: true,
            temperature: None,
        }
    }
}

impl ApiConfig {
    /// Returns the configured key, falling back to [`API_KEY_ENV`].
    ///
    /// Blank keys count as missing in both places.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        let usable = |key: &String| !key.trim().is_empty();
        self.api_key
            .clone()
            .filter(usable)
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(usable))
    }
}

/// Configuration for the scan pipeline.
///
/// # Examples
///
/// ```
/// use ps_core::ScanConfig;
///
/// assert_eq!(ScanConfig::clamp_thread_count(100), 10);
/// assert_eq!(ScanConfig::clamp_thread_count(0), 1);
/// assert_eq!(ScanConfig::clamp_thread_count(-1), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of pool workers, clamped to `[1, 10]` when applied.
    pub thread_count: usize,

    /// Total attempts per task for retryable errors.
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    pub retry_backoff_ms: u64,

    /// Capacity of the pending-task queue.
    pub queue_capacity: usize,

    /// Byte budget for the rendered exchange; split evenly between the
    /// request and response sections when both are present.
    pub body_budget_bytes: usize,

    /// Display width of the short url shown in result lists.
    pub short_url_width: usize,

    /// How long shutdown waits for workers before aborting them.
    pub shutdown_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            thread_count: 3,
            max_attempts: 3,
            retry_backoff_ms: 500,
            queue_capacity: 1000,
            body_budget_bytes: 16 * 1024,
            short_url_width: 60,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl ScanConfig {
    /// Clamps a requested worker count into `[MIN_THREADS, MAX_THREADS]`.
    #[must_use]
    pub fn clamp_thread_count(requested: i64) -> usize {
        usize::try_from(requested).map_or(MIN_THREADS, |n| n.clamp(MIN_THREADS, MAX_THREADS))
    }

    /// Returns the configured worker count after clamping.
    #[must_use]
    pub fn effective_thread_count(&self) -> usize {
        self.thread_count.clamp(MIN_THREADS, MAX_THREADS)
    }
}

/// Tables driving the static-resource and binary-response filter.
///
/// Entries of `binary_content_types` ending in `/` match as a prefix
/// (`image/` covers every image type); other entries match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Path suffixes (without the dot) that mark static resources.
    pub static_extensions: Vec<String>,

    /// Directory segments that mark static-asset trees.
    pub static_dirs: Vec<String>,

    /// Content types skipped for GET responses.
    pub binary_content_types: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect();
        Self {
            static_extensions: owned(&[
                "css", "js", "js.map", "map", "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg",
                "webp", "avif", "tif", "tiff", "woff", "woff2", "ttf", "eot", "otf", "pdf", "zip",
                "rar", "7z", "tar", "gz", "tgz", "bz2", "mp3", "mp4", "avi", "mov", "webm", "flv",
                "swf", "wasm",
            ]),
            static_dirs: owned(&[
                "images", "image", "img", "css", "js", "static", "assets", "fonts", "font",
            ]),
            binary_content_types: owned(&[
                "image/",
                "font/",
                "audio/",
                "video/",
                "application/wasm",
                "application/octet-stream",
                "application/font-woff",
                "application/x-font-ttf",
            ]),
        }
    }
}

/// Root configuration for passive-scan.
///
/// # Examples
///
/// ```
/// use ps_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"scan": {"thread_count": 5}}"#).unwrap();
/// assert_eq!(config.scan.thread_count, 5);
/// assert_eq!(config.scan.max_attempts, 3);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote analysis endpoint.
    pub api: ApiConfig,

    /// Scan pipeline settings.
    pub scan: ScanConfig,

    /// Request filter tables.
    pub filter: FilterConfig,

    /// Risk classification tables.
    pub risk: RiskRules,
}

impl Config {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist,
    /// [`ConfigError::Io`] or [`ConfigError::Parse`] if it cannot be read,
    /// and [`ConfigError::InvalidOption`] if a value fails validation.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot be used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] naming the first bad option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.max_attempts == 0 {
            return Err(ConfigError::invalid_option(
                "scan.max_attempts",
                "must be at least 1",
            ));
        }
        if self.scan.queue_capacity == 0 {
            return Err(ConfigError::invalid_option(
                "scan.queue_capacity",
                "must be positive",
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::invalid_option(
                "api.timeout_secs",
                "must be positive",
            ));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::invalid_option(
                "api.base_url",
                "must not be empty",
            ));
        }
        Ok(())
    }
}
