//! Configuration types for chan-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// How local filenames are derived from a post's attachment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    /// Use the server-side UNIX timestamp name (`1700000000123.jpg`)
    #[default]
    Timestamp,
    /// Use the filename the uploader chose
    Original,
}

/// Whole-batch retry configuration
///
/// `retries` follows the same convention as the command line flag: `0`
/// disables retrying, a positive value allows that many extra attempts after
/// the first, and a negative value retries until success or cancellation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry budget (default: 5)
    #[serde(default = "default_retries")]
    pub retries: i32,

    /// Delay before the first retry (default: 5 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0, fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay: default_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// Main configuration for [`ThreadDownloader`](crate::ThreadDownloader)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root output directory; files land in `<output_dir>/<board>/<thread dir>/` (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Timestamp or original filenames
    #[serde(default)]
    pub naming: NamingMode,

    /// Maximum number of concurrent file transfers (default: 10)
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Whole-batch retry behaviour
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout for each manifest request (default: 30 seconds)
    #[serde(default = "default_manifest_timeout", with = "duration_serde")]
    pub manifest_timeout: Duration,

    /// Delay before the single manifest retry (default: 5 seconds)
    #[serde(default = "default_manifest_retry_delay", with = "duration_serde")]
    pub manifest_retry_delay: Duration,

    /// Append-only file of MD5 hashes for previously downloaded files
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,

    /// Base URL of the JSON API (default: "https://a.4cdn.org")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Base URL of the media host (default: "https://i.4cdn.org")
    #[serde(default = "default_media_base_url")]
    pub media_base_url: String,

    /// User-Agent sent with every request; the API rejects requests without one
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Check downloaded bytes against the manifest's MD5 before finalizing (default: true)
    #[serde(default = "default_true")]
    pub verify_hashes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            naming: NamingMode::default(),
            connections: default_connections(),
            retry: RetryConfig::default(),
            manifest_timeout: default_manifest_timeout(),
            manifest_retry_delay: default_manifest_retry_delay(),
            ledger_path: None,
            api_base_url: default_api_base_url(),
            media_base_url: default_media_base_url(),
            user_agent: default_user_agent(),
            verify_hashes: true,
        }
    }
}

impl Config {
    /// Reject settings the downloader cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(Error::config("connections", "must be at least 1"));
        }

        for (key, value) in [
            ("api_base_url", &self.api_base_url),
            ("media_base_url", &self.media_base_url),
        ] {
            match url::Url::parse(value) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(Error::config(
                        key,
                        format!("unsupported scheme '{}' in {}", url.scheme(), value),
                    ));
                }
                Err(e) => {
                    return Err(Error::config(key, format!("invalid URL {}: {}", value, e)));
                }
            }
        }

        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ));
        }

        Ok(())
    }

    /// API base URL without a trailing slash
    pub(crate) fn api_base(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    /// Media base URL without a trailing slash
    pub(crate) fn media_base(&self) -> &str {
        self.media_base_url.trim_end_matches('/')
    }
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_connections() -> usize {
    10
}

fn default_retries() -> i32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_manifest_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_manifest_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_api_base_url() -> String {
    "https://a.4cdn.org".to_string()
}

fn default_media_base_url() -> String {
    "https://i.4cdn.org".to_string()
}

fn default_user_agent() -> String {
    "4chan Archiver".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
