//! Client configuration.
//!
//! Values come from the built-in defaults, then an optional JSON file, then
//! command-line flags (highest precedence).

use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Where the local extraction service listens by default.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Delay between two status queries for the same task.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base address of the service API, e.g. `http://127.0.0.1:8000/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive failed polls tolerated before giving up (None = poll forever)
    #[serde(default)]
    pub max_poll_failures: Option<u32>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Directory artifacts are saved into
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Bytes per second while saving an artifact (None = unlimited)
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    concat!("extract-client/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_failures: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            download_dir: default_download_dir(),
            rate_limit: None,
        }
    }
}

impl ClientConfig {
    /// Reads a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Parses the base url. It must be able to carry path segments.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::BaseUrl {
            url: self.base_url.clone(),
            reason,
        };
        let url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical url".to_string()));
        }
        Ok(url)
    }

    pub fn rate_limit(&self) -> Result<Option<NonZeroU32>, ConfigError> {
        match self.rate_limit {
            None => Ok(None),
            Some(limit) => NonZeroU32::new(limit)
                .map(Some)
                .ok_or(ConfigError::ZeroRateLimit),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        self.rate_limit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:8000/api");
        assert_eq!(config.poll_interval(), Duration::from_millis(1500));
        assert_eq!(config.max_poll_failures, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"poll_interval_ms": 250, "max_poll_failures": 3}}"#).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_poll_failures, Some(3));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_rejects_unusable_values() {
        let config = ClientConfig {
            base_url: "mailto:someone@example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BaseUrl { .. })));

        let config = ClientConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPollInterval)));

        let config = ClientConfig {
            rate_limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroRateLimit)));
    }
}
