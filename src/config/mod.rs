//! Configuration management for the citycast engine
//!
//! Configuration is loaded once at startup from a TOML file (with a couple
//! of environment-variable fallbacks) and is read-only for the lifetime of
//! the process. An enabled channel with a broken configuration is carried
//! as *misconfigured* rather than crashing startup: every dispatch to it
//! short-circuits to a skipped result with the logged reason.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::content::ContentClass;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine-wide settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Outbound channels, keyed by channel name
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Path to the SQLite post-history database
    pub database_path: PathBuf,

    /// Default maximum delivery attempts per channel dispatch
    pub max_retries: u32,

    /// Default base delay for exponential backoff, in seconds
    pub retry_base_delay_secs: u64,

    /// Cap on a single backoff sleep, in seconds
    pub retry_max_delay_secs: u64,

    /// HTTP request timeout for adapters, in seconds
    pub request_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/post_history.db"),
            max_retries: 3,
            retry_base_delay_secs: 60,
            retry_max_delay_secs: 900,
            request_timeout_secs: 30,
        }
    }
}

/// Per-channel rate limit settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum accepted posts in any trailing 60-minute window
    pub max_per_hour: u32,

    /// Maximum accepted posts in any trailing 24-hour window
    pub max_per_day: u32,

    /// Minimum seconds between consecutive posts
    pub min_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_hour: 10,
            max_per_day: 24,
            min_interval_secs: 300,
        }
    }
}

/// Structural constraints for media attached to a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRules {
    /// Maximum image file size in bytes
    pub max_bytes: u64,

    /// Minimum image width in pixels
    pub min_width: u32,

    /// Minimum image height in pixels
    pub min_height: u32,

    /// Maximum image width in pixels
    pub max_width: u32,

    /// Maximum image height in pixels
    pub max_height: u32,

    /// Allowed image formats (lowercase names, e.g. "jpeg", "png", "gif")
    pub allowed_formats: HashSet<String>,
}

impl Default for MediaRules {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            min_width: 200,
            min_height: 200,
            max_width: 4096,
            max_height: 4096,
            allowed_formats: ["jpeg", "png", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Configuration for one outbound channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name (mirrors the map key in the config file)
    #[serde(default)]
    pub name: String,

    /// Whether the channel participates in broadcasts
    #[serde(default)]
    pub enabled: bool,

    /// Content classes this channel accepts
    #[serde(default)]
    pub allowed_classes: HashSet<ContentClass>,

    /// Opaque credentials, passed through to the adapter
    #[serde(default)]
    pub credentials: HashMap<String, String>,

    /// Delivery endpoint URL (webhook adapters)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Maximum post length in characters
    #[serde(default = "default_text_limit")]
    pub text_limit: usize,

    /// Tone name applied by the formatter (e.g. "professional")
    #[serde(default)]
    pub tone: Option<String>,

    /// Media constraints
    #[serde(default)]
    pub media: MediaRules,

    /// Rate limiting parameters
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-channel override of the engine retry count
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Per-channel override of the engine backoff base delay
    #[serde(default)]
    pub retry_base_delay_secs: Option<u64>,
}

fn default_text_limit() -> usize {
    280
}

impl ChannelConfig {
    /// Report the first missing or invalid required field, if any.
    ///
    /// Only meaningful for enabled channels; a disabled channel is never
    /// dispatched to, so its settings are not inspected.
    pub fn config_error(&self) -> Option<String> {
        if self.text_limit == 0 {
            return Some("text_limit must be greater than 0".to_string());
        }
        if self.allowed_classes.is_empty() {
            return Some("no allowed content classes configured".to_string());
        }
        if self.rate_limit.max_per_hour == 0 || self.rate_limit.max_per_day == 0 {
            return Some("rate limits must be greater than 0".to_string());
        }
        match &self.endpoint {
            None => return Some("missing delivery endpoint".to_string()),
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                return Some(format!("endpoint is not an http(s) URL: {url}"));
            }
            Some(_) => {}
        }
        if self.credentials.is_empty() {
            return Some("missing credentials".to_string());
        }
        None
    }

    /// Effective retry count for this channel
    pub fn effective_max_retries(&self, engine: &EngineSettings) -> u32 {
        self.max_retries.unwrap_or(engine.max_retries)
    }

    /// Effective backoff base delay for this channel
    pub fn effective_base_delay(&self, engine: &EngineSettings) -> Duration {
        Duration::from_secs(
            self.retry_base_delay_secs
                .unwrap_or(engine.retry_base_delay_secs),
        )
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    /// Environment overrides for deployment-specific paths
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CITYCAST_DB_PATH") {
            self.engine.database_path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("CITYCAST_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Propagate map keys into channel names and log misconfigured channels.
    fn normalize(&mut self) {
        for (name, channel) in &mut self.channels {
            channel.name = name.clone();
            if channel.enabled {
                if let Some(reason) = channel.config_error() {
                    tracing::warn!(
                        channel = %name,
                        reason = %reason,
                        "Channel is enabled but misconfigured; it will be skipped"
                    );
                }
            }
        }
    }

    /// Validate engine-wide settings
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }
        if self.engine.retry_base_delay_secs == 0 {
            anyhow::bail!("retry_base_delay_secs must be greater than 0");
        }
        if self.engine.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.request_timeout_secs)
    }

    /// Names of channels that are enabled and pass the config check
    pub fn active_channels(&self) -> Vec<&str> {
        self.channels
            .values()
            .filter(|c| c.enabled && c.config_error().is_none())
            .map(|c| c.name.as_str())
            .collect()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            channels: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_channel() -> ChannelConfig {
        ChannelConfig {
            name: "town_square".to_string(),
            enabled: true,
            allowed_classes: [ContentClass::Weather, ContentClass::News]
                .into_iter()
                .collect(),
            credentials: [("token".to_string(), "secret".to_string())]
                .into_iter()
                .collect(),
            endpoint: Some("https://hooks.example.com/town".to_string()),
            text_limit: 280,
            tone: None,
            media: MediaRules::default(),
            rate_limit: RateLimitConfig::default(),
            max_retries: None,
            retry_base_delay_secs: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_valid_channel_has_no_config_error() {
        assert_eq!(valid_channel().config_error(), None);
    }

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let mut channel = valid_channel();
        channel.endpoint = None;
        assert!(channel.config_error().unwrap().contains("endpoint"));
    }

    #[test]
    fn test_zero_text_limit_is_config_error() {
        let mut channel = valid_channel();
        channel.text_limit = 0;
        assert!(channel.config_error().is_some());
    }

    #[test]
    fn test_empty_allowed_classes_is_config_error() {
        let mut channel = valid_channel();
        channel.allowed_classes.clear();
        assert!(channel.config_error().is_some());
    }

    #[test]
    fn test_retry_overrides() {
        let engine = EngineSettings::default();
        let mut channel = valid_channel();
        assert_eq!(channel.effective_max_retries(&engine), 3);

        channel.max_retries = Some(5);
        channel.retry_base_delay_secs = Some(10);
        assert_eq!(channel.effective_max_retries(&engine), 5);
        assert_eq!(
            channel.effective_base_delay(&engine),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_media_rules_defaults() {
        let rules = MediaRules::default();
        assert_eq!(rules.max_bytes, 5 * 1024 * 1024);
        assert!(rules.allowed_formats.contains("jpeg"));
        assert!(!rules.allowed_formats.contains("bmp"));
    }

    #[test]
    fn test_parse_channel_from_toml() {
        let toml_src = r#"
            [engine]
            database_path = "data/history.db"
            max_retries = 3
            retry_base_delay_secs = 60
            retry_max_delay_secs = 900
            request_timeout_secs = 30

            [channels.microblog]
            enabled = true
            allowed_classes = ["weather", "earthquake"]
            endpoint = "https://hooks.example.com/microblog"
            text_limit = 280

            [channels.microblog.credentials]
            token = "secret"
        "#;

        let mut config: EngineConfig = toml::from_str(toml_src).unwrap();
        config.normalize();

        let channel = &config.channels["microblog"];
        assert_eq!(channel.name, "microblog");
        assert!(channel.enabled);
        assert!(channel.allowed_classes.contains(&ContentClass::Earthquake));
        assert_eq!(channel.rate_limit, RateLimitConfig::default());
        assert_eq!(config.active_channels(), vec!["microblog"]);
    }
}
