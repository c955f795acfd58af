//! Configuration management for portage.
//!
//! Configuration is read from `~/.config/portage/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub producer: ProducerConfig,
    pub schedule: ScheduleConfig,
    pub source: SourceConfig,
    pub acquire: AcquireConfig,
    pub publish: PublishConfig,
}

/// The single producer this process instance tracks.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProducerConfig {
    /// Opaque stable identifier on the source platform.
    pub id: String,
    /// Handle used to build source-side URLs.
    pub handle: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between cycles (default: 600 = 10 minutes).
    pub poll_interval_secs: u64,
    /// Seconds to wait after a failed cycle before the next one (default: 60).
    pub failure_cooldown_secs: u64,
    /// Whether to run a cycle immediately on start.
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 600,
            failure_cooldown_secs: 60,
            run_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the source platform's web API.
    pub base_url: String,
    /// Items per recent-items page. Must exceed the expected number of new
    /// posts per poll interval or backlog items are silently skipped.
    pub window: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.tiktok.com".into(),
            window: 35,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    /// Directory for downloaded media (default: platform data dir).
    pub media_dir: Option<PathBuf>,
    /// Transient-failure retries before giving up.
    pub retry_cap: u32,
    /// Base backoff between transient retries, doubled per attempt.
    pub backoff_base_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            media_dir: None,
            retry_cap: 3,
            backoff_base_ms: 2000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Whether to run the publish browser headless. The target's upload flow
    /// is more reliable with a visible window.
    pub headless: bool,
    /// Cookie-jar file for the publish target session (default: config dir).
    pub session_file: Option<PathBuf>,
    /// Creator-studio URLs of the publish target.
    pub upload_url: String,
    pub publish_url: String,
    pub manage_url: String,
    pub home_url: String,
    /// Hashtags appended to every published item.
    pub tags: Vec<String>,
    /// The target truncates titles beyond this many characters.
    pub title_max_chars: usize,
    /// DOM poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Overall wait budget for upload/transcode readiness, seconds.
    pub transcode_timeout_secs: u64,
    /// Wait budget for the post-submit confirmation, seconds.
    pub confirm_timeout_secs: u64,
    /// Media resubmissions allowed after "upload failed" signals.
    pub resubmit_cap: u32,
    /// Publish-button trigger attempts before assuming it landed.
    pub trigger_cap: u32,
    /// Timeout for any single browser step, seconds.
    pub step_timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            headless: false,
            session_file: None,
            upload_url: "https://creator.douyin.com/creator-micro/content/upload".into(),
            publish_url: "https://creator.douyin.com/creator-micro/content/publish".into(),
            manage_url: "https://creator.douyin.com/creator-micro/content/manage".into(),
            home_url: "https://creator.douyin.com/creator-micro/home".into(),
            tags: Vec::new(),
            title_max_chars: 30,
            poll_interval_ms: 2000,
            transcode_timeout_secs: 300,
            confirm_timeout_secs: 30,
            resubmit_cap: 3,
            trigger_cap: 3,
            step_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the default path, or an explicit override.
    ///
    /// If the default config file doesn't exist, creates a commented one.
    /// Missing fields in the config file use default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    config_path.display()
                )));
            }
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/portage/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("portage").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.window == 0 {
            return Err(ConfigError::Invalid("source.window must be at least 1".into()));
        }
        if self.source.window < 5 {
            warn!(
                window = self.source.window,
                "small source window: items posted faster than the poll \
                 interval will be skipped"
            );
        }
        if self.schedule.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Config with producer identity present, for commands that need one.
    pub fn require_producer(&self) -> Result<(), ConfigError> {
        if self.producer.id.is_empty() || self.producer.handle.is_empty() {
            return Err(ConfigError::Invalid(
                "producer.id and producer.handle must be set".into(),
            ));
        }
        Ok(())
    }

    /// Resolved media directory, created if missing.
    pub fn media_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.acquire.media_dir {
            Some(d) => d.clone(),
            None => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join("portage")
                .join("media"),
        };
        fs::create_dir_all(&dir).map_err(|e| ConfigError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Resolved session cookie-jar path.
    pub fn session_file(&self) -> Result<PathBuf, ConfigError> {
        match &self.publish.session_file {
            Some(p) => Ok(p.clone()),
            None => {
                let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
                Ok(config_dir.join("portage").join("session.json"))
            }
        }
    }

    /// Default database path: `<data dir>/portage/portage.db`
    pub fn default_db_path() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        let portage_dir = data_dir.join("portage");
        fs::create_dir_all(&portage_dir).map_err(|e| ConfigError::Io {
            path: portage_dir.clone(),
            source: e,
        })?;
        Ok(portage_dir.join("portage.db"))
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire.timeout_secs)
    }

    pub fn acquire_backoff_base(&self) -> Duration {
        Duration::from_millis(self.acquire.backoff_base_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.poll_interval_secs)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.schedule.failure_cooldown_secs)
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# portage configuration
#
# One producer is tracked per process instance.

[producer]
# Opaque producer id on the source platform (secUid-style).
id = ""
# Producer handle, used to build item page URLs.
handle = ""

[schedule]
# Seconds between cycles.
poll_interval_secs = 600
# Seconds to wait after a failed cycle before retrying.
failure_cooldown_secs = 60
run_on_start = true

[source]
base_url = "https://www.tiktok.com"
# Items per recent-items page. Contract: this window must exceed the number
# of items the producer can post within one poll interval, otherwise the
# backlog beyond the window is skipped permanently.
window = 35
timeout_secs = 15

[acquire]
# media_dir = "/var/lib/portage/media"
retry_cap = 3
backoff_base_ms = 2000
timeout_secs = 120

[publish]
# The target's upload flow is more reliable with a visible window.
headless = false
# session_file = "/path/to/session.json"
tags = []
title_max_chars = 30
poll_interval_ms = 2000
transcode_timeout_secs = 300
confirm_timeout_secs = 30
resubmit_cap = 3
trigger_cap = 3
step_timeout_secs = 30
"##
        .to_string()
    }
}
