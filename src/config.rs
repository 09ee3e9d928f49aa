//! Daemon configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via LUAWIRE_CONFIG)
//! 3. Environment variables

use luawire_client::{AnySignal, ConnectionConfig};
use luawire_protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the Lua host listens.
    pub host: HostConfig,
    /// How often the selection is re-applied.
    pub poll: PollConfig,
    /// What to wait for after a refused connect.
    pub readiness: ReadinessConfig,
    /// Which subtitle track to prefer.
    pub subtitles: SubtitleConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("LUAWIRE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    fn apply_env_overrides(&mut self) {
        self.host.apply_env_overrides();
        self.poll.apply_env_overrides();
        self.readiness.apply_env_overrides();
        self.subtitles.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host.host is empty".into()));
        }
        if self.host.port == 0 {
            return Err(ConfigError::Invalid("host.port must be non-zero".into()));
        }
        if self.host.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "host.max_frame_size must be non-zero".into(),
            ));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_secs must be at least 1".into(),
            ));
        }
        if self.subtitles.language.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "subtitles.language is empty".into(),
            ));
        }
        Ok(())
    }

    /// Client settings for one polling cycle.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.host.host.clone(), self.host.port)
            .with_max_frame_size(self.host.max_frame_size)
            .with_connect_timeout(self.host.connect_timeout())
    }
}

/// Lua host address and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: String,
    pub port: u16,
    /// Largest reply or event accepted, in bytes.
    pub max_frame_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout_secs: 10,
        }
    }
}

impl HostConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("LUAWIRE_HOST") {
            self.host = host;
        }

        if let Ok(port) = std::env::var("LUAWIRE_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }

        if let Ok(size) = std::env::var("LUAWIRE_MAX_FRAME_SIZE") {
            if let Ok(size) = size.parse() {
                self.max_frame_size = size;
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between polling cycles.
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl PollConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("LUAWIRE_POLL_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.interval_secs = secs;
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Readiness signal settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Command line that exits 0 once the host is up, e.g. `waitfor VlcStarted`.
    pub command: Option<String>,
    /// Fixed wait used when no command is set.
    pub delay_secs: Option<u64>,
}

impl ReadinessConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(command) = std::env::var("LUAWIRE_READY_COMMAND") {
            self.command = Some(command);
        }
    }

    pub fn signal(&self) -> AnySignal {
        AnySignal::from_settings(
            self.command.as_deref(),
            self.delay_secs.map(Duration::from_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// Matched case-insensitively against the track language.
    pub language: String,
    /// Tie-breaker matched against the track description.
    pub prefer: String,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            prefer: "full".to_string(),
        }
    }
}

impl SubtitleConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(language) = std::env::var("LUAWIRE_LANGUAGE") {
            self.language = language;
        }

        if let Ok(prefer) = std::env::var("LUAWIRE_PREFER") {
            self.prefer = prefer;
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
