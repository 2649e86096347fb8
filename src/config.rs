//! Configuration system for wsprobe
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (WSPROBE_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! With no file and no overrides the probe runs with the built-in constants:
//! 30s heartbeat interval, 10s heartbeat timeout, 5s reconnect delay.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// Default endpoint the probe connects to
pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";

/// Interval between heartbeat probes
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// How long a heartbeat probe waits for its pong
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

/// Pause between a terminated attempt and the next one
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Upper bound on the opening handshake
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Journal file, relative to the working directory
pub const DEFAULT_JOURNAL_FILE: &str = "wsprobe_messages.log";

/// Main probe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Endpoint and connection lifecycle timings
    pub endpoint: EndpointSettings,

    /// Message journal
    pub journal: JournalSettings,

    /// Diagnostic logging (tracing)
    pub logging: LoggingSettings,
}

/// Endpoint and timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Heartbeat response timeout in milliseconds
    pub heartbeat_timeout_ms: u64,

    /// Reconnect delay in milliseconds
    pub reconnect_delay_ms: u64,

    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Journal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    /// Append-only journal file
    pub file: String,

    /// Echo every journal line to stdout
    pub echo_stdout: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Diagnostic log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated diagnostic log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            file: DEFAULT_JOURNAL_FILE.to_string(),
            echo_stdout: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl EndpointSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ProbeConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            Some(PathBuf::from("wsprobe.toml")),
            dirs::config_dir().map(|p| p.join("wsprobe").join("config.toml")),
            dirs::home_dir().map(|p| p.join(".wsprobe").join("config.toml")),
        ];

        for path in search_paths.into_iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WSPROBE_URL") {
            self.endpoint.url = val;
        }
        override_u64("WSPROBE_HEARTBEAT_INTERVAL_MS", &mut self.endpoint.heartbeat_interval_ms);
        override_u64("WSPROBE_HEARTBEAT_TIMEOUT_MS", &mut self.endpoint.heartbeat_timeout_ms);
        override_u64("WSPROBE_RECONNECT_DELAY_MS", &mut self.endpoint.reconnect_delay_ms);
        override_u64("WSPROBE_CONNECT_TIMEOUT_MS", &mut self.endpoint.connect_timeout_ms);

        if let Ok(val) = std::env::var("WSPROBE_JOURNAL_FILE") {
            self.journal.file = val;
        }
        if let Ok(val) = std::env::var("WSPROBE_JOURNAL_ECHO") {
            self.journal.echo_stdout = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("WSPROBE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("WSPROBE_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("WSPROBE_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.journal.file = expand_path(&self.journal.file);
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.endpoint.url;
        if url.is_empty() {
            return Err(Error::config_field_invalid("endpoint.url", "URL cannot be empty"));
        }
        let parsed = Url::parse(url).map_err(|e| {
            Error::config_field_invalid("endpoint.url", format!("Invalid URL '{}': {}", url, e))
        })?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(Error::config_field_invalid(
                "endpoint.url",
                "URL must start with ws:// or wss://",
            ));
        }

        let timings = [
            ("endpoint.heartbeat_interval_ms", self.endpoint.heartbeat_interval_ms),
            ("endpoint.heartbeat_timeout_ms", self.endpoint.heartbeat_timeout_ms),
            ("endpoint.reconnect_delay_ms", self.endpoint.reconnect_delay_ms),
            ("endpoint.connect_timeout_ms", self.endpoint.connect_timeout_ms),
        ];
        for (field, value) in timings {
            if value == 0 {
                return Err(Error::config_field_invalid(field, format!("{} must be greater than 0", field)));
            }
        }

        if self.journal.file.trim().is_empty() {
            return Err(Error::config_field_invalid("journal.file", "Journal file cannot be empty"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    pub fn journal_path(&self) -> PathBuf {
        PathBuf::from(&self.journal.file)
    }
}

fn override_u64(var: &str, target: &mut u64) {
    if let Ok(val) = std::env::var(var) {
        if let Ok(n) = val.parse() {
            *target = n;
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Write a commented default configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| PathBuf::from("wsprobe.toml"));

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, default_config_toml()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Default configuration content with comments
fn default_config_toml() -> String {
    format!(
        r#"# wsprobe configuration

[endpoint]
# WebSocket endpoint (ws:// or wss://)
url = "{url}"

# Interval between heartbeat pings in milliseconds
heartbeat_interval_ms = {interval}

# How long to wait for a pong before the connection is considered dead
heartbeat_timeout_ms = {timeout}

# Pause before reconnecting after any disconnect
reconnect_delay_ms = {delay}

# Opening handshake timeout in milliseconds
connect_timeout_ms = {connect}

[journal]
# Append-only message journal
file = "{journal}"

# Echo journal lines to stdout
echo_stdout = true

[logging]
# Diagnostic log level: trace, debug, info, warn, error
level = "info"

# Diagnostic log file (comment out to disable)
# file = "~/.wsprobe/logs/wsprobe"

# Number of rotated diagnostic log files to keep
max_files = 5

# Enable JSON formatted diagnostics
json_format = false
"#,
        url = DEFAULT_URL,
        interval = DEFAULT_HEARTBEAT_INTERVAL_MS,
        timeout = DEFAULT_HEARTBEAT_TIMEOUT_MS,
        delay = DEFAULT_RECONNECT_DELAY_MS,
        connect = DEFAULT_CONNECT_TIMEOUT_MS,
        journal = DEFAULT_JOURNAL_FILE,
    )
}
