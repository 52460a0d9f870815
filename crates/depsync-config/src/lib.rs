//! Shared configuration for depsync clients.
//!
//! TOML file plus `DEPSYNC_`-prefixed environment overrides, layered with
//! figment, and translation to `depsync_api::ClientConfig` and
//! `depsync_core::ControllerConfig`. The CLI adds flag-aware overrides on
//! top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use depsync_api::{ClientConfig, ReconnectConfig};
use depsync_core::ControllerConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default)]
    pub controller: ControllerSettings,

    #[serde(default)]
    pub log: LogSettings,
}

/// Where the daemon lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DaemonSettings {
    /// WebSocket endpoint (e.g., "ws://127.0.0.1:47110").
    #[serde(default = "default_url")]
    pub url: String,

    /// Upper bound on a single daemon call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            call_timeout_secs: default_call_timeout(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Give up after this many failed attempts. Unset retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControllerSettings {
    /// Re-fetch state when broadcasts may have been missed.
    #[serde(default = "default_true")]
    pub resync_on_notice: bool,

    /// How long a mutating command waits for the daemon's broadcast before
    /// printing whatever state it has.
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_secs: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            resync_on_notice: true,
            settle_timeout_secs: default_settle_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogSettings {
    /// Default filter when neither `RUST_LOG` nor `-v` is given.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Also write logs to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_url() -> String {
    "ws://127.0.0.1:47110".into()
}
fn default_call_timeout() -> u64 {
    30
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_settle_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    "warn".into()
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

// ── Validation & translation ────────────────────────────────────────

impl Config {
    /// Check every field that can't be expressed in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.daemon_url()?;

        if self.daemon.call_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "daemon.call_timeout_secs",
                "must be greater than zero",
            ));
        }

        let reconnect = &self.daemon.reconnect;
        if reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::invalid(
                "daemon.reconnect.initial_delay_ms",
                "must be greater than zero",
            ));
        }
        if reconnect.max_delay_secs.saturating_mul(1000) < reconnect.initial_delay_ms {
            return Err(ConfigError::invalid(
                "daemon.reconnect.max_delay_secs",
                "must not be shorter than initial_delay_ms",
            ));
        }

        let level = self.log.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid(
                "log.level",
                format!("expected one of {}, got '{}'", LOG_LEVELS.join(", "), self.log.level),
            ));
        }

        Ok(())
    }

    /// Parsed daemon URL. Only `ws` and `wss` are accepted.
    pub fn daemon_url(&self) -> Result<url::Url, ConfigError> {
        let url: url::Url = self
            .daemon
            .url
            .parse()
            .map_err(|e| ConfigError::invalid("daemon.url", format!("{e}: {}", self.daemon.url)))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::invalid(
                "daemon.url",
                format!("expected a ws:// or wss:// URL, got scheme '{other}'"),
            )),
        }
    }

    /// Build the WebSocket client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let reconnect = &self.daemon.reconnect;
        Ok(ClientConfig {
            url: self.daemon_url()?,
            call_timeout: Duration::from_secs(self.daemon.call_timeout_secs),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(reconnect.initial_delay_ms),
                max_delay: Duration::from_secs(reconnect.max_delay_secs),
                max_retries: reconnect.max_retries,
            },
        })
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            resync_on_notice: self.controller.resync_on_notice,
            ..ControllerConfig::default()
        }
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.controller.settle_timeout_secs)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "depsync", "depsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("depsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if present), then
/// `DEPSYNC_`-prefixed environment variables with `__` as the section
/// separator (e.g. `DEPSYNC_DAEMON__URL`).
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DEPSYNC_").split("__"))
}

/// Load and validate the config from the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load and validate the config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if anything goes wrong.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(&path, cfg)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
