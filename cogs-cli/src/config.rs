//! CLI configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cogs_core::{CommandKeys, ConnectionOptions, RequestLimits};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variables that override the `[keys]` section.
pub const READ_KEY_ENV: &str = "COGS_READ_KEY";
pub const WRITE_KEY_ENV: &str = "COGS_WRITE_KEY";
pub const ADMIN_KEY_ENV: &str = "COGS_ADMIN_KEY";

/// Top-level configuration for the command-line client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub connection: ConnectionConfig,
    pub keys: KeysConfig,
    pub requests: RequestsConfig,
    pub logging: LoggingConfig,
}

/// Where and how to connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Service endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Transport handshake timeout in milliseconds.
    pub timeout_ms: u64,
    /// Reconnect after an abnormal close.
    pub auto_reconnect: bool,
    /// Delay before reconnecting, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Print every inbound frame verbatim.
    pub raw_records: bool,
}

/// Project keys, each `<tag>-<identity>-<secret>`.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub read: String,
    pub write: String,
    pub admin: String,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &str| if k.is_empty() { "" } else { "<set>" };
        f.debug_struct("KeysConfig")
            .field("read", &mask(&self.read))
            .field("write", &mask(&self.write))
            .field("admin", &mask(&self.admin))
            .finish()
    }
}

/// Pending request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    pub max_pending: usize,
    /// Reply deadline in milliseconds.
    pub request_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

/// Why a configuration file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config at {}", .0.display())]
    Missing(PathBuf),

    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConnectionConfig {
    fn default() -> Self {
        let options = ConnectionOptions::default();
        Self {
            url: options.url,
            timeout_ms: millis(options.connect_timeout),
            auto_reconnect: options.auto_reconnect,
            reconnect_delay_ms: millis(options.reconnect_delay),
            raw_records: options.raw_records,
        }
    }
}

impl Default for RequestsConfig {
    fn default() -> Self {
        let limits = RequestLimits::default();
        Self {
            max_pending: limits.max_pending,
            request_timeout_ms: millis(limits.request_timeout),
            sweep_interval_ms: millis(limits.sweep_interval),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Read a TOML file. Missing sections and fields take their defaults.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::Missing(path.to_owned()),
            _ => ConfigError::Io {
                path: path.to_owned(),
                source: e,
            },
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Invalid {
            path: path.to_owned(),
            source,
        })
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Replace keys with any set in the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (name, slot) in [
            (READ_KEY_ENV, &mut self.keys.read),
            (WRITE_KEY_ENV, &mut self.keys.write),
            (ADMIN_KEY_ENV, &mut self.keys.admin),
        ] {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn command_keys(&self) -> CommandKeys {
        CommandKeys::new(&self.keys.read, &self.keys.write, &self.keys.admin)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        let c = &self.connection;
        ConnectionOptions {
            url: c.url.clone(),
            connect_timeout: Duration::from_millis(c.timeout_ms),
            auto_reconnect: c.auto_reconnect,
            reconnect_delay: Duration::from_millis(c.reconnect_delay_ms),
            raw_records: c.raw_records,
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        let r = &self.requests;
        RequestLimits {
            max_pending: r.max_pending,
            request_timeout: Duration::from_millis(r.request_timeout_ms),
            sweep_interval: Duration::from_millis(r.sweep_interval_ms),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
