//! Relay configuration parsing and validation.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Name of the pipe the downstream consumer attaches to.
pub const DEFAULT_PIPE_NAME: &str = "GhalibVRPipe";

/// TCP port clients connect to.
pub const DEFAULT_PORT: u16 = 4120;

/// Largest accepted `read_buffer_size`; each client session allocates one.
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_pipe_name() -> String {
    DEFAULT_PIPE_NAME.into()
}

fn default_read_buffer_size() -> usize {
    1024
}

/// Relay configuration parsed from `relay.toml`.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RelayConfig {
    /// Loopback address the TCP listener binds to.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// TCP port; `0` asks the OS for an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,
    /// Size of each client session's read buffer in bytes.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Idle read timeout per session; 0 means sessions never time out.
    #[serde(default)]
    pub idle_timeout_seconds: u64,
    /// How long shutdown waits for in-flight sessions; 0 means no wait.
    #[serde(default)]
    pub drain_timeout_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            pipe_name: default_pipe_name(),
            read_buffer_size: default_read_buffer_size(),
            idle_timeout_seconds: 0,
            drain_timeout_seconds: 0,
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Address the TCP listener binds to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Idle timeout for client sessions, if enabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_seconds > 0).then(|| Duration::from_secs(self.idle_timeout_seconds))
    }

    /// Drain window applied on shutdown, if enabled.
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        (self.drain_timeout_seconds > 0).then(|| Duration::from_secs(self.drain_timeout_seconds))
    }

    /// Check field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if !self.host.is_loopback() {
            return Err(AppError::Config(format!(
                "host must be a loopback address, got {}",
                self.host
            )));
        }

        if self.pipe_name.trim().is_empty() {
            return Err(AppError::Config("pipe_name must not be empty".into()));
        }

        if self.read_buffer_size == 0 {
            return Err(AppError::Config(
                "read_buffer_size must be greater than zero".into(),
            ));
        }

        if self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(AppError::Config(format!(
                "read_buffer_size must be at most {MAX_READ_BUFFER_SIZE} bytes, got {}",
                self.read_buffer_size
            )));
        }

        Ok(())
    }
}
