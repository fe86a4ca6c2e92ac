//! Error types shared across the relay.

use std::fmt::{Display, Formatter};

/// Shared relay result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Relay error enumeration covering all failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// TCP port or pipe name already in use.
    Bind(String),
    /// Waiting for the pipe consumer failed.
    Connect(String),
    /// A pipe write was attempted with no consumer attached.
    NotConnected(String),
    /// Read or write failure local to one client session.
    SessionIo(String),
    /// Lifecycle operation requested from a state that does not allow it.
    InvalidState(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::Connect(msg) => write!(f, "connect: {msg}"),
            Self::NotConnected(msg) => write!(f, "not connected: {msg}"),
            Self::SessionIo(msg) => write!(f, "session io: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
