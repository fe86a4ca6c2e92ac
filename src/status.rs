//! Structured status reporting for the control surface.
//!
//! Every lifecycle transition and every reportable failure produces one
//! [`StatusEvent`]. A control surface (console, tray, test harness)
//! subscribes by supplying a [`StatusReporter`].

use std::fmt::{Display, Formatter};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Severity attached to a status event.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Normal lifecycle progress.
    Info,
    /// Non-fatal condition the operator may want to know about.
    Warning,
    /// An operation failed.
    Error,
}

/// What a status event is about.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Relay started and is accepting clients.
    Started,
    /// Relay stopped.
    Stopped,
    /// A consumer attached to the pipe.
    ConsumerConnected,
    /// The attached consumer went away.
    ConsumerDisconnected,
    /// Port or pipe name already in use.
    BindError,
    /// Configuration rejected while starting, such as an invalid pipe name.
    ConfigError,
    /// Waiting for a pipe consumer failed.
    ConnectError,
    /// Accepting a TCP client failed.
    AcceptError,
    /// A single client session failed.
    SessionIoError,
    /// Start or stop requested from a state that does not allow it.
    InvalidStateTransition,
    /// Process is exiting.
    Shutdown,
}

/// One notification delivered to the control surface.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StatusEvent {
    /// Event category.
    pub kind: StatusKind,
    /// Severity tag.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

impl StatusEvent {
    /// Informational event.
    #[must_use]
    pub fn info(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Info,
            message: message.into(),
        }
    }

    /// Warning event.
    #[must_use]
    pub fn warning(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    /// Error event.
    #[must_use]
    pub fn error(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

impl Display for StatusEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Sink for status notifications.
///
/// Called from the controller, the accept loop, sessions and the pipe
/// wait task, so implementations must not block.
pub trait StatusReporter: Send + Sync {
    /// Deliver one event.
    fn report(&self, event: StatusEvent);
}

/// Reporter that only writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, event: StatusEvent) {
        log_event(&event);
    }
}

/// Reporter that logs each event and forwards it over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusReporter for ChannelReporter {
    fn report(&self, event: StatusEvent) {
        log_event(&event);
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

fn log_event(event: &StatusEvent) {
    match event.severity {
        Severity::Info => info!(kind = ?event.kind, "{}", event.message),
        Severity::Warning => warn!(kind = ?event.kind, "{}", event.message),
        Severity::Error => error!(kind = ?event.kind, "{}", event.message),
    }
}
