//! Relay lifecycle state machine.
//!
//! [`RelayController`] owns at most one [`IpcChannel`] and one
//! [`ConnectionAcceptor`] at a time and moves between
//! `Stopped → Starting → Running → Stopping → Stopped`. Start and stop are
//! serialised by an async mutex; the current state is published on a
//! `watch` channel so any task can observe it.
//!
//! Client sessions forward through [`RelaySink`], which always points at
//! the channel of the current run. Sessions that outlive a stop keep
//! reading; their chunks are dropped until the relay is started again.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{watch, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::ipc::{ChannelState, IpcChannel};
use crate::relay::acceptor::ConnectionAcceptor;
use crate::relay::session::{LineSink, SessionSettings};
use crate::status::{StatusEvent, StatusKind, StatusReporter};
use crate::{AppError, Result};

/// Lifecycle state of the relay.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RelayState {
    /// Nothing bound. Initial and terminal state.
    Stopped,
    /// Binding the pipe and the TCP listener.
    Starting,
    /// Accepting clients and relaying.
    Running,
    /// Tearing resources down.
    Stopping,
}

impl Display for RelayState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Whether a start or stop request changed anything.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transition {
    /// The request moved the state machine.
    Applied,
    /// The request was not valid from the current state and was ignored.
    Ignored,
}

/// Forwarding sink shared by every client session.
#[derive(Default)]
pub struct RelaySink {
    channel: RwLock<Option<Arc<IpcChannel>>>,
}

impl RelaySink {
    fn attach(&self, channel: Arc<IpcChannel>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    fn detach(&self) {
        self.channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn current(&self) -> Option<Arc<IpcChannel>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LineSink for RelaySink {
    fn forward(&self, text: String) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(channel) = self.current() else {
                debug!(bytes = text.len(), "relay stopped, dropping chunk");
                return;
            };

            match channel.write(&text).await {
                Ok(()) => {}
                Err(AppError::NotConnected(reason)) => {
                    debug!(pipe = channel.name(), bytes = text.len(), %reason, "dropping chunk");
                }
                // Already reported by the channel as a disconnect.
                Err(err) => debug!(pipe = channel.name(), %err, "chunk lost on pipe write"),
            }
        })
    }
}

#[derive(Default)]
struct Resources {
    acceptor: Option<ConnectionAcceptor>,
    channel: Option<Arc<IpcChannel>>,
}

/// Top-level relay lifecycle object driven by the control surface.
pub struct RelayController {
    config: RelayConfig,
    reporter: Arc<dyn StatusReporter>,
    sink: Arc<RelaySink>,
    sessions: TaskTracker,
    state: watch::Sender<RelayState>,
    resources: Mutex<Resources>,
}

impl RelayController {
    /// Create a stopped controller.
    #[must_use]
    pub fn new(config: RelayConfig, reporter: Arc<dyn StatusReporter>) -> Self {
        let (state, _) = watch::channel(RelayState::Stopped);
        Self {
            config,
            reporter,
            sink: Arc::new(RelaySink::default()),
            sessions: TaskTracker::new(),
            state,
            resources: Mutex::new(Resources::default()),
        }
    }

    /// Configuration the controller was built with.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Number of client sessions still reading.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Address the TCP listener is bound to while running.
    pub async fn tcp_addr(&self) -> Option<SocketAddr> {
        self.resources
            .lock()
            .await
            .acceptor
            .as_ref()
            .map(ConnectionAcceptor::local_addr)
    }

    /// Pipe connection state while running.
    pub async fn consumer_state(&self) -> Option<ChannelState> {
        self.resources
            .lock()
            .await
            .channel
            .as_ref()
            .map(|channel| channel.state())
    }

    /// Open the pipe, start waiting for a consumer and start accepting clients.
    ///
    /// Ignored unless the relay is stopped. On failure everything already
    /// bound is released before returning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bind` if the port or pipe name is taken, or
    /// `AppError::Config` if the pipe name is invalid.
    pub async fn start(&self) -> Result<Transition> {
        let mut resources = self.resources.lock().await;

        if self.state() != RelayState::Stopped {
            self.reporter.report(StatusEvent::warning(
                StatusKind::InvalidStateTransition,
                format!("relay is already {}", self.state()),
            ));
            return Ok(Transition::Ignored);
        }

        self.state.send_replace(RelayState::Starting);

        match self.bring_up(&mut resources).await {
            Ok(addr) => {
                self.state.send_replace(RelayState::Running);
                self.reporter.report(StatusEvent::info(
                    StatusKind::Started,
                    format!(
                        "relay started: listening on {addr}, pipe '{}'",
                        self.config.pipe_name
                    ),
                ));
                Ok(Transition::Applied)
            }
            Err(err) => {
                self.tear_down(&mut resources).await;
                self.state.send_replace(RelayState::Stopped);
                self.reporter.report(StatusEvent::error(
                    start_failure_kind(&err),
                    format!("error starting relay: {err}"),
                ));
                Err(err)
            }
        }
    }

    /// Stop accepting clients and close the pipe.
    ///
    /// Ignored unless the relay is running. Sessions already reading are
    /// left to finish on their own.
    pub async fn stop(&self) -> Transition {
        let mut resources = self.resources.lock().await;

        if self.state() != RelayState::Running {
            self.reporter.report(StatusEvent::warning(
                StatusKind::InvalidStateTransition,
                format!("relay is not running ({})", self.state()),
            ));
            return Transition::Ignored;
        }

        self.stop_locked(&mut resources).await;
        Transition::Applied
    }

    /// Stop if running, then release everything for process exit.
    ///
    /// Safe from any state and never fails. Waits for in-flight sessions
    /// only when a drain timeout is configured.
    pub async fn shutdown(&self) {
        {
            let mut resources = self.resources.lock().await;
            if self.state() == RelayState::Running {
                self.stop_locked(&mut resources).await;
            } else {
                self.tear_down(&mut resources).await;
                self.state.send_replace(RelayState::Stopped);
            }
        }

        self.sessions.close();
        if let Some(window) = self.config.drain_timeout() {
            if tokio::time::timeout(window, self.sessions.wait())
                .await
                .is_err()
            {
                warn!(
                    remaining = self.sessions.len(),
                    "drain window elapsed with client sessions still open"
                );
            }
        }

        self.reporter.report(StatusEvent::info(
            StatusKind::Shutdown,
            format!(
                "relay shut down ({} client session(s) still open)",
                self.sessions.len()
            ),
        ));
    }

    async fn bring_up(&self, resources: &mut Resources) -> Result<SocketAddr> {
        let channel = IpcChannel::open(&self.config.pipe_name, Arc::clone(&self.reporter))?;
        resources.channel = Some(Arc::clone(&channel));
        channel.await_consumer()?;
        self.sink.attach(channel);

        let sink: Arc<dyn LineSink> = self.sink.clone();
        let acceptor = ConnectionAcceptor::start(
            self.config.bind_addr(),
            SessionSettings::from(&self.config),
            sink,
            Arc::clone(&self.reporter),
            self.sessions.clone(),
        )
        .await?;
        let addr = acceptor.local_addr();
        resources.acceptor = Some(acceptor);
        Ok(addr)
    }

    async fn stop_locked(&self, resources: &mut Resources) {
        self.state.send_replace(RelayState::Stopping);
        self.tear_down(resources).await;
        self.state.send_replace(RelayState::Stopped);
        self.reporter
            .report(StatusEvent::info(StatusKind::Stopped, "relay stopped"));
        info!(
            sessions = self.sessions.len(),
            "relay stopped; open client sessions continue until their peers close"
        );
    }

    async fn tear_down(&self, resources: &mut Resources) {
        if let Some(acceptor) = resources.acceptor.take() {
            acceptor.stop().await;
        }
        self.sink.detach();
        if let Some(channel) = resources.channel.take() {
            channel.close().await;
        }
    }
}

/// Status kind reported for an error that aborted a start.
fn start_failure_kind(err: &AppError) -> StatusKind {
    match err {
        AppError::Bind(_) | AppError::Io(_) => StatusKind::BindError,
        AppError::Config(_) => StatusKind::ConfigError,
        AppError::Connect(_) | AppError::NotConnected(_) => StatusKind::ConnectError,
        AppError::SessionIo(_) => StatusKind::SessionIoError,
        AppError::InvalidState(_) => StatusKind::InvalidStateTransition,
    }
}
