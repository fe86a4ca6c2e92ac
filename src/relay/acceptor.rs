//! TCP accept loop.
//!
//! Accepting is event-driven: the loop waits on `accept` and the stop
//! token together, so stopping takes effect immediately rather than on a
//! poll tick. Each accepted client is handed to a [`ClientSession`] task
//! tracked by the shared [`TaskTracker`]; stopping the acceptor never
//! touches sessions that are already running.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::relay::session::{ClientSession, LineSink, SessionSettings};
use crate::status::{StatusEvent, StatusKind, StatusReporter};
use crate::{AppError, Result};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Where the accept loop gets its clients from.
trait ClientSource: Send + 'static {
    fn next_client(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl ClientSource for TcpListener {
    fn next_client(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        self.accept()
    }
}

/// Everything a spawned session needs.
struct SessionFactory {
    settings: SessionSettings,
    sink: Arc<dyn LineSink>,
    reporter: Arc<dyn StatusReporter>,
    tracker: TaskTracker,
}

/// Owner of the listening socket and its accept loop.
pub struct ConnectionAcceptor {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectionAcceptor {
    /// Bind `addr` and start accepting clients.
    ///
    /// Sessions are spawned on `tracker` and forward into `sink`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bind` if the address is already in use or
    /// cannot be bound.
    pub async fn start(
        addr: SocketAddr,
        settings: SessionSettings,
        sink: Arc<dyn LineSink>,
        reporter: Arc<dyn StatusReporter>,
        tracker: TaskTracker,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| AppError::Bind(format!("cannot listen on {addr}: {err}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| AppError::Bind(format!("cannot resolve bound address: {err}")))?;

        info!(%local_addr, "tcp listener bound");

        let cancel = CancellationToken::new();
        let factory = SessionFactory {
            settings,
            sink,
            reporter,
            tracker,
        };
        let span = info_span!("acceptor", addr = %local_addr);
        let task = tokio::spawn(accept_loop(listener, factory, cancel.clone()).instrument(span));

        Ok(Self {
            local_addr,
            cancel,
            task,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close the listening socket.
    ///
    /// Returns once the socket is closed; running sessions are left alone.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(addr = %self.local_addr, %err, "accept loop ended abnormally");
        }
    }
}

async fn accept_loop<S: ClientSource>(
    source: S,
    factory: SessionFactory,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            // Stop closes the socket by dropping it here, so a closed
            // listener is never observed as an accept error.
            () = cancel.cancelled() => break,

            accepted = source.next_client() => match accepted {
                Ok((stream, peer)) => spawn_session(&factory, stream, peer),
                Err(err) => {
                    factory.reporter.report(StatusEvent::error(
                        StatusKind::AcceptError,
                        format!("listener error: {err}"),
                    ));
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            },
        }
    }

    drop(source);
    debug!("accept loop stopped");
}

fn spawn_session(factory: &SessionFactory, stream: TcpStream, peer: SocketAddr) {
    let session = ClientSession::new(
        stream,
        peer,
        factory.settings,
        Arc::clone(&factory.sink),
        Arc::clone(&factory.reporter),
    );
    let span = info_span!("client_session", peer = %session.peer());
    factory.tracker.spawn(session.run().instrument(span));
}
