//! Server-side pipe endpoint with a single attached consumer.
//!
//! The endpoint is bound by [`IpcChannel::open`] and starts waiting for a
//! consumer with [`IpcChannel::await_consumer`]. The wait runs as one
//! background task for the lifetime of the channel: it accepts a consumer,
//! installs its write half, watches the read half for disconnect and then
//! waits for the next consumer. Writes are serialised by a mutex so lines
//! from concurrent client sessions never interleave.
//!
//! ## States
//!
//! | State                | Meaning                                      |
//! |----------------------|----------------------------------------------|
//! | `Unbound`            | Opened but not waiting, failed, or closed    |
//! | `WaitingForConsumer` | Wait task armed, no consumer attached        |
//! | `Connected`          | Consumer attached; writes are delivered      |

use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use interprocess::local_socket::tokio::{prelude::*, Listener, RecvHalf, SendHalf, Stream};
use interprocess::local_socket::ListenerOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::ipc::pipe_name;
use crate::status::{StatusEvent, StatusKind, StatusReporter};
use crate::{AppError, Result};

/// Terminator appended to every forwarded line.
#[cfg(windows)]
pub const LINE_TERMINATOR: &str = "\r\n";

/// Terminator appended to every forwarded line.
#[cfg(not(windows))]
pub const LINE_TERMINATOR: &str = "\n";

/// Connection state of the pipe endpoint.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    /// Not waiting for a consumer.
    Unbound,
    /// Waiting for a consumer to attach.
    WaitingForConsumer,
    /// A consumer is attached.
    Connected,
}

/// Where the wait task gets its consumers from.
trait ConsumerSource: Send + 'static {
    fn next_consumer(&self) -> impl Future<Output = io::Result<Stream>> + Send;
}

impl ConsumerSource for Listener {
    fn next_consumer(&self) -> impl Future<Output = io::Result<Stream>> + Send {
        self.accept()
    }
}

/// Named pipe endpoint owned by the relay.
pub struct IpcChannel {
    name: String,
    listener: StdMutex<Option<Listener>>,
    writer: Mutex<Option<SendHalf>>,
    state: watch::Sender<ChannelState>,
    cancel: CancellationToken,
    wait_task: StdMutex<Option<JoinHandle<()>>>,
    reporter: Arc<dyn StatusReporter>,
}

impl IpcChannel {
    /// Bind the named endpoint in the server role.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the name is invalid and
    /// `AppError::Bind` if another server already owns it.
    pub fn open(name: &str, reporter: Arc<dyn StatusReporter>) -> Result<Arc<Self>> {
        let listener = ListenerOptions::new()
            .name(pipe_name(name)?)
            .create_tokio()
            .map_err(|err| AppError::Bind(format!("cannot create pipe '{name}': {err}")))?;

        debug!(pipe = name, "pipe endpoint bound");

        let (state, _) = watch::channel(ChannelState::Unbound);
        Ok(Arc::new(Self {
            name: name.to_owned(),
            listener: StdMutex::new(Some(listener)),
            writer: Mutex::new(None),
            state,
            cancel: CancellationToken::new(),
            wait_task: StdMutex::new(None),
            reporter,
        }))
    }

    /// Pipe identifier this channel was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Start waiting for a consumer without blocking the caller.
    ///
    /// Only one wait may be armed per channel; it keeps serving consumers
    /// one at a time until the channel is closed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if a wait is already armed or the
    /// channel has been closed.
    pub fn await_consumer(self: &Arc<Self>) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                AppError::InvalidState(format!(
                    "pipe '{}' is already waiting for a consumer or closed",
                    self.name
                ))
            })?;

        self.spawn_wait(listener);
        Ok(())
    }

    fn spawn_wait<S: ConsumerSource>(self: &Arc<Self>, source: S) {
        self.state.send_replace(ChannelState::WaitingForConsumer);

        let channel = Arc::clone(self);
        let span = info_span!("pipe_consumer", pipe = %self.name);
        let handle = tokio::spawn(channel.serve_consumers(source).instrument(span));
        *self.wait_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Write one line to the attached consumer and flush it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotConnected` when no consumer is attached and
    /// `AppError::Io` when the write fails; a failed write detaches the
    /// consumer and reports `ConsumerDisconnected`.
    pub async fn write(&self, text: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::NotConnected(format!("pipe '{}' is closed", self.name)));
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(AppError::NotConnected(format!(
                "no consumer attached to pipe '{}'",
                self.name
            )));
        };

        let mut line = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        line.push_str(text);
        line.push_str(LINE_TERMINATOR);

        let outcome = tokio::select! {
            biased;

            () = self.cancel.cancelled() => {
                return Err(AppError::NotConnected(format!("pipe '{}' is closed", self.name)));
            }

            outcome = write_line(writer, line.as_bytes()) => outcome,
        };

        if let Err(err) = outcome {
            *guard = None;
            drop(guard);
            self.state.send_replace(ChannelState::WaitingForConsumer);
            self.reporter.report(StatusEvent::warning(
                StatusKind::ConsumerDisconnected,
                format!("pipe write error: {err}"),
            ));
            return Err(AppError::Io(format!("pipe write failed: {err}")));
        }

        Ok(())
    }

    /// Release the endpoint, aborting any pending consumer wait.
    ///
    /// Idempotent; safe to call on a channel that never started waiting.
    pub async fn close(&self) {
        self.cancel.cancel();
        drop(
            self.listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handle = self
            .wait_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(pipe = %self.name, %err, "pipe consumer task ended abnormally");
            }
        }

        drop(self.writer.lock().await.take());
        self.state.send_replace(ChannelState::Unbound);
        debug!(pipe = %self.name, "pipe endpoint closed");
    }

    /// Accept consumers one at a time until cancelled.
    async fn serve_consumers<S: ConsumerSource>(self: Arc<Self>, source: S) {
        'serve: loop {
            let stream = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break 'serve,

                accepted = source.next_consumer() => match accepted {
                    Ok(stream) => stream,
                    Err(err) => {
                        self.state.send_replace(ChannelState::Unbound);
                        let err = AppError::Connect(format!("pipe connection error: {err}"));
                        self.reporter.report(StatusEvent::error(
                            StatusKind::ConnectError,
                            err.to_string(),
                        ));
                        return;
                    }
                },
            };

            let (mut reader, writer) = stream.split();
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break 'serve,

                mut slot = self.writer.lock() => *slot = Some(writer),
            }
            self.state.send_replace(ChannelState::Connected);
            self.reporter.report(StatusEvent::info(
                StatusKind::ConsumerConnected,
                format!("named pipe connection established on '{}'", self.name),
            ));

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break 'serve,

                () = watch_disconnect(&mut reader) => {}
            }

            // The write path may already have detached and reported this consumer.
            if self.writer.lock().await.take().is_some() {
                self.reporter.report(StatusEvent::warning(
                    StatusKind::ConsumerDisconnected,
                    format!("consumer left pipe '{}'", self.name),
                ));
            }
            self.state.send_replace(ChannelState::WaitingForConsumer);
        }

        debug!("pipe consumer wait cancelled");
    }
}

async fn write_line(writer: &mut SendHalf, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Resolve once the consumer closes its end.
///
/// The pipe is output-only, so anything the consumer sends is discarded.
/// EOF on the read half is taken as the consumer leaving: a consumer that
/// shuts down only its write side while still reading is detached too.
async fn watch_disconnect(reader: &mut RecvHalf) {
    let mut scratch = [0_u8; 256];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) => return,
            Ok(n) => debug!(bytes = n, "discarding inbound bytes from consumer"),
            Err(err) => {
                debug!(%err, "consumer read failed");
                return;
            }
        }
    }
}
