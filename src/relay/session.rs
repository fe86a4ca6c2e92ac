//! One accepted TCP client and its read loop.
//!
//! Each read is decoded and forwarded as one unit: a read boundary is a
//! forward boundary, and no line reassembly happens across reads.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::status::{StatusEvent, StatusKind, StatusReporter};
use crate::AppError;

/// Destination for text chunks read from client sessions.
///
/// Shared by every session, so implementations must tolerate
/// concurrent calls.
pub trait LineSink: Send + Sync {
    /// Forward one decoded chunk.
    fn forward(&self, text: String) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Per-session tuning derived from [`RelayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Close the session after this long without data.
    pub idle_timeout: Option<Duration>,
}

impl From<&RelayConfig> for SessionSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Decode bytes as ASCII, replacing anything outside the 7-bit range with `?`.
#[must_use]
pub fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&byte| if byte.is_ascii() { char::from(byte) } else { '?' })
        .collect()
}

/// Wrapper around one accepted client connection.
pub struct ClientSession {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: Vec<u8>,
    idle_timeout: Option<Duration>,
    sink: Arc<dyn LineSink>,
    reporter: Arc<dyn StatusReporter>,
}

impl ClientSession {
    /// Wrap an accepted connection.
    #[must_use]
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        settings: SessionSettings,
        sink: Arc<dyn LineSink>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: vec![0; settings.read_buffer_size],
            idle_timeout: settings.idle_timeout,
            sink,
            reporter,
        }
    }

    /// Peer address of the client.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read until the peer closes or the connection fails, then close it.
    ///
    /// Failures are reported and stay local to this session.
    pub async fn run(mut self) {
        info!(peer = %self.peer, "client connected");
        let mut forwarded = 0_usize;

        loop {
            let read = match self.idle_timeout {
                Some(limit) => {
                    if let Ok(read) =
                        tokio::time::timeout(limit, self.stream.read(&mut self.buffer)).await
                    {
                        read
                    } else {
                        self.reporter.report(StatusEvent::warning(
                            StatusKind::SessionIoError,
                            format!(
                                "client {} idle for {}s, closing",
                                self.peer,
                                limit.as_secs()
                            ),
                        ));
                        break;
                    }
                }
                None => self.stream.read(&mut self.buffer).await,
            };

            match read {
                Ok(0) => {
                    debug!(peer = %self.peer, "client closed connection");
                    break;
                }
                Ok(n) => {
                    let text = decode_ascii(&self.buffer[..n]);
                    self.sink.forward(text).await;
                    forwarded += 1;
                }
                Err(err) => {
                    let err =
                        AppError::SessionIo(format!("client {} read failed: {err}", self.peer));
                    self.reporter
                        .report(StatusEvent::warning(StatusKind::SessionIoError, err.to_string()));
                    break;
                }
            }
        }

        if let Err(err) = self.stream.shutdown().await {
            debug!(peer = %self.peer, %err, "client socket shutdown failed");
        }
        info!(peer = %self.peer, chunks = forwarded, "client session ended");
    }
}
