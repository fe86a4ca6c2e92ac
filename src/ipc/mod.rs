//! Local IPC layer for the downstream consumer.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that writes forwarded lines to a single attached consumer.

pub mod channel;

use interprocess::local_socket::{GenericNamespaced, Name, ToNsName};

pub use channel::{ChannelState, IpcChannel, LINE_TERMINATOR};

use crate::{AppError, Result};

/// Resolve a pipe identifier into a namespaced local socket name.
///
/// Used by both the server side and consumers so the two always agree.
///
/// # Errors
///
/// Returns `AppError::Config` if the name is not valid for the platform.
pub fn pipe_name(name: &str) -> Result<Name<'static>> {
    name.to_owned()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Config(format!("invalid pipe name '{name}': {err}")))
}
