#![forbid(unsafe_code)]

//! Local relay forwarding TCP client streams to a named pipe consumer.

pub mod config;
pub mod console;
pub mod errors;
pub mod ipc;
pub mod relay;
pub mod status;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
