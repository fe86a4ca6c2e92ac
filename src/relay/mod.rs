//! TCP side of the relay and the lifecycle controller.
//!
//! - `session`: one accepted client and its read loop.
//! - `acceptor`: the listening socket and accept loop.
//! - `controller`: the start/stop state machine tying the acceptor to the
//!   pipe endpoint.

pub mod acceptor;
pub mod controller;
pub mod session;

pub use acceptor::ConnectionAcceptor;
pub use controller::{RelayController, RelaySink, RelayState, Transition};
pub use session::{decode_ascii, ClientSession, LineSink, SessionSettings};
