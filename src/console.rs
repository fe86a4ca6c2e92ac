//! Line-oriented control surface for the relay binary.
//!
//! Stands in for a tray menu: each line on stdin is one command.

use std::str::FromStr;

use crate::relay::RelayController;
use crate::AppError;

/// Help text printed for the `help` command.
pub const HELP: &str = "commands: start | stop | status | help | exit";

/// A single console command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConsoleCommand {
    /// Start relaying.
    Start,
    /// Stop relaying.
    Stop,
    /// Print the current state.
    Status,
    /// Print the command list.
    Help,
    /// Shut down and exit the process.
    Exit,
}

impl FromStr for ConsoleCommand {
    type Err = AppError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "status" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "exit" | "quit" => Ok(Self::Exit),
            other => Err(AppError::Config(format!("unknown command: {other}"))),
        }
    }
}

/// Run a non-exit command against the controller.
///
/// Returns text to show the operator, if any. Start and stop outcomes
/// arrive through the status reporter instead. `Exit` is left to the
/// caller, which owns the shutdown sequence.
pub async fn execute(controller: &RelayController, command: ConsoleCommand) -> Option<String> {
    match command {
        ConsoleCommand::Start => {
            // Failures are already reported as status events.
            let _ = controller.start().await;
            None
        }
        ConsoleCommand::Stop => {
            controller.stop().await;
            None
        }
        ConsoleCommand::Status => Some(describe(controller).await),
        ConsoleCommand::Help => Some(HELP.to_owned()),
        ConsoleCommand::Exit => None,
    }
}

/// One-line summary of the relay state.
pub async fn describe(controller: &RelayController) -> String {
    let mut summary = format!("state: {}", controller.state());
    if let Some(addr) = controller.tcp_addr().await {
        summary.push_str(&format!(", listening on {addr}"));
    }
    if let Some(consumer) = controller.consumer_state().await {
        summary.push_str(&format!(", pipe {consumer:?}"));
    }
    summary.push_str(&format!(
        ", {} client session(s)",
        controller.active_sessions()
    ));
    summary
}
