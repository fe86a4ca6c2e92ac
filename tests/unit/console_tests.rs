//! Unit tests for console command parsing and dispatch.

use std::sync::Arc;

use ghalibvr_relay::console::{self, ConsoleCommand, HELP};
use ghalibvr_relay::relay::{RelayController, RelayState};
use ghalibvr_relay::status::{ChannelReporter, StatusKind};
use ghalibvr_relay::RelayConfig;

#[test]
fn parses_commands_case_insensitively() {
    assert_eq!("start".parse::<ConsoleCommand>().ok(), Some(ConsoleCommand::Start));
    assert_eq!(" STOP ".parse::<ConsoleCommand>().ok(), Some(ConsoleCommand::Stop));
    assert_eq!("Status".parse::<ConsoleCommand>().ok(), Some(ConsoleCommand::Status));
    assert_eq!("?".parse::<ConsoleCommand>().ok(), Some(ConsoleCommand::Help));
    assert_eq!("quit".parse::<ConsoleCommand>().ok(), Some(ConsoleCommand::Exit));
    assert_eq!("exit".parse::<ConsoleCommand>().ok(), Some(ConsoleCommand::Exit));
}

#[test]
fn unknown_command_is_rejected() {
    let err = "launch".parse::<ConsoleCommand>().expect_err("unknown");
    assert!(err.to_string().contains("unknown command: launch"));
}

#[tokio::test]
async fn status_describes_stopped_relay() {
    let (reporter, _events) = ChannelReporter::new();
    let controller = RelayController::new(RelayConfig::default(), Arc::new(reporter));

    let output = console::execute(&controller, ConsoleCommand::Status)
        .await
        .expect("status prints");
    assert_eq!(output, "state: stopped, 0 client session(s)");
}

#[tokio::test]
async fn help_prints_command_list() {
    let (reporter, _events) = ChannelReporter::new();
    let controller = RelayController::new(RelayConfig::default(), Arc::new(reporter));

    let output = console::execute(&controller, ConsoleCommand::Help).await;
    assert_eq!(output.as_deref(), Some(HELP));
}

#[tokio::test]
async fn stop_on_stopped_relay_reports_through_status() {
    let (reporter, mut events) = ChannelReporter::new();
    let controller = RelayController::new(RelayConfig::default(), Arc::new(reporter));

    assert!(console::execute(&controller, ConsoleCommand::Stop)
        .await
        .is_none());
    assert_eq!(controller.state(), RelayState::Stopped);
    assert_eq!(
        events.try_recv().expect("event").kind,
        StatusKind::InvalidStateTransition
    );
}
