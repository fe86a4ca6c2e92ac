//! Unit tests for status events and reporters.

use ghalibvr_relay::status::{
    ChannelReporter, Severity, StatusEvent, StatusKind, StatusReporter, TracingReporter,
};

#[test]
fn constructors_set_severity() {
    assert_eq!(
        StatusEvent::info(StatusKind::Started, "up").severity,
        Severity::Info
    );
    assert_eq!(
        StatusEvent::warning(StatusKind::InvalidStateTransition, "again").severity,
        Severity::Warning
    );
    assert_eq!(
        StatusEvent::error(StatusKind::BindError, "taken").severity,
        Severity::Error
    );
}

#[test]
fn display_tags_severity() {
    let event = StatusEvent::error(StatusKind::ConnectError, "pipe connection error: reset");
    assert_eq!(event.to_string(), "[error] pipe connection error: reset");
}

#[test]
fn serializes_as_snake_case() {
    let event = StatusEvent::info(StatusKind::ConsumerConnected, "attached");
    let json = serde_json::to_value(&event).expect("serializes");
    assert_eq!(json["kind"], "consumer_connected");
    assert_eq!(json["severity"], "info");
    assert_eq!(json["message"], "attached");
}

#[test]
fn channel_reporter_delivers_in_order() {
    let (reporter, mut rx) = ChannelReporter::new();
    reporter.report(StatusEvent::info(StatusKind::Started, "one"));
    reporter.report(StatusEvent::info(StatusKind::Stopped, "two"));

    assert_eq!(rx.try_recv().expect("first").message, "one");
    assert_eq!(rx.try_recv().expect("second").message, "two");
    assert!(rx.try_recv().is_err());
}

#[test]
fn channel_reporter_tolerates_dropped_receiver() {
    let (reporter, rx) = ChannelReporter::new();
    drop(rx);
    reporter.report(StatusEvent::warning(StatusKind::SessionIoError, "ignored"));
}

#[test]
fn tracing_reporter_accepts_every_severity() {
    let reporter = TracingReporter;
    reporter.report(StatusEvent::info(StatusKind::Started, "a"));
    reporter.report(StatusEvent::warning(StatusKind::ConsumerDisconnected, "b"));
    reporter.report(StatusEvent::error(StatusKind::AcceptError, "c"));
}
