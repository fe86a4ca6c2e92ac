//! End-to-end relay tests: TCP client in, pipe consumer out.

use std::collections::BTreeSet;
use std::time::Duration;

use ghalibvr_relay::ipc::{ChannelState, LINE_TERMINATOR};
use ghalibvr_relay::status::StatusKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::test_helpers::{read_line, test_config, TestRelay, WAIT};

#[tokio::test]
async fn client_text_reaches_consumer_as_one_line() {
    let mut relay = TestRelay::started(test_config()).await;
    let mut consumer = relay.attach_consumer().await;

    let mut client = TcpStream::connect(relay.tcp_addr().await)
        .await
        .expect("client connects");
    client.write_all(b"hello").await.expect("client write");

    assert_eq!(
        read_line(&mut consumer).await,
        format!("hello{LINE_TERMINATOR}")
    );

    relay.controller.shutdown().await;
}

#[tokio::test]
async fn separate_reads_become_separate_lines() {
    let mut relay = TestRelay::started(test_config()).await;
    let mut consumer = relay.attach_consumer().await;

    let mut client = TcpStream::connect(relay.tcp_addr().await)
        .await
        .expect("client connects");

    // Wait for each line before sending the next so the two writes cannot
    // coalesce into one read.
    client.write_all(b"a").await.expect("write a");
    assert_eq!(read_line(&mut consumer).await, format!("a{LINE_TERMINATOR}"));
    client.write_all(b"b").await.expect("write b");
    assert_eq!(read_line(&mut consumer).await, format!("b{LINE_TERMINATOR}"));

    relay.controller.shutdown().await;
}

#[tokio::test]
async fn non_ascii_bytes_arrive_as_question_marks() {
    let mut relay = TestRelay::started(test_config()).await;
    let mut consumer = relay.attach_consumer().await;

    let mut client = TcpStream::connect(relay.tcp_addr().await)
        .await
        .expect("client connects");
    client
        .write_all("x=1°".as_bytes())
        .await
        .expect("client write");

    // '°' is two UTF-8 bytes, each outside the ASCII range.
    assert_eq!(
        read_line(&mut consumer).await,
        format!("x=1??{LINE_TERMINATOR}")
    );

    relay.controller.shutdown().await;
}

#[tokio::test]
async fn data_without_consumer_is_read_and_dropped() {
    let mut relay = TestRelay::started(test_config()).await;
    assert_eq!(
        relay.controller.consumer_state().await,
        Some(ChannelState::WaitingForConsumer)
    );

    let mut client = TcpStream::connect(relay.tcp_addr().await)
        .await
        .expect("client connects");
    relay.wait_for_sessions(1).await;
    for _ in 0..10 {
        client.write_all(b"nobody listening").await.expect("write");
    }
    drop(client);

    // The session drains its input and ends cleanly.
    relay.wait_for_sessions(0).await;
    while let Ok(event) = relay.events.try_recv() {
        assert_ne!(event.kind, StatusKind::SessionIoError, "{event}");
    }

    // A consumer attaching afterwards sees only new data.
    let mut consumer = relay.attach_consumer().await;
    let mut client = TcpStream::connect(relay.tcp_addr().await)
        .await
        .expect("second client connects");
    client.write_all(b"fresh").await.expect("write");
    assert_eq!(
        read_line(&mut consumer).await,
        format!("fresh{LINE_TERMINATOR}")
    );

    relay.controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_produce_whole_lines() {
    const CLIENTS: usize = 50;

    let mut relay = TestRelay::started(test_config()).await;
    let mut consumer = relay.attach_consumer().await;
    let addr = relay.tcp_addr().await;

    let mut handles = Vec::with_capacity(CLIENTS);
    for index in 0..CLIENTS {
        handles.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.expect("client connects");
            let payload = format!("client-{index:02}:{}", "x".repeat(64));
            client.write_all(payload.as_bytes()).await.expect("write");
            client.shutdown().await.expect("client shutdown");
            payload
        }));
    }

    let mut expected = BTreeSet::new();
    for handle in handles {
        expected.insert(handle.await.expect("client task"));
    }

    let mut received = BTreeSet::new();
    let mut line = String::new();
    while received.len() < CLIENTS {
        line.clear();
        tokio::time::timeout(WAIT, consumer.read_line(&mut line))
            .await
            .expect("line arrives in time")
            .expect("pipe read");
        let trimmed = line
            .strip_suffix(LINE_TERMINATOR)
            .expect("line is terminated")
            .to_owned();
        assert!(
            received.insert(trimmed.clone()),
            "duplicate or merged line: {trimmed}"
        );
    }

    assert_eq!(received, expected);
    relay.controller.shutdown().await;
}

#[tokio::test]
async fn idle_sessions_close_when_timeout_configured() {
    let config = ghalibvr_relay::RelayConfig {
        idle_timeout_seconds: 1,
        ..test_config()
    };
    let mut relay = TestRelay::started(config).await;

    let _client = TcpStream::connect(relay.tcp_addr().await)
        .await
        .expect("client connects");
    relay.wait_for_sessions(1).await;

    let event = relay.expect_event(StatusKind::SessionIoError).await;
    assert!(event.message.contains("idle"), "{event}");
    relay.wait_for_sessions(0).await;

    relay.controller.shutdown().await;
}

#[tokio::test]
async fn reset_client_fails_alone() {
    let mut relay = TestRelay::started(test_config()).await;
    let mut consumer = relay.attach_consumer().await;
    let addr = relay.tcp_addr().await;

    let mut healthy = TcpStream::connect(addr).await.expect("healthy client");
    let doomed = TcpStream::connect(addr).await.expect("doomed client");
    relay.wait_for_sessions(2).await;

    // Zero linger turns the close into a reset.
    doomed.set_linger(Some(Duration::ZERO)).expect("set linger");
    drop(doomed);

    let event = relay.expect_event(StatusKind::SessionIoError).await;
    assert!(event.message.contains("read failed"), "{event}");
    relay.wait_for_sessions(1).await;

    healthy.write_all(b"still here").await.expect("healthy write");
    assert_eq!(
        read_line(&mut consumer).await,
        format!("still here{LINE_TERMINATOR}")
    );

    relay.controller.shutdown().await;
}
