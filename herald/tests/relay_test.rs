//! End to end tests of the relay against a mock HTTP endpoint
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use herald::{Relay, RelayOptions};
use herald_common::Signal;
use herald_dispatch::{DispatchConfig, Herald, Lifecycle};
use tokio::io::{AsyncWriteExt, BufReader};
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

fn options() -> RelayOptions {
    RelayOptions {
        interval: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(2),
        ..RelayOptions::default()
    }
}

async fn server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/notify"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn relay(server: &MockServer, options: RelayOptions) -> Relay {
    let herald = Herald::new(
        &format!("{}/notify", server.uri()),
        DispatchConfig::default(),
    )
    .unwrap();
    Relay::new(herald, options)
}

async fn bodies(server: &MockServer) -> Vec<String> {
    let mut bodies = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .map(|request| String::from_utf8(request.body).unwrap())
        .collect::<Vec<_>>();
    bodies.sort();
    bodies
}

#[tokio::test]
async fn test_lines_are_relayed_until_end_of_input() {
    let server = server(200).await;
    let relay = relay(&server, options());

    let input = BufReader::new(&b"first\n\nsecond\nthird\n"[..]);
    let report = tokio::time::timeout(Duration::from_secs(5), relay.run(input))
        .await
        .expect("relay did not stop at end of input")
        .unwrap();

    assert!(!report.timed_out);
    assert_eq!(report.remaining, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bodies(&server).await, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_lines_are_batched_per_interval() {
    let server = server(200).await;
    let relay = relay(
        &server,
        RelayOptions {
            max_batch: 2,
            ..options()
        },
    );

    let (mut writer, reader) = tokio::io::duplex(1024);
    let running = tokio::spawn(relay.run(BufReader::new(reader)));

    writer.write_all(b"a\nb\nc\nd\ne\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bodies(&server).await, vec!["a", "b", "c", "d", "e"]);

    drop(writer);
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.flushed, 0);
}

#[tokio::test]
async fn test_shutdown_signal_stops_the_relay() {
    let server = server(200).await;
    let relay = relay(&server, options());
    let signals = relay.signals();

    // Keep the writer alive so only the signal can stop the relay
    let (mut writer, reader) = tokio::io::duplex(1024);
    let running = tokio::spawn(relay.run(BufReader::new(reader)));

    writer.write_all(b"hello\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    signals.send(Signal::Shutdown).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("relay ignored the shutdown signal")
        .unwrap()
        .unwrap();

    assert!(!report.timed_out);
    assert_eq!(bodies(&server).await, vec!["hello"]);
}

#[tokio::test]
async fn test_failures_are_retried_up_to_the_ceiling() {
    let server = server(500).await;
    let relay = relay(
        &server,
        RelayOptions {
            retrials: 2,
            ..options()
        },
    );

    let (mut writer, reader) = tokio::io::duplex(1024);
    let running = tokio::spawn(relay.run(BufReader::new(reader)));

    writer.write_all(b"doomed\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // The first attempt and two retries
    assert_eq!(bodies(&server).await, vec!["doomed"; 3]);

    drop(writer);
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_relay_broadcasts_shutdown_then_finalised() {
    let server = server(200).await;
    let herald = Herald::new(
        &format!("{}/notify", server.uri()),
        DispatchConfig::default(),
    )
    .unwrap();
    let relay = Relay::new(herald, options());
    assert_eq!(relay.herald().state(), Lifecycle::Idle);

    let signals = relay.signals();
    let mut observed = signals.subscribe();

    relay.run(BufReader::new(&b""[..])).await.unwrap();

    assert_eq!(observed.recv().await.unwrap(), Signal::Shutdown);
    assert_eq!(observed.recv().await.unwrap(), Signal::Finalised);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lines_buffered_at_end_of_input_are_all_sent() {
    let input = (0..50).map(|i| format!("line {i}\n")).collect::<String>();

    for _ in 0..20 {
        let server = server(200).await;
        // Nothing is submitted on a tick, only by the shutdown path
        let relay = relay(
            &server,
            RelayOptions {
                interval: Duration::from_secs(60),
                ..options()
            },
        );

        let report = relay
            .run(BufReader::new(std::io::Cursor::new(input.clone().into_bytes())))
            .await
            .unwrap();

        assert!(!report.timed_out);
        assert_eq!(report.remaining, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bodies(&server).await.len(), 50);
    }
}
